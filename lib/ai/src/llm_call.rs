//! LLM Call primitive.
//!
//! Single-shot inference with optional structured output. Every action the
//! dispatcher exposes is one `LlmCall` run through the [`Invoker`].

use crate::backend::{LlmBackend, LlmMessage, LlmRequest, LlmResponse, TokenUsage};
use crate::error::InvokeError;
use crate::invoker::Invoker;
use crate::shape::ShapeDescriptor;
use std::time::Instant;

/// The result of an LLM Call.
#[derive(Debug, Clone)]
pub struct LlmCallResult {
    /// The raw text output.
    pub content: String,
    /// Token usage statistics.
    pub usage: TokenUsage,
    /// Model that generated the response.
    pub model: String,
    /// Wall time including retries and backoff.
    pub latency_ms: u64,
}

impl LlmCallResult {
    /// Creates a result from an LLM response.
    #[must_use]
    pub fn from_response(response: LlmResponse, latency_ms: u64) -> Self {
        Self {
            content: response.content,
            usage: response.usage,
            model: response.model,
            latency_ms,
        }
    }
}

/// Builder for a single LLM call.
#[derive(Debug, Clone, Default)]
pub struct LlmCall {
    prompt: String,
    system_prompt: Option<String>,
    history: Vec<LlmMessage>,
    shape: Option<ShapeDescriptor>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl LlmCall {
    /// Creates a new LLM Call with the given prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Adds a system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Adds earlier conversation turns.
    #[must_use]
    pub fn with_history(mut self, history: Vec<LlmMessage>) -> Self {
        self.history = history;
        self
    }

    /// Asks for output in the given shape.
    #[must_use]
    pub fn with_shape(mut self, shape: ShapeDescriptor) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Caps the length of the answer.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Builds the backend request for this call.
    #[must_use]
    pub fn build_request(&self) -> LlmRequest {
        let mut request = LlmRequest::new(self.prompt.clone()).with_history(self.history.clone());

        if let Some(system) = &self.system_prompt {
            request = request.with_system(system.clone());
        }
        if let Some(shape) = &self.shape {
            request = request.with_shape(shape.clone());
        }
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        request
    }

    /// Runs the call through `invoker`, retrying and failing over as its
    /// policy dictates.
    ///
    /// # Errors
    ///
    /// Returns whatever [`Invoker::run`] gives up with.
    pub async fn execute(
        &self,
        invoker: &Invoker,
        backend: &dyn LlmBackend,
    ) -> Result<LlmCallResult, InvokeError> {
        let request = self.build_request();
        let request = &request;
        let started = Instant::now();

        let response = invoker
            .run(|credential| async move { backend.generate(&credential, request).await })
            .await?;

        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(LlmCallResult::from_response(response, latency_ms))
    }
}
