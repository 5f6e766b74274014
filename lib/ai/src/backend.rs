//! LLM backend abstraction.
//!
//! A backend performs exactly one call with the credential it is handed.
//! Retrying, failover and output parsing all live above this trait.

use crate::credential::Credential;
use crate::error::LlmError;
use crate::shape::ShapeDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A request to an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    /// The prompt for this turn.
    pub prompt: String,
    /// System prompt, if any.
    pub system: Option<String>,
    /// Earlier turns, oldest first, supplied by the caller.
    pub history: Vec<LlmMessage>,
    /// Advisory schema for structured output.
    pub shape: Option<ShapeDescriptor>,
    /// Temperature for sampling (0.0 - 2.0).
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// Creates a new simple request with just a prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            history: Vec::new(),
            shape: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Adds a system prompt.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
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

    /// Sets the max tokens.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    /// The role of the message sender.
    pub role: MessageRole,
    /// The content of the message.
    pub content: String,
}

impl LlmMessage {
    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User/human message.
    User,
    /// Assistant/AI message. Accepts the service's own `model` spelling.
    #[serde(alias = "model")]
    Assistant,
}

/// A response from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// The generated text.
    pub content: String,
    /// Token usage statistics.
    pub usage: TokenUsage,
    /// Model that generated the response.
    pub model: String,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of input tokens.
    pub input_tokens: u32,
    /// Number of output tokens.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Returns the total number of tokens.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Trait for LLM backends.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Performs one generation call authenticated with `credential`.
    ///
    /// # Errors
    ///
    /// Implementations must report quota exhaustion as
    /// [`LlmError::QuotaExceeded`] and overload as
    /// [`LlmError::ServiceUnavailable`]; the invoker relies on that split.
    async fn generate(
        &self,
        credential: &Credential,
        request: &LlmRequest,
    ) -> Result<LlmResponse, LlmError>;

    /// Returns the model name.
    fn model(&self) -> &str;
}
