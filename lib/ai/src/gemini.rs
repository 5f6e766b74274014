//! Google Gemini `generateContent` backend.

use crate::backend::{LlmBackend, LlmRequest, LlmResponse, MessageRole, TokenUsage};
use crate::credential::Credential;
use crate::error::LlmError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue, json};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const MAX_ERROR_DETAIL_CHARS: usize = 300;

/// Connection settings for [`GeminiBackend`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API root, without the `/models/...` suffix.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Calls Gemini over HTTPS.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl GeminiBackend {
    /// Creates a backend.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the HTTP client cannot be built.
    pub fn new(config: GeminiConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::InvalidConfig {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/models/{}:generateContent",
                config.base_url.trim_end_matches('/'),
                config.model
            ),
            model: config.model,
        })
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    #[instrument(skip_all, fields(model = %self.model, credential = credential.position()))]
    async fn generate(
        &self,
        credential: &Credential,
        request: &LlmRequest,
    ) -> Result<LlmResponse, LlmError> {
        let started = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", credential.secret())
            .json(&request_body(request))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        debug!(
            status = status.as_u16(),
            latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "LLM service responded"
        );

        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &text));
        }
        parse_response(&text, &self.model)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn transport_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        return LlmError::Timeout;
    }
    LlmError::RequestFailed {
        status: err.status().map(|s| s.as_u16()),
        reason: err.without_url().to_string(),
    }
}

fn role_name(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "model",
    }
}

fn text_content(role: &str, text: &str) -> JsonValue {
    json!({ "role": role, "parts": [{ "text": text }] })
}

/// Builds the `generateContent` request body.
pub(crate) fn request_body(request: &LlmRequest) -> JsonValue {
    let mut contents: Vec<JsonValue> = request
        .history
        .iter()
        .map(|message| text_content(role_name(message.role), &message.content))
        .collect();
    contents.push(text_content("user", &request.prompt));

    let mut body = json!({ "contents": contents });

    if let Some(system) = &request.system {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }

    let mut generation = Map::new();
    if let Some(temperature) = request.temperature {
        generation.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = request.max_tokens {
        generation.insert("maxOutputTokens".to_string(), json!(max_tokens));
    }
    if let Some(shape) = &request.shape {
        generation.insert("responseMimeType".to_string(), json!("application/json"));
        generation.insert("responseSchema".to_string(), shape.as_schema().clone());
    }
    if !generation.is_empty() {
        body["generationConfig"] = JsonValue::Object(generation);
    }

    body
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<JsonValue>,
}

/// Maps a non-2xx response to an error the invoker can classify.
pub(crate) fn classify_failure(status: u16, body: &str) -> LlmError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error)
        .unwrap_or_default();

    let reason = if detail.message.is_empty() {
        truncate(body.trim())
    } else {
        truncate(&detail.message)
    };

    if status == 429 || detail.status == "RESOURCE_EXHAUSTED" {
        LlmError::QuotaExceeded {
            retry_after_secs: retry_delay_secs(&detail.details),
            reason,
        }
    } else if status == 503 || detail.status == "UNAVAILABLE" {
        LlmError::ServiceUnavailable { reason }
    } else {
        LlmError::RequestFailed {
            status: Some(status),
            reason,
        }
    }
}

fn retry_delay_secs(details: &[JsonValue]) -> Option<u64> {
    details
        .iter()
        .filter_map(|detail| detail.get("retryDelay")?.as_str())
        .find_map(|delay| delay.strip_suffix('s')?.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| secs.ceil() as u64)
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_ERROR_DETAIL_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(MAX_ERROR_DETAIL_CHARS).collect();
    format!("{head}… (truncated)")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

/// Decodes a successful `generateContent` body.
pub(crate) fn parse_response(body: &str, model: &str) -> Result<LlmResponse, LlmError> {
    let decoded: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| LlmError::ResponseParseFailed {
            reason: e.to_string(),
        })?;

    let Some(candidate) = decoded.candidates.into_iter().next() else {
        if let Some(reason) = decoded.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(LlmError::ContentBlocked { reason });
        }
        return Err(LlmError::ResponseParseFailed {
            reason: "response contained no candidates".to_string(),
        });
    };

    let content: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if content.is_empty()
        && let Some(reason) = candidate
            .finish_reason
            .filter(|r| matches!(r.as_str(), "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST"))
    {
        return Err(LlmError::ContentBlocked { reason });
    }

    let usage = decoded
        .usage_metadata
        .map(|u| TokenUsage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        content,
        usage,
        model: decoded.model_version.unwrap_or_else(|| model.to_string()),
    })
}
