//! Error types for the AI crate.
//!
//! Each layer owns its own enum:
//! - `LlmError`: one call against the remote completion service
//! - `InvokeError`: what the retry/failover loop gives up with
//! - `ExtractError`: recovering structured data from model text
//! - `DispatchError`: the named-action boundary, wrapped in a rootcause
//!   `Report` when it leaves the crate
//!
//! Every variant that reaches the transport knows its HTTP status.

use std::fmt;

/// How the invoker should react to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The credential's quota is spent; try the next credential.
    QuotaExceeded,
    /// The service is overloaded; back off and retry the same credential.
    ServiceUnavailable,
    /// Anything else. Propagated as-is.
    Fatal,
}

/// Errors from a single call to the LLM backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// The credential's allotted call volume is exhausted.
    QuotaExceeded {
        retry_after_secs: Option<u64>,
        reason: String,
    },
    /// The service is temporarily overloaded.
    ServiceUnavailable { reason: String },
    /// The request was rejected or could not be sent.
    RequestFailed { status: Option<u16>, reason: String },
    /// The response body could not be decoded.
    ResponseParseFailed { reason: String },
    /// The service refused to answer the prompt.
    ContentBlocked { reason: String },
    /// Timeout waiting for response.
    Timeout,
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl LlmError {
    /// Classifies the error for the retry/failover loop.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::QuotaExceeded { .. } => FailureClass::QuotaExceeded,
            Self::ServiceUnavailable { .. } => FailureClass::ServiceUnavailable,
            _ => FailureClass::Fatal,
        }
    }

    /// HTTP status to report when this error reaches a client.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::QuotaExceeded { .. } => 429,
            Self::ServiceUnavailable { .. } => 503,
            Self::RequestFailed {
                status: Some(status),
                ..
            } if (400..=599).contains(status) => *status,
            Self::Timeout => 504,
            _ => 500,
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuotaExceeded {
                retry_after_secs,
                reason,
            } => {
                write!(f, "quota exceeded: {reason}")?;
                if let Some(secs) = retry_after_secs {
                    write!(f, " (retry after {secs}s)")?;
                }
                Ok(())
            }
            Self::ServiceUnavailable { reason } => {
                write!(f, "LLM service unavailable: {reason}")
            }
            Self::RequestFailed {
                status: Some(status),
                reason,
            } => {
                write!(f, "LLM request failed with status {status}: {reason}")
            }
            Self::RequestFailed {
                status: None,
                reason,
            } => {
                write!(f, "LLM request failed: {reason}")
            }
            Self::ResponseParseFailed { reason } => {
                write!(f, "failed to parse LLM response: {reason}")
            }
            Self::ContentBlocked { reason } => {
                write!(f, "LLM refused the prompt: {reason}")
            }
            Self::Timeout => write!(f, "LLM request timed out"),
            Self::InvalidConfig { reason } => {
                write!(f, "invalid LLM configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for LlmError {}

/// Terminal outcomes of the retry/failover loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// No credential was enrolled, so nothing was attempted.
    NoCredentialsConfigured,
    /// Every enrolled credential reported exhausted quota.
    CredentialsExhausted { enrolled: usize, last: LlmError },
    /// The service stayed unavailable for the whole attempt budget.
    RetriesExhausted { attempts: u32, last: LlmError },
    /// A non-recoverable backend error, passed through unmodified.
    Backend(LlmError),
}

impl InvokeError {
    /// HTTP status to report when this error reaches a client.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NoCredentialsConfigured => 500,
            Self::CredentialsExhausted { .. } => 429,
            Self::RetriesExhausted { .. } => 503,
            Self::Backend(err) => err.status_code(),
        }
    }
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentialsConfigured => {
                write!(f, "no API credentials configured")
            }
            Self::CredentialsExhausted { enrolled, last } => {
                write!(f, "all {enrolled} API credential(s) exhausted their quota: {last}")
            }
            Self::RetriesExhausted { attempts, last } => {
                write!(f, "service still unavailable after {attempts} attempt(s): {last}")
            }
            Self::Backend(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for InvokeError {}

/// Failures recovering structured data from model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// The model returned nothing but whitespace.
    EmptyResponse,
    /// The best candidate text is not valid JSON (or not the requested type).
    MalformedJson { raw: String, reason: String },
    /// The text parsed, but as the wrong top-level kind.
    ShapeMismatch { expected: &'static str, raw: String },
}

impl ExtractError {
    /// The offending text, when there is one.
    #[must_use]
    pub fn raw(&self) -> Option<&str> {
        match self {
            Self::EmptyResponse => None,
            Self::MalformedJson { raw, .. } | Self::ShapeMismatch { raw, .. } => Some(raw),
        }
    }
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyResponse => write!(f, "model returned an empty response"),
            Self::MalformedJson { raw, reason } => {
                write!(f, "model returned malformed JSON ({reason}): {raw}")
            }
            Self::ShapeMismatch { expected, raw } => {
                write!(f, "model response is not a JSON {expected}: {raw}")
            }
        }
    }
}

impl std::error::Error for ExtractError {}

/// Errors at the named-action boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The action name is not one of the fixed set.
    UnknownAction { name: String },
    /// The payload does not fit the action.
    InvalidPayload { action: &'static str, reason: String },
    /// The invoker gave up.
    Invocation(InvokeError),
    /// The model answered, but not with usable structure.
    Extraction(ExtractError),
}

impl DispatchError {
    /// HTTP status to report when this error reaches a client.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownAction { .. } | Self::InvalidPayload { .. } => 400,
            Self::Invocation(err) => err.status_code(),
            Self::Extraction(_) => 500,
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAction { name } => write!(f, "unknown action: {name}"),
            Self::InvalidPayload { action, reason } => {
                write!(f, "invalid payload for action '{action}': {reason}")
            }
            Self::Invocation(err) => err.fmt(f),
            Self::Extraction(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<InvokeError> for DispatchError {
    fn from(err: InvokeError) -> Self {
        Self::Invocation(err)
    }
}

impl From<ExtractError> for DispatchError {
    fn from(err: ExtractError) -> Self {
        Self::Extraction(err)
    }
}
