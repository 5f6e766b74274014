//! Resilient LLM invocation for persona-studio.
//!
//! The pieces, bottom up:
//!
//! - **CredentialPool**: API keys in failover order with a shared active index
//! - **Invoker**: retries overload with exponential backoff and fails over to
//!   the next credential on quota exhaustion
//! - **LLM Call**: single-shot inference with optional structured output
//! - **Extractor**: recovers JSON from text that may be fenced or wrapped
//! - **ActionDispatcher**: the fixed set of named actions clients can request

pub mod backend;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod gemini;
pub mod invoker;
pub mod llm_call;
pub mod prompt;
pub mod recipe;
pub mod shape;

pub use backend::{LlmBackend, LlmMessage, LlmRequest, LlmResponse, MessageRole, TokenUsage};
pub use credential::{Credential, CredentialPool};
pub use dispatch::{Action, ActionDispatcher};
pub use error::{DispatchError, ExtractError, FailureClass, InvokeError, LlmError};
pub use extract::{extract, extract_typed};
pub use gemini::{GeminiBackend, GeminiConfig};
pub use invoker::{Invoker, RetryPolicy};
pub use llm_call::{LlmCall, LlmCallResult};
pub use prompt::{PromptTemplate, VariableDefinition};
pub use recipe::{PostStep, Prepared, Recipe};
pub use shape::{ShapeDescriptor, ShapeKind};
