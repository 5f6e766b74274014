//! Named actions and the dispatcher that runs them.

use crate::backend::LlmBackend;
use crate::error::DispatchError;
use crate::extract::extract;
use crate::invoker::Invoker;
use crate::recipe::{
    ChatPayload, GeneratePersonaPayload, GenerateStructuredPayload, GenerateTextPayload, PostStep,
    Prepared, Recipe, SuggestIssuesPayload,
};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// The fixed set of actions a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    GenerateText,
    GenerateStructured,
    Chat,
    GeneratePersona,
    SuggestIssues,
}

impl Action {
    /// Every action, in a stable order.
    pub const ALL: [Self; 5] = [
        Self::GenerateText,
        Self::GenerateStructured,
        Self::Chat,
        Self::GeneratePersona,
        Self::SuggestIssues,
    ];

    /// Wire name of the action.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenerateText => "generate_text",
            Self::GenerateStructured => "generate_structured",
            Self::Chat => "chat",
            Self::GeneratePersona => "generate_persona",
            Self::SuggestIssues => "suggest_issues",
        }
    }

    /// Decodes `payload` for this action and builds its call.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPayload` when the payload does not decode or fails
    /// validation.
    pub fn prepare(self, payload: JsonValue) -> Result<Prepared, DispatchError> {
        match self {
            Self::GenerateText => prepare::<GenerateTextPayload>(payload),
            Self::GenerateStructured => prepare::<GenerateStructuredPayload>(payload),
            Self::Chat => prepare::<ChatPayload>(payload),
            Self::GeneratePersona => prepare::<GeneratePersonaPayload>(payload),
            Self::SuggestIssues => prepare::<SuggestIssuesPayload>(payload),
        }
    }
}

fn prepare<R: Recipe>(payload: JsonValue) -> Result<Prepared, DispatchError> {
    let invalid = |reason: String| DispatchError::InvalidPayload {
        action: R::ACTION.as_str(),
        reason,
    };
    let typed: R = serde_json::from_value(payload).map_err(|e| invalid(e.to_string()))?;
    typed.prepare().map_err(invalid)
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| DispatchError::UnknownAction {
                name: s.to_string(),
            })
    }
}

/// Runs named actions against one backend through one invoker.
///
/// Cloning shares the invoker's credential pool.
#[derive(Clone)]
pub struct ActionDispatcher {
    invoker: Invoker,
    backend: Arc<dyn LlmBackend>,
}

impl ActionDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(invoker: Invoker, backend: Arc<dyn LlmBackend>) -> Self {
        Self { invoker, backend }
    }

    /// The invoker in use.
    #[must_use]
    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    /// Runs the action called `name` with `payload`.
    ///
    /// Text actions return a JSON string; structured actions return the
    /// extracted value.
    ///
    /// # Errors
    ///
    /// - `UnknownAction` / `InvalidPayload` before any call is made
    /// - `Invocation` when the invoker gives up
    /// - `Extraction` when a structured answer cannot be recovered
    #[instrument(skip(self, payload), fields(model = self.backend.model()))]
    pub async fn dispatch(
        &self,
        name: &str,
        payload: JsonValue,
    ) -> persona_studio_core::Result<JsonValue, DispatchError> {
        let action: Action = name.parse()?;
        let Prepared { call, post } = action.prepare(payload)?;

        let result = call
            .execute(&self.invoker, self.backend.as_ref())
            .await
            .map_err(DispatchError::from)?;

        info!(
            %action,
            model = %result.model,
            latency_ms = result.latency_ms,
            tokens = result.usage.total(),
            "action completed"
        );

        match post {
            PostStep::Text => Ok(JsonValue::String(result.content)),
            PostStep::Structured(shape) => {
                let value = extract(&result.content, Some(&shape)).map_err(|e| {
                    warn!(%action, error = %e, "model output could not be parsed");
                    DispatchError::from(e)
                })?;
                Ok(value)
            }
        }
    }
}
