//! Call shapes behind each named action.
//!
//! A recipe turns a decoded payload into an [`LlmCall`] plus the step that
//! post-processes the model's text. Recipes are pure; nothing here touches
//! the network.

use crate::backend::LlmMessage;
use crate::dispatch::Action;
use crate::llm_call::LlmCall;
use crate::prompt::{PromptTemplate, VariableDefinition};
use crate::shape::ShapeDescriptor;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::ops::RangeInclusive;

const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.0..=2.0;
const ISSUE_COUNT_RANGE: RangeInclusive<u32> = 1..=10;
const DEFAULT_ISSUE_COUNT: u32 = 3;

/// What to do with the model's text.
#[derive(Debug, Clone, PartialEq)]
pub enum PostStep {
    /// Return the text as a JSON string.
    Text,
    /// Extract a value, using the shape as the hint.
    Structured(ShapeDescriptor),
}

/// A call ready to run, and how to finish it.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub call: LlmCall,
    pub post: PostStep,
}

/// A typed payload that knows how to build its call.
pub trait Recipe: DeserializeOwned {
    /// The action this payload belongs to.
    const ACTION: Action;

    /// Validates the payload and builds the call.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the payload is unusable.
    fn prepare(self) -> Result<Prepared, String>;
}

fn require_text(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("'{field}' must not be blank"));
    }
    Ok(())
}

fn check_temperature(temperature: Option<f32>) -> Result<(), String> {
    match temperature {
        Some(t) if !TEMPERATURE_RANGE.contains(&t) => Err(format!(
            "'temperature' must be between {} and {}",
            TEMPERATURE_RANGE.start(),
            TEMPERATURE_RANGE.end()
        )),
        _ => Ok(()),
    }
}

fn check_max_tokens(max_tokens: Option<u32>) -> Result<(), String> {
    match max_tokens {
        Some(0) => Err("'max_tokens' must be at least 1".to_string()),
        _ => Ok(()),
    }
}

/// Caller-tunable settings shared by the free-form actions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sampling {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Sampling {
    fn check(&self) -> Result<(), String> {
        check_temperature(self.temperature)?;
        check_max_tokens(self.max_tokens)
    }

    fn apply(self, mut call: LlmCall) -> LlmCall {
        if let Some(system) = self.system.filter(|s| !s.trim().is_empty()) {
            call = call.with_system_prompt(system);
        }
        if let Some(temperature) = self.temperature {
            call = call.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            call = call.with_max_tokens(max_tokens);
        }
        call
    }
}

fn render(
    template: &PromptTemplate,
    variables: HashMap<String, JsonValue>,
) -> Result<LlmCall, String> {
    template
        .validate_variables(&variables)
        .map_err(|missing| format!("missing {}", missing.join(", ")))?;

    let mut call = LlmCall::new(template.render(&variables));
    if let Some(system) = template.render_system_prompt(&variables) {
        call = call.with_system_prompt(system);
    }
    Ok(call)
}

/// Free-form text generation.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateTextPayload {
    pub prompt: String,
    #[serde(flatten)]
    pub sampling: Sampling,
}

impl Recipe for GenerateTextPayload {
    const ACTION: Action = Action::GenerateText;

    fn prepare(self) -> Result<Prepared, String> {
        require_text("prompt", &self.prompt)?;
        self.sampling.check()?;
        Ok(Prepared {
            call: self.sampling.apply(LlmCall::new(self.prompt)),
            post: PostStep::Text,
        })
    }
}

/// Generation constrained to a caller-supplied schema.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateStructuredPayload {
    pub prompt: String,
    pub schema: ShapeDescriptor,
    #[serde(flatten)]
    pub sampling: Sampling,
}

impl Recipe for GenerateStructuredPayload {
    const ACTION: Action = Action::GenerateStructured;

    fn prepare(self) -> Result<Prepared, String> {
        require_text("prompt", &self.prompt)?;
        self.sampling.check()?;
        if !self.schema.as_schema().is_object() {
            return Err("'schema' must be a JSON object".to_string());
        }

        let call = LlmCall::new(self.prompt).with_shape(self.schema.clone());
        Ok(Prepared {
            call: self.sampling.apply(call),
            post: PostStep::Structured(self.schema),
        })
    }
}

/// One chat turn with caller-held history.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatPayload {
    pub message: String,
    #[serde(default)]
    pub history: Vec<LlmMessage>,
    #[serde(flatten)]
    pub sampling: Sampling,
}

impl Recipe for ChatPayload {
    const ACTION: Action = Action::Chat;

    fn prepare(self) -> Result<Prepared, String> {
        require_text("message", &self.message)?;
        self.sampling.check()?;

        let call = LlmCall::new(self.message).with_history(self.history);
        Ok(Prepared {
            call: self.sampling.apply(call),
            post: PostStep::Text,
        })
    }
}

/// Shape of a generated persona.
#[must_use]
pub fn persona_shape() -> ShapeDescriptor {
    ShapeDescriptor::object([
        ("name", ShapeDescriptor::string("The persona's full name")),
        ("tagline", ShapeDescriptor::string("One-line summary of who they are")),
        ("description", ShapeDescriptor::string("Two or three sentences of background")),
        (
            "personality_traits",
            ShapeDescriptor::array(ShapeDescriptor::string("A single trait")),
        ),
        ("speaking_style", ShapeDescriptor::string("How they talk")),
    ])
}

fn persona_template() -> PromptTemplate {
    PromptTemplate::new(
        "generate_persona",
        "Create an original character persona from this concept: {{concept}}\n\n\
         Overall tone: {{tone}}.\n\n\
         Respond with a single JSON object and nothing else.",
    )
    .with_system_prompt(
        "You are a character designer. You write vivid, internally consistent personas \
         that a writer could pick up and use immediately.",
    )
    .with_variable("concept", VariableDefinition::required("Seed idea for the persona"))
    .with_variable(
        "tone",
        VariableDefinition::optional("Overall tone").with_default(json!("grounded and believable")),
    )
}

/// A persona from a short concept.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratePersonaPayload {
    pub concept: String,
    #[serde(default)]
    pub tone: Option<String>,
}

impl Recipe for GeneratePersonaPayload {
    const ACTION: Action = Action::GeneratePersona;

    fn prepare(self) -> Result<Prepared, String> {
        require_text("concept", &self.concept)?;

        let mut variables = HashMap::from([("concept".to_string(), json!(self.concept.trim()))]);
        if let Some(tone) = self.tone.filter(|t| !t.trim().is_empty()) {
            variables.insert("tone".to_string(), json!(tone.trim()));
        }

        let shape = persona_shape();
        let call = render(&persona_template(), variables)?
            .with_shape(shape.clone())
            .with_temperature(0.9);
        Ok(Prepared {
            call,
            post: PostStep::Structured(shape),
        })
    }
}

/// Shape of a list of suggested issues.
#[must_use]
pub fn issues_shape() -> ShapeDescriptor {
    ShapeDescriptor::array(ShapeDescriptor::object([
        ("title", ShapeDescriptor::string("Short issue title")),
        ("description", ShapeDescriptor::string("What the issue is about")),
        ("priority", ShapeDescriptor::string("One of: low, medium, high")),
    ]))
}

fn issues_template() -> PromptTemplate {
    PromptTemplate::new(
        "suggest_issues",
        "Here is a character persona:\n{{persona}}\n\n\
         Suggest {{count}} distinct issues this persona would raise or care about.{{focus}}\n\n\
         Respond with a JSON array and nothing else.",
    )
    .with_system_prompt("You help writers find conflicts and concerns that fit a character.")
    .with_variable("persona", VariableDefinition::required("Persona description"))
    .with_variable(
        "count",
        VariableDefinition::optional("Number of issues").with_default(json!(DEFAULT_ISSUE_COUNT)),
    )
    .with_variable("focus", VariableDefinition::optional("Topic sentence"))
}

/// Issues a persona would raise.
///
/// `persona` may be a free-text description or a persona object.
#[derive(Debug, Clone, Deserialize)]
pub struct SuggestIssuesPayload {
    pub persona: JsonValue,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub topic: Option<String>,
}

impl Recipe for SuggestIssuesPayload {
    const ACTION: Action = Action::SuggestIssues;

    fn prepare(self) -> Result<Prepared, String> {
        let persona = match self.persona {
            JsonValue::String(text) => {
                require_text("persona", &text)?;
                text
            }
            JsonValue::Object(fields) if !fields.is_empty() => {
                serde_json::to_string_pretty(&fields).map_err(|e| e.to_string())?
            }
            _ => return Err("'persona' must be a description or a persona object".to_string()),
        };

        let count = self.count.unwrap_or(DEFAULT_ISSUE_COUNT);
        if !ISSUE_COUNT_RANGE.contains(&count) {
            return Err(format!(
                "'count' must be between {} and {}",
                ISSUE_COUNT_RANGE.start(),
                ISSUE_COUNT_RANGE.end()
            ));
        }

        let mut variables = HashMap::from([
            ("persona".to_string(), json!(persona)),
            ("count".to_string(), json!(count)),
        ]);
        if let Some(topic) = self.topic.filter(|t| !t.trim().is_empty()) {
            variables.insert("focus".to_string(), json!(format!(" Focus on: {}.", topic.trim())));
        }

        let shape = issues_shape();
        let call = render(&issues_template(), variables)?.with_shape(shape.clone());
        Ok(Prepared {
            call,
            post: PostStep::Structured(shape),
        })
    }
}
