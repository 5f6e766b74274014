//! Prompt templates.
//!
//! Templates use `{{variable_name}}` placeholders. The domain actions keep
//! their wording here instead of scattering `format!` calls.

use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// A prompt template.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    /// Template name (used in logs).
    pub name: String,
    /// Template content with placeholders.
    pub content: String,
    /// Optional system prompt template.
    pub system_prompt: Option<String>,
    /// Variable definitions.
    pub variables: HashMap<String, VariableDefinition>,
}

/// Definition of a template variable.
#[derive(Debug, Clone)]
pub struct VariableDefinition {
    /// Description of what this variable is for.
    pub description: String,
    /// Whether this variable is required.
    pub required: bool,
    /// Default value if not provided.
    pub default: Option<JsonValue>,
}

impl VariableDefinition {
    /// Creates a required variable definition.
    #[must_use]
    pub fn required(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            required: true,
            default: None,
        }
    }

    /// Creates an optional variable definition.
    #[must_use]
    pub fn optional(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            required: false,
            default: None,
        }
    }

    /// Sets a default value.
    #[must_use]
    pub fn with_default(mut self, default: JsonValue) -> Self {
        self.default = Some(default);
        self
    }
}

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

fn replacement(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl PromptTemplate {
    /// Creates a new prompt template.
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            system_prompt: None,
            variables: HashMap::new(),
        }
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Adds a variable definition.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, definition: VariableDefinition) -> Self {
        self.variables.insert(name.into(), definition);
        self
    }

    fn lookup(&self, name: &str, variables: &HashMap<String, JsonValue>) -> Option<String> {
        if let Some(value) = variables.get(name) {
            return Some(replacement(value));
        }
        // Declared but unsupplied: the default, or nothing.
        self.variables
            .get(name)
            .map(|def| def.default.as_ref().map(replacement).unwrap_or_default())
    }

    /// One left-to-right pass; inserted values are never scanned again.
    /// Undeclared, unsupplied placeholders are left as written.
    fn substitute(&self, template: &str, variables: &HashMap<String, JsonValue>) -> String {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find(OPEN) {
            result.push_str(&rest[..start]);
            let after_open = &rest[start + OPEN.len()..];

            let resolved = after_open
                .find(CLOSE)
                .and_then(|end| Some((end, self.lookup(&after_open[..end], variables)?)));

            match resolved {
                Some((end, value)) => {
                    result.push_str(&value);
                    rest = &after_open[end + CLOSE.len()..];
                }
                None => {
                    result.push('{');
                    rest = &rest[start + 1..];
                }
            }
        }

        result.push_str(rest);
        result
    }

    /// Renders the template with the given variables.
    #[must_use]
    pub fn render(&self, variables: &HashMap<String, JsonValue>) -> String {
        self.substitute(&self.content, variables)
    }

    /// Renders the system prompt with the given variables.
    #[must_use]
    pub fn render_system_prompt(&self, variables: &HashMap<String, JsonValue>) -> Option<String> {
        self.system_prompt
            .as_deref()
            .map(|template| self.substitute(template, variables))
    }

    /// Validates that all required variables are provided.
    ///
    /// # Errors
    ///
    /// Returns the sorted names of the missing variables.
    pub fn validate_variables(
        &self,
        variables: &HashMap<String, JsonValue>,
    ) -> Result<(), Vec<String>> {
        let mut missing: Vec<String> = self
            .variables
            .iter()
            .filter(|(_, def)| def.required && def.default.is_none())
            .filter(|(name, _)| !variables.contains_key(*name))
            .map(|(name, _)| name.clone())
            .collect();
        missing.sort();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }
}
