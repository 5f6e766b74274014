//! Centralized server configuration.
//!
//! Loaded once at start-up via the `config` crate from environment
//! variables. Nested keys use a double underscore, so `GEMINI__MODEL` sets
//! `gemini.model`.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};
use persona_studio_ai::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use persona_studio_ai::{CredentialPool, GeminiConfig, LlmError, RetryPolicy};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Completion service settings.
    #[serde(default)]
    pub gemini: GeminiSettings,

    /// Backoff settings for transient failures.
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

/// Completion service settings.
#[derive(Clone, Deserialize)]
pub struct GeminiSettings {
    /// Primary API key.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Key used once the primary one runs out of quota.
    #[serde(default)]
    pub fallback_api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// HTTP timeout per outbound call, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_seconds() -> u64 {
    60
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            fallback_api_key: None,
            model: default_model(),
            base_url: default_base_url(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl fmt::Debug for GeminiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |key: &Option<String>| key.as_ref().map(|_| "<redacted>");
        f.debug_struct("GeminiSettings")
            .field("api_key", &redact(&self.api_key))
            .field("fallback_api_key", &redact(&self.fallback_api_key))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl GeminiSettings {
    /// Enrolls the configured keys, primary first.
    #[must_use]
    pub fn credential_pool(&self) -> CredentialPool {
        CredentialPool::from_secrets(self.api_key.clone(), self.fallback_api_key.clone())
    }

    /// Connection settings for the backend.
    #[must_use]
    pub fn backend_config(&self) -> GeminiConfig {
        GeminiConfig {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            timeout: Duration::from_secs(self.timeout_seconds),
        }
    }
}

/// Backoff settings for transient failures.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Restart the delay when failing over to another credential.
    #[serde(default)]
    pub reset_delay_on_failover: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
            reset_delay_on_failover: false,
        }
    }
}

impl RetrySettings {
    /// Builds the invoker's retry policy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a policy that could never make progress.
    pub fn policy(&self) -> Result<RetryPolicy, LlmError> {
        Ok(RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            self.backoff_factor,
        )?
        .with_delay_reset_on_failover(self.reset_delay_on_failover))
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(environment: config::Environment) -> Result<Self, ConfigError> {
        Self::from_builder(
            config::Config::builder().add_source(environment.separator("__").try_parsing(true)),
        )
    }

    /// Builds configuration from an arbitrary builder.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be merged or deserialized.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }
}
