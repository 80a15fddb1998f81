//! Pipeline configuration.
//!
//! Every component receives a [`PipelineConfig`] at construction instead of
//! reading process-wide constants. Values are layered:
//!
//! 1. Built-in defaults
//! 2. An optional YAML file
//! 3. Environment variables ([`PipelineConfig::apply_env`])
//! 4. Explicit overrides from the caller (CLI flags)
//!
//! Call [`PipelineConfig::validate`] before handing the config to a service.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Account id environment variable.
pub const ACCOUNT_ID_ENV: &str = "ACCOUNT_ID";
/// Region override, takes precedence over `AWS_REGION`.
pub const REGION_ENV: &str = "BULWARK_REGION";
/// Standard AWS region variable.
pub const AWS_REGION_ENV: &str = "AWS_REGION";
/// Foundation model override.
pub const FOUNDATION_MODEL_ENV: &str = "BULWARK_FOUNDATION_MODEL";
/// Execution role name override.
pub const ROLE_NAME_ENV: &str = "BULWARK_ROLE_NAME";

lazy_static! {
    static ref ACCOUNT_ID_PATTERN: Regex = Regex::new(r"^\d{12}$").unwrap();
    static ref REGION_PATTERN: Regex = Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d$").unwrap();
}

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Account id is required: set 'ACCOUNT_ID' or pass --account-id")]
    MissingAccountId,

    #[error("Invalid account id '{0}': expected 12 digits")]
    InvalidAccountId(String),

    #[error("Invalid region '{0}'")]
    InvalidRegion(String),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Human-readable durations in config files ("15s", "2m 30s").
mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod option_duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Readiness polling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between agent status fetches
    #[serde(with = "duration_human")]
    pub agent_interval: Duration,

    /// Delay between alias status fetches
    #[serde(with = "duration_human")]
    pub alias_interval: Duration,

    /// Give up after this many fetches (unbounded when unset)
    pub max_attempts: Option<u32>,

    /// Give up after this much waiting (unbounded when unset)
    #[serde(with = "option_duration_human", skip_serializing_if = "Option::is_none")]
    pub max_wait: Option<Duration>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            agent_interval: Duration::from_secs(15),
            alias_interval: Duration::from_secs(5),
            max_attempts: None,
            max_wait: None,
        }
    }
}

/// Streaming options for agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Characters between guardrail re-checks while streaming
    pub guardrail_interval: u32,

    /// Whether the service streams the final response
    pub stream_final_response: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            guardrail_interval: 20,
            stream_final_response: false,
        }
    }
}

/// Configuration shared by every pipeline component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Region the resources live in
    pub region: String,

    /// Foundation model identifier the agent is bound to
    pub foundation_model: String,

    /// Caller's 12-digit account id
    pub account_id: Option<String>,

    /// Execution role name
    pub role_name: String,

    /// Inline policy name attached to the role
    pub role_policy_name: String,

    /// Prefix for generated guardrail names
    pub guardrail_name_prefix: String,

    /// Prefix for generated agent names
    pub agent_name_prefix: String,

    /// Alias created for the prepared agent
    pub alias_name: String,

    /// Instruction text given to the agent
    pub agent_instruction: String,

    /// How long the service keeps chat context
    #[serde(with = "duration_human")]
    pub idle_session_ttl: Duration,

    /// Eventual-consistency window after role creation.
    ///
    /// This is a blind wait, not a readiness check: IAM offers no status to
    /// poll, so a freshly created role may be rejected by the agent service
    /// for a few seconds.
    #[serde(with = "duration_human")]
    pub role_propagation_delay: Duration,

    pub polling: PollingConfig,

    pub streaming: StreamingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            foundation_model: "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
            account_id: None,
            role_name: "BedrockAgentExecutionRole".to_string(),
            role_policy_name: "BedrockAgentPermissions".to_string(),
            guardrail_name_prefix: "demo-guardrail".to_string(),
            agent_name_prefix: "demo-agent-guardrails".to_string(),
            alias_name: "demo".to_string(),
            agent_instruction: "You are a friendly music bot.  Obey the guardrail.".to_string(),
            idle_session_ttl: Duration::from_secs(300),
            role_propagation_delay: Duration::from_secs(10),
            polling: PollingConfig::default(),
            streaming: StreamingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a config from YAML. Missing fields keep their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a config file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// `BULWARK_REGION` wins over `AWS_REGION`. Empty values are ignored.
    pub fn apply_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(account) = get(ACCOUNT_ID_ENV) {
            self.account_id = Some(account.trim().to_string());
        }
        if let Some(region) = get(REGION_ENV).or_else(|| get(AWS_REGION_ENV)) {
            self.region = region;
        }
        if let Some(model) = get(FOUNDATION_MODEL_ENV) {
            self.foundation_model = model;
        }
        if let Some(role) = get(ROLE_NAME_ENV) {
            self.role_name = role;
        }
    }

    /// The account id, or an error if none was configured.
    pub fn account_id(&self) -> Result<&str, ConfigError> {
        self.account_id
            .as_deref()
            .ok_or(ConfigError::MissingAccountId)
    }

    /// Check every setting a service call depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let account = self.account_id()?;
        if !ACCOUNT_ID_PATTERN.is_match(account) {
            return Err(ConfigError::InvalidAccountId(account.to_string()));
        }

        if !REGION_PATTERN.is_match(&self.region) {
            return Err(ConfigError::InvalidRegion(self.region.clone()));
        }

        let required = [
            ("foundation_model", &self.foundation_model),
            ("role_name", &self.role_name),
            ("role_policy_name", &self.role_policy_name),
            ("guardrail_name_prefix", &self.guardrail_name_prefix),
            ("agent_name_prefix", &self.agent_name_prefix),
            ("alias_name", &self.alias_name),
            ("agent_instruction", &self.agent_instruction),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
        }

        // IAM role names: 1-64 chars of [\w+=,.@-]
        if self.role_name.len() > 64 {
            return Err(ConfigError::Invalid {
                field: "role_name",
                reason: "at most 64 characters".to_string(),
            });
        }

        if self.idle_session_ttl < Duration::from_secs(60)
            || self.idle_session_ttl > Duration::from_secs(3600)
        {
            return Err(ConfigError::Invalid {
                field: "idle_session_ttl",
                reason: "must be between 60s and 1h".to_string(),
            });
        }

        if self.polling.agent_interval.is_zero() || self.polling.alias_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "polling",
                reason: "poll intervals must be non-zero".to_string(),
            });
        }

        if self.polling.max_attempts == Some(0) {
            return Err(ConfigError::Invalid {
                field: "polling.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.streaming.guardrail_interval == 0 {
            return Err(ConfigError::Invalid {
                field: "streaming.guardrail_interval",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}
