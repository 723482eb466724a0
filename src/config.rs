//! Enforcer configuration.
//!
//! Configuration can be built in code, parsed from a YAML or JSON file, or
//! read from `REGO_ENFORCER_*` environment variables. Nested keys use a
//! double underscore, e.g. `REGO_ENFORCER_EVALUATION__TIMEOUT_MS=250`.

use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment variables read by [`Config::from_env`].
pub const ENV_PREFIX: &str = "REGO_ENFORCER";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Decision evaluation settings
    pub evaluation: EvaluationConfig,
    /// Metrics settings
    pub telemetry: TelemetryConfig,
    /// Log output settings
    pub logging: LoggingConfig,
}

/// Settings applied to construction and to every decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Upper bound for a single decision, on top of the caller's context
    pub timeout_ms: Option<u64>,
    /// Reject queries that reference rules or packages the module does not define
    pub strict_references: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            strict_references: true,
        }
    }
}

impl EvaluationConfig {
    /// Per-decision timeout, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Decision metrics settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Whether decision counters are recorded
    pub enabled: bool,
    /// Service name reported alongside metrics
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "rego-enforcer".to_string(),
        }
    }
}

/// Log subscriber settings used by [`crate::telemetry::init_logging`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Parse configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    /// Parse configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::from)
    }

    /// Load configuration from a YAML or JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match extension.to_lowercase().as_str() {
            "json" => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Load configuration from `REGO_ENFORCER_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_environment(None)
    }

    /// Read prefixed variables from `vars` instead of the process
    /// environment when given.
    fn from_environment(vars: Option<::config::Map<String, String>>) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()
            .map_err(|e| Error::config(e.to_string()))?;

        settings
            .try_deserialize::<Config>()
            .map_err(|e| Error::config(e.to_string()))
    }

    /// Check the configuration for values the enforcer cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.evaluation.timeout_ms == Some(0) {
            return Err(Error::config_key(
                "timeout must be greater than zero",
                "evaluation.timeout_ms",
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_key(
                format!("unknown log level: {}", self.logging.level),
                "logging.level",
            ));
        }

        if self.telemetry.enabled && self.telemetry.service_name.trim().is_empty() {
            return Err(Error::config_key(
                "service name must not be empty",
                "telemetry.service_name",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.evaluation.strict_references);
        assert_eq!(config.evaluation.timeout(), None);
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = Config::from_yaml(
            r#"
evaluation:
  timeout_ms: 250
logging:
  level: debug
  json: true
"#,
        )
        .unwrap();

        assert_eq!(config.evaluation.timeout(), Some(Duration::from_millis(250)));
        assert!(config.evaluation.strict_references);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert!(config.telemetry.enabled);
    }

    #[test]
    fn test_from_json() {
        let config = Config::from_json(r#"{"telemetry": {"enabled": false}}"#).unwrap();
        assert!(!config.telemetry.enabled);
        assert_eq!(config.telemetry.service_name, "rego-enforcer");
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.evaluation.timeout_ms = Some(0);
        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("evaluation.timeout_ms")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_unknown_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_environment() {
        let mut vars = ::config::Map::new();
        vars.insert("REGO_ENFORCER_EVALUATION__TIMEOUT_MS".to_string(), "125".to_string());
        vars.insert("REGO_ENFORCER_LOGGING__JSON".to_string(), "true".to_string());
        vars.insert("UNRELATED__TIMEOUT_MS".to_string(), "9".to_string());

        let config = Config::from_environment(Some(vars)).unwrap();

        assert_eq!(config.evaluation.timeout_ms, Some(125));
        assert!(config.evaluation.strict_references);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_environment_empty_is_default() {
        let config = Config::from_environment(Some(::config::Map::new())).unwrap();
        assert_eq!(config, Config::default());
    }
}
