//! Telemetry and observability for the enforcer.
//!
//! Decision counters are kept in atomics so recording never contends with
//! concurrent decisions. [`init_logging`] installs the `tracing` subscriber
//! for hosts that do not set up their own.

use crate::config::{LoggingConfig, TelemetryConfig};
use crate::{Error, Result};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Telemetry instance for recording decision metrics.
#[derive(Debug)]
pub struct Telemetry {
    /// Configuration
    config: TelemetryConfig,
    /// Boolean decisions by verdict
    decisions_allowed: AtomicU64,
    decisions_denied: AtomicU64,
    /// Raw result-set decisions
    validations: AtomicU64,
    /// Errors by category
    errors_input: AtomicU64,
    errors_evaluation: AtomicU64,
    errors_cancelled: AtomicU64,
    errors_other: AtomicU64,
    /// Total evaluation time in microseconds
    total_evaluation_time_us: AtomicU64,
}

impl Telemetry {
    /// Create a new telemetry instance.
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            config: config.clone(),
            decisions_allowed: AtomicU64::new(0),
            decisions_denied: AtomicU64::new(0),
            validations: AtomicU64::new(0),
            errors_input: AtomicU64::new(0),
            errors_evaluation: AtomicU64::new(0),
            errors_cancelled: AtomicU64::new(0),
            errors_other: AtomicU64::new(0),
            total_evaluation_time_us: AtomicU64::new(0),
        }
    }

    /// Record a successful evaluation.
    pub fn record_validation(&self, duration: Duration) {
        self.validations.fetch_add(1, Ordering::Relaxed);
        self.total_evaluation_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record the verdict of a boolean decision.
    pub fn record_verdict(&self, allowed: bool) {
        if allowed {
            self.decisions_allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.decisions_denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a failed decision.
    pub fn record_error(&self, error: &Error) {
        let counter = match error {
            Error::InputRetrieval { .. } => &self.errors_input,
            Error::Evaluation { .. } => &self.errors_evaluation,
            Error::Cancelled { .. } => &self.errors_cancelled,
            _ => &self.errors_other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics.
    pub fn metrics(&self) -> TelemetryMetrics {
        let validations = self.validations.load(Ordering::Relaxed);
        let total_time_us = self.total_evaluation_time_us.load(Ordering::Relaxed);
        let avg_evaluation_time_ms = if validations > 0 {
            (total_time_us as f64 / validations as f64) / 1000.0
        } else {
            0.0
        };

        let errors_input = self.errors_input.load(Ordering::Relaxed);
        let errors_evaluation = self.errors_evaluation.load(Ordering::Relaxed);
        let errors_cancelled = self.errors_cancelled.load(Ordering::Relaxed);
        let errors_other = self.errors_other.load(Ordering::Relaxed);

        TelemetryMetrics {
            service_name: self.config.service_name.clone(),
            validations,
            decisions_allowed: self.decisions_allowed.load(Ordering::Relaxed),
            decisions_denied: self.decisions_denied.load(Ordering::Relaxed),
            errors_input,
            errors_evaluation,
            errors_cancelled,
            errors_total: errors_input + errors_evaluation + errors_cancelled + errors_other,
            avg_evaluation_time_ms,
        }
    }

    /// Check if telemetry is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get the service name.
    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }
}

/// Metrics collected by telemetry.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TelemetryMetrics {
    /// Service the metrics belong to
    pub service_name: String,
    /// Successful evaluations
    pub validations: u64,
    /// Boolean decisions that allowed
    pub decisions_allowed: u64,
    /// Boolean decisions that did not allow
    pub decisions_denied: u64,
    /// Input provider failures
    pub errors_input: u64,
    /// Evaluation failures
    pub errors_evaluation: u64,
    /// Cancelled or expired decisions
    pub errors_cancelled: u64,
    /// All failed decisions
    pub errors_total: u64,
    /// Average evaluation time in milliseconds
    pub avg_evaluation_time_ms: f64,
}

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::config_key(format!("invalid log filter: {}", e), "logging.level"))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| Error::internal(format!("Failed to set logging subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_creation() {
        let config = TelemetryConfig::default();
        let telemetry = Telemetry::new(&config);
        assert!(telemetry.is_enabled());
        assert_eq!(telemetry.service_name(), "rego-enforcer");
    }

    #[test]
    fn test_record_decisions() {
        let telemetry = Telemetry::new(&TelemetryConfig::default());

        telemetry.record_validation(Duration::from_millis(4));
        telemetry.record_verdict(true);
        telemetry.record_validation(Duration::from_millis(2));
        telemetry.record_verdict(false);
        telemetry.record_validation(Duration::from_millis(3));

        let metrics = telemetry.metrics();
        assert_eq!(metrics.validations, 3);
        assert_eq!(metrics.decisions_allowed, 1);
        assert_eq!(metrics.decisions_denied, 1);
        assert!((metrics.avg_evaluation_time_ms - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_record_errors() {
        let telemetry = Telemetry::new(&TelemetryConfig::default());

        telemetry.record_error(&Error::input_retrieval("lookup failed".into()));
        telemetry.record_error(&Error::evaluation("conflict"));
        telemetry.record_error(&Error::cancelled());
        telemetry.record_error(&Error::internal("join"));

        let metrics = telemetry.metrics();
        assert_eq!(metrics.errors_input, 1);
        assert_eq!(metrics.errors_evaluation, 1);
        assert_eq!(metrics.errors_cancelled, 1);
        assert_eq!(metrics.errors_total, 4);
        assert_eq!(metrics.avg_evaluation_time_ms, 0.0);
    }

    #[test]
    fn test_init_logging_once() {
        let config = LoggingConfig::default();
        let first = init_logging(&config);
        let second = init_logging(&config);
        // Whichever call lost the race to install the global subscriber fails.
        assert!(first.is_err() || second.is_err());
    }
}
