//! Error types for the enforcer.
//!
//! Failures are split by the lifecycle phase that produced them: policy
//! preparation, input retrieval, evaluation and cancellation. Callers match on
//! the variant to tell "we could not gather context" apart from "the engine
//! could not evaluate the policy".

use std::fmt;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by input providers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for the enforcer.
#[derive(Error, Debug)]
pub enum Error {
    /// The policy module or query could not be prepared for evaluation
    #[error("Policy compilation error: {message}")]
    PolicyCompilation {
        /// Detailed error message
        message: String,
        /// Module name that failed to compile, if applicable
        module: Option<String>,
    },

    /// The input provider failed to produce an input document
    #[error("Input retrieval error: {source}")]
    InputRetrieval {
        /// The provider's error, unchanged
        #[source]
        source: BoxError,
    },

    /// The prepared query could not be evaluated against an input
    #[error("Evaluation error: {message}")]
    Evaluation {
        /// Detailed error message
        message: String,
        /// Query that failed, if applicable
        query: Option<String>,
    },

    /// The execution context was cancelled or its deadline elapsed
    #[error("Operation cancelled: {reason}")]
    Cancelled {
        /// Why the context stopped the operation
        reason: CancellationReason,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Detailed error message
        message: String,
        /// Configuration key that caused the error
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal error (unexpected condition)
    #[error("Internal error: {message}")]
    Internal {
        /// Detailed error message
        message: String,
    },
}

/// Why an execution context stopped an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    /// The context was cancelled explicitly
    Cancelled,
    /// The context's deadline elapsed
    DeadlineExceeded,
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellationReason::Cancelled => write!(f, "context cancelled"),
            CancellationReason::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

impl Error {
    /// Create a policy compilation error.
    pub fn compilation(message: impl Into<String>) -> Self {
        Error::PolicyCompilation {
            message: message.into(),
            module: None,
        }
    }

    /// Create a policy compilation error with module context.
    pub fn compilation_in(message: impl Into<String>, module: impl Into<String>) -> Self {
        Error::PolicyCompilation {
            message: message.into(),
            module: Some(module.into()),
        }
    }

    /// Wrap an input provider failure.
    pub fn input_retrieval(source: BoxError) -> Self {
        Error::InputRetrieval { source }
    }

    /// Create an evaluation error.
    pub fn evaluation(message: impl Into<String>) -> Self {
        Error::Evaluation {
            message: message.into(),
            query: None,
        }
    }

    /// Create an evaluation error with query context.
    pub fn evaluation_with_query(message: impl Into<String>, query: impl Into<String>) -> Self {
        Error::Evaluation {
            message: message.into(),
            query: Some(query.into()),
        }
    }

    /// Create a cancellation error for an explicitly cancelled context.
    pub fn cancelled() -> Self {
        Error::Cancelled {
            reason: CancellationReason::Cancelled,
        }
    }

    /// Create a cancellation error for an elapsed deadline.
    pub fn deadline_exceeded() -> Self {
        Error::Cancelled {
            reason: CancellationReason::DeadlineExceeded,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error with key context.
    pub fn config_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// Check whether repeating the same call may succeed.
    ///
    /// Compilation and evaluation errors are deterministic for a given policy
    /// and input; gathering context or a fresh context may not be.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::InputRetrieval { .. } | Error::Cancelled { .. })
    }

    /// Check if this error came from the execution context.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Get the error category for metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Error::PolicyCompilation { .. } => "compilation",
            Error::InputRetrieval { .. } => "input",
            Error::Evaluation { .. } => "evaluation",
            Error::Cancelled { .. } => "cancellation",
            Error::Config { .. } => "config",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Yaml(_) => "yaml",
            Error::Internal { .. } => "internal",
        }
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Attach the module name to compilation errors.
    fn with_module(self, module: impl Into<String>) -> Result<T>;

    /// Attach the query to evaluation errors.
    fn with_query(self, query: impl Into<String>) -> Result<T>;
}

impl<T> ErrorContext<T> for Result<T> {
    fn with_module(self, module: impl Into<String>) -> Result<T> {
        self.map_err(|e| match e {
            Error::PolicyCompilation { message, .. } => Error::PolicyCompilation {
                message,
                module: Some(module.into()),
            },
            other => other,
        })
    }

    fn with_query(self, query: impl Into<String>) -> Result<T> {
        self.map_err(|e| match e {
            Error::Evaluation { message, .. } => Error::Evaluation {
                message,
                query: Some(query.into()),
            },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_creation() {
        let err = Error::compilation("unexpected token");
        assert!(matches!(err, Error::PolicyCompilation { .. }));
        assert_eq!(err.category(), "compilation");
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::input_retrieval("lookup failed".into()).is_retryable());
        assert!(Error::cancelled().is_retryable());
        assert!(Error::deadline_exceeded().is_retryable());
        assert!(!Error::compilation("bad").is_retryable());
        assert!(!Error::evaluation("bad").is_retryable());
    }

    #[test]
    fn test_input_retrieval_keeps_source() {
        let err = Error::input_retrieval("lookup failed".into());
        assert_eq!(err.to_string(), "Input retrieval error: lookup failed");
        assert_eq!(err.source().map(|s| s.to_string()), Some("lookup failed".to_string()));
    }

    #[test]
    fn test_cancellation_display() {
        assert!(Error::deadline_exceeded().to_string().contains("deadline exceeded"));
        assert!(Error::cancelled().is_cancellation());
    }

    #[test]
    fn test_error_context() {
        let result: Result<()> = Err(Error::compilation("rego_parse_error"));
        match result.with_module("authz.rego") {
            Err(Error::PolicyCompilation { module, .. }) => {
                assert_eq!(module.as_deref(), Some("authz.rego"))
            }
            other => panic!("unexpected: {:?}", other),
        }

        let result: Result<()> = Err(Error::evaluation("type mismatch"));
        match result.with_query("data.p.allow") {
            Err(Error::Evaluation { query, .. }) => assert_eq!(query.as_deref(), Some("data.p.allow")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
