//! # Rego Enforcer
//!
//! A policy enforcement point for Rego policies. A policy module is compiled
//! once, together with the query that selects the decision; every decision
//! then gathers a fresh input document from an [`InputProvider`] and
//! evaluates the compiled query against it.
//!
//! ## Features
//!
//! - **One-time preparation**: syntax errors and unresolved query references
//!   fail construction, never a decision
//! - **Two decision APIs**: the raw [`ResultSet`] or a boolean verdict
//! - **Distinct failures**: compilation, input retrieval, evaluation and
//!   cancellation are separate [`Error`] variants
//! - **Cancellation**: every blocking call observes an [`EvalContext`]
//! - **Telemetry**: `tracing` spans per decision and lock-free counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rego_enforcer::{Enforcer, EvalContext, StaticInput};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = EvalContext::background();
//!     let input = StaticInput::from_json(serde_json::json!({ "role": "admin" }))?;
//!
//!     let enforcer = Enforcer::new(
//!         &ctx,
//!         "package p\nallow { input.role == \"admin\" }",
//!         "p.rego",
//!         "data.p.allow",
//!         Arc::new(input),
//!     )
//!     .await?;
//!
//!     match enforcer.validate_allowed(&ctx).await {
//!         Ok(true) => println!("allowed"),
//!         Ok(false) => println!("denied"),
//!         Err(e) => println!("indeterminate: {}", e),
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod api;
pub mod config;
pub mod core;
pub mod error;
pub mod policy;
pub mod telemetry;

// Re-export main types for convenience
pub use api::{
    CancelHandle, Enforcer, EnforcerBuilder, EvalContext, ExpressionValue, InputDocument, InputFn,
    InputProvider, QueryResult, ResultSet, StaticInput,
};
pub use config::Config;
pub use error::{BoxError, CancellationReason, Error, Result};
pub use policy::PolicyModule;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
