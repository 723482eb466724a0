//! Public API for the enforcer.
//!
//! This module provides the main interface for making authorization
//! decisions: the `Enforcer`, the execution context it observes, input
//! providers and the result set it returns.

mod context;
mod enforcer;
mod input;
mod result;

pub use context::{CancelHandle, EvalContext};
pub use enforcer::{Enforcer, EnforcerBuilder};
pub use input::{InputDocument, InputFn, InputProvider, StaticInput};
pub use result::{Bindings, ExpressionValue, QueryResult, ResultSet};
