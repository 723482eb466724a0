//! Input providers.
//!
//! An [`InputProvider`] supplies the input document for each decision. It is
//! owned by the host application and shared with the enforcer, so any mutable
//! state inside a provider is the provider's own concern.

use crate::error::BoxError;

use async_trait::async_trait;
use std::fmt;

/// The input document a policy is evaluated against.
pub type InputDocument = serde_json::Map<String, serde_json::Value>;

/// Capability that gathers the run-time context for a decision.
#[async_trait]
pub trait InputProvider: Send + Sync {
    /// Produce the input document for one decision.
    ///
    /// `params` is a provider-specific slot. The enforcer always passes an
    /// empty slice; providers called from elsewhere may use it.
    async fn get_eval_input(&self, params: &[serde_json::Value]) -> Result<InputDocument, BoxError>;
}

/// Provider that returns the same document for every decision.
#[derive(Debug, Clone, Default)]
pub struct StaticInput {
    document: InputDocument,
}

impl StaticInput {
    /// Create a provider from a document.
    pub fn new(document: InputDocument) -> Self {
        Self { document }
    }

    /// Create a provider from a JSON value, which must be an object.
    pub fn from_json(value: serde_json::Value) -> crate::Result<Self> {
        match value {
            serde_json::Value::Object(document) => Ok(Self::new(document)),
            other => Err(crate::Error::config(format!(
                "input document must be a JSON object, got {}",
                json_type(&other)
            ))),
        }
    }
}

#[async_trait]
impl InputProvider for StaticInput {
    async fn get_eval_input(&self, _params: &[serde_json::Value]) -> Result<InputDocument, BoxError> {
        Ok(self.document.clone())
    }
}

/// Provider backed by a synchronous closure.
pub struct InputFn<F> {
    f: F,
}

impl<F> InputFn<F>
where
    F: Fn(&[serde_json::Value]) -> Result<InputDocument, BoxError> + Send + Sync,
{
    /// Wrap a closure as a provider.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for InputFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> InputProvider for InputFn<F>
where
    F: Fn(&[serde_json::Value]) -> Result<InputDocument, BoxError> + Send + Sync,
{
    async fn get_eval_input(&self, params: &[serde_json::Value]) -> Result<InputDocument, BoxError> {
        (self.f)(params)
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
