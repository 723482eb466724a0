//! Enforcer implementation.

use super::{EvalContext, InputProvider, ResultSet};
use crate::config::Config;
use crate::core::PreparedQuery;
use crate::policy::PolicyModule;
use crate::telemetry::{Telemetry, TelemetryMetrics};
use crate::{Error, Result};

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// A policy enforcement point for one compiled policy and query.
///
/// The policy is compiled once, when the enforcer is built. Each decision
/// asks the input provider for a fresh input document and evaluates the
/// already compiled query against it. An `Enforcer` holds no mutable state
/// besides its metric counters; share it behind an `Arc` to serve
/// concurrent decisions.
pub struct Enforcer {
    /// Compiled policy and query
    prepared: Arc<PreparedQuery>,
    /// Source of per-decision input
    input: Arc<dyn InputProvider>,
    /// Decision counters
    telemetry: Option<Telemetry>,
    /// Configuration
    config: Config,
}

impl Enforcer {
    /// Create an enforcer builder.
    pub fn builder() -> EnforcerBuilder {
        EnforcerBuilder::new()
    }

    /// Compile `policy_content` under `name`, bind `query` against it and
    /// return a ready enforcer using the default configuration.
    ///
    /// # Returns
    /// * `Ok(Enforcer)` - Ready for decisions
    /// * `Err(Error::PolicyCompilation)` - The module or query did not compile
    /// * `Err(Error::Cancelled)` - `ctx` finished before compilation completed
    pub async fn new(
        ctx: &EvalContext,
        policy_content: impl Into<String>,
        name: impl Into<String>,
        query: impl Into<String>,
        input: Arc<dyn InputProvider>,
    ) -> Result<Self> {
        Self::builder()
            .with_policy(name, policy_content)
            .with_query(query)
            .with_input_provider(input)
            .build(ctx)
            .await
    }

    /// Evaluate the policy for one decision and return the full result set.
    ///
    /// This will:
    /// 1. Fail with `Error::Cancelled` if `ctx` is already done
    /// 2. Ask the input provider for an input document
    /// 3. Evaluate the compiled query against that document
    ///
    /// # Returns
    /// * `Ok(ResultSet)` - The engine's results, unmodified
    /// * `Err(Error::InputRetrieval)` - The provider failed; nothing was evaluated
    /// * `Err(Error::Evaluation)` - The engine could not evaluate this input
    /// * `Err(Error::Cancelled)` - `ctx` was cancelled or its deadline elapsed
    pub async fn validate(&self, ctx: &EvalContext) -> Result<ResultSet> {
        let span = tracing::debug_span!("decision", decision_id = %Uuid::new_v4(), kind = "validate");
        async {
            let results = self.evaluate(ctx).await.map_err(|e| self.fail(e))?;
            debug!(results = results.len(), "decision evaluated");
            Ok::<_, Error>(results)
        }
        .instrument(span)
        .await
    }

    /// Evaluate the policy for one decision and report whether it allows.
    ///
    /// An error means the decision is indeterminate, never that it denied.
    /// On success the result set is read with [`ResultSet::allowed`].
    pub async fn validate_allowed(&self, ctx: &EvalContext) -> Result<bool> {
        let span = tracing::debug_span!("decision", decision_id = %Uuid::new_v4(), kind = "validate_allowed");
        async {
            let results = self.evaluate(ctx).await.map_err(|e| self.fail(e))?;
            let allowed = results.allowed();
            if let Some(ref telemetry) = self.telemetry {
                telemetry.record_verdict(allowed);
            }
            debug!(allowed, "decision evaluated");
            Ok::<_, Error>(allowed)
        }
        .instrument(span)
        .await
    }

    /// Shared decision path: gather input, then evaluate.
    async fn evaluate(&self, ctx: &EvalContext) -> Result<ResultSet> {
        let ctx = match self.config.evaluation.timeout() {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        };
        ctx.check()?;

        let input = ctx
            .run(self.input.get_eval_input(&[]))
            .await?
            .map_err(Error::input_retrieval)?;

        let start = Instant::now();
        let prepared = Arc::clone(&self.prepared);
        let joined = ctx
            .run(tokio::task::spawn_blocking(move || prepared.evaluate(input)))
            .await?;
        let results = joined.map_err(|e| Error::internal(format!("evaluation task failed: {}", e)))??;

        if let Some(ref telemetry) = self.telemetry {
            telemetry.record_validation(start.elapsed());
        }
        Ok(results)
    }

    fn fail(&self, error: Error) -> Error {
        warn!(category = error.category(), error = %error, "decision failed");
        if let Some(ref telemetry) = self.telemetry {
            telemetry.record_error(&error);
        }
        error
    }

    /// The query bound at construction.
    pub fn query(&self) -> &str {
        self.prepared.query()
    }

    /// Name of the compiled module.
    pub fn module_name(&self) -> &str {
        self.prepared.module().name()
    }

    /// Digest of the (module name, policy text, query) triple.
    pub fn fingerprint(&self) -> &str {
        self.prepared.fingerprint()
    }

    /// When the policy was compiled.
    pub fn prepared_at(&self) -> DateTime<Utc> {
        self.prepared.prepared_at()
    }

    /// Configuration the enforcer was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Decision metrics, if telemetry is enabled.
    pub fn metrics(&self) -> Option<TelemetryMetrics> {
        self.telemetry.as_ref().map(|t| t.metrics())
    }
}

impl fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enforcer")
            .field("prepared", &self.prepared)
            .field("telemetry", &self.telemetry.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum ModuleSource {
    Inline(PolicyModule),
    File(PathBuf),
}

/// Builder for creating an Enforcer.
#[derive(Default)]
pub struct EnforcerBuilder {
    source: Option<ModuleSource>,
    query: Option<String>,
    input: Option<Arc<dyn InputProvider>>,
    config: Option<Config>,
}

impl EnforcerBuilder {
    /// Create a new enforcer builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the policy module from source text.
    pub fn with_policy(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.source = Some(ModuleSource::Inline(PolicyModule::new(name, content)));
        self
    }

    /// Set the policy module.
    pub fn with_module(mut self, module: PolicyModule) -> Self {
        self.source = Some(ModuleSource::Inline(module));
        self
    }

    /// Load the policy module from a file when building.
    pub fn with_policy_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(ModuleSource::File(path.into()));
        self
    }

    /// Set the query that selects the decision.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Set the input provider.
    pub fn with_input_provider(mut self, input: Arc<dyn InputProvider>) -> Self {
        self.input = Some(input);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Compile the policy and build the enforcer.
    pub async fn build(self, ctx: &EvalContext) -> Result<Enforcer> {
        ctx.check()?;

        let config = self.config.unwrap_or_default();
        config.validate()?;

        let input = self
            .input
            .ok_or_else(|| Error::config_key("No input provider configured", "input_provider"))?;

        let module = match self.source {
            Some(ModuleSource::Inline(module)) => module,
            Some(ModuleSource::File(path)) => PolicyModule::from_file(path)?,
            None => return Err(Error::compilation("No policy module provided")),
        };

        let query = self
            .query
            .ok_or_else(|| Error::compilation_in("No query provided", module.name()))?;

        let strict = config.evaluation.strict_references;
        let joined = ctx
            .run(tokio::task::spawn_blocking(move || {
                PreparedQuery::prepare(module, query, strict)
            }))
            .await?;
        let prepared = joined.map_err(|e| Error::internal(format!("compilation task failed: {}", e)))??;

        info!(
            module = prepared.module().name(),
            query = prepared.query(),
            fingerprint = prepared.fingerprint(),
            "policy prepared"
        );

        let telemetry = config
            .telemetry
            .enabled
            .then(|| Telemetry::new(&config.telemetry));

        Ok(Enforcer {
            prepared: Arc::new(prepared),
            input,
            telemetry,
            config,
        })
    }
}

impl fmt::Debug for EnforcerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnforcerBuilder")
            .field("source", &self.source)
            .field("query", &self.query)
            .field("input", &self.input.is_some())
            .field("config", &self.config)
            .finish()
    }
}
