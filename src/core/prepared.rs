//! Prepared (compiled) Rego queries.

use super::references::ModuleIndex;
use crate::api::{Bindings, ExpressionValue, InputDocument, QueryResult, ResultSet};
use crate::error::ErrorContext;
use crate::policy::PolicyModule;
use crate::{Error, Result};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regorus::{Engine, QueryResults, Value};
use std::fmt;

/// A policy module compiled together with the query that selects the decision.
///
/// The compiled engine is never evaluated directly. Each evaluation runs on a
/// clone, so a prepared query is read-only after [`PreparedQuery::prepare`]
/// and can serve any number of concurrent decisions. The mutex only guards
/// taking that clone.
pub struct PreparedQuery {
    engine: Mutex<Engine>,
    module: PolicyModule,
    query: String,
    fingerprint: String,
    prepared_at: DateTime<Utc>,
}

impl PreparedQuery {
    /// Compile `module` and bind `query` against it.
    ///
    /// With `strict_references` set, every `data.*` reference in the query
    /// must name the module's package or a rule inside it.
    pub fn prepare(module: PolicyModule, query: impl Into<String>, strict_references: bool) -> Result<Self> {
        module.validate()?;

        let query = query.into();
        if query.trim().is_empty() {
            return Err(Error::compilation_in("Query cannot be empty", module.name()));
        }

        let mut engine = Engine::new();
        engine
            .add_policy(module.name().to_string(), module.content().to_string())
            .map_err(|e| Error::compilation_in(e.to_string(), module.name()))?;

        if strict_references {
            ModuleIndex::scan(module.name(), module.content())?
                .check_query(&query)
                .with_module(module.name())?;
        }

        // Evaluate once without input. Query syntax errors, and rule
        // conflicts that do not depend on input, fail here rather than on
        // the first decision.
        let mut probe = engine.clone();
        probe.eval_query(query.clone(), false).map_err(|e| {
            Error::compilation_in(
                format!("policy cannot be evaluated for query '{}': {}", query, e),
                module.name(),
            )
        })?;

        let fingerprint = fingerprint(&module, &query);

        Ok(Self {
            engine: Mutex::new(engine),
            module,
            query,
            fingerprint,
            prepared_at: Utc::now(),
        })
    }

    /// Evaluate the query against one input document.
    pub fn evaluate(&self, input: InputDocument) -> Result<ResultSet> {
        let input = Value::from_json_str(&serde_json::to_string(&input)?)
            .map_err(|e| Error::evaluation_with_query(format!("invalid input: {}", e), &self.query))?;

        let mut engine = self.engine.lock().clone();
        engine.set_input(input);

        let results = engine
            .eval_query(self.query.clone(), false)
            .map_err(|e| Error::evaluation_with_query(e.to_string(), &self.query))?;

        convert(results).with_query(&self.query)
    }

    /// The query string bound at preparation.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The compiled module.
    pub fn module(&self) -> &PolicyModule {
        &self.module
    }

    /// Hex digest identifying the (module name, policy text, query) triple.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// When the query was prepared.
    pub fn prepared_at(&self) -> DateTime<Utc> {
        self.prepared_at
    }
}

impl fmt::Debug for PreparedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedQuery")
            .field("module", &self.module.name())
            .field("query", &self.query)
            .field("fingerprint", &self.fingerprint)
            .field("prepared_at", &self.prepared_at)
            .finish()
    }
}

fn fingerprint(module: &PolicyModule, query: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(module.name().as_bytes());
    hasher.update(&[0]);
    hasher.update(module.content().as_bytes());
    hasher.update(&[0]);
    hasher.update(query.as_bytes());
    hasher.finalize().to_hex().to_string()
}

fn to_json(value: &Value) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| Error::evaluation(format!("unrepresentable result value: {}", e)))
}

fn convert(results: QueryResults) -> Result<ResultSet> {
    let mut entries = Vec::with_capacity(results.result.len());

    for result in results.result {
        if result.expressions.iter().any(|e| matches!(e.value, Value::Undefined)) {
            continue;
        }

        let expressions = result
            .expressions
            .iter()
            .map(|e| Ok(ExpressionValue::new(to_json(&e.value)?, e.text.to_string())))
            .collect::<Result<Vec<_>>>()?;

        let bindings = match result.bindings {
            Value::Undefined => Bindings::new(),
            ref value => match to_json(value)? {
                serde_json::Value::Object(map) => map,
                _ => Bindings::new(),
            },
        };

        entries.push(QueryResult::new(expressions, bindings));
    }

    Ok(ResultSet::new(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ROLE_POLICY: &str = "package p\n\nallow {\n    input.role == \"admin\"\n}\n";

    fn input(value: serde_json::Value) -> InputDocument {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("input must be an object"),
        }
    }

    fn prepare(policy: &str, query: &str) -> Result<PreparedQuery> {
        PreparedQuery::prepare(PolicyModule::new("p.rego", policy), query, true)
    }

    #[test]
    fn test_prepare_and_evaluate_allow() {
        let prepared = prepare(ROLE_POLICY, "data.p.allow").unwrap();
        let results = prepared.evaluate(input(json!({"role": "admin"}))).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results.results()[0].terminal(), Some(&json!(true)));
        assert!(results.allowed());
    }

    #[test]
    fn test_evaluate_undefined_is_empty() {
        let prepared = prepare(ROLE_POLICY, "data.p.allow").unwrap();
        let results = prepared.evaluate(input(json!({"role": "guest"}))).unwrap();

        assert!(results.is_empty());
        assert!(!results.allowed());
    }

    #[test]
    fn test_evaluate_with_bindings() {
        let policy = "package p\n\nroles[r] {\n    r := input.roles[_]\n}\n";
        let prepared = prepare(policy, "x := data.p.roles").unwrap();
        let results = prepared.evaluate(input(json!({"roles": ["admin"]}))).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results.results()[0].binding("x"), Some(&json!(["admin"])));
        assert!(!results.allowed());
    }

    #[test]
    fn test_prepare_rejects_syntax_error() {
        let err = prepare("package p\nallow {{ input.role ==", "data.p.allow").unwrap_err();
        match err {
            Error::PolicyCompilation { module, .. } => assert_eq!(module.as_deref(), Some("p.rego")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_prepare_rejects_undefined_rule() {
        let err = prepare(ROLE_POLICY, "data.p.undefinedRule").unwrap_err();
        assert!(matches!(err, Error::PolicyCompilation { .. }));
    }

    #[test]
    fn test_prepare_lenient_references() {
        let prepared = PreparedQuery::prepare(
            PolicyModule::new("p.rego", ROLE_POLICY),
            "data.p.undefinedRule",
            false,
        )
        .unwrap();
        assert!(prepared.evaluate(input(json!({}))).unwrap().is_empty());
    }

    #[test]
    fn test_prepare_rejects_empty_query() {
        assert!(matches!(prepare(ROLE_POLICY, "  "), Err(Error::PolicyCompilation { .. })));
    }

    #[test]
    fn test_evaluate_conflict_is_evaluation_error() {
        let policy = "package p\n\nlevel = \"low\" {\n    input.a\n}\n\nlevel = \"high\" {\n    input.b\n}\n";
        let prepared = prepare(policy, "data.p.level").unwrap();

        let err = prepared.evaluate(input(json!({"a": true, "b": true}))).unwrap_err();
        match err {
            Error::Evaluation { query, .. } => assert_eq!(query.as_deref(), Some("data.p.level")),
            other => panic!("unexpected: {:?}", other),
        }

        // The prepared query stays usable after a failed evaluation.
        let results = prepared.evaluate(input(json!({"a": true}))).unwrap();
        assert_eq!(results.results()[0].terminal(), Some(&json!("low")));
    }

    #[test]
    fn test_unconditional_conflict_fails_preparation() {
        let policy = "package p\n\nlevel = \"low\" {\n    true\n}\n\nlevel = \"high\" {\n    true\n}\n";
        let err = prepare(policy, "data.p.level").unwrap_err();
        match err {
            Error::PolicyCompilation { message, module } => {
                assert!(message.starts_with("policy cannot be evaluated for query 'data.p.level'"));
                assert_eq!(module.as_deref(), Some("p.rego"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_fingerprint_is_stable_per_triple() {
        let a = prepare(ROLE_POLICY, "data.p.allow").unwrap();
        let b = prepare(ROLE_POLICY, "data.p.allow").unwrap();
        let c = prepare(ROLE_POLICY, "data.p").unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
