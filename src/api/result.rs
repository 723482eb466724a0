//! Evaluation result set types.

use serde::{Deserialize, Serialize};

/// Variable bindings produced by a query, keyed by variable name.
pub type Bindings = serde_json::Map<String, serde_json::Value>;

/// The results of evaluating a prepared query against one input document.
///
/// Entries are in the order the engine produced them. An empty set means the
/// query was undefined for the input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    results: Vec<QueryResult>,
}

impl ResultSet {
    /// Create a result set from engine entries.
    pub fn new(results: Vec<QueryResult>) -> Self {
        Self { results }
    }

    /// Number of result entries.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the query produced no results.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Iterate over result entries.
    pub fn iter(&self) -> std::slice::Iter<'_, QueryResult> {
        self.results.iter()
    }

    /// Result entries as a slice.
    pub fn results(&self) -> &[QueryResult] {
        &self.results
    }

    /// Interpret the set as an authorization verdict.
    ///
    /// Allowed only when there is exactly one result, it binds no variables,
    /// and its single expression evaluated to boolean `true`.
    pub fn allowed(&self) -> bool {
        match self.results.as_slice() {
            [only] => {
                only.bindings.is_empty()
                    && matches!(
                        only.expressions.as_slice(),
                        [expr] if expr.value == serde_json::Value::Bool(true)
                    )
            }
            _ => false,
        }
    }
}

impl IntoIterator for ResultSet {
    type Item = QueryResult;
    type IntoIter = std::vec::IntoIter<QueryResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a QueryResult;
    type IntoIter = std::slice::Iter<'a, QueryResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

/// One way the query was satisfied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Values of the query's expressions, in query order
    #[serde(default)]
    pub expressions: Vec<ExpressionValue>,
    /// Values bound to query variables
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub bindings: Bindings,
}

impl QueryResult {
    /// Create a result entry.
    pub fn new(expressions: Vec<ExpressionValue>, bindings: Bindings) -> Self {
        Self {
            expressions,
            bindings,
        }
    }

    /// Value of the last expression in the query.
    pub fn terminal(&self) -> Option<&serde_json::Value> {
        self.expressions.last().map(|e| &e.value)
    }

    /// Value bound to a query variable.
    pub fn binding(&self, name: &str) -> Option<&serde_json::Value> {
        self.bindings.get(name)
    }
}

/// A single evaluated query expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionValue {
    /// Evaluated value
    pub value: serde_json::Value,
    /// Source text of the expression
    pub text: String,
}

impl ExpressionValue {
    /// Create an expression value.
    pub fn new(value: serde_json::Value, text: impl Into<String>) -> Self {
        Self {
            value,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn single(value: serde_json::Value) -> ResultSet {
        ResultSet::new(vec![QueryResult::new(
            vec![ExpressionValue::new(value, "data.p.allow")],
            Bindings::new(),
        )])
    }

    #[test]
    fn test_allowed_true() {
        assert!(single(json!(true)).allowed());
    }

    #[test]
    fn test_not_allowed_for_empty_set() {
        assert!(!ResultSet::default().allowed());
        assert!(ResultSet::default().is_empty());
    }

    #[test]
    fn test_not_allowed_for_non_true_values() {
        assert!(!single(json!(false)).allowed());
        assert!(!single(json!("true")).allowed());
        assert!(!single(json!(1)).allowed());
        assert!(!single(json!({"allow": true})).allowed());
    }

    #[test]
    fn test_not_allowed_with_bindings() {
        let mut bindings = Bindings::new();
        bindings.insert("x".to_string(), json!(true));
        let set = ResultSet::new(vec![QueryResult::new(
            vec![ExpressionValue::new(json!(true), "x = data.p.allow")],
            bindings,
        )]);

        assert!(!set.allowed());
        assert_eq!(set.results()[0].binding("x"), Some(&json!(true)));
    }

    #[test]
    fn test_not_allowed_with_multiple_results() {
        let entry = QueryResult::new(vec![ExpressionValue::new(json!(true), "data.p.allow")], Bindings::new());
        let set = ResultSet::new(vec![entry.clone(), entry]);
        assert_eq!(set.len(), 2);
        assert!(!set.allowed());
    }

    #[test]
    fn test_terminal_expression() {
        let entry = QueryResult::new(
            vec![
                ExpressionValue::new(json!(true), "input.a"),
                ExpressionValue::new(json!("admin"), "input.role"),
            ],
            Bindings::new(),
        );
        assert_eq!(entry.terminal(), Some(&json!("admin")));
    }

    #[test]
    fn test_result_set_serialization() {
        let json = serde_json::to_value(single(json!(true))).unwrap();
        assert_eq!(
            json,
            json!({"results": [{"expressions": [{"value": true, "text": "data.p.allow"}]}]})
        );
    }
}
