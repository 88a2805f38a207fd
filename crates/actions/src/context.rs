use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::ActionError;

// ── Action context ───────────────────────────────────────────────────────────

/// Execution-scoped key/value store shared by every step of one plan run.
///
/// A step whose descriptor declares a `context_key` has its return value
/// stored here by the executor; later steps read it back through the handle
/// they receive. A fresh context is created per execution and discarded
/// afterwards, never shared across plans.
#[derive(Debug, Default)]
pub struct ActionContext {
    values: HashMap<String, Value>,
}

impl ActionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ── Arguments ────────────────────────────────────────────────────────────────

/// One coerced argument bound to an action call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: Value,
    pub type_id: String,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: Value, type_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            type_id: type_id.into(),
        }
    }
}

/// The ordered, coerced arguments delivered to an action handler.
///
/// Order matches descriptor declaration order. Optional parameters the plan
/// did not supply are absent, not null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgumentSet {
    args: Vec<Argument>,
}

impl ArgumentSet {
    pub fn new(args: Vec<Argument>) -> Self {
        Self { args }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.iter().find(|a| a.name == name).map(|a| &a.value)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn require_str(&self, name: &str) -> Result<&str, ActionError> {
        self.str(name)
            .ok_or_else(|| ActionError::MissingArgument(name.to_string()))
    }

    pub fn require_i64(&self, name: &str) -> Result<i64, ActionError> {
        self.i64(name)
            .ok_or_else(|| ActionError::MissingArgument(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Argument> {
        self.args.iter()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

impl From<Vec<Argument>> for ArgumentSet {
    fn from(args: Vec<Argument>) -> Self {
        Self::new(args)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_stores_and_reads_values() {
        let mut ctx = ActionContext::new();
        assert!(ctx.is_empty());
        ctx.insert("basket", json!({"items": 2}));
        assert!(ctx.contains("basket"));
        assert_eq!(ctx.get("basket").unwrap()["items"], 2);
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn argument_set_typed_accessors() {
        let args = ArgumentSet::new(vec![
            Argument::new("product", json!("water"), "string"),
            Argument::new("quantity", json!(2), "integer"),
            Argument::new("express", json!(true), "boolean"),
        ]);
        assert_eq!(args.str("product"), Some("water"));
        assert_eq!(args.i64("quantity"), Some(2));
        assert_eq!(args.bool("express"), Some(true));
        assert!(args.get("missing").is_none());
    }

    #[test]
    fn require_accessors_report_missing_arguments() {
        let args = ArgumentSet::default();
        let err = args.require_str("product").unwrap_err();
        assert!(err.to_string().contains("product"));
    }

    #[test]
    fn absent_optional_is_absent_not_null() {
        let args = ArgumentSet::new(vec![Argument::new("product", json!("water"), "string")]);
        assert_eq!(args.len(), 1);
        assert!(args.get("note").is_none());
    }
}
