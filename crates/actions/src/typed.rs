use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::descriptor::{ActionDescriptor, ActionParam, ParamType};

// ── Errors ───────────────────────────────────────────────────────────────────

/// Failure to turn a raw JSON value into the runtime value a parameter
/// declares. Rendered verbatim into plan error steps by the resolver.
#[derive(Debug, Error)]
pub enum CoerceError {
    #[error("{param} expected {expected}, got {got}")]
    TypeMismatch {
        param: String,
        expected: String,
        got: String,
    },
    #[error("{param} overflows its integer range: {value}")]
    Overflow { param: String, value: String },
    #[error("{param} must be one of [{allowed}]")]
    UnknownVariant { param: String, allowed: String },
    #[error("no type handler registered for '{type_id}' (parameter '{param}')")]
    NoHandler { param: String, type_id: String },
    #[error("{param}: {message}")]
    Invalid { param: String, message: String },
}

// ── Type handlers ────────────────────────────────────────────────────────────

/// Per-type hook pair: optional prompt guidance and coercion of raw JSON
/// into the target runtime value.
///
/// Primitive and list coercion is built in (see [`coerce_value`]); handlers
/// cover domain types such as an embedded query language or a structured
/// address, anything the core resolver should stay ignorant of.
pub trait TypeHandler: Send + Sync {
    /// Canonical type id this handler answers for. Parameters route here via
    /// their `dsl_id` when set, else via an `Object` type id.
    fn type_id(&self) -> &str;

    /// Optional prompt fragment describing how the LLM should render values
    /// of this type.
    fn schema_guidance(&self, param: &ActionParam) -> Option<String> {
        let _ = param;
        None
    }

    fn coerce(&self, param: &ActionParam, raw: &Value) -> Result<Value, CoerceError>;
}

/// Registry of domain type handlers, keyed by canonical type id.
#[derive(Default, Clone)]
pub struct TypeHandlerRegistry {
    handlers: HashMap<String, Arc<dyn TypeHandler>>,
}

impl TypeHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; returns the handler it displaced, if any.
    pub fn register(&mut self, handler: Arc<dyn TypeHandler>) -> Option<Arc<dyn TypeHandler>> {
        self.handlers.insert(handler.type_id().to_string(), handler)
    }

    pub fn find(&self, type_id: &str) -> Option<Arc<dyn TypeHandler>> {
        self.handlers.get(type_id).cloned()
    }

    /// The handler a parameter routes through: `dsl_id` wins over an
    /// `Object` type id; primitive types may also carry a handler purely for
    /// prompt guidance.
    pub fn handler_for(&self, param: &ActionParam) -> Option<Arc<dyn TypeHandler>> {
        if let Some(dsl_id) = &param.dsl_id {
            return self.find(dsl_id);
        }
        self.find(&param.type_id())
    }

    /// Schema guidance for every distinct type referenced by the given
    /// descriptors, in first-seen order.
    pub fn guidance_for(&self, descriptors: &[ActionDescriptor]) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut fragments = vec![];
        for descriptor in descriptors {
            for param in &descriptor.parameters {
                let key = param
                    .dsl_id
                    .clone()
                    .unwrap_or_else(|| param.type_id());
                if !seen.insert(key.clone()) {
                    continue;
                }
                if let Some(handler) = self.find(&key) {
                    if let Some(fragment) = handler.schema_guidance(param) {
                        if !fragment.trim().is_empty() {
                            fragments.push(fragment);
                        }
                    }
                }
            }
        }
        fragments
    }
}

// ── Coercion ─────────────────────────────────────────────────────────────────

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Coerce a raw JSON value to the runtime value `param` declares.
///
/// Primitives parse leniently (the LLM is told to be exact, but a quoted
/// number or a numeric string is accepted); enums match variant names
/// case-insensitively and canonicalize to the declared casing; lists coerce
/// element-wise; a `dsl_id` routes the whole value through the registered
/// handler before anything else.
pub fn coerce_value(
    param: &ActionParam,
    raw: &Value,
    types: &TypeHandlerRegistry,
) -> Result<Value, CoerceError> {
    if let Some(dsl_id) = &param.dsl_id {
        let handler = types.find(dsl_id).ok_or_else(|| CoerceError::NoHandler {
            param: param.name.clone(),
            type_id: dsl_id.clone(),
        })?;
        return handler.coerce(param, raw);
    }
    coerce_kind(param, &param.param_type, raw, types)
}

fn coerce_kind(
    param: &ActionParam,
    kind: &ParamType,
    raw: &Value,
    types: &TypeHandlerRegistry,
) -> Result<Value, CoerceError> {
    match kind {
        ParamType::String => coerce_string(param, raw),
        ParamType::Integer => coerce_integer(param, raw),
        ParamType::Number => coerce_number(param, raw),
        ParamType::Boolean => coerce_boolean(param, raw),
        ParamType::Enum(variants) => coerce_enum(param, variants, raw),
        ParamType::List(element) => {
            let items = raw.as_array().ok_or_else(|| CoerceError::TypeMismatch {
                param: param.name.clone(),
                expected: kind.type_id(),
                got: json_kind(raw).to_string(),
            })?;
            let coerced = items
                .iter()
                .map(|item| coerce_kind(param, element, item, types))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(coerced))
        }
        ParamType::Object(type_id) => {
            let handler = types.find(type_id).ok_or_else(|| CoerceError::NoHandler {
                param: param.name.clone(),
                type_id: type_id.clone(),
            })?;
            handler.coerce(param, raw)
        }
    }
}

fn coerce_string(param: &ActionParam, raw: &Value) -> Result<Value, CoerceError> {
    match raw {
        Value::String(s) => Ok(Value::String(s.clone())),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        other => Err(CoerceError::TypeMismatch {
            param: param.name.clone(),
            expected: "string".to_string(),
            got: json_kind(other).to_string(),
        }),
    }
}

fn coerce_integer(param: &ActionParam, raw: &Value) -> Result<Value, CoerceError> {
    match raw {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(Value::from(i));
            }
            if n.as_u64().is_some() {
                return Err(CoerceError::Overflow {
                    param: param.name.clone(),
                    value: n.to_string(),
                });
            }
            // A float with no fractional part still came over the wire as a
            // float; treat an in-range whole value as the integer it denotes,
            // and an out-of-range whole value as overflow rather than a type
            // mismatch.
            if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 {
                    if f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                        return Ok(Value::from(f as i64));
                    }
                    return Err(CoerceError::Overflow {
                        param: param.name.clone(),
                        value: n.to_string(),
                    });
                }
            }
            Err(CoerceError::TypeMismatch {
                param: param.name.clone(),
                expected: "integer".to_string(),
                got: "number".to_string(),
            })
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Value::from(i));
            }
            let digits = trimmed.strip_prefix(['+', '-']).unwrap_or(trimmed);
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(CoerceError::Overflow {
                    param: param.name.clone(),
                    value: trimmed.to_string(),
                });
            }
            Err(CoerceError::TypeMismatch {
                param: param.name.clone(),
                expected: "integer".to_string(),
                got: "string".to_string(),
            })
        }
        other => Err(CoerceError::TypeMismatch {
            param: param.name.clone(),
            expected: "integer".to_string(),
            got: json_kind(other).to_string(),
        }),
    }
}

fn coerce_number(param: &ActionParam, raw: &Value) -> Result<Value, CoerceError> {
    match raw {
        Value::Number(n) => Ok(Value::Number(n.clone())),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| CoerceError::TypeMismatch {
                param: param.name.clone(),
                expected: "number".to_string(),
                got: "string".to_string(),
            }),
        other => Err(CoerceError::TypeMismatch {
            param: param.name.clone(),
            expected: "number".to_string(),
            got: json_kind(other).to_string(),
        }),
    }
}

fn coerce_boolean(param: &ActionParam, raw: &Value) -> Result<Value, CoerceError> {
    match raw {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(CoerceError::TypeMismatch {
                param: param.name.clone(),
                expected: "boolean".to_string(),
                got: "string".to_string(),
            }),
        },
        other => Err(CoerceError::TypeMismatch {
            param: param.name.clone(),
            expected: "boolean".to_string(),
            got: json_kind(other).to_string(),
        }),
    }
}

fn coerce_enum(param: &ActionParam, variants: &[String], raw: &Value) -> Result<Value, CoerceError> {
    let text = match raw {
        Value::String(s) => s.trim(),
        other => {
            return Err(CoerceError::TypeMismatch {
                param: param.name.clone(),
                expected: "enum".to_string(),
                got: json_kind(other).to_string(),
            });
        }
    };
    variants
        .iter()
        .find(|v| v.eq_ignore_ascii_case(text))
        .map(|v| Value::String(v.clone()))
        .ok_or_else(|| CoerceError::UnknownVariant {
            param: param.name.clone(),
            allowed: variants.join(", "),
        })
}

// ── Tests ────────────────────────────────────────────────────────────────────
