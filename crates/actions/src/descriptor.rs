use serde::{Deserialize, Serialize};

// ── Parameter types ──────────────────────────────────────────────────────────

/// The declared type of an action parameter.
///
/// Primitive variants coerce directly from JSON scalars. `Enum` matches a
/// closed variant set case-insensitively. `List` coerces element-wise.
/// `Object` defers to a registered [`crate::TypeHandler`] keyed by the
/// canonical type id (or the parameter's `dsl_id` when set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Enum(Vec<String>),
    List(Box<ParamType>),
    Object(String),
}

impl ParamType {
    /// Canonical type name, used for prompt rendering and handler lookup.
    pub fn type_id(&self) -> String {
        match self {
            ParamType::String => "string".to_string(),
            ParamType::Integer => "integer".to_string(),
            ParamType::Number => "number".to_string(),
            ParamType::Boolean => "boolean".to_string(),
            ParamType::Enum(_) => "enum".to_string(),
            ParamType::List(element) => format!("list<{}>", element.type_id()),
            ParamType::Object(type_id) => type_id.clone(),
        }
    }
}

// ── Parameter descriptor ─────────────────────────────────────────────────────

/// Describes a single parameter that an action accepts.
///
/// Constraint metadata (`allowed_values`, `allowed_regex`) is enforced by the
/// plan resolver; an empty `allowed_values` list means "no constraint".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionParam {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub param_type: ParamType,
    pub allowed_values: Vec<String>,
    pub allowed_regex: Option<String>,
    pub case_insensitive: bool,
    pub examples: Vec<String>,
    /// Marks the parameter as needing domain-specific deserialization
    /// (e.g. an embedded query language). Routes coercion to the type
    /// handler registered under this id instead of the type id.
    pub dsl_id: Option<String>,
}

impl ActionParam {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            required: true,
            param_type,
            allowed_values: vec![],
            allowed_regex: None,
            case_insensitive: false,
            examples: vec![],
            dsl_id: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Integer)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Boolean)
    }

    pub fn enumeration<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let variants = variants.into_iter().map(Into::into).collect();
        Self::new(name, ParamType::Enum(variants))
    }

    pub fn list(name: impl Into<String>, element: ParamType) -> Self {
        Self::new(name, ParamType::List(Box::new(element)))
    }

    pub fn object(name: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self::new(name, ParamType::Object(type_id.into()))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Marks the parameter optional. Absent optional values are omitted from
    /// the argument set, never defaulted.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_allowed_regex(mut self, pattern: impl Into<String>) -> Self {
        self.allowed_regex = Some(pattern.into());
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    pub fn with_examples<I, S>(mut self, examples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.examples = examples.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dsl_id(mut self, dsl_id: impl Into<String>) -> Self {
        self.dsl_id = Some(dsl_id.into());
        self
    }

    /// Canonical type name for this parameter.
    pub fn type_id(&self) -> String {
        self.param_type.type_id()
    }
}

// ── Action descriptor ────────────────────────────────────────────────────────

/// Static metadata about an action: everything the LLM needs to plan a call
/// and everything the resolver needs to validate one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// Stable identifier referenced by plan steps.
    pub id: String,
    pub description: String,
    /// When set, the executor stores the handler's return value in the
    /// per-execution action context under this key.
    pub context_key: Option<String>,
    /// Parameters in declaration order. Argument order delivered to the
    /// handler matches this order.
    pub parameters: Vec<ActionParam>,
}

impl ActionDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            context_key: None,
            parameters: vec![],
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_context_key(mut self, key: impl Into<String>) -> Self {
        self.context_key = Some(key.into());
        self
    }

    pub fn with_param(mut self, param: ActionParam) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn param(&self, name: &str) -> Option<&ActionParam> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Structural validation, run at registration time so bad descriptors
    /// never reach plan resolution.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("action id must not be blank".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for param in &self.parameters {
            if param.name.trim().is_empty() {
                return Err("parameter name must not be blank".to_string());
            }
            if !seen.insert(param.name.as_str()) {
                return Err(format!("duplicate parameter name '{}'", param.name));
            }
            if !param.allowed_values.is_empty() && param.allowed_regex.is_some() {
                return Err(format!(
                    "parameter '{}' sets both allowed_values and allowed_regex",
                    param.name
                ));
            }
        }
        Ok(())
    }

    /// Registration-time normalization: enum parameters without an explicit
    /// `allowed_values` set inherit their variant names, so the prompt and
    /// the resolver constrain them identically.
    pub(crate) fn normalized(mut self) -> Self {
        for param in &mut self.parameters {
            if let ParamType::Enum(variants) = &param.param_type {
                if param.allowed_values.is_empty() {
                    param.allowed_values = variants.clone();
                }
            }
        }
        self
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
