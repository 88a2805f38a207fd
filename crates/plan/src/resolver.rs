use std::sync::Arc;

use planwright_actions::{
    ActionDescriptor, ActionParam, ActionRegistry, Argument, ArgumentSet, TypeHandlerRegistry,
    coerce_value,
};
use regex::RegexBuilder;
use serde_json::{Map, Value};

use crate::plan::{PendingParam, Plan, PlanStep};
use crate::raw::{RawPlan, RawPlanStep};

// ── Resolver ─────────────────────────────────────────────────────────────────

/// Translates a [`RawPlan`] into a bound [`Plan`].
///
/// Classification is total: every raw step becomes exactly one bound step,
/// and malformed shapes become error steps rather than failures, so the
/// planner decides whether an error-status plan is worth a retry.
/// Resolution is deterministic for a fixed registry.
pub struct PlanResolver {
    actions: Arc<ActionRegistry>,
    types: Arc<TypeHandlerRegistry>,
}

impl PlanResolver {
    pub fn new(actions: Arc<ActionRegistry>, types: Arc<TypeHandlerRegistry>) -> Self {
        Self { actions, types }
    }

    pub fn resolve(&self, raw: &RawPlan) -> Plan {
        let multi_step = raw.steps.len() > 1;
        let steps = raw
            .steps
            .iter()
            .map(|step| self.classify(step, multi_step))
            .collect();
        Plan::new(raw.message.clone().unwrap_or_default(), steps)
    }

    fn classify(&self, raw: &RawPlanStep, multi_step: bool) -> PlanStep {
        if raw.error {
            return PlanStep::Error {
                reason: raw
                    .reason
                    .clone()
                    .unwrap_or_else(|| "unspecified error".to_string()),
            };
        }
        if raw.no_action {
            if raw.action_id.is_some() {
                return PlanStep::Error {
                    reason: "no-action step must not carry an actionId".to_string(),
                };
            }
            if multi_step {
                return PlanStep::Error {
                    reason: "no-action step must appear alone".to_string(),
                };
            }
            return PlanStep::NoAction {
                message: raw
                    .reason
                    .clone()
                    .unwrap_or_else(|| "no action identified".to_string()),
            };
        }
        if let Some(status) = &raw.status {
            if !status.eq_ignore_ascii_case("pending") {
                return PlanStep::Error {
                    reason: format!("unrecognized step status '{status}'"),
                };
            }
            return self.classify_pending(raw);
        }
        self.classify_action(raw)
    }

    fn classify_pending(&self, raw: &RawPlanStep) -> PlanStep {
        let Some(action_id) = raw.action_id.clone() else {
            return PlanStep::Error {
                reason: "pending step is missing an actionId".to_string(),
            };
        };
        if raw.pending_params.is_empty() {
            return PlanStep::Error {
                reason: format!("pending step for '{action_id}' lists no pending parameters"),
            };
        }
        // A parameter cannot be pending and provided at once: that is the
        // invalid-value case and must be surfaced, not silently merged.
        for pending in &raw.pending_params {
            if raw.provided_params.contains_key(&pending.name) {
                return PlanStep::Error {
                    reason: format!(
                        "parameter '{}' is pending but already has a provided value",
                        pending.name
                    ),
                };
            }
        }
        PlanStep::Pending {
            action_id,
            message: raw.description.clone(),
            pending_params: raw
                .pending_params
                .iter()
                .map(|p| PendingParam::new(&p.name, &p.prompt))
                .collect(),
            provided_params: raw.provided_params.clone(),
        }
    }

    fn classify_action(&self, raw: &RawPlanStep) -> PlanStep {
        let Some(action_id) = raw.action_id.clone() else {
            return PlanStep::Error {
                reason: "step has no actionId and no recognized discriminator".to_string(),
            };
        };
        let Some(registered) = self.actions.find(&action_id) else {
            return PlanStep::Error {
                reason: format!("unknown action: {action_id}"),
            };
        };
        let descriptor = &registered.descriptor;

        let mut arguments = vec![];
        let mut missing = vec![];
        for param in &descriptor.parameters {
            let raw_value = raw.parameters.get(&param.name);
            if is_absent(raw_value) {
                if param.required {
                    missing.push(param.name.clone());
                }
                continue;
            }
            let raw_value = raw_value.unwrap_or(&Value::Null);
            let coerced = match coerce_value(param, raw_value, &self.types) {
                Ok(value) => value,
                Err(err) => {
                    return PlanStep::Error {
                        reason: err.to_string(),
                    };
                }
            };
            if let Some(reason) = check_constraints(param, &coerced) {
                return PlanStep::Error { reason };
            }
            arguments.push(Argument::new(&param.name, coerced, param.type_id()));
        }

        if !missing.is_empty() {
            // The directive tells the model never to guess required values;
            // mirror that here instead of fabricating defaults.
            return PlanStep::Pending {
                action_id,
                message: raw.description.clone(),
                pending_params: missing
                    .iter()
                    .map(|name| {
                        PendingParam::new(name, format!("Please provide a value for '{name}'."))
                    })
                    .collect(),
                provided_params: present_params(descriptor, &raw.parameters),
            };
        }

        PlanStep::Action {
            action_id,
            description: raw.description.clone(),
            arguments: ArgumentSet::new(arguments),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Absent, null, or a blank string all count as "no value supplied".
fn is_absent(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// The declared parameters that *were* supplied, kept raw for persistence in
/// a pending step.
fn present_params(descriptor: &ActionDescriptor, parameters: &Map<String, Value>) -> Map<String, Value> {
    descriptor
        .parameters
        .iter()
        .filter_map(|p| {
            let value = parameters.get(&p.name)?;
            if is_absent(Some(value)) {
                None
            } else {
                Some((p.name.clone(), value.clone()))
            }
        })
        .collect()
}

/// Validate `allowed_values` / `allowed_regex` against the coerced value.
/// Returns the error-step reason on violation.
fn check_constraints(param: &ActionParam, value: &Value) -> Option<String> {
    let rendered = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        // Constraints describe scalar renderings; structured values are
        // the province of their type handler.
        _ => return None,
    };

    if !param.allowed_values.is_empty() {
        let matched = param.allowed_values.iter().any(|allowed| {
            if param.case_insensitive {
                allowed.eq_ignore_ascii_case(&rendered)
            } else {
                allowed == &rendered
            }
        });
        if !matched {
            return Some(format!(
                "{} must be one of [{}]",
                param.name,
                param.allowed_values.join(", ")
            ));
        }
    }

    if let Some(pattern) = &param.allowed_regex {
        let regex = RegexBuilder::new(&format!("^(?:{pattern})$"))
            .case_insensitive(param.case_insensitive)
            .build();
        match regex {
            Ok(regex) => {
                if !regex.is_match(&rendered) {
                    return Some(format!("{} must match /{}/", param.name, pattern));
                }
            }
            Err(_) => {
                return Some(format!(
                    "{} has an unusable constraint pattern /{}/",
                    param.name, pattern
                ));
            }
        }
    }

    None
}

// ── Tests ────────────────────────────────────────────────────────────────────
