use planwright_actions::ArgumentSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Bound plan types ─────────────────────────────────────────────────────────

/// A parameter awaiting a user-supplied value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingParam {
    pub name: String,
    pub prompt: String,
}

impl PendingParam {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
        }
    }
}

/// One validated, bound plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanStep {
    /// Fully bound: the action exists and every argument coerced cleanly.
    Action {
        action_id: String,
        description: Option<String>,
        arguments: ArgumentSet,
    },
    /// The action is identified but required parameters are missing.
    Pending {
        action_id: String,
        message: Option<String>,
        pending_params: Vec<PendingParam>,
        provided_params: Map<String, Value>,
    },
    /// The request is out of scope; no action matches it.
    NoAction { message: String },
    /// Resolution failed; `reason` is diagnostic, not user-facing.
    Error { reason: String },
}

/// Overall disposition of a plan, derived purely from its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStatus {
    Ready,
    Pending,
    Error,
}

/// The validated, bound representation of an LLM-produced intent.
///
/// Immutable once built by the resolver; consumers read the steps and the
/// derived [`status`](Plan::status).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Narration echoed from the LLM, always safe to display.
    pub assistant_message: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(assistant_message: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            assistant_message: assistant_message.into(),
            steps,
        }
    }

    /// A plan with no steps at all (dry runs, expired conversations).
    pub fn empty() -> Self {
        Self::default()
    }

    /// A single-error-step plan. `assistant_message` should be user-safe;
    /// `reason` carries the diagnostic detail.
    pub fn error(assistant_message: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            assistant_message,
            vec![PlanStep::Error {
                reason: reason.into(),
            }],
        )
    }

    /// Pure function of the step tags.
    ///
    /// Empty plans report `Error`. A plan whose only step is a no-action
    /// marker reports `Ready` here; the executor routes it to the no-action
    /// handler before any step would run (see [`Plan::is_no_action`]).
    pub fn status(&self) -> PlanStatus {
        if self.steps.is_empty() {
            return PlanStatus::Error;
        }
        if self
            .steps
            .iter()
            .any(|s| matches!(s, PlanStep::Error { .. }))
        {
            return PlanStatus::Error;
        }
        if self
            .steps
            .iter()
            .any(|s| matches!(s, PlanStep::Pending { .. }))
        {
            return PlanStatus::Pending;
        }
        PlanStatus::Ready
    }

    /// True when the plan explicitly identifies nothing to do: no steps, or
    /// a sole no-action step.
    pub fn is_no_action(&self) -> bool {
        match self.steps.as_slice() {
            [] => true,
            [PlanStep::NoAction { .. }] => true,
            _ => false,
        }
    }

    /// Names of every parameter awaiting a user value, across all pending
    /// steps, in step order.
    pub fn pending_parameter_names(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                PlanStep::Pending { pending_params, .. } => Some(pending_params),
                _ => None,
            })
            .flatten()
            .map(|p| p.name.clone())
            .collect()
    }

    /// All pending parameters with their prompts.
    pub fn pending_params(&self) -> Vec<PendingParam> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                PlanStep::Pending { pending_params, .. } => Some(pending_params.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// First error-step reason, if any.
    pub fn first_error(&self) -> Option<&str> {
        self.steps.iter().find_map(|s| match s {
            PlanStep::Error { reason } => Some(reason.as_str()),
            _ => None,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use planwright_actions::{Argument, ArgumentSet};
    use serde_json::json;

    fn action_step(id: &str) -> PlanStep {
        PlanStep::Action {
            action_id: id.to_string(),
            description: None,
            arguments: ArgumentSet::new(vec![Argument::new("product", json!("water"), "string")]),
        }
    }

    fn pending_step() -> PlanStep {
        PlanStep::Pending {
            action_id: "addItem".to_string(),
            message: None,
            pending_params: vec![PendingParam::new("quantity", "How many?")],
            provided_params: Map::new(),
        }
    }

    #[test]
    fn empty_plan_is_error_but_no_action() {
        let plan = Plan::empty();
        assert_eq!(plan.status(), PlanStatus::Error);
        assert!(plan.is_no_action());
    }

    #[test]
    fn all_action_steps_is_ready() {
        let plan = Plan::new("ok", vec![action_step("a"), action_step("b")]);
        assert_eq!(plan.status(), PlanStatus::Ready);
        assert!(!plan.is_no_action());
    }

    #[test]
    fn any_pending_step_is_pending() {
        let plan = Plan::new("ok", vec![action_step("a"), pending_step()]);
        assert_eq!(plan.status(), PlanStatus::Pending);
        assert_eq!(plan.pending_parameter_names(), vec!["quantity"]);
    }

    #[test]
    fn error_step_dominates_pending() {
        let plan = Plan::new(
            "ok",
            vec![
                pending_step(),
                PlanStep::Error {
                    reason: "bad".to_string(),
                },
            ],
        );
        assert_eq!(plan.status(), PlanStatus::Error);
        assert_eq!(plan.first_error(), Some("bad"));
    }

    #[test]
    fn sole_no_action_is_not_error() {
        let plan = Plan::new(
            "nothing to do",
            vec![PlanStep::NoAction {
                message: "out of scope".to_string(),
            }],
        );
        assert_ne!(plan.status(), PlanStatus::Error);
        assert!(plan.is_no_action());
    }

    #[test]
    fn status_is_a_pure_function_of_steps() {
        let plan = Plan::new("a", vec![action_step("x")]);
        let relabeled = Plan::new("completely different narration", plan.steps.clone());
        assert_eq!(plan.status(), relabeled.status());
    }
}
