use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use planwright_actions::ArgumentSet;
use planwright_config::ConversationSettings;
use planwright_plan::{PendingParam, Plan, PlanStep};

use crate::blob::{BlobCodec, BlobError};
use crate::context::WorkingContext;
use crate::planner::Planner;

// ── State ────────────────────────────────────────────────────────────────────

/// Rolling per-conversation state, reconstructed from the caller's blob each
/// turn and re-serialized afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConversationState {
    /// First user message of the turn chain.
    pub original_instruction: String,
    pub latest_user_message: String,
    /// Outstanding parameters from the last plan, awaiting user values.
    pub pending_params: Vec<PendingParam>,
    /// Name → value pairs the user has supplied so far.
    pub provided_params: Map<String, Value>,
    pub working_context: Option<WorkingContext>,
    /// Prior working contexts, newest last, capped by configuration.
    pub turn_history: Vec<WorkingContext>,
}

impl ConversationState {
    pub fn initial(user_message: impl Into<String>) -> Self {
        let user_message = user_message.into();
        Self {
            original_instruction: user_message.clone(),
            latest_user_message: user_message,
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_params.is_empty()
    }
}

// ── Turn result ──────────────────────────────────────────────────────────────

/// Everything one turn produces: the plan to act on, the next state, and the
/// blob the application should persist for the following turn.
#[derive(Debug, Clone)]
pub struct ConversationTurnResult {
    pub plan: Plan,
    pub state: ConversationState,
    pub blob: Vec<u8>,
    /// Convenience copies for UI consumption.
    pub pending_params: Vec<PendingParam>,
    pub provided_params: Map<String, Value>,
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConversationError {
    /// Blob integrity or migration failure; the conversation must be reset.
    #[error(transparent)]
    Blob(#[from] BlobError),
}

// ── Working-context extraction ───────────────────────────────────────────────

/// Derives an updated working context from an executed-to-be action step.
/// Registered per action id; actions without an extractor leave the context
/// untouched.
pub trait WorkingContextExtractor: Send + Sync {
    fn extract(
        &self,
        action_id: &str,
        arguments: &ArgumentSet,
        prior: Option<&WorkingContext>,
    ) -> Option<WorkingContext>;
}

// ── Manager ──────────────────────────────────────────────────────────────────

/// Per-turn orchestration: decode the prior blob, fold the user reply into
/// provided parameters, formulate a plan, derive the next state, and encode
/// the new blob.
///
/// The manager does not lock: callers serialize turns for a given session.
pub struct ConversationManager {
    planner: Arc<Planner>,
    codec: BlobCodec,
    extractors: HashMap<String, Arc<dyn WorkingContextExtractor>>,
    max_history_size: usize,
}

pub struct ConversationManagerBuilder {
    planner: Arc<Planner>,
    codec: BlobCodec,
    extractors: HashMap<String, Arc<dyn WorkingContextExtractor>>,
    max_history_size: usize,
}

impl ConversationManagerBuilder {
    pub fn new(planner: Arc<Planner>) -> Self {
        Self {
            planner,
            codec: BlobCodec::new(),
            extractors: HashMap::new(),
            max_history_size: 10,
        }
    }

    pub fn from_settings(planner: Arc<Planner>, settings: &ConversationSettings) -> Self {
        Self::new(planner)
            .codec(BlobCodec::new().with_hashing(settings.hash_blobs))
            .max_history_size(settings.max_history_size)
    }

    pub fn codec(mut self, codec: BlobCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn extractor(
        mut self,
        action_id: impl Into<String>,
        extractor: Arc<dyn WorkingContextExtractor>,
    ) -> Self {
        self.extractors.insert(action_id.into(), extractor);
        self
    }

    pub fn max_history_size(mut self, size: usize) -> Self {
        self.max_history_size = size;
        self
    }

    pub fn build(self) -> ConversationManager {
        ConversationManager {
            planner: self.planner,
            codec: self.codec,
            extractors: self.extractors,
            max_history_size: self.max_history_size,
        }
    }
}

impl ConversationManager {
    pub fn builder(planner: Arc<Planner>) -> ConversationManagerBuilder {
        ConversationManagerBuilder::new(planner)
    }

    pub fn codec(&self) -> &BlobCodec {
        &self.codec
    }

    /// Run one conversation turn.
    pub async fn run_turn(
        &self,
        user_message: &str,
        prior_blob: Option<&[u8]>,
    ) -> Result<ConversationTurnResult, ConversationError> {
        let mut state = match prior_blob {
            Some(blob) => self.codec.decode(blob)?,
            None => ConversationState::initial(user_message),
        };
        state.latest_user_message = user_message.to_string();
        if state.original_instruction.is_empty() {
            state.original_instruction = user_message.to_string();
        }
        self.fold_reply(&mut state, user_message);

        let formulation = self.planner.formulate_plan(user_message, &state).await;
        let next = self.derive_next_state(&state, &formulation.plan);
        let blob = self.codec.encode(&next)?;

        debug!(
            pending = next.pending_params.len(),
            provided = next.provided_params.len(),
            "conversation turn complete"
        );
        Ok(ConversationTurnResult {
            pending_params: next.pending_params.clone(),
            provided_params: next.provided_params.clone(),
            plan: formulation.plan,
            blob,
            state: next,
        })
    }

    /// Abandon the conversation: an empty state and the blob for it. Callers
    /// persist the blob (or drop theirs entirely).
    pub fn expire(&self) -> Result<ConversationTurnResult, ConversationError> {
        let state = ConversationState::empty();
        let blob = self.codec.encode(&state)?;
        Ok(ConversationTurnResult {
            plan: Plan::empty(),
            pending_params: vec![],
            provided_params: Map::new(),
            state,
            blob,
        })
    }

    /// When exactly one parameter is outstanding, the user's reply is almost
    /// certainly its value; record it. The merge is advisory: the planner
    /// sees pendings and provided values verbatim and remains the authority
    /// on whether the reply satisfies them.
    fn fold_reply(&self, state: &mut ConversationState, user_message: &str) {
        if let [pending] = state.pending_params.as_slice() {
            let value = user_message.trim();
            if !value.is_empty() {
                state
                    .provided_params
                    .insert(pending.name.clone(), Value::String(value.to_string()));
            }
        }
    }

    fn derive_next_state(&self, state: &ConversationState, plan: &Plan) -> ConversationState {
        let mut next = state.clone();
        // Error and no-action outcomes clear pendings so the next turn
        // starts a fresh attempt; pending steps replace them below.
        next.pending_params.clear();

        for step in &plan.steps {
            match step {
                PlanStep::Action {
                    action_id,
                    arguments,
                    ..
                } => {
                    for argument in arguments.iter() {
                        next.provided_params
                            .insert(argument.name.clone(), argument.value.clone());
                    }
                    self.apply_extractor(&mut next, action_id, arguments);
                }
                PlanStep::Pending {
                    pending_params,
                    provided_params,
                    ..
                } => {
                    next.pending_params.extend(pending_params.iter().cloned());
                    for (name, value) in provided_params {
                        next.provided_params.insert(name.clone(), value.clone());
                    }
                }
                PlanStep::NoAction { .. } | PlanStep::Error { .. } => {}
            }
        }
        next
    }

    fn apply_extractor(
        &self,
        state: &mut ConversationState,
        action_id: &str,
        arguments: &ArgumentSet,
    ) {
        let Some(extractor) = self.extractors.get(action_id) else {
            return;
        };
        let Some(updated) = extractor.extract(action_id, arguments, state.working_context.as_ref())
        else {
            return;
        };
        if let Some(prior) = state.working_context.take() {
            state.turn_history.push(prior);
            if state.turn_history.len() > self.max_history_size {
                let overflow = state.turn_history.len() - self.max_history_size;
                state.turn_history.drain(..overflow);
            }
        }
        state.working_context = Some(updated);
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn initial_state_sets_both_messages() {
        let state = ConversationState::initial("add water");
        assert_eq!(state.original_instruction, "add water");
        assert_eq!(state.latest_user_message, "add water");
        assert!(!state.has_pending());
    }

    #[test]
    fn state_round_trips_through_serde_with_defaults() {
        let decoded: ConversationState = serde_json::from_value(json!({
            "originalInstruction": "add water"
        }))
        .unwrap();
        assert_eq!(decoded.original_instruction, "add water");
        assert!(decoded.pending_params.is_empty());
        assert!(decoded.working_context.is_none());
    }

    #[test]
    fn state_serializes_camel_case() {
        let mut state = ConversationState::initial("hi");
        state.pending_params.push(PendingParam::new("quantity", "How many?"));
        let tree = serde_json::to_value(&state).unwrap();
        assert!(tree.get("latestUserMessage").is_some());
        assert!(tree.get("pendingParams").is_some());
        assert!(tree.get("providedParams").is_some());
    }
}
