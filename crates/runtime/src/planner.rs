use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use planwright_actions::{ActionRegistry, TypeHandlerRegistry};
use planwright_config::PlannerSettings;
use planwright_llm::{ChatClient, HttpChatClient};
use planwright_plan::{Plan, PlanResolver, PlanStatus, parse_raw_plan};

use crate::conversation::ConversationState;
use crate::prompt::{
    Persona, PromptContributor, PromptInputs, PromptPreview, build_prompt, truncate_for_prompt,
};

// ── Metrics ──────────────────────────────────────────────────────────────────

/// How one LLM attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Success,
    ValidationFailed,
    ParseFailed,
    NetworkError,
}

/// One attempt against one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub model_id: String,
    pub tier_index: usize,
    /// 1-based within the tier.
    pub attempt_within_tier: u32,
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
    pub error_details: Option<String>,
}

/// The full attempt history of one formulation, across all tiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanningMetrics {
    /// Model id that produced the accepted plan, if any attempt succeeded.
    pub winning_model: Option<String>,
    pub attempts: Vec<AttemptRecord>,
}

impl PlanningMetrics {
    pub fn total_attempts(&self) -> usize {
        self.attempts.len()
    }
}

/// Everything a formulation produces: the raw response that won (if any),
/// the bound plan, the optionally captured prompt, and the metrics.
#[derive(Debug, Clone)]
pub struct PlanFormulationResult {
    pub response: Option<String>,
    pub plan: Plan,
    pub preview: Option<PromptPreview>,
    pub metrics: PlanningMetrics,
}

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PlannerConfigError {
    #[error("default client already configured")]
    DuplicateDefaultClient,
    #[error("a fallback client requires a default client")]
    FallbackWithoutDefault,
}

/// One chat-client tier with its retry budget.
struct PlannerTier {
    client: Arc<dyn ChatClient>,
    max_attempts: u32,
    model_id: String,
}

type PromptHook = Arc<dyn Fn(&PromptPreview) + Send + Sync>;

/// Builder for an immutable [`Planner`]. A planner with no clients is legal
/// and runs in dry-run mode: every formulation returns the assembled prompt
/// and an empty plan.
pub struct PlannerBuilder {
    actions: Arc<ActionRegistry>,
    types: Arc<TypeHandlerRegistry>,
    default_tier: Option<PlannerTier>,
    fallback_tiers: Vec<PlannerTier>,
    duplicate_default: bool,
    persona: Option<Persona>,
    contributors: Vec<Arc<dyn PromptContributor>>,
    prompt_context: BTreeMap<String, String>,
    literal_contributions: Vec<String>,
    tools: Vec<Value>,
    capture_prompts: bool,
    prompt_hook: Option<PromptHook>,
}

impl PlannerBuilder {
    pub fn new(actions: Arc<ActionRegistry>) -> Self {
        Self {
            actions,
            types: Arc::new(TypeHandlerRegistry::new()),
            default_tier: None,
            fallback_tiers: vec![],
            duplicate_default: false,
            persona: None,
            contributors: vec![],
            prompt_context: BTreeMap::new(),
            literal_contributions: vec![],
            tools: vec![],
            capture_prompts: false,
            prompt_hook: None,
        }
    }

    /// Build the tier list from settings: the first configured tier becomes
    /// the default, the rest fallbacks, each backed by an HTTP client.
    pub fn from_settings(actions: Arc<ActionRegistry>, settings: &PlannerSettings) -> Self {
        let mut builder = Self::new(actions).capture_prompts(settings.capture_prompts);
        for (index, tier) in settings.tiers.iter().enumerate() {
            let mut client = HttpChatClient::new(&tier.base_url, &tier.model);
            if !tier.api_key_env.is_empty() {
                client = client.with_api_key_env(&tier.api_key_env);
            }
            let client: Arc<dyn ChatClient> = Arc::new(client);
            builder = if index == 0 {
                builder.default_client(client, tier.max_attempts, &tier.model)
            } else {
                builder.fallback_client(client, tier.max_attempts, &tier.model)
            };
        }
        builder
    }

    /// The first tier tried every turn. Must be configured at most once.
    pub fn default_client(
        mut self,
        client: Arc<dyn ChatClient>,
        max_attempts: u32,
        model_id: impl Into<String>,
    ) -> Self {
        if self.default_tier.is_some() {
            self.duplicate_default = true;
            return self;
        }
        self.default_tier = Some(PlannerTier {
            client,
            max_attempts: max_attempts.max(1),
            model_id: model_id.into(),
        });
        self
    }

    /// An additional tier, tried in registration order after the default is
    /// exhausted.
    pub fn fallback_client(
        mut self,
        client: Arc<dyn ChatClient>,
        max_attempts: u32,
        model_id: impl Into<String>,
    ) -> Self {
        self.fallback_tiers.push(PlannerTier {
            client,
            max_attempts: max_attempts.max(1),
            model_id: model_id.into(),
        });
        self
    }

    pub fn type_handlers(mut self, types: Arc<TypeHandlerRegistry>) -> Self {
        self.types = types;
        self
    }

    pub fn persona(mut self, persona: Persona) -> Self {
        self.persona = Some(persona);
        self
    }

    pub fn contributor(mut self, contributor: Arc<dyn PromptContributor>) -> Self {
        self.contributors.push(contributor);
        self
    }

    pub fn prompt_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.prompt_context.insert(key.into(), value.into());
        self
    }

    pub fn literal_prompt(mut self, fragment: impl Into<String>) -> Self {
        self.literal_contributions.push(fragment.into());
        self
    }

    /// Opaque tool definitions passed through to the chat client.
    pub fn tool(mut self, tool: Value) -> Self {
        self.tools.push(tool);
        self
    }

    /// Retain the rendered prompt on every result, not just dry runs.
    pub fn capture_prompts(mut self, capture: bool) -> Self {
        self.capture_prompts = capture;
        self
    }

    /// Observe the assembled prompt before each LLM call.
    pub fn prompt_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PromptPreview) + Send + Sync + 'static,
    {
        self.prompt_hook = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<Planner, PlannerConfigError> {
        if self.duplicate_default {
            return Err(PlannerConfigError::DuplicateDefaultClient);
        }
        if self.default_tier.is_none() && !self.fallback_tiers.is_empty() {
            return Err(PlannerConfigError::FallbackWithoutDefault);
        }
        let tiers: Vec<PlannerTier> = self
            .default_tier
            .into_iter()
            .chain(self.fallback_tiers)
            .collect();
        let resolver = PlanResolver::new(Arc::clone(&self.actions), Arc::clone(&self.types));
        Ok(Planner {
            actions: self.actions,
            types: self.types,
            resolver,
            tiers,
            persona: self.persona,
            contributors: self.contributors,
            prompt_context: self.prompt_context,
            literal_contributions: self.literal_contributions,
            tools: self.tools,
            capture_prompts: self.capture_prompts,
            prompt_hook: self.prompt_hook,
        })
    }
}

// ── Planner ──────────────────────────────────────────────────────────────────

/// Longest raw-response excerpt carried into a synthesized error plan.
const ERROR_SNIPPET_CHARS: usize = 800;

/// End-to-end plan formulation: prompt assembly, tiered LLM invocation with
/// per-tier retry budgets, parse, resolve, metrics.
///
/// Recoverable failures (network, parse, validation) are absorbed into
/// attempt records; a formulation never errors. When every tier is
/// exhausted the result carries an error-status plan so the caller's error
/// handler observes the failure uniformly.
pub struct Planner {
    actions: Arc<ActionRegistry>,
    types: Arc<TypeHandlerRegistry>,
    resolver: PlanResolver,
    tiers: Vec<PlannerTier>,
    persona: Option<Persona>,
    contributors: Vec<Arc<dyn PromptContributor>>,
    prompt_context: BTreeMap<String, String>,
    literal_contributions: Vec<String>,
    tools: Vec<Value>,
    capture_prompts: bool,
    prompt_hook: Option<PromptHook>,
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner")
            .field("tiers", &self.tiers.len())
            .field("capture_prompts", &self.capture_prompts)
            .finish_non_exhaustive()
    }
}

impl Planner {
    pub fn builder(actions: Arc<ActionRegistry>) -> PlannerBuilder {
        PlannerBuilder::new(actions)
    }

    pub fn actions(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    /// Assemble the prompt without calling any client.
    pub fn dry_run(&self, user_message: &str, state: &ConversationState) -> PlanFormulationResult {
        let preview = self.build_preview(user_message, Some(state));
        if let Some(hook) = &self.prompt_hook {
            hook(&preview);
        }
        PlanFormulationResult {
            response: None,
            plan: Plan::empty(),
            preview: Some(preview),
            metrics: PlanningMetrics::default(),
        }
    }

    pub async fn formulate_plan(
        &self,
        user_message: &str,
        state: &ConversationState,
    ) -> PlanFormulationResult {
        if self.tiers.is_empty() {
            return self.dry_run(user_message, state);
        }

        let preview = self.build_preview(user_message, Some(state));
        if let Some(hook) = &self.prompt_hook {
            hook(&preview);
        }

        let mut metrics = PlanningMetrics::default();
        let mut last_error: Option<String> = None;
        let mut last_response: Option<String> = None;
        let mut last_plan: Option<Plan> = None;

        for (tier_index, tier) in self.tiers.iter().enumerate() {
            for attempt in 1..=tier.max_attempts {
                let started = Instant::now();
                let outcome = tier
                    .client
                    .invoke(&preview.system_messages, &preview.user_message, &self.tools)
                    .await;
                let duration_ms = started.elapsed().as_millis() as u64;

                let response = match outcome {
                    Err(err) => {
                        let details = err.to_string();
                        debug!(tier = tier_index, attempt, %details, "chat client failed");
                        last_error = Some(details.clone());
                        metrics.attempts.push(AttemptRecord {
                            model_id: tier.model_id.clone(),
                            tier_index,
                            attempt_within_tier: attempt,
                            outcome: AttemptOutcome::NetworkError,
                            duration_ms,
                            error_details: Some(details),
                        });
                        continue;
                    }
                    Ok(response) => response,
                };
                last_response = Some(response.clone());

                let raw = match parse_raw_plan(&response) {
                    Err(err) => {
                        let details = err.to_string();
                        debug!(tier = tier_index, attempt, %details, "plan parse failed");
                        last_error = Some(details.clone());
                        metrics.attempts.push(AttemptRecord {
                            model_id: tier.model_id.clone(),
                            tier_index,
                            attempt_within_tier: attempt,
                            outcome: AttemptOutcome::ParseFailed,
                            duration_ms,
                            error_details: Some(details),
                        });
                        continue;
                    }
                    Ok(raw) => raw,
                };

                let plan = self.resolver.resolve(&raw);
                if plan.status() == PlanStatus::Error {
                    let details = plan
                        .first_error()
                        .unwrap_or("plan resolved with no steps")
                        .to_string();
                    debug!(tier = tier_index, attempt, %details, "plan validation failed");
                    last_error = Some(details.clone());
                    metrics.attempts.push(AttemptRecord {
                        model_id: tier.model_id.clone(),
                        tier_index,
                        attempt_within_tier: attempt,
                        outcome: AttemptOutcome::ValidationFailed,
                        duration_ms,
                        error_details: Some(details),
                    });
                    last_plan = Some(plan);
                    continue;
                }

                metrics.attempts.push(AttemptRecord {
                    model_id: tier.model_id.clone(),
                    tier_index,
                    attempt_within_tier: attempt,
                    outcome: AttemptOutcome::Success,
                    duration_ms,
                    error_details: None,
                });
                metrics.winning_model = Some(tier.model_id.clone());
                info!(
                    model = %tier.model_id,
                    attempts = metrics.total_attempts(),
                    steps = plan.steps.len(),
                    "plan accepted"
                );
                return PlanFormulationResult {
                    response: Some(response),
                    plan,
                    preview: self.capture_prompts.then(|| preview.clone()),
                    metrics,
                };
            }
            if tier_index + 1 < self.tiers.len() {
                warn!(
                    exhausted = %tier.model_id,
                    next = %self.tiers[tier_index + 1].model_id,
                    "tier exhausted; falling back"
                );
            }
        }

        error!(
            attempts = metrics.total_attempts(),
            last_error = last_error.as_deref().unwrap_or("none"),
            "all tiers exhausted without an accepted plan"
        );
        let plan = last_plan.unwrap_or_else(|| {
            let mut reason = last_error.unwrap_or_else(|| "no usable response".to_string());
            if let Some(response) = &last_response {
                reason.push_str("; last response: ");
                reason.push_str(&truncate_for_prompt(response, ERROR_SNIPPET_CHARS));
            }
            Plan::error("I wasn't able to work out a valid plan for that request.", reason)
        });
        PlanFormulationResult {
            response: last_response,
            plan,
            preview: self.capture_prompts.then_some(preview),
            metrics,
        }
    }

    fn build_preview(&self, user_message: &str, state: Option<&ConversationState>) -> PromptPreview {
        let descriptors = self.actions.descriptors();
        build_prompt(&PromptInputs {
            persona: self.persona.as_ref(),
            contributors: &self.contributors,
            descriptors: &descriptors,
            types: &self.types,
            prompt_context: &self.prompt_context,
            literal_contributions: &self.literal_contributions,
            state,
            user_message,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use planwright_actions::{ActionDescriptor, ActionParam};
    use planwright_llm::ChatClientError;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<String, String>>>,
    }

    impl ScriptedClient {
        fn new<I>(responses: I) -> Arc<Self>
        where
            I: IntoIterator<Item = Result<String, String>>,
        {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().collect()),
            })
        }
    }

    #[async_trait::async_trait]
    impl ChatClient for ScriptedClient {
        async fn invoke(
            &self,
            _system_messages: &[String],
            _user_message: &str,
            _tools: &[Value],
        ) -> Result<String, ChatClientError> {
            match self.responses.lock().unwrap().pop_front() {
                Some(Ok(response)) => Ok(response),
                Some(Err(message)) => Err(ChatClientError::Status {
                    status: 503,
                    body: message,
                }),
                None => Err(ChatClientError::MissingContent),
            }
        }
    }

    fn registry() -> Arc<ActionRegistry> {
        let mut registry = ActionRegistry::new();
        registry
            .register_fn(
                ActionDescriptor::new("addItem")
                    .with_description("Add a product to the basket")
                    .with_param(ActionParam::string("product"))
                    .with_param(ActionParam::integer("quantity")),
                |_, _| Ok(json!("added")),
            )
            .unwrap();
        Arc::new(registry)
    }

    const GOOD_PLAN: &str = r#"{"message":"Adding water","steps":[{"actionId":"addItem","parameters":{"product":"water","quantity":2}}]}"#;
    const UNKNOWN_ACTION_PLAN: &str = r#"{"message":"?","steps":[{"actionId":"doMagic","parameters":{}}]}"#;

    fn state() -> ConversationState {
        ConversationState::initial("add 2 bottles of water")
    }

    #[tokio::test]
    async fn first_attempt_success() {
        let planner = Planner::builder(registry())
            .default_client(ScriptedClient::new([Ok(GOOD_PLAN.to_string())]), 2, "primary")
            .build()
            .unwrap();

        let result = planner.formulate_plan("add 2 bottles of water", &state()).await;
        assert_eq!(result.plan.status(), PlanStatus::Ready);
        assert_eq!(result.metrics.total_attempts(), 1);
        assert_eq!(result.metrics.winning_model.as_deref(), Some("primary"));
        assert_eq!(result.metrics.attempts[0].outcome, AttemptOutcome::Success);
        assert!(result.preview.is_none());
        assert_eq!(result.response.as_deref(), Some(GOOD_PLAN));
    }

    #[tokio::test]
    async fn tiered_fallback_records_every_attempt() {
        let tier_one = ScriptedClient::new([
            Ok("no JSON here at all".to_string()),
            Ok(UNKNOWN_ACTION_PLAN.to_string()),
        ]);
        let tier_two = ScriptedClient::new([Ok(GOOD_PLAN.to_string())]);
        let planner = Planner::builder(registry())
            .default_client(tier_one, 2, "primary")
            .fallback_client(tier_two, 2, "fallback")
            .build()
            .unwrap();

        let result = planner.formulate_plan("add water", &state()).await;
        assert_eq!(result.plan.status(), PlanStatus::Ready);
        assert_eq!(result.metrics.total_attempts(), 3);
        assert_eq!(result.metrics.winning_model.as_deref(), Some("fallback"));

        let attempts = &result.metrics.attempts;
        assert_eq!(attempts[0].tier_index, 0);
        assert_eq!(attempts[0].attempt_within_tier, 1);
        assert_eq!(attempts[0].outcome, AttemptOutcome::ParseFailed);
        assert_eq!(attempts[1].tier_index, 0);
        assert_eq!(attempts[1].attempt_within_tier, 2);
        assert_eq!(attempts[1].outcome, AttemptOutcome::ValidationFailed);
        assert_eq!(
            attempts[1].error_details.as_deref(),
            Some("unknown action: doMagic")
        );
        assert_eq!(attempts[2].tier_index, 1);
        assert_eq!(attempts[2].attempt_within_tier, 1);
        assert_eq!(attempts[2].outcome, AttemptOutcome::Success);
    }

    #[tokio::test]
    async fn client_errors_are_network_errors() {
        let client = ScriptedClient::new([
            Err("gateway unavailable".to_string()),
            Ok(GOOD_PLAN.to_string()),
        ]);
        let planner = Planner::builder(registry())
            .default_client(client, 2, "primary")
            .build()
            .unwrap();

        let result = planner.formulate_plan("add water", &state()).await;
        assert_eq!(result.metrics.attempts[0].outcome, AttemptOutcome::NetworkError);
        assert!(
            result.metrics.attempts[0]
                .error_details
                .as_deref()
                .unwrap()
                .contains("gateway unavailable")
        );
        assert_eq!(result.metrics.attempts[1].outcome, AttemptOutcome::Success);
    }

    #[tokio::test]
    async fn exhausted_tiers_keep_the_last_validation_plan() {
        let client = ScriptedClient::new([
            Ok(UNKNOWN_ACTION_PLAN.to_string()),
            Ok(UNKNOWN_ACTION_PLAN.to_string()),
        ]);
        let planner = Planner::builder(registry())
            .default_client(client, 2, "primary")
            .build()
            .unwrap();

        let result = planner.formulate_plan("do magic", &state()).await;
        assert_eq!(result.plan.status(), PlanStatus::Error);
        assert_eq!(result.plan.first_error(), Some("unknown action: doMagic"));
        assert_eq!(result.metrics.total_attempts(), 2);
        assert!(result.metrics.winning_model.is_none());
    }

    #[tokio::test]
    async fn exhausted_tiers_synthesize_an_error_plan_with_snippet() {
        let long_garbage = format!("garbage {}", "x".repeat(1000));
        let client = ScriptedClient::new([Ok(long_garbage.clone())]);
        let planner = Planner::builder(registry())
            .default_client(client, 1, "primary")
            .build()
            .unwrap();

        let result = planner.formulate_plan("add water", &state()).await;
        assert_eq!(result.plan.status(), PlanStatus::Error);
        let reason = result.plan.first_error().unwrap();
        assert!(reason.contains("no JSON object"));
        assert!(reason.contains("garbage"));
        // The snippet is bounded even though the response was not.
        assert!(reason.len() < long_garbage.len());
        assert!(reason.contains('…'));
        assert!(!result.plan.assistant_message.is_empty());
    }

    #[tokio::test]
    async fn no_clients_means_dry_run() {
        let planner = Planner::builder(registry()).build().unwrap();
        let result = planner.formulate_plan("add water", &state()).await;
        assert!(result.plan.steps.is_empty());
        assert_eq!(result.metrics.total_attempts(), 0);
        let preview = result.preview.unwrap();
        assert_eq!(preview.action_ids, vec!["addItem"]);
        assert!(preview.system_messages.last().unwrap().contains("PLANNING DIRECTIVE"));
    }

    #[tokio::test]
    async fn prompt_hook_observes_the_preview() {
        let seen = Arc::new(Mutex::new(vec![]));
        let seen_clone = Arc::clone(&seen);
        let planner = Planner::builder(registry())
            .default_client(ScriptedClient::new([Ok(GOOD_PLAN.to_string())]), 1, "primary")
            .prompt_hook(move |preview| {
                seen_clone.lock().unwrap().push(preview.user_message.clone());
            })
            .build()
            .unwrap();

        planner.formulate_plan("add water", &state()).await;
        assert_eq!(*seen.lock().unwrap(), vec!["add water".to_string()]);
    }

    #[tokio::test]
    async fn capture_prompts_retains_the_preview() {
        let planner = Planner::builder(registry())
            .default_client(ScriptedClient::new([Ok(GOOD_PLAN.to_string())]), 1, "primary")
            .capture_prompts(true)
            .build()
            .unwrap();
        let result = planner.formulate_plan("add water", &state()).await;
        assert!(result.preview.is_some());
    }

    #[test]
    fn duplicate_default_client_is_a_config_error() {
        let err = Planner::builder(registry())
            .default_client(ScriptedClient::new([]), 1, "a")
            .default_client(ScriptedClient::new([]), 1, "b")
            .build()
            .unwrap_err();
        assert!(matches!(err, PlannerConfigError::DuplicateDefaultClient));
    }

    #[test]
    fn fallback_without_default_is_a_config_error() {
        let err = Planner::builder(registry())
            .fallback_client(ScriptedClient::new([]), 1, "b")
            .build()
            .unwrap_err();
        assert!(matches!(err, PlannerConfigError::FallbackWithoutDefault));
    }
}
