use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use planwright_actions::{ActionContext, ActionRegistry};
use planwright_plan::{Plan, PlanStatus, PlanStep};

use crate::events::{
    EventClock, InvocationEmitter, InvocationEvent, InvocationKind, InvocationPhase,
};

// ── Results ──────────────────────────────────────────────────────────────────

/// Outcome of one executed step.
#[derive(Debug, Clone)]
pub struct StepExecutionResult {
    pub action_id: String,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Outcome of one `execute()` call.
///
/// `executed` distinguishes plans whose steps ran (fully or partially) from
/// plans a handler disposed of without running anything.
#[derive(Debug, Clone)]
pub struct PlanExecutionResult {
    pub success: bool,
    pub executed: bool,
    pub message: Option<String>,
    pub step_results: Vec<StepExecutionResult>,
}

impl PlanExecutionResult {
    pub fn completed(step_results: Vec<StepExecutionResult>) -> Self {
        Self {
            success: true,
            executed: true,
            message: None,
            step_results,
        }
    }

    pub fn failed(step_results: Vec<StepExecutionResult>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            executed: true,
            message: Some(message.into()),
            step_results,
        }
    }

    /// A handler disposed of the plan without running steps (asked the user,
    /// logged an apology, declined an out-of-scope request).
    pub fn not_executed(_plan: &Plan, reason: impl Into<String>) -> Self {
        Self {
            success: true,
            executed: false,
            message: Some(reason.into()),
            step_results: vec![],
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// Disposes of a PENDING plan (typically: surface the pending prompts to the
/// user).
#[async_trait]
pub trait PendingPlanHandler: Send + Sync {
    async fn handle(&self, plan: &Plan, ctx: &mut ActionContext) -> PlanExecutionResult;
}

/// Disposes of an ERROR plan (typically: apologize and log).
#[async_trait]
pub trait ErrorPlanHandler: Send + Sync {
    async fn handle(&self, plan: &Plan, ctx: &mut ActionContext) -> PlanExecutionResult;
}

/// Disposes of a plan with nothing to do (out-of-scope reply).
#[async_trait]
pub trait NoActionPlanHandler: Send + Sync {
    async fn handle(&self, plan: &Plan, ctx: &mut ActionContext) -> PlanExecutionResult;
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Configuration gaps, surfaced loudly so they are found during development
/// rather than swallowed at runtime.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("plan has no actions and no no-action handler is registered")]
    MissingNoActionHandler,
    #[error("plan is pending and no pending handler is registered")]
    MissingPendingHandler,
    #[error("plan is in error and no error handler is registered")]
    MissingErrorHandler,
}

// ── Executor ─────────────────────────────────────────────────────────────────

/// Executes READY plans step by step and routes every other status to its
/// registered handler.
///
/// Steps run strictly sequentially, fail-fast: step N's events are fully
/// emitted before step N+1 begins, and the first failing step ends the run.
pub struct PlanExecutor {
    actions: Arc<ActionRegistry>,
    emitter: Arc<InvocationEmitter>,
    pending_handler: Option<Arc<dyn PendingPlanHandler>>,
    error_handler: Option<Arc<dyn ErrorPlanHandler>>,
    no_action_handler: Option<Arc<dyn NoActionPlanHandler>>,
}

impl PlanExecutor {
    pub fn new(actions: Arc<ActionRegistry>) -> Self {
        Self {
            actions,
            emitter: Arc::new(InvocationEmitter::new()),
            pending_handler: None,
            error_handler: None,
            no_action_handler: None,
        }
    }

    pub fn with_emitter(mut self, emitter: Arc<InvocationEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn on_pending(mut self, handler: Arc<dyn PendingPlanHandler>) -> Self {
        self.pending_handler = Some(handler);
        self
    }

    pub fn on_error(mut self, handler: Arc<dyn ErrorPlanHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn on_no_action(mut self, handler: Arc<dyn NoActionPlanHandler>) -> Self {
        self.no_action_handler = Some(handler);
        self
    }

    pub fn emitter(&self) -> &Arc<InvocationEmitter> {
        &self.emitter
    }

    /// Execute with a fresh action context.
    pub async fn execute(&self, plan: &Plan) -> Result<PlanExecutionResult, ExecutorError> {
        let mut ctx = ActionContext::new();
        self.execute_with_context(plan, &mut ctx).await
    }

    /// Execute against a caller-owned context. The context must not be
    /// shared across concurrent executions.
    pub async fn execute_with_context(
        &self,
        plan: &Plan,
        ctx: &mut ActionContext,
    ) -> Result<PlanExecutionResult, ExecutorError> {
        if plan.is_no_action() {
            let handler = self
                .no_action_handler
                .as_ref()
                .ok_or(ExecutorError::MissingNoActionHandler)?;
            debug!("dispatching no-action plan to handler");
            return Ok(handler.handle(plan, ctx).await);
        }
        match plan.status() {
            PlanStatus::Pending => {
                let handler = self
                    .pending_handler
                    .as_ref()
                    .ok_or(ExecutorError::MissingPendingHandler)?;
                debug!(
                    pending = plan.pending_parameter_names().len(),
                    "dispatching pending plan to handler"
                );
                Ok(handler.handle(plan, ctx).await)
            }
            PlanStatus::Error => {
                let handler = self
                    .error_handler
                    .as_ref()
                    .ok_or(ExecutorError::MissingErrorHandler)?;
                warn!(reason = plan.first_error().unwrap_or("unknown"), "dispatching error plan");
                Ok(handler.handle(plan, ctx).await)
            }
            PlanStatus::Ready => Ok(self.run_steps(plan, ctx).await),
        }
    }

    async fn run_steps(&self, plan: &Plan, ctx: &mut ActionContext) -> PlanExecutionResult {
        let mut results = vec![];
        for step in &plan.steps {
            // READY guarantees every step is an action step.
            let PlanStep::Action {
                action_id,
                arguments,
                ..
            } = step
            else {
                continue;
            };

            let invocation_id = Uuid::new_v4().to_string();
            let mut clock = EventClock::new();
            self.emitter.emit(&InvocationEvent::new(
                InvocationKind::Action,
                InvocationPhase::Requested,
                action_id,
                &invocation_id,
                clock.now(),
            ));
            self.emitter.emit(&InvocationEvent::new(
                InvocationKind::Action,
                InvocationPhase::Started,
                action_id,
                &invocation_id,
                clock.now(),
            ));

            let started = Instant::now();
            match self.actions.dispatch(action_id, arguments, ctx).await {
                Ok(output) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    let context_key = self
                        .actions
                        .find(action_id)
                        .and_then(|a| a.descriptor.context_key.clone())
                        .filter(|key| !key.trim().is_empty());
                    let mut event = InvocationEvent::new(
                        InvocationKind::Action,
                        InvocationPhase::Succeeded,
                        action_id,
                        &invocation_id,
                        clock.now(),
                    )
                    .with_duration(duration_ms);
                    if let Some(key) = &context_key {
                        ctx.insert(key.clone(), output.clone());
                        event = event.with_attribute("contextKey", key.clone());
                    }
                    self.emitter.emit(&event);
                    info!(action = %action_id, duration_ms, "action succeeded");
                    results.push(StepExecutionResult {
                        action_id: action_id.clone(),
                        success: true,
                        output: Some(output),
                        error: None,
                        duration_ms,
                    });
                }
                Err(err) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    let message = err.to_string();
                    self.emitter.emit(
                        &InvocationEvent::new(
                            InvocationKind::Action,
                            InvocationPhase::Failed,
                            action_id,
                            &invocation_id,
                            clock.now(),
                        )
                        .with_duration(duration_ms)
                        .with_attribute("error", message.clone()),
                    );
                    warn!(action = %action_id, error = %message, "action failed; stopping plan");
                    results.push(StepExecutionResult {
                        action_id: action_id.clone(),
                        success: false,
                        output: None,
                        error: Some(message.clone()),
                        duration_ms,
                    });
                    return PlanExecutionResult::failed(results, message);
                }
            }
        }
        PlanExecutionResult::completed(results)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InvocationListener;
    use planwright_actions::{ActionDescriptor, ActionParam, Argument, ArgumentSet};
    use planwright_plan::PendingParam;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder {
        events: Mutex<Vec<InvocationEvent>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(vec![]),
            })
        }

        fn phases(&self) -> Vec<InvocationPhase> {
            self.events.lock().unwrap().iter().map(|e| e.phase).collect()
        }
    }

    impl InvocationListener for Recorder {
        fn on_event(&self, event: &InvocationEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn registry() -> Arc<ActionRegistry> {
        let mut registry = ActionRegistry::new();
        registry
            .register_fn(
                ActionDescriptor::new("openBasket")
                    .with_description("Create an empty basket")
                    .with_context_key("basket"),
                |_, _| Ok(json!({"items": []})),
            )
            .unwrap();
        registry
            .register_fn(
                ActionDescriptor::new("addItem")
                    .with_param(ActionParam::string("product"))
                    .with_param(ActionParam::integer("quantity")),
                |args, ctx| {
                    let product = args.require_str("product")?;
                    let quantity = args.require_i64("quantity")?;
                    let mut basket = ctx.get("basket").cloned().unwrap_or(json!({"items": []}));
                    basket["items"]
                        .as_array_mut()
                        .expect("basket items")
                        .push(json!({"product": product, "quantity": quantity}));
                    Ok(basket)
                },
            )
            .unwrap();
        registry
            .register_fn(ActionDescriptor::new("explode"), |_, _| {
                anyhow::bail!("payment gateway refused")
            })
            .unwrap();
        Arc::new(registry)
    }

    fn action_step(action_id: &str, arguments: Vec<Argument>) -> PlanStep {
        PlanStep::Action {
            action_id: action_id.to_string(),
            description: None,
            arguments: ArgumentSet::new(arguments),
        }
    }

    #[tokio::test]
    async fn ready_plan_runs_steps_in_order_with_events() {
        let recorder = Recorder::new();
        let executor = PlanExecutor::new(registry());
        executor.emitter().subscribe(recorder.clone());

        let plan = Plan::new(
            "ok",
            vec![
                action_step("openBasket", vec![]),
                action_step(
                    "addItem",
                    vec![
                        Argument::new("product", json!("water"), "string"),
                        Argument::new("quantity", json!(2), "integer"),
                    ],
                ),
            ],
        );
        let result = executor.execute(&plan).await.unwrap();
        assert!(result.success);
        assert!(result.executed);
        assert_eq!(result.step_results.len(), 2);
        assert!(result.step_results.iter().all(|s| s.success));

        use InvocationPhase::*;
        assert_eq!(
            recorder.phases(),
            vec![Requested, Started, Succeeded, Requested, Started, Succeeded]
        );
        let events = recorder.events.lock().unwrap();
        // Event order within each invocation carries non-decreasing times.
        for pair in events.windows(2) {
            if pair[0].invocation_id == pair[1].invocation_id {
                assert!(pair[0].timestamp <= pair[1].timestamp);
            }
        }
        assert_eq!(events[2].attributes.get("contextKey").unwrap(), "basket");
    }

    #[tokio::test]
    async fn context_key_output_reaches_later_steps() {
        let executor = PlanExecutor::new(registry());
        let plan = Plan::new(
            "ok",
            vec![
                action_step("openBasket", vec![]),
                action_step(
                    "addItem",
                    vec![
                        Argument::new("product", json!("water"), "string"),
                        Argument::new("quantity", json!(2), "integer"),
                    ],
                ),
            ],
        );
        let result = executor.execute(&plan).await.unwrap();
        let output = result.step_results[1].output.as_ref().unwrap();
        assert_eq!(output["items"][0]["product"], "water");
    }

    #[tokio::test]
    async fn failing_step_stops_the_plan() {
        let recorder = Recorder::new();
        let executor = PlanExecutor::new(registry());
        executor.emitter().subscribe(recorder.clone());

        let plan = Plan::new(
            "ok",
            vec![
                action_step("explode", vec![]),
                action_step("openBasket", vec![]),
            ],
        );
        let result = executor.execute(&plan).await.unwrap();
        assert!(!result.success);
        assert!(result.executed);
        assert_eq!(result.step_results.len(), 1);
        assert!(
            result.step_results[0]
                .error
                .as_deref()
                .unwrap()
                .contains("explode")
        );

        use InvocationPhase::*;
        assert_eq!(recorder.phases(), vec![Requested, Started, Failed]);
    }

    struct StubPending;

    #[async_trait]
    impl PendingPlanHandler for StubPending {
        async fn handle(&self, plan: &Plan, _ctx: &mut ActionContext) -> PlanExecutionResult {
            PlanExecutionResult::not_executed(plan, "asked the user")
        }
    }

    struct StubError;

    #[async_trait]
    impl ErrorPlanHandler for StubError {
        async fn handle(&self, plan: &Plan, _ctx: &mut ActionContext) -> PlanExecutionResult {
            PlanExecutionResult::not_executed(plan, "apologized")
        }
    }

    struct StubNoAction;

    #[async_trait]
    impl NoActionPlanHandler for StubNoAction {
        async fn handle(&self, plan: &Plan, _ctx: &mut ActionContext) -> PlanExecutionResult {
            PlanExecutionResult::not_executed(plan, "out of scope")
        }
    }

    fn pending_plan() -> Plan {
        Plan::new(
            "need more",
            vec![PlanStep::Pending {
                action_id: "addItem".to_string(),
                message: None,
                pending_params: vec![PendingParam::new("quantity", "How many?")],
                provided_params: serde_json::Map::new(),
            }],
        )
    }

    #[tokio::test]
    async fn pending_plan_goes_to_handler_without_running_actions() {
        let recorder = Recorder::new();
        let executor = PlanExecutor::new(registry()).on_pending(Arc::new(StubPending));
        executor.emitter().subscribe(recorder.clone());

        let result = executor.execute(&pending_plan()).await.unwrap();
        assert!(!result.executed);
        assert_eq!(result.message.as_deref(), Some("asked the user"));
        assert!(recorder.phases().is_empty());
    }

    #[tokio::test]
    async fn error_plan_goes_to_handler() {
        let executor = PlanExecutor::new(registry()).on_error(Arc::new(StubError));
        let plan = Plan::error("sorry", "tier must be one of [BRONZE, SILVER, GOLD]");
        let result = executor.execute(&plan).await.unwrap();
        assert_eq!(result.message.as_deref(), Some("apologized"));
    }

    #[tokio::test]
    async fn no_action_plan_goes_to_handler_even_though_status_is_not_error() {
        let executor = PlanExecutor::new(registry()).on_no_action(Arc::new(StubNoAction));
        let plan = Plan::new(
            "can't help",
            vec![PlanStep::NoAction {
                message: "out of scope".to_string(),
            }],
        );
        let result = executor.execute(&plan).await.unwrap();
        assert_eq!(result.message.as_deref(), Some("out of scope"));
    }

    #[tokio::test]
    async fn empty_plan_routes_to_no_action_handler() {
        let executor = PlanExecutor::new(registry()).on_no_action(Arc::new(StubNoAction));
        let result = executor.execute(&Plan::empty()).await.unwrap();
        assert!(!result.executed);
    }

    #[tokio::test]
    async fn missing_handlers_are_configuration_errors() {
        let executor = PlanExecutor::new(registry());
        assert!(matches!(
            executor.execute(&Plan::empty()).await.unwrap_err(),
            ExecutorError::MissingNoActionHandler
        ));
        assert!(matches!(
            executor.execute(&pending_plan()).await.unwrap_err(),
            ExecutorError::MissingPendingHandler
        ));
        assert!(matches!(
            executor.execute(&Plan::error("x", "y")).await.unwrap_err(),
            ExecutorError::MissingErrorHandler
        ));
    }
}
