//! The planner–executor runtime.
//!
//! Per turn, the [`ConversationManager`] decodes the caller's state blob,
//! asks the [`Planner`] to formulate a bound plan (prompt assembly, tiered
//! LLM invocation with retry, parse, resolve), and hands the result to the
//! application; the [`PlanExecutor`] runs READY plans step by step, emitting
//! [`InvocationEvent`]s, and routes every other plan status to a registered
//! handler.

mod blob;
mod context;
mod conversation;
mod events;
mod executor;
mod planner;
mod prompt;

pub use blob::{BLOB_MAGIC, BLOB_VERSION, BlobCodec, BlobError, MigrationRegistry};
pub use context::{PayloadType, PayloadTypeRegistry, WorkingContext};
pub use conversation::{
    ConversationError, ConversationManager, ConversationManagerBuilder, ConversationState,
    ConversationTurnResult, WorkingContextExtractor,
};
pub use events::{
    EventClock, InvocationEmitter, InvocationEvent, InvocationKind, InvocationListener,
    InvocationPhase, LogListener, SubscriptionId,
};
pub use executor::{
    ErrorPlanHandler, ExecutorError, NoActionPlanHandler, PendingPlanHandler, PlanExecutor,
    PlanExecutionResult, StepExecutionResult,
};
pub use planner::{
    AttemptOutcome, AttemptRecord, PlanFormulationResult, Planner, PlannerBuilder,
    PlannerConfigError, PlanningMetrics,
};
pub use prompt::{
    ContributorContext, Persona, PromptContributor, PromptInputs, PromptPreview, build_prompt,
    truncate_for_prompt,
};
