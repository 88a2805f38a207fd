use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::context::{ActionContext, ArgumentSet};
use crate::descriptor::ActionDescriptor;

// ── Errors ───────────────────────────────────────────────────────────────────

/// Registration-time failures. These are configuration errors: they surface
/// immediately to the caller and are never observable at plan time.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate action id: {0}")]
    DuplicateId(String),
    #[error("invalid descriptor for action '{id}': {reason}")]
    InvalidDescriptor { id: String, reason: String },
}

/// Dispatch-time failures.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("action '{id}' failed: {source}")]
    Failed {
        id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("missing argument '{0}'")]
    MissingArgument(String),
}

// ── Handler trait ────────────────────────────────────────────────────────────

/// Trait implemented by every action handler.
///
/// Handlers receive the coerced arguments in descriptor order plus the
/// mutable per-execution context. They return a JSON value; when the
/// descriptor declares a `context_key`, the executor stores that value under
/// it for later steps.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn invoke(&self, args: &ArgumentSet, ctx: &mut ActionContext) -> anyhow::Result<Value>;
}

/// Adapter so plain synchronous closures can be registered without a named
/// handler type. Most test and glue actions take this path.
struct FnHandler<F>(F);

#[async_trait]
impl<F> ActionHandler for FnHandler<F>
where
    F: Fn(&ArgumentSet, &mut ActionContext) -> anyhow::Result<Value> + Send + Sync,
{
    async fn invoke(&self, args: &ArgumentSet, ctx: &mut ActionContext) -> anyhow::Result<Value> {
        (self.0)(args, ctx)
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// A registered action: descriptor plus the handler bound to it.
pub struct RegisteredAction {
    pub descriptor: ActionDescriptor,
    handler: Arc<dyn ActionHandler>,
}

impl RegisteredAction {
    pub fn handler(&self) -> Arc<dyn ActionHandler> {
        Arc::clone(&self.handler)
    }
}

/// Central catalog of all actions available to the planner.
///
/// Registration order is preserved: it is the order the catalog is rendered
/// into the prompt. The registry is written at bootstrap and read-only
/// afterwards; share it behind an `Arc`.
#[derive(Default)]
pub struct ActionRegistry {
    actions: Vec<RegisteredAction>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. Rejects duplicate ids and structurally invalid
    /// descriptors; enum parameters without explicit allowed values inherit
    /// their variant names.
    pub fn register(
        &mut self,
        descriptor: ActionDescriptor,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<(), RegistryError> {
        descriptor
            .validate()
            .map_err(|reason| RegistryError::InvalidDescriptor {
                id: descriptor.id.clone(),
                reason,
            })?;
        if self.find(&descriptor.id).is_some() {
            return Err(RegistryError::DuplicateId(descriptor.id.clone()));
        }
        self.actions.push(RegisteredAction {
            descriptor: descriptor.normalized(),
            handler,
        });
        Ok(())
    }

    /// Register a synchronous closure as the handler.
    pub fn register_fn<F>(
        &mut self,
        descriptor: ActionDescriptor,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&ArgumentSet, &mut ActionContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(descriptor, Arc::new(FnHandler(handler)))
    }

    /// Cloned descriptor list in registration order. Callers cannot mutate
    /// registry state through the clones.
    pub fn descriptors(&self) -> Vec<ActionDescriptor> {
        self.actions.iter().map(|a| a.descriptor.clone()).collect()
    }

    pub fn action_ids(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.descriptor.id.clone()).collect()
    }

    pub fn find(&self, id: &str) -> Option<&RegisteredAction> {
        self.actions.iter().find(|a| a.descriptor.id == id)
    }

    /// Invoke the handler registered under `id`.
    pub async fn dispatch(
        &self,
        id: &str,
        args: &ArgumentSet,
        ctx: &mut ActionContext,
    ) -> Result<Value, ActionError> {
        let action = self
            .find(id)
            .ok_or_else(|| ActionError::UnknownAction(id.to_string()))?;
        action
            .handler
            .invoke(args, ctx)
            .await
            .map_err(|source| ActionError::Failed {
                id: id.to_string(),
                source,
            })
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
