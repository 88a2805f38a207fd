//! Action catalog for the planner–executor runtime.
//!
//! Applications declare their side-effecting operations as *actions*: a
//! descriptor (id, parameters, constraint metadata) paired with an async
//! handler. The planner renders descriptors into the LLM prompt; the
//! executor dispatches validated plan steps back through the registry.
//!
//! There is no reflective discovery. Registration is explicit, so the
//! compiler sees every handler and the registry can reject bad descriptors
//! before the first plan is ever formulated.

mod context;
mod descriptor;
mod registry;
mod typed;

pub use context::{ActionContext, Argument, ArgumentSet};
pub use descriptor::{ActionDescriptor, ActionParam, ParamType};
pub use registry::{ActionError, ActionHandler, ActionRegistry, RegisteredAction, RegistryError};
pub use typed::{CoerceError, TypeHandler, TypeHandlerRegistry, coerce_value};
