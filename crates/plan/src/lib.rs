//! Plan representation for the planner–executor runtime.
//!
//! Three layers live here: the tolerant wire-format types the LLM's JSON is
//! decoded into ([`RawPlan`]), the bound plan the rest of the runtime works
//! with ([`Plan`] and its tagged [`PlanStep`] union), and the
//! [`PlanResolver`] that translates one into the other by binding steps to
//! registered actions, coercing arguments, and enforcing parameter
//! constraints.

mod plan;
mod raw;
mod resolver;

pub use plan::{PendingParam, Plan, PlanStatus, PlanStep};
pub use raw::{PlanParseError, RawPendingParam, RawPlan, RawPlanStep, extract_plan_json, parse_raw_plan};
pub use resolver::PlanResolver;
