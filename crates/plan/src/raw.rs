use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ── Errors ───────────────────────────────────────────────────────────────────

/// The response could not be turned into a [`RawPlan`]. Classified as a
/// parse failure by the planner, which retries within the tier budget.
#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("response was empty")]
    EmptyResponse,
    #[error("no JSON object found in response")]
    NoJson,
    #[error("malformed plan JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ── Wire types ───────────────────────────────────────────────────────────────

/// The plan exactly as the LLM emitted it, before binding or validation.
///
/// Every field is optional-with-default so the decoder tolerates partial
/// output; unknown top-level fields are ignored. Step shapes that satisfy no
/// discriminator are routed to error steps by the resolver, not rejected
/// here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawPlan {
    pub message: Option<String>,
    pub steps: Vec<RawPlanStep>,
}

/// One undifferentiated wire step. Exactly one discriminator profile should
/// be set (`error`, `noAction`, `status:"pending"`, or a bare `actionId`);
/// classification happens during resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawPlanStep {
    pub action_id: Option<String>,
    pub description: Option<String>,
    pub parameters: Map<String, Value>,
    pub status: Option<String>,
    pub pending_params: Vec<RawPendingParam>,
    pub provided_params: Map<String, Value>,
    pub no_action: bool,
    pub error: bool,
    pub reason: Option<String>,
}

/// A parameter the LLM could not fill, with the question to ask the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawPendingParam {
    pub name: String,
    pub prompt: String,
}

// ── JSON extraction ──────────────────────────────────────────────────────────

/// Pull the JSON object out of an LLM response.
///
/// A fenced block (```json or a bare fence) wins; otherwise the whole
/// trimmed body is used when it is itself a braced object. Returns `None`
/// when neither shape is present: narration-only responses are a parse
/// failure, never silently empty plans.
pub fn extract_plan_json(response: &str) -> Option<&str> {
    if let Some(fenced) = extract_fenced(response) {
        return Some(fenced);
    }
    let trimmed = response.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }
    None
}

fn extract_fenced(response: &str) -> Option<&str> {
    let fence_start = response.find("```")?;
    let after_fence = &response[fence_start + 3..];
    // Skip an optional language tag on the fence line.
    let body_start = after_fence.find('\n')?;
    let tag = after_fence[..body_start].trim();
    if !tag.is_empty() && !tag.eq_ignore_ascii_case("json") {
        return None;
    }
    let body = &after_fence[body_start + 1..];
    let fence_end = body.find("```")?;
    let candidate = body[..fence_end].trim();
    if candidate.starts_with('{') && candidate.ends_with('}') {
        Some(candidate)
    } else {
        None
    }
}

/// Decode an LLM response into a [`RawPlan`].
pub fn parse_raw_plan(response: &str) -> Result<RawPlan, PlanParseError> {
    if response.trim().is_empty() {
        return Err(PlanParseError::EmptyResponse);
    }
    let json = extract_plan_json(response).ok_or(PlanParseError::NoJson)?;
    Ok(serde_json::from_str(json)?)
}

// ── Tests ────────────────────────────────────────────────────────────────────
