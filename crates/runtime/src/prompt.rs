//! Prompt assembly for the planning call.
//!
//! The planner owns orchestration; this module owns the prompt layout. The
//! assembly order is strict: guardrails, persona, contributors, type
//! guidance, literal contributions, the retry addendum, and finally the
//! planning directive. The directive is the authoritative block, placed
//! immediately before the user message so it wins any conflict with earlier
//! material, and it is rebuilt every turn from the live catalog, never
//! memoized.

use std::collections::BTreeMap;
use std::sync::Arc;

use planwright_actions::{ActionDescriptor, ActionParam, TypeHandlerRegistry};

use crate::conversation::ConversationState;

// ── Public types ─────────────────────────────────────────────────────────────

/// A persona block: who the planner speaks as, rendered after the base
/// guardrails.
#[derive(Debug, Clone, Default)]
pub struct Persona {
    pub role: String,
    pub principles: Vec<String>,
    pub constraints: Vec<String>,
    pub style: Vec<String>,
}

impl Persona {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            ..Self::default()
        }
    }

    pub fn with_principle(mut self, line: impl Into<String>) -> Self {
        self.principles.push(line.into());
        self
    }

    pub fn with_constraint(mut self, line: impl Into<String>) -> Self {
        self.constraints.push(line.into());
        self
    }

    pub fn with_style(mut self, line: impl Into<String>) -> Self {
        self.style.push(line.into());
        self
    }

    fn render(&self) -> String {
        let mut block = format!("PERSONA:\nYou are {}.", self.role);
        for (title, lines) in [
            ("Principles", &self.principles),
            ("Constraints", &self.constraints),
            ("Style", &self.style),
        ] {
            if lines.is_empty() {
                continue;
            }
            block.push_str(&format!("\n{title}:"));
            for line in lines {
                block.push_str(&format!("\n- {line}"));
            }
        }
        block
    }
}

/// What a contributor gets to look at while producing its fragment.
pub struct ContributorContext<'a> {
    pub descriptors: &'a [ActionDescriptor],
    pub prompt_context: &'a BTreeMap<String, String>,
    pub state: Option<&'a ConversationState>,
}

/// An ordered, pluggable prompt fragment source (catalog renderings, schema
/// summaries, anything domain-specific). Returning `None` or a blank string
/// contributes nothing this turn.
pub trait PromptContributor: Send + Sync {
    fn contribute(&self, ctx: &ContributorContext<'_>) -> Option<String>;
}

/// The fully assembled prompt: what would be (or was) sent to the LLM.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptPreview {
    pub system_messages: Vec<String>,
    pub user_message: String,
    pub action_ids: Vec<String>,
}

/// All pre-computed data needed to assemble a planning prompt. Callers build
/// this borrow-struct and pass it to [`build_prompt`], which is purely
/// synchronous.
pub struct PromptInputs<'a> {
    pub persona: Option<&'a Persona>,
    pub contributors: &'a [Arc<dyn PromptContributor>],
    pub descriptors: &'a [ActionDescriptor],
    pub types: &'a TypeHandlerRegistry,
    pub prompt_context: &'a BTreeMap<String, String>,
    pub literal_contributions: &'a [String],
    pub state: Option<&'a ConversationState>,
    pub user_message: &'a str,
}

// ── Assembly ─────────────────────────────────────────────────────────────────

const BASE_GUARDRAILS: &str = "\
You translate user requests into a machine-checkable plan of registered actions.\n\
GUARDRAILS (follow strictly):\n\
1. Never fabricate parameter values the user has not given you.\n\
2. Never emit an empty string for a required parameter; ask for it instead.\n\
3. Only reference actions from the catalog you are given.\n\
4. Keep the \"message\" field short, honest, and user-facing.";

/// Assemble the full planning prompt in strict order.
pub fn build_prompt(inputs: &PromptInputs<'_>) -> PromptPreview {
    let mut system_messages = vec![BASE_GUARDRAILS.to_string()];

    if let Some(persona) = inputs.persona {
        system_messages.push(persona.render());
    }

    let ctx = ContributorContext {
        descriptors: inputs.descriptors,
        prompt_context: inputs.prompt_context,
        state: inputs.state,
    };
    for contributor in inputs.contributors {
        if let Some(fragment) = contributor.contribute(&ctx) {
            if !fragment.trim().is_empty() {
                system_messages.push(fragment);
            }
        }
    }

    for fragment in inputs.types.guidance_for(inputs.descriptors) {
        system_messages.push(fragment);
    }

    for literal in inputs.literal_contributions {
        if !literal.trim().is_empty() {
            system_messages.push(literal.clone());
        }
    }

    if let Some(state) = inputs.state {
        if let Some(addendum) = build_retry_addendum(state) {
            system_messages.push(addendum);
        }
    }

    system_messages.push(build_planning_directive(inputs.descriptors));

    PromptPreview {
        system_messages,
        user_message: inputs.user_message.to_string(),
        action_ids: inputs.descriptors.iter().map(|d| d.id.clone()).collect(),
    }
}

// ── Block builders ───────────────────────────────────────────────────────────

/// On follow-up turns with outstanding parameters, tell the model exactly
/// what is pending and what has already been supplied. Both maps are passed
/// verbatim; structured fields are never summarized.
fn build_retry_addendum(state: &ConversationState) -> Option<String> {
    if state.pending_params.is_empty() {
        return None;
    }
    let pending = state
        .pending_params
        .iter()
        .map(|p| format!("- {}: {}", p.name, p.prompt))
        .collect::<Vec<_>>()
        .join("\n");
    let provided = if state.provided_params.is_empty() {
        "(none)".to_string()
    } else {
        state
            .provided_params
            .iter()
            .map(|(name, value)| format!("- {name} = {value}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    Some(format!(
        "OUTSTANDING PARAMETERS (the previous plan is waiting for these):\n{pending}\n\
         VALUES ALREADY PROVIDED:\n{provided}\n\
         The latest user message may answer one or more outstanding parameters. \
         Fold any answers into the plan; ask again only for values that are still \
         missing or invalid."
    ))
}

/// The authoritative planning directive, rebuilt per turn from the
/// currently registered actions.
fn build_planning_directive(descriptors: &[ActionDescriptor]) -> String {
    let catalog = render_catalog(descriptors);
    let ids = descriptors
        .iter()
        .map(|d| d.id.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "PLANNING DIRECTIVE (authoritative):\n\
         Respond with exactly one JSON object: {{\"message\": \"<narration>\", \"steps\": [...]}}.\n\
         Each step takes exactly one of these shapes:\n\
         - ACTION:    {{\"actionId\":\"<id>\",\"description\":\"<why>\",\"parameters\":{{...}}}}\n\
         - PENDING:   {{\"actionId\":\"<id>\",\"status\":\"pending\",\"pendingParams\":[{{\"name\":\"<p>\",\"prompt\":\"<ask>\"}}],\"providedParams\":{{...}}}}\n\
         - NO-ACTION: {{\"noAction\":true,\"reason\":\"<msg>\"}}\n\
         - ERROR:     {{\"error\":true,\"reason\":\"<msg>\"}}\n\n\
         AVAILABLE ACTIONS:\n{catalog}\n\
         Valid actionId values: [{ids}]. Use no other.\n\
         CRITICAL RULES:\n\
         1. Parameter names must match the catalog exactly. Never invent, rename, or translate them.\n\
         2. Never guess a required value. Use a PENDING step to ask for it.\n\
         3. A NO-ACTION step must appear alone, with no other steps.\n\
         4. Output nothing before the opening brace and STOP after the closing brace."
    )
}

/// One bullet per action: id, description, and the parameter list with its
/// constraints and examples.
fn render_catalog(descriptors: &[ActionDescriptor]) -> String {
    if descriptors.is_empty() {
        return "  (no actions are registered)".to_string();
    }
    descriptors
        .iter()
        .map(|descriptor| {
            if descriptor.parameters.is_empty() {
                format!("  \u{2022} {}: {}", descriptor.id, descriptor.description)
            } else {
                let params = descriptor
                    .parameters
                    .iter()
                    .map(render_param)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "  \u{2022} {}: {} \u{2014} params: {}",
                    descriptor.id, descriptor.description, params
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_param(param: &ActionParam) -> String {
    let mut rendered = format!("\"{}\" ({}", param.name, param.type_id());
    if !param.description.is_empty() {
        rendered.push_str(&format!(", {}", param.description));
    }
    rendered.push(')');
    if param.required {
        rendered.push_str(" *required");
    }
    if !param.allowed_values.is_empty() {
        rendered.push_str(&format!(" [one of: {}]", param.allowed_values.join(", ")));
    }
    if let Some(pattern) = &param.allowed_regex {
        rendered.push_str(&format!(" [matches: /{pattern}/]"));
    }
    if !param.examples.is_empty() {
        rendered.push_str(&format!(" [e.g. {}]", param.examples.join(", ")));
    }
    rendered
}

// ── Utilities ────────────────────────────────────────────────────────────────

/// Truncate `text` to at most `max_chars` characters, appending `…` when cut.
pub fn truncate_for_prompt(text: &str, max_chars: usize) -> String {
    let chars = text.chars().collect::<Vec<_>>();
    if chars.len() <= max_chars {
        return text.to_string();
    }
    let truncated: String = chars.into_iter().take(max_chars).collect();
    format!("{truncated}…")
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use planwright_actions::{ActionDescriptor, ActionParam};
    use planwright_plan::PendingParam;

    fn descriptors() -> Vec<ActionDescriptor> {
        vec![
            ActionDescriptor::new("addItem")
                .with_description("Add a product to the basket")
                .with_param(ActionParam::string("product").with_description("product name"))
                .with_param(ActionParam::integer("quantity").with_examples(["1", "12"])),
            ActionDescriptor::new("setTier").with_param(
                ActionParam::string("tier").with_allowed_values(["BRONZE", "SILVER", "GOLD"]),
            ),
        ]
    }

    fn inputs<'a>(
        descriptors: &'a [ActionDescriptor],
        types: &'a TypeHandlerRegistry,
        prompt_context: &'a BTreeMap<String, String>,
        state: Option<&'a ConversationState>,
    ) -> PromptInputs<'a> {
        PromptInputs {
            persona: None,
            contributors: &[],
            descriptors,
            types,
            prompt_context,
            literal_contributions: &[],
            state,
            user_message: "add 2 bottles of water",
        }
    }

    #[test]
    fn guardrails_come_first_and_directive_last() {
        let descriptors = descriptors();
        let types = TypeHandlerRegistry::new();
        let ctx = BTreeMap::new();
        let preview = build_prompt(&inputs(&descriptors, &types, &ctx, None));

        assert!(preview.system_messages[0].contains("GUARDRAILS"));
        let last = preview.system_messages.last().unwrap();
        assert!(last.contains("PLANNING DIRECTIVE"));
        assert!(last.contains("STOP after the closing brace"));
        assert_eq!(preview.user_message, "add 2 bottles of water");
        assert_eq!(preview.action_ids, vec!["addItem", "setTier"]);
    }

    #[test]
    fn directive_lists_ids_params_and_constraints() {
        let descriptors = descriptors();
        let types = TypeHandlerRegistry::new();
        let ctx = BTreeMap::new();
        let preview = build_prompt(&inputs(&descriptors, &types, &ctx, None));
        let directive = preview.system_messages.last().unwrap();

        assert!(directive.contains("Valid actionId values: [addItem, setTier]"));
        assert!(directive.contains("\"product\" (string, product name) *required"));
        assert!(directive.contains("[one of: BRONZE, SILVER, GOLD]"));
        assert!(directive.contains("[e.g. 1, 12]"));
    }

    #[test]
    fn persona_renders_after_guardrails() {
        let descriptors = descriptors();
        let types = TypeHandlerRegistry::new();
        let ctx = BTreeMap::new();
        let persona = Persona::new("a careful shopping assistant")
            .with_principle("Prefer asking over guessing")
            .with_style("Short sentences");
        let mut input = inputs(&descriptors, &types, &ctx, None);
        input.persona = Some(&persona);
        let preview = build_prompt(&input);

        assert!(preview.system_messages[1].starts_with("PERSONA:"));
        assert!(preview.system_messages[1].contains("careful shopping assistant"));
        assert!(preview.system_messages[1].contains("- Prefer asking over guessing"));
    }

    struct StaticContributor(&'static str);

    impl PromptContributor for StaticContributor {
        fn contribute(&self, _ctx: &ContributorContext<'_>) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    struct SilentContributor;

    impl PromptContributor for SilentContributor {
        fn contribute(&self, _ctx: &ContributorContext<'_>) -> Option<String> {
            None
        }
    }

    #[test]
    fn contributors_keep_registration_order_and_blanks_are_dropped() {
        let descriptors = descriptors();
        let types = TypeHandlerRegistry::new();
        let ctx = BTreeMap::new();
        let contributors: Vec<Arc<dyn PromptContributor>> = vec![
            Arc::new(StaticContributor("first fragment")),
            Arc::new(SilentContributor),
            Arc::new(StaticContributor("   ")),
            Arc::new(StaticContributor("second fragment")),
        ];
        let mut input = inputs(&descriptors, &types, &ctx, None);
        input.contributors = &contributors;
        let preview = build_prompt(&input);

        let first = preview
            .system_messages
            .iter()
            .position(|m| m == "first fragment")
            .unwrap();
        let second = preview
            .system_messages
            .iter()
            .position(|m| m == "second fragment")
            .unwrap();
        assert!(first < second);
        assert!(!preview.system_messages.iter().any(|m| m == "   "));
    }

    #[test]
    fn retry_addendum_appears_only_with_pendings() {
        let descriptors = descriptors();
        let types = TypeHandlerRegistry::new();
        let ctx = BTreeMap::new();

        let clean = ConversationState::initial("add water");
        let preview = build_prompt(&inputs(&descriptors, &types, &ctx, Some(&clean)));
        assert!(
            !preview
                .system_messages
                .iter()
                .any(|m| m.contains("OUTSTANDING PARAMETERS"))
        );

        let mut waiting = clean.clone();
        waiting
            .pending_params
            .push(PendingParam::new("quantity", "How many?"));
        waiting
            .provided_params
            .insert("product".to_string(), serde_json::json!("water"));
        let preview = build_prompt(&inputs(&descriptors, &types, &ctx, Some(&waiting)));
        let addendum = preview
            .system_messages
            .iter()
            .find(|m| m.contains("OUTSTANDING PARAMETERS"))
            .unwrap();
        assert!(addendum.contains("- quantity: How many?"));
        assert!(addendum.contains("product = \"water\""));
    }

    #[test]
    fn truncate_for_prompt_appends_ellipsis() {
        assert_eq!(truncate_for_prompt("short", 10), "short");
        let long = "x".repeat(20);
        let cut = truncate_for_prompt(&long, 10);
        assert_eq!(cut.chars().count(), 11);
        assert!(cut.ends_with('…'));
    }
}
