//! Built-in workflow definitions.
//!
//! Each prompt template tells the generator which marker to emit before its
//! JSON block; see [`crate::handoff`] for the marker list.

use super::definition::{Step, StaticRegistry, WorkflowDefinition};
use crate::handoff::PayloadKind;

/// Chat modes of the built-in definitions.
pub mod modes {
    pub const FIRST_TIME_ONBOARDING: &str = "first_time_onboarding";
    pub const ARC_CREATION: &str = "arc_creation";
    pub const GOAL_CREATION: &str = "goal_creation";
    pub const ACTIVITY_SUGGESTIONS: &str = "activity_suggestions";
}

/// Collected-data keys shared between definitions and the fallback
/// synthesizer.
pub mod keys {
    pub const DISPLAY_NAME: &str = "display_name";
    pub const FOCUS_AREA: &str = "focus_area";
    pub const ARC_DOMAIN: &str = "arc_domain";
    pub const ARC_MOTIVATION: &str = "arc_motivation";
    pub const ARC_IDENTITY: &str = "arc_identity";
    pub const GOAL_INTENT: &str = "goal_intent";
    pub const GOAL_TIMEFRAME: &str = "goal_timeframe";
    pub const ACTIVITY_CONTEXT: &str = "activity_context";
}

const ONBOARDING_WELCOME: &str = "\
You are a warm guide welcoming someone to the app for the first time.
Greet them in one or two sentences and ask what they'd like to be called.
Ask ONE question only. Do not output JSON in this turn.";

const ONBOARDING_PROFILE: &str = "\
Summarise what you have learned about the user in two short sentences, \
then ask them to confirm.
After your prose, on its own line, write PROFILE_SUMMARY_JSON: followed by \
a single JSON object {\"displayName\": string, \"focusArea\": string}.";

const ARC_PROPOSAL: &str = "\
Propose one identity arc for the user based on the authoritative inputs.
Write two or three sentences explaining the arc in the user's own words.
Then, on its own line, write ARC_PROPOSAL_JSON: followed by a single JSON \
object {\"name\": string, \"narrative\": string}. No markdown fences.";

const ARC_HINT: &str = "\
The name must be 1-4 words. The narrative must be 2-4 sentences, first person, \
and must reference the user's stated motivation.";

const GOAL_PROPOSAL: &str = "\
Turn the user's intent into one concrete goal.
Explain it briefly, then on its own line write GOAL_PROPOSAL_JSON: followed by \
a single JSON object {\"title\": string, \"description\": string, \
\"targetDate\": string | null}.";

const ACTIVITY_PROMPT: &str = "\
Suggest three small activities that move the user toward their goal.
Introduce them in one sentence, then on its own line write \
ACTIVITY_SUGGESTIONS_JSON: followed by {\"suggestions\": [{\"title\": string, \
\"minutes\": number}]}.";

/// First-run onboarding. Opts out of auto-complete: the onboarding presenter
/// decides when the flow is over.
pub fn first_time_onboarding() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "first-time-onboarding-v1",
        modes::FIRST_TIME_ONBOARDING,
        vec![
            Step::agent_generate("welcome")
                .then("name")
                .with_prompt(ONBOARDING_WELCOME),
            Step::user_input("name")
                .then("focus")
                .collect_as(keys::DISPLAY_NAME),
            Step::user_input("focus")
                .then("profile_summary")
                .collect_as(keys::FOCUS_AREA),
            Step::agent_generate("profile_summary")
                .then("confirm_profile")
                .with_prompt(ONBOARDING_PROFILE)
                .with_loading_message("Putting your profile together…")
                .expects(PayloadKind::ProfileSummary),
            Step::terminal("confirm_profile").hide_freeform(),
        ],
    )
    .without_auto_complete()
}

/// Arc creation. The only definition that keeps a transcript draft.
pub fn arc_creation() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "arc-creation-v2",
        modes::ARC_CREATION,
        vec![
            Step::user_input("domain")
                .then("motivation")
                .collect_as(keys::ARC_DOMAIN),
            Step::user_input("motivation")
                .then("identity")
                .collect_as(keys::ARC_MOTIVATION),
            Step::user_input("identity")
                .then("proposal")
                .collect_as(keys::ARC_IDENTITY),
            Step::agent_generate("proposal")
                .then("confirm")
                .with_prompt(ARC_PROPOSAL)
                .with_validation_hint(ARC_HINT)
                .with_loading_message("Drafting your arc…")
                .expects(PayloadKind::ArcProposal),
            Step::terminal("confirm").hide_freeform(),
        ],
    )
    .with_draft()
}

pub fn goal_creation() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "goal-creation-v1",
        modes::GOAL_CREATION,
        vec![
            Step::user_input("intent")
                .then("timeframe")
                .collect_as(keys::GOAL_INTENT),
            Step::user_input("timeframe")
                .then("proposal")
                .collect_as(keys::GOAL_TIMEFRAME),
            Step::agent_generate("proposal")
                .then("confirm")
                .with_prompt(GOAL_PROPOSAL)
                .with_loading_message("Shaping your goal…")
                .expects(PayloadKind::GoalProposal),
            Step::terminal("confirm").hide_freeform(),
        ],
    )
}

pub fn activity_suggestions() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "activity-suggestions-v1",
        modes::ACTIVITY_SUGGESTIONS,
        vec![
            Step::user_input("context")
                .then("suggest")
                .collect_as(keys::ACTIVITY_CONTEXT),
            Step::agent_generate("suggest")
                .with_prompt(ACTIVITY_PROMPT)
                .with_loading_message("Finding a few ideas…")
                .expects(PayloadKind::ActivitySuggestions),
        ],
    )
}

/// Registry holding every built-in definition.
pub fn builtin_registry() -> StaticRegistry {
    StaticRegistry::new()
        .with(first_time_onboarding())
        .with(arc_creation())
        .with(goal_creation())
        .with(activity_suggestions())
}
