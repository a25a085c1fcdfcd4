//! Routing: choose exactly one [`NextAction`] for an in-scope message.
//!
//! Two strategies share the same output type, [`Routing`]:
//!
//! - **Rules** ([`route_rules`]): ordered deterministic rules. The first
//!   match wins; no match asks a clarifying question.
//! - **Planner** ([`route_explicit`] then [`accept_proposal`]): the explicit
//!   slot rules still run first; otherwise a [`Planner`] proposes an action
//!   and slots. The proposal is parsed into the closed action enum and its
//!   slots are validated. Anything unrecognized is rejected with
//!   [`EngineError::InvalidPlan`] and the caller falls back to
//!   [`route_symptoms`].
//!
//! Rules, in order:
//!
//! | # | Condition | Action |
//! |---|-----------|--------|
//! | 1 | greeting only | ask_clarify |
//! | 2 | asks where to find the model number | find_model_help |
//! | 3 | compatibility question | compatibility_answer, or ask_clarify if a slot is missing |
//! | 4 | install / price question without model or part | ask_clarify |
//! | 5 | install question with a part but no model | ask_clarify for the model |
//! | 6 | part number in play | part_lookup_answer |
//! | 7 | model number and a parts request, or a model with no symptom | parts_list_answer |
//! | 8 | reply to the freezer question | retrieve |
//! | 9 | triage wants a follow-up | ask_clarify |
//! | 10 | recognized symptom | retrieve |
//! | 11 | anything else | ask_clarify |

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::error::EngineError;
use crate::models::{ApplianceType, ChatMessage};
use crate::scope::is_greeting;
use crate::slots::{is_valid_model_number, is_valid_part_number};
use crate::state::{ActionArgs, ConversationState, Diagnosis, Intent, NextAction, Slots, StateUpdate};
use crate::triage::{self, Triage, FOLLOW_UP_GENERAL, FOLLOW_UP_WHICH_APPLIANCE};

pub const CLARIFY_GREETING: &str = "Hi! I can help with refrigerator and dishwasher parts. \
Search by part or model number, check compatibility, or describe a problem. What do you need?";

pub const CLARIFY_BOTH_MISSING: &str = "I can help two ways: (1) share your model number to find \
the right part, or (2) share the part number if you already have it (e.g. PS12345678).";

pub const CLARIFY_NEED_PART: &str = "Do you have the PartSelect part number (e.g. PS12345678)? \
If not, tell me your model number and what part you're looking for (e.g. 'door gasket').";

pub const CLARIFY_NEED_MODEL: &str = "What's the model number from the sticker inside the door? \
I'll pull the exact parts list.";

pub const CLARIFY_COMPATIBILITY: &str = "To check compatibility I need both your appliance model \
number and the part number (e.g. model WDT780SAEM1 and part PS11752778).";

/// Question asked before install help when only the part is known.
pub fn clarify_install_needs_model(part_number: &str) -> String {
    format!(
        "Before you install {}, let's make sure it fits. What's your appliance model number? \
It's usually on a sticker inside the door or along the frame.",
        part_number
    )
}

/// A routing decision, plus any slot values the router settled.
#[derive(Debug, Clone, PartialEq)]
pub struct Routing {
    pub next_action: NextAction,
    pub args: ActionArgs,
    pub intent: Intent,
    pub diagnosis: Diagnosis,
    pub model_number: Option<String>,
    pub part_number: Option<String>,
    pub appliance_type: Option<ApplianceType>,
}

impl Routing {
    fn new(next_action: NextAction, t: &Triage) -> Self {
        Self {
            next_action,
            args: ActionArgs::default(),
            intent: t.intent,
            diagnosis: Diagnosis {
                symptom: t.symptom,
                section: t.section,
                state: None,
            },
            model_number: None,
            part_number: None,
            appliance_type: None,
        }
    }

    fn clarify(t: &Triage, question: impl Into<String>) -> Self {
        let mut r = Self::new(NextAction::AskClarify, t);
        r.args.question = Some(question.into());
        r
    }

    fn retrieve(t: &Triage) -> Self {
        let mut r = Self::new(NextAction::Retrieve, t);
        r.diagnosis.state = Some(triage::diagnostic_state(t.appliance, t.symptom, t.section));
        if t.appliance_named {
            r.appliance_type = Some(t.appliance);
        }
        r
    }

    pub fn into_update(self) -> StateUpdate {
        StateUpdate {
            next_action: Some(self.next_action),
            action_args: Some(self.args),
            intent: Some(self.intent),
            diagnosis: Some(self.diagnosis),
            model_number: self.model_number,
            part_number: self.part_number,
            appliance_type: self.appliance_type,
            ..Default::default()
        }
    }
}

/// Triage for the state's current message.
pub fn triage_state(state: &ConversationState) -> Triage {
    triage::triage(
        &state.message,
        state.slots.appliance_type,
        state.last_assistant(),
    )
}

fn mentions(message: &str, value: &str) -> bool {
    message.to_ascii_uppercase().contains(&value.to_ascii_uppercase())
}

/// Rules 1–7: greeting, model-number help, and slot-driven actions.
pub fn route_explicit(state: &ConversationState, t: &Triage) -> Option<Routing> {
    let msg = state.message.as_str();
    let model = state.slots.model_number.as_deref();
    let part = state.slots.part_number.as_deref();

    if is_greeting(msg) {
        return Some(Routing::clarify(t, CLARIFY_GREETING));
    }
    if triage::is_find_model_question(msg) {
        return Some(Routing::new(NextAction::FindModelHelp, t));
    }

    match (t.intent, model, part) {
        (Intent::Compatibility, Some(_), Some(_)) => {
            return Some(Routing::new(NextAction::CompatibilityAnswer, t));
        }
        (Intent::Compatibility, _, _) => return Some(Routing::clarify(t, CLARIFY_COMPATIBILITY)),
        (Intent::PartInstall | Intent::ProductInfo, None, None) => {
            return Some(Routing::clarify(t, CLARIFY_BOTH_MISSING));
        }
        (Intent::PartInstall, None, Some(p)) => {
            return Some(Routing::clarify(t, clarify_install_needs_model(p)));
        }
        _ => {}
    }

    if let Some(p) = part {
        if mentions(msg, p) || matches!(t.intent, Intent::PartInstall | Intent::ProductInfo) {
            return Some(Routing::new(NextAction::PartLookupAnswer, t));
        }
    }

    if let Some(m) = model {
        let no_symptom = !t.symptom.is_specific() && t.follow_up.is_none();
        if triage::asks_for_parts(msg, Some(m)) || (mentions(msg, m) && no_symptom) {
            return Some(Routing::new(NextAction::PartsListAnswer, t));
        }
    }

    None
}

/// Rules 8–11: symptom triage.
pub fn route_symptoms(t: &Triage) -> Routing {
    if t.answered_follow_up {
        return Routing::retrieve(t);
    }
    if let Some(question) = t.follow_up {
        return Routing::clarify(t, question);
    }
    if t.symptom.is_specific() {
        return Routing::retrieve(t);
    }
    if t.appliance_named {
        Routing::clarify(t, FOLLOW_UP_GENERAL)
    } else {
        Routing::clarify(t, FOLLOW_UP_WHICH_APPLIANCE)
    }
}

/// The rule-based strategy.
pub fn route_rules(state: &ConversationState) -> Routing {
    let t = triage_state(state);
    route_explicit(state, &t).unwrap_or_else(|| route_symptoms(&t))
}

// ============ Planner ============

/// Raw planner output. Every field is untrusted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PlannerProposal {
    pub next_action: String,
    #[serde(default)]
    pub model_number: Option<String>,
    #[serde(default)]
    pub part_number: Option<String>,
    #[serde(default)]
    pub appliance_type: Option<String>,
    #[serde(default)]
    pub clarify_question: Option<String>,
}

/// Language-model planner proposing the next action.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn propose(
        &self,
        message: &str,
        history: &[ChatMessage],
        slots: &Slots,
    ) -> Result<PlannerProposal>;
}

/// Check that `action` has the slots it needs.
pub fn require_slots(
    action: NextAction,
    model: Option<&str>,
    part: Option<&str>,
) -> std::result::Result<(), EngineError> {
    match action {
        NextAction::PartsListAnswer if model.is_none() => Err(EngineError::SlotMissing("model_number")),
        NextAction::PartLookupAnswer if part.is_none() => Err(EngineError::SlotMissing("part_number")),
        NextAction::CompatibilityAnswer if model.is_none() || part.is_none() => {
            Err(EngineError::SlotMissing("model_number and part_number"))
        }
        _ => Ok(()),
    }
}

/// Validate a planner proposal against the closed action set and the slot
/// validators.
pub fn accept_proposal(
    state: &ConversationState,
    t: &Triage,
    proposal: PlannerProposal,
) -> std::result::Result<Routing, EngineError> {
    let proposed: NextAction = proposal
        .next_action
        .parse()
        .map_err(EngineError::InvalidPlan)?;

    let model = proposal
        .model_number
        .filter(|m| is_valid_model_number(m))
        .map(|m| m.trim().to_ascii_uppercase())
        .or_else(|| state.slots.model_number.clone());
    let part = proposal
        .part_number
        .filter(|p| is_valid_part_number(p))
        .map(|p| p.trim().to_ascii_uppercase())
        .or_else(|| state.slots.part_number.clone());
    let appliance = proposal
        .appliance_type
        .and_then(|a| a.parse::<ApplianceType>().ok())
        .or(state.slots.appliance_type);

    let action = if triage::is_symptom_only(&state.message, model.is_some()) {
        NextAction::Retrieve
    } else {
        proposed
    };

    let mut routing = match require_slots(action, model.as_deref(), part.as_deref()) {
        Err(_) => {
            let question = match action {
                NextAction::CompatibilityAnswer => CLARIFY_COMPATIBILITY,
                NextAction::PartsListAnswer => CLARIFY_NEED_MODEL,
                _ => CLARIFY_NEED_PART,
            };
            Routing::clarify(t, question)
        }
        Ok(()) => match action {
            NextAction::AskClarify => {
                let question = proposal
                    .clarify_question
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .or_else(|| t.follow_up.map(String::from))
                    .unwrap_or_else(|| FOLLOW_UP_GENERAL.to_string());
                Routing::clarify(t, question)
            }
            NextAction::Retrieve => {
                let mut adjusted = *t;
                if let Some(a) = appliance {
                    adjusted.appliance = a;
                    adjusted.appliance_named = true;
                }
                Routing::retrieve(&adjusted)
            }
            other => Routing::new(other, t),
        },
    };

    routing.model_number = model;
    routing.part_number = part;
    routing.appliance_type = appliance;
    Ok(routing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::extract_slots;
    use crate::state::{DiagnosticState, Symptom};

    fn state_for(message: &str, history: Vec<ChatMessage>) -> ConversationState {
        let extracted = extract_slots(message, &history);
        let state = ConversationState::new(message, history);
        state.apply(StateUpdate {
            model_number: extracted.model.as_ref().map(|m| m.base.clone()),
            part_number: extracted.part_number,
            appliance_type: extracted.appliance_type,
            ..Default::default()
        })
    }

    fn action(message: &str) -> NextAction {
        route_rules(&state_for(message, Vec::new())).next_action
    }

    #[test]
    fn test_end_to_end_messages() {
        assert_eq!(action("Where can I find my model number?"), NextAction::FindModelHelp);
        assert_eq!(action("Parts for WRF535SWHZ"), NextAction::PartsListAnswer);
        assert_eq!(
            action("Is PS11752778 compatible with WDT780SAEM1?"),
            NextAction::CompatibilityAnswer
        );
        assert_eq!(action("My fridge is not making ice"), NextAction::Retrieve);
        assert_eq!(action("Install PS12345678"), NextAction::AskClarify);
    }

    #[test]
    fn test_install_without_model_asks_for_model() {
        let r = route_rules(&state_for("Install PS12345678", Vec::new()));
        let q = r.args.question.unwrap();
        assert!(q.contains("model number"));
        assert!(q.contains("PS12345678"));
    }

    #[test]
    fn test_compatibility_missing_slot() {
        let r = route_rules(&state_for("Is PS11752778 compatible?", Vec::new()));
        assert_eq!(r.next_action, NextAction::AskClarify);
        assert_eq!(r.args.question.as_deref(), Some(CLARIFY_COMPATIBILITY));
    }

    #[test]
    fn test_part_lookup_and_model_only() {
        assert_eq!(action("What is PS11752778?"), NextAction::PartLookupAnswer);
        assert_eq!(action("WDT780SAEM1"), NextAction::PartsListAnswer);
    }

    #[test]
    fn test_warm_fridge_follow_up_then_retrieve() {
        let r = route_rules(&state_for("my refrigerator is not cooling", Vec::new()));
        assert_eq!(r.next_action, NextAction::AskClarify);
        assert_eq!(r.args.question.as_deref(), Some(triage::FOLLOW_UP_WARM));

        let history = vec![
            ChatMessage::user("my refrigerator is not cooling"),
            ChatMessage::assistant(triage::FOLLOW_UP_WARM),
        ];
        let r = route_rules(&state_for("the freezer is cold", history));
        assert_eq!(r.next_action, NextAction::Retrieve);
        assert_eq!(
            r.diagnosis.state,
            Some(DiagnosticState::RefS7FreezerColdFridgeWarm)
        );
    }

    #[test]
    fn test_symptom_in_later_turn_ignores_old_part() {
        let history = vec![ChatMessage::user("What is PS11752778?")];
        let r = route_rules(&state_for("my dishwasher won't drain", history));
        assert_eq!(r.next_action, NextAction::Retrieve);
        assert_eq!(r.diagnosis.symptom, Symptom::NotDraining);
    }

    #[test]
    fn test_greeting_and_fallback() {
        let r = route_rules(&state_for("hello", Vec::new()));
        assert_eq!(r.args.question.as_deref(), Some(CLARIFY_GREETING));
        let r = route_rules(&state_for("can you help me", Vec::new()));
        assert_eq!(r.next_action, NextAction::AskClarify);
    }

    #[test]
    fn test_unknown_planner_action_is_rejected() {
        let state = state_for("Parts for WRF535SWHZ", Vec::new());
        let t = triage_state(&state);
        let err = accept_proposal(
            &state,
            &t,
            PlannerProposal {
                next_action: "delete_everything".into(),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPlan(ref a) if a == "delete_everything"));
    }

    #[test]
    fn test_planner_slots_are_validated() {
        let state = state_for("what parts fit my fridge", Vec::new());
        let t = triage_state(&state);
        let r = accept_proposal(
            &state,
            &t,
            PlannerProposal {
                next_action: "parts_list".into(),
                model_number: Some("FRIDGE".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(r.next_action, NextAction::AskClarify);
        assert_eq!(r.args.question.as_deref(), Some(CLARIFY_NEED_MODEL));
        assert_eq!(r.model_number, None);
    }

    #[test]
    fn test_planner_symptom_only_forces_retrieve() {
        let state = state_for("My fridge is not making ice", Vec::new());
        let t = triage_state(&state);
        let r = accept_proposal(
            &state,
            &t,
            PlannerProposal {
                next_action: "part_detail".into(),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(r.next_action, NextAction::Retrieve);
        assert_eq!(r.diagnosis.state, Some(DiagnosticState::RefIceMaker));
    }

    #[test]
    fn test_planner_accepts_valid_slots() {
        let state = state_for("can you check this", Vec::new());
        let t = triage_state(&state);
        let r = accept_proposal(
            &state,
            &t,
            PlannerProposal {
                next_action: "compatibility".into(),
                model_number: Some("wdt780saem1".into()),
                part_number: Some("PS11752778".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(r.next_action, NextAction::CompatibilityAnswer);
        assert_eq!(r.model_number.as_deref(), Some("WDT780SAEM1"));
    }
}
