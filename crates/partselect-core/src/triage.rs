//! Deterministic symptom triage.
//!
//! Maps a message to `(appliance, symptom, section, intent)` with ordered
//! keyword tables, decides whether a follow-up question is needed, and maps
//! the result to a [`DiagnosticState`].
//!
//! Table order matters: the first symptom whose phrases match wins. When the
//! message names a dishwasher, dishwasher rules run before refrigerator
//! rules; shared rules (leaking, noise, "not working") always run last.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::ApplianceType;
use crate::state::{DiagnosticState, Intent, Section, Symptom};

pub const FOLLOW_UP_WARM: &str = "Is the freezer cold, or is it also not cooling?";

pub const FOLLOW_UP_GENERAL: &str = "To narrow this down, what's going on? For example: not \
cooling, too warm, leaking, making noise, or ice/water dispenser not working?";

pub const FOLLOW_UP_DISHWASHER: &str = "What's going on with your dishwasher? For example: not \
draining, leaking, not starting, not cleaning properly, not filling with water, or not drying?";

pub const FOLLOW_UP_WHICH_APPLIANCE: &str = "Which appliance is it, a refrigerator or a \
dishwasher? And what's going on? For example: not cooling, not draining, leaking, not starting, \
not filling, or not cleaning properly?";

type Rule = (Symptom, &'static [&'static str]);

const REFRIGERATOR_RULES: &[Rule] = &[
    (
        Symptom::TooCold,
        &["freezer too cold", "freezer is too cold", "freezing too much", "freezer freezing", "too cold"],
    ),
    (
        Symptom::TooWarm,
        &[
            "too warm",
            "too hot",
            "not cold enough",
            "refrigerator warm",
            "fridge warm",
            "fridge hot",
            "refrigerator hot",
            "fridge is warm",
            "refrigerator is warm",
        ],
    ),
    (
        Symptom::NotCooling,
        &[
            "not cooling",
            "not cool",
            "not cold",
            "won't cool",
            "not getting cold",
            "running but not cooling",
            "stopped cooling",
        ],
    ),
    (
        Symptom::IceMakerIssue,
        &[
            "ice maker",
            "icemaker",
            "making ice",
            "no ice",
            "ice not",
            "ice dispenser",
            "not dispensing water",
            "water dispenser",
            "ice not working",
        ],
    ),
];

const DISHWASHER_RULES: &[Rule] = &[
    (
        Symptom::NotDraining,
        &["not draining", "won't drain", "drain", "draining", "water in bottom", "standing water"],
    ),
    (
        Symptom::NotFilling,
        &["not filling", "won't fill", "no water", "water not filling", "fill water"],
    ),
    (
        Symptom::WillNotStart,
        &["won't start", "will not start", "not starting", "doesn't start", "won't run"],
    ),
    (
        Symptom::NotCleaning,
        &["not cleaning", "dishes dirty", "not cleaning properly", "cleaning poorly"],
    ),
    (
        Symptom::NotDispensing,
        &["not dispensing detergent", "detergent", "dispenser", "soap not dispensing"],
    ),
    (
        Symptom::NotDrying,
        &["not drying", "not dry", "won't dry", "doesn't dry", "dishes wet", "drying", "still wet"],
    ),
];

const SHARED_RULES: &[Rule] = &[
    (
        Symptom::Leaking,
        &["leak", "leaking", "water on floor", "water leaking", "puddle"],
    ),
    (
        Symptom::Noise,
        &["noisy", "noise", "loud", "humming", "buzzing", "rattling", "knocking"],
    ),
    (
        Symptom::General,
        &[
            "not working",
            "isn't working",
            "not working right",
            "not working properly",
            "broken",
            "malfunction",
            "something wrong",
            "doesn't work",
            "won't work",
            "not running",
            "stopped working",
            "acting up",
        ],
    ),
];

const BOTH_SECTIONS: &[&str] = &[
    "both",
    "entire",
    "whole unit",
    "whole fridge",
    "entire refrigerator",
    "both sections",
];

const FREEZER_SECTION: &[&str] = &[
    "freezer section",
    "freezer compartment",
    "only the freezer",
    "only freezer",
    "freezer is",
    "freezer's",
    "freezer",
];

const FRIDGE_SECTION: &[&str] = &[
    "refrigerator section",
    "fridge section",
    "fresh food",
    "only the fridge",
    "only the refrigerator",
    "only fridge",
    "only refrigerator",
    "fridge compartment",
    "refrigerator compartment",
];

const FREEZER_OK_REPLY: &[&str] = &[
    "freezer is cold",
    "freezer cold",
    "freezer works",
    "freezer's fine",
    "freezer fine",
    "only fridge",
    "only refrigerator",
    "only the fridge",
    "only the refrigerator",
    "fridge only",
    "refrigerator only",
    "just the fridge",
    "just fridge",
    "freezer good",
    "freezer ok",
    "freezer okay",
];

const BOTH_WARM_REPLY: &[&str] = &[
    "both",
    "neither",
    "freezer also not",
    "freezer also warm",
    "freezer not cold",
    "freezer is not cold",
    "freezer not cooling",
    "freezer too warm",
    "freezer warm",
    "freezer is warm",
    "also not cooling",
    "also not cold",
    "entire",
    "whole unit",
];

const COMPATIBILITY_WORDS: &[&str] = &[
    "compatible",
    "compatibility",
    "will this fit",
    "work with my model",
    "fits my",
    " fit ",
    " fits ",
];

const INSTALL_WORDS: &[&str] = &[
    "install",
    "installation",
    "how to replace",
    "replace part",
    "replace the",
    "put in",
];

const PRODUCT_WORDS: &[&str] = &["price", "in stock", "availability", "buy", "cost", "how much"];

static VAGUE_PROBLEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(isn't working|not working|broken|problem|issue|wrong|acting up|malfunction|doesn't work|won't work|not running|stopped working)\b",
    )
    .expect("valid regex")
});

static APPLIANCE_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(appliance|fridge|dishwasher|refrigerator|freezer|ice\s*maker)\b")
        .expect("valid regex")
});

static FIND_MODEL_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(find|where|locate|how|look)\b").expect("valid regex")
});

static MODEL_NUMBER_PHRASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bmodel\s*(number|#|no\b)").expect("valid regex"));

static PARTS_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(parts\s+for|need\s+parts|want\s+parts|find\s+parts|parts\s+list|show\s+(me\s+)?parts)\b")
        .expect("valid regex")
});

static PARTS_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(find|where|get|need|want|show|list|order)\b.*\bparts?\b")
        .expect("valid regex")
});

/// Triage outcome for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triage {
    pub appliance: ApplianceType,
    /// False when the appliance was defaulted rather than named.
    pub appliance_named: bool,
    pub symptom: Symptom,
    pub section: Section,
    pub intent: Intent,
    /// The reply resolved a pending freezer follow-up.
    pub answered_follow_up: bool,
    pub follow_up: Option<&'static str>,
}

fn normalize(message: &str) -> String {
    message.to_lowercase().replace('\u{2019}', "'")
}

fn any_phrase(lower: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| lower.contains(p))
}

fn match_rules(lower: &str, rules: &[Rule]) -> Option<Symptom> {
    rules
        .iter()
        .find(|(_, phrases)| any_phrase(lower, phrases))
        .map(|(symptom, _)| *symptom)
}

fn detect_symptom(lower: &str, appliance: ApplianceType) -> Symptom {
    let ordered: [&[Rule]; 3] = match appliance {
        ApplianceType::Dishwasher => [DISHWASHER_RULES, REFRIGERATOR_RULES, SHARED_RULES],
        ApplianceType::Refrigerator => [REFRIGERATOR_RULES, DISHWASHER_RULES, SHARED_RULES],
    };
    ordered
        .iter()
        .find_map(|rules| match_rules(lower, rules))
        .unwrap_or(Symptom::Other)
}

/// Affected compartment. "Both" phrases win over single-section phrases.
pub fn detect_section(message: &str) -> Section {
    let lower = normalize(message);
    if any_phrase(&lower, BOTH_SECTIONS) {
        Section::Both
    } else if any_phrase(&lower, FRIDGE_SECTION) {
        Section::Refrigerator
    } else if any_phrase(&lower, FREEZER_SECTION) {
        Section::Freezer
    } else {
        Section::Unknown
    }
}

pub fn detect_intent(message: &str) -> Intent {
    let lower = format!(" {} ", normalize(message).trim_end_matches(['?', '.', '!']));
    if any_phrase(&lower, COMPATIBILITY_WORDS) {
        Intent::Compatibility
    } else if any_phrase(&lower, INSTALL_WORDS) {
        Intent::PartInstall
    } else if any_phrase(&lower, PRODUCT_WORDS) {
        Intent::ProductInfo
    } else {
        Intent::Troubleshoot
    }
}

/// Whether `last_assistant` is the freezer follow-up question.
pub fn is_freezer_question(last_assistant: &str) -> bool {
    let lower = normalize(last_assistant);
    lower.contains("freezer cold")
        && (lower.contains("also not cooling") || lower.contains("also not cold"))
}

/// Parse a reply to the freezer question into the affected section.
pub fn parse_freezer_reply(message: &str) -> Option<Section> {
    let lower = normalize(message);
    if any_phrase(&lower, BOTH_WARM_REPLY) {
        Some(Section::Both)
    } else if any_phrase(&lower, FREEZER_OK_REPLY) {
        Some(Section::Refrigerator)
    } else {
        None
    }
}

/// Run triage for `message`, using the previous assistant turn to resolve
/// a pending freezer question.
pub fn triage(message: &str, named_appliance: Option<ApplianceType>, last_assistant: &str) -> Triage {
    let lower = normalize(message);
    let appliance = named_appliance.unwrap_or(ApplianceType::Refrigerator);
    let intent = detect_intent(message);

    if is_freezer_question(last_assistant) {
        if let Some(section) = parse_freezer_reply(message) {
            return Triage {
                appliance: ApplianceType::Refrigerator,
                appliance_named: true,
                symptom: Symptom::NotCooling,
                section,
                intent: Intent::Troubleshoot,
                answered_follow_up: true,
                follow_up: None,
            };
        }
    }

    if lower.trim().is_empty() {
        return Triage {
            appliance,
            appliance_named: named_appliance.is_some(),
            symptom: Symptom::Other,
            section: Section::Unknown,
            intent,
            answered_follow_up: false,
            follow_up: None,
        };
    }

    let symptom = detect_symptom(&lower, appliance);
    let section = match appliance {
        ApplianceType::Refrigerator => detect_section(message),
        ApplianceType::Dishwasher => Section::Unknown,
    };

    let follow_up = match (symptom, appliance, section) {
        (Symptom::TooWarm | Symptom::NotCooling, ApplianceType::Refrigerator, Section::Unknown) => {
            Some(FOLLOW_UP_WARM)
        }
        (Symptom::General, ApplianceType::Dishwasher, _) => Some(FOLLOW_UP_DISHWASHER),
        (Symptom::General, _, _) if named_appliance.is_none() => Some(FOLLOW_UP_WHICH_APPLIANCE),
        (Symptom::General, _, _) => Some(FOLLOW_UP_GENERAL),
        _ => None,
    };

    Triage {
        appliance,
        appliance_named: named_appliance.is_some(),
        symptom,
        section,
        intent,
        answered_follow_up: false,
        follow_up,
    }
}

/// Diagnostic state for a triaged complaint.
pub fn diagnostic_state(
    appliance: ApplianceType,
    symptom: Symptom,
    section: Section,
) -> DiagnosticState {
    match appliance {
        ApplianceType::Dishwasher => match symptom {
            Symptom::NotDraining => DiagnosticState::DwNotDraining,
            Symptom::Leaking => DiagnosticState::DwLeaking,
            Symptom::WillNotStart => DiagnosticState::DwWillNotStart,
            Symptom::NotCleaning => DiagnosticState::DwNotCleaning,
            Symptom::NotFilling => DiagnosticState::DwNotFilling,
            Symptom::NotDispensing => DiagnosticState::DwNotDispensing,
            Symptom::NotDrying => DiagnosticState::DwNotDrying,
            Symptom::Noise => DiagnosticState::DwNoisy,
            _ => DiagnosticState::DwFallback,
        },
        ApplianceType::Refrigerator => match (symptom, section) {
            (Symptom::TooCold, _) => DiagnosticState::RefS8TooCold,
            (Symptom::IceMakerIssue, _) => DiagnosticState::RefIceMaker,
            (Symptom::TooWarm | Symptom::NotCooling, Section::Both | Section::Freezer) => {
                DiagnosticState::RefS6BothWarm
            }
            (Symptom::TooWarm | Symptom::NotCooling, Section::Refrigerator) => {
                DiagnosticState::RefS7FreezerColdFridgeWarm
            }
            _ => DiagnosticState::RefS9Fallback,
        },
    }
}

/// "Where do I find my model number?"
pub fn is_find_model_question(message: &str) -> bool {
    FIND_MODEL_VERB.is_match(message) && MODEL_NUMBER_PHRASE.is_match(message)
}

/// Appliance word plus a vague complaint ("my fridge isn't working").
pub fn is_vague_problem(message: &str) -> bool {
    APPLIANCE_WORD.is_match(message) && VAGUE_PROBLEM.is_match(message)
}

/// Names an appliance and a concrete symptom, without a parts request or
/// model number.
pub fn is_symptom_only(message: &str, has_model: bool) -> bool {
    if has_model || PARTS_REQUEST.is_match(message) || !APPLIANCE_WORD.is_match(message) {
        return false;
    }
    let lower = normalize(message);
    let appliance = crate::slots::detect_appliance(message).unwrap_or(ApplianceType::Refrigerator);
    detect_symptom(&lower, appliance).is_specific()
}

/// Whether the current message is asking for a model's parts.
pub fn asks_for_parts(message: &str, model: Option<&str>) -> bool {
    if is_symptom_only(message, model.is_some()) {
        return false;
    }
    if PARTS_REQUEST.is_match(message) || PARTS_VERB.is_match(message) {
        return true;
    }
    match model {
        Some(m) => {
            let trimmed = message.trim().trim_end_matches(['?', '.', '!']);
            trimmed.len() <= 30 && trimmed.to_ascii_uppercase().contains(&m.to_ascii_uppercase())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(msg: &str) -> Triage {
        triage(msg, crate::slots::detect_appliance(msg), "")
    }

    #[test]
    fn test_ice_maker() {
        let r = t("My fridge is not making ice");
        assert_eq!(r.symptom, Symptom::IceMakerIssue);
        assert_eq!(r.follow_up, None);
        assert_eq!(
            diagnostic_state(r.appliance, r.symptom, r.section),
            DiagnosticState::RefIceMaker
        );
    }

    #[test]
    fn test_warm_without_section_asks_follow_up() {
        let r = t("my refrigerator is not cooling");
        assert_eq!(r.symptom, Symptom::NotCooling);
        assert_eq!(r.section, Section::Unknown);
        assert_eq!(r.follow_up, Some(FOLLOW_UP_WARM));
    }

    #[test]
    fn test_freezer_reply_resolves_state() {
        let r = triage("the freezer is cold", None, FOLLOW_UP_WARM);
        assert!(r.answered_follow_up);
        assert_eq!(r.section, Section::Refrigerator);
        assert_eq!(
            diagnostic_state(r.appliance, r.symptom, r.section),
            DiagnosticState::RefS7FreezerColdFridgeWarm
        );

        let r = triage("both are warm", None, FOLLOW_UP_WARM);
        assert_eq!(
            diagnostic_state(r.appliance, r.symptom, r.section),
            DiagnosticState::RefS6BothWarm
        );
    }

    #[test]
    fn test_dishwasher_rules_run_first() {
        let r = t("dishwasher has standing water and won't drain");
        assert_eq!(r.appliance, ApplianceType::Dishwasher);
        assert_eq!(r.symptom, Symptom::NotDraining);
        assert_eq!(
            diagnostic_state(r.appliance, r.symptom, r.section),
            DiagnosticState::DwNotDraining
        );
    }

    #[test]
    fn test_dishwasher_noise_maps_to_noisy() {
        let r = t("my dishwasher is really loud");
        assert_eq!(
            diagnostic_state(r.appliance, r.symptom, r.section),
            DiagnosticState::DwNoisy
        );
    }

    #[test]
    fn test_vague_problem_follow_ups() {
        assert_eq!(t("my dishwasher is broken").follow_up, Some(FOLLOW_UP_DISHWASHER));
        assert_eq!(t("my fridge stopped working").follow_up, Some(FOLLOW_UP_GENERAL));
        assert_eq!(
            t("it stopped working").follow_up,
            Some(FOLLOW_UP_WHICH_APPLIANCE)
        );
    }

    #[test]
    fn test_intents() {
        assert_eq!(detect_intent("Is PS11752778 compatible with WDT780SAEM1?"), Intent::Compatibility);
        assert_eq!(detect_intent("will it fit?"), Intent::Compatibility);
        assert_eq!(detect_intent("Install PS12345678"), Intent::PartInstall);
        assert_eq!(detect_intent("how much is the door bin"), Intent::ProductInfo);
        assert_eq!(detect_intent("Parts for WRF535SWHZ"), Intent::Troubleshoot);
    }

    #[test]
    fn test_find_model_question() {
        assert!(is_find_model_question("Where can I find my model number?"));
        assert!(!is_find_model_question("Parts for WRF535SWHZ"));
    }

    #[test]
    fn test_asks_for_parts() {
        assert!(asks_for_parts("Parts for WRF535SWHZ", Some("WRF535SWHZ")));
        assert!(asks_for_parts("WRF535SWHZ", Some("WRF535SWHZ")));
        assert!(!asks_for_parts("My fridge is not making ice", None));
    }

    #[test]
    fn test_symptom_only() {
        assert!(is_symptom_only("My fridge is not making ice", false));
        assert!(!is_symptom_only("My fridge is not making ice", true));
        assert!(!is_symptom_only("parts for my fridge", false));
    }
}
