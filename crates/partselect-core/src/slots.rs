//! Slot extraction: model numbers, part numbers and appliance type.
//!
//! Model numbers are tried in a fixed order, and the first valid hit wins:
//!
//! 1. `BASE (REV)` revision form, e.g. `WRF535SWHZ (00)`;
//! 2. `my <X> model`;
//! 3. a `model number` / `model #` / `model is` trigger;
//! 4. the whole message being a single model-like token;
//! 5. the first model-like token anywhere in the message.
//!
//! A PartSelect part number (`PS` + digits) is never taken as a model.
//! Prior turns are consulted when the current message has no slot: the
//! last two user turns for a model, every user turn for a part, and for
//! compatibility follow-ups the part named in the last assistant turn.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{ApplianceType, ChatMessage, Role};

const TOKEN: &str = r"[A-Z0-9][A-Z0-9\-]{4,24}";

static PS_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bPS\d{5,15}\b").expect("valid regex"));

static PS_EXACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^PS\d{5,15}$").expect("valid regex"));

static PART_TRIGGER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bpart\s*(?:number|no\.?|#)\s*(?:is|:)?\s*([A-Z0-9][A-Z0-9\-]{3,24})\b")
        .expect("valid regex")
});

static MODEL_REVISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({})\s*\(\s*(\d{{1,4}})\s*\)", TOKEN)).expect("valid regex")
});

static MY_X_MODEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\bmy\s+({})\s+model\b", TOKEN)).expect("valid regex")
});

static MODEL_TRIGGER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:model|serial|unit)\s*(?:number|no\.?|#)?\s*(?:is|:)?\s*({})\b",
        TOKEN
    ))
    .expect("valid regex")
});

static WHOLE_MODEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)^{}$", TOKEN)).expect("valid regex"));

static MODEL_CANDIDATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\b{}\b", TOKEN)).expect("valid regex"));

static COMPAT_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(compatible|compatibility|fit|fits)\b").expect("valid regex")
});

static ASSISTANT_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:PartSelect:\s*|Part\s*#\s*|Part\s+)(PS\d{5,15})").expect("valid regex")
});

static DISHWASHER_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(dishwasher|dish\s+washer|dishwashing)\b").expect("valid regex")
});

static REFRIGERATOR_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(refrigerator|fridge|freezer|ice\s*maker)\b").expect("valid regex")
});

const MODEL_SKIP: &[&str] = &[
    "PART",
    "REPAIR",
    "HELP",
    "COOLING",
    "WARM",
    "FRIDGE",
    "DISHWASHER",
    "REFRIGERATOR",
];

const PART_SKIP: &[&str] = &[
    "REPLACE",
    "PART",
    "PARTS",
    "INSTALL",
    "INSTALLATION",
    "HOW",
    "IT",
    "COMPATIBLE",
    "COMPATIBILITY",
    "MODEL",
];

/// A model number with its optional manufacturer revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub base: String,
    pub revision: Option<String>,
}

impl ModelRef {
    fn new(base: &str) -> Self {
        Self {
            base: normalize(base),
            revision: None,
        }
    }
}

/// Slots found in a message and its history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedSlots {
    pub model: Option<ModelRef>,
    pub part_number: Option<String>,
    pub appliance_type: Option<ApplianceType>,
}

fn normalize(s: &str) -> String {
    s.trim().to_ascii_uppercase()
}

/// Whether `s` could be an appliance model number.
pub fn is_valid_model_number(s: &str) -> bool {
    let s = s.trim();
    if s.len() < 5 || s.len() > 25 {
        return false;
    }
    let upper = s.to_ascii_uppercase();
    if MODEL_SKIP.contains(&upper.as_str()) || PS_EXACT.is_match(&upper) {
        return false;
    }
    s.chars().any(|c| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Whether `s` could be a PartSelect or manufacturer part number.
pub fn is_valid_part_number(s: &str) -> bool {
    let s = s.trim();
    if PS_EXACT.is_match(s) {
        return true;
    }
    let upper = s.to_ascii_uppercase();
    (4..=25).contains(&s.len())
        && !PART_SKIP.contains(&upper.as_str())
        && s.chars().any(|c| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Extract a model number from a single message.
pub fn extract_model(message: &str) -> Option<ModelRef> {
    let msg = message.trim();
    if msg.is_empty() {
        return None;
    }

    for caps in MODEL_REVISION.captures_iter(msg) {
        if is_valid_model_number(&caps[1]) {
            return Some(ModelRef {
                base: normalize(&caps[1]),
                revision: Some(caps[2].to_string()),
            });
        }
    }

    let triggered = MY_X_MODEL
        .captures_iter(msg)
        .chain(MODEL_TRIGGER.captures_iter(msg))
        .map(|caps| caps[1].to_string())
        .find(|c| is_valid_model_number(c));
    if let Some(candidate) = triggered {
        return Some(ModelRef::new(&candidate));
    }

    if WHOLE_MODEL.is_match(msg) && is_valid_model_number(msg) {
        return Some(ModelRef::new(msg));
    }

    // A token already taken as the part number is never the model.
    let part = extract_part_number(msg);
    MODEL_CANDIDATE
        .find_iter(msg)
        .map(|m| m.as_str())
        .filter(|c| part.as_deref() != Some(normalize(c).as_str()))
        .find(|c| is_valid_model_number(c))
        .map(ModelRef::new)
}

/// Extract a part number from a single message. PartSelect numbers win
/// over manufacturer numbers.
pub fn extract_part_number(message: &str) -> Option<String> {
    if let Some(m) = PS_NUMBER.find(message) {
        return Some(normalize(m.as_str()));
    }
    PART_TRIGGER
        .captures_iter(message)
        .map(|caps| caps[1].to_string())
        .find(|c| is_valid_part_number(c))
        .map(|c| normalize(&c))
}

/// Appliance named in the message. Dishwasher words are checked first.
pub fn detect_appliance(message: &str) -> Option<ApplianceType> {
    if DISHWASHER_WORDS.is_match(message) {
        Some(ApplianceType::Dishwasher)
    } else if REFRIGERATOR_WORDS.is_match(message) {
        Some(ApplianceType::Refrigerator)
    } else {
        None
    }
}

/// PartSelect number mentioned by the assistant, for "does it fit?" turns.
fn part_from_assistant(last_assistant: &str) -> Option<String> {
    ASSISTANT_PART
        .captures(last_assistant)
        .map(|caps| normalize(&caps[1]))
        .or_else(|| PS_NUMBER.find(last_assistant).map(|m| normalize(m.as_str())))
}

/// Extract slots from the current message, falling back to history.
pub fn extract_slots(message: &str, history: &[ChatMessage]) -> ExtractedSlots {
    let user_turns: Vec<&str> = history
        .iter()
        .rev()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .collect();
    let last_assistant = history
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .map(|m| m.content.as_str())
        .unwrap_or("");

    let model = extract_model(message)
        .or_else(|| user_turns.iter().take(2).find_map(|t| extract_model(t)));

    let mut part_number = extract_part_number(message)
        .or_else(|| user_turns.iter().find_map(|t| extract_part_number(t)));
    if part_number.is_none() && COMPAT_WORDS.is_match(message) {
        part_number = part_from_assistant(last_assistant);
    }

    let appliance_type = detect_appliance(message)
        .or_else(|| user_turns.iter().find_map(|t| detect_appliance(t)));

    ExtractedSlots {
        model,
        part_number,
        appliance_type,
    }
}

// ============ PartSelect URLs ============

pub const PARTSELECT_BASE: &str = "https://www.partselect.com";

/// Model page, with the revision path segment when known.
pub fn model_page_url(base: &str, revision: Option<&str>) -> String {
    let base = normalize(base);
    match revision {
        Some(rev) => format!("{}/Models/{}/MFGModelNumber/{}/", PARTSELECT_BASE, base, rev),
        None => format!("{}/Models/{}/", PARTSELECT_BASE, base),
    }
}

/// Site search for a part or model number.
pub fn search_url(term: &str) -> String {
    format!("{}/Search.aspx?SearchTerm={}", PARTSELECT_BASE, normalize(term))
}

/// Product image path used when the catalog row has no image.
pub fn part_image_url(partselect_number: &str) -> String {
    format!(
        "{}/PartSelectImages/{}.jpg",
        PARTSELECT_BASE,
        normalize(partselect_number)
    )
}
