//! Typed conversation state and the single merge function.
//!
//! A [`ConversationState`] is built fresh for every inbound message and
//! discarded once the response is sent. Each pipeline stage returns a
//! [`StateUpdate`]; [`ConversationState::apply`] is the only place the two
//! are merged:
//!
//! - a field left `None` in the update keeps its current value;
//! - list-valued fields (`evidence`, `citations`, `product_cards`) are
//!   replaced wholesale, never appended.
//!
//! The action set is the closed [`NextAction`] enum. Planner output is
//! parsed into it with [`FromStr`], so an unknown action string can never
//! reach a handler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::{ApplianceType, ChatMessage, Citation, EvidenceChunk, ProductCard, Role};

/// Result of the scope gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeLabel {
    InScope,
    OutOfScope,
    Ambiguous,
}

impl ScopeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeLabel::InScope => "IN_SCOPE",
            ScopeLabel::OutOfScope => "OUT_OF_SCOPE",
            ScopeLabel::Ambiguous => "AMBIGUOUS",
        }
    }

    /// Whether the pipeline may continue past the scope gate.
    pub fn is_in_scope(&self) -> bool {
        matches!(self, ScopeLabel::InScope)
    }
}

impl fmt::Display for ScopeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace([' ', '-'], "_").as_str() {
            "IN_SCOPE" | "IN" => Ok(ScopeLabel::InScope),
            "OUT_OF_SCOPE" | "OUT" => Ok(ScopeLabel::OutOfScope),
            "AMBIGUOUS" => Ok(ScopeLabel::Ambiguous),
            other => Err(format!("unknown scope label '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    #[default]
    Troubleshoot,
    Compatibility,
    PartInstall,
    ProductInfo,
}

/// Triage symptom vocabulary. The snake_case names double as the chunk
/// `symptom_tag` values the source policy filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symptom {
    TooCold,
    TooWarm,
    NotCooling,
    IceMakerIssue,
    Leaking,
    Noise,
    General,
    NotDraining,
    NotFilling,
    WillNotStart,
    NotCleaning,
    NotDispensing,
    NotDrying,
    #[default]
    Other,
}

impl Symptom {
    pub fn tag(&self) -> &'static str {
        match self {
            Symptom::TooCold => "too_cold",
            Symptom::TooWarm => "too_warm",
            Symptom::NotCooling => "not_cooling",
            Symptom::IceMakerIssue => "ice_maker_issue",
            Symptom::Leaking => "leaking",
            Symptom::Noise => "noise",
            Symptom::General => "general",
            Symptom::NotDraining => "not_draining",
            Symptom::NotFilling => "not_filling",
            Symptom::WillNotStart => "will_not_start",
            Symptom::NotCleaning => "not_cleaning",
            Symptom::NotDispensing => "not_dispensing",
            Symptom::NotDrying => "not_drying",
            Symptom::Other => "other",
        }
    }

    /// A concrete complaint, as opposed to "something is wrong" or nothing.
    pub fn is_specific(&self) -> bool {
        !matches!(self, Symptom::General | Symptom::Other)
    }
}

/// Which refrigerator compartment the user says is affected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Both,
    Refrigerator,
    Freezer,
    #[default]
    Unknown,
}

/// Named troubleshooting context used to scope retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticState {
    RefS6BothWarm,
    RefS7FreezerColdFridgeWarm,
    RefS8TooCold,
    RefIceMaker,
    RefS9Fallback,
    DwNotDraining,
    DwLeaking,
    DwWillNotStart,
    DwNotCleaning,
    DwNotFilling,
    DwNotDispensing,
    DwNotDrying,
    DwNoisy,
    DwFallback,
}

impl DiagnosticState {
    pub const ALL: [DiagnosticState; 14] = [
        DiagnosticState::RefS6BothWarm,
        DiagnosticState::RefS7FreezerColdFridgeWarm,
        DiagnosticState::RefS8TooCold,
        DiagnosticState::RefIceMaker,
        DiagnosticState::RefS9Fallback,
        DiagnosticState::DwNotDraining,
        DiagnosticState::DwLeaking,
        DiagnosticState::DwWillNotStart,
        DiagnosticState::DwNotCleaning,
        DiagnosticState::DwNotFilling,
        DiagnosticState::DwNotDispensing,
        DiagnosticState::DwNotDrying,
        DiagnosticState::DwNoisy,
        DiagnosticState::DwFallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticState::RefS6BothWarm => "REF_S6_BOTH_WARM",
            DiagnosticState::RefS7FreezerColdFridgeWarm => "REF_S7_FREEZER_COLD_FRIDGE_WARM",
            DiagnosticState::RefS8TooCold => "REF_S8_TOO_COLD",
            DiagnosticState::RefIceMaker => "REF_ICE_MAKER",
            DiagnosticState::RefS9Fallback => "REF_S9_FALLBACK",
            DiagnosticState::DwNotDraining => "DW_NOT_DRAINING",
            DiagnosticState::DwLeaking => "DW_LEAKING",
            DiagnosticState::DwWillNotStart => "DW_WILL_NOT_START",
            DiagnosticState::DwNotCleaning => "DW_NOT_CLEANING",
            DiagnosticState::DwNotFilling => "DW_NOT_FILLING",
            DiagnosticState::DwNotDispensing => "DW_NOT_DISPENSING",
            DiagnosticState::DwNotDrying => "DW_NOT_DRYING",
            DiagnosticState::DwNoisy => "DW_NOISY",
            DiagnosticState::DwFallback => "DW_FALLBACK",
        }
    }

    pub fn appliance(&self) -> ApplianceType {
        match self {
            DiagnosticState::RefS6BothWarm
            | DiagnosticState::RefS7FreezerColdFridgeWarm
            | DiagnosticState::RefS8TooCold
            | DiagnosticState::RefIceMaker
            | DiagnosticState::RefS9Fallback => ApplianceType::Refrigerator,
            _ => ApplianceType::Dishwasher,
        }
    }
}

impl fmt::Display for DiagnosticState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiagnosticState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        DiagnosticState::ALL
            .iter()
            .find(|st| st.as_str() == wanted)
            .copied()
            .ok_or_else(|| format!("unknown diagnostic state '{}'", s))
    }
}

/// The closed set of actions a turn can execute. Exactly one runs per
/// in-scope request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    AskClarify,
    PartsListAnswer,
    PartLookupAnswer,
    CompatibilityAnswer,
    FindModelHelp,
    Retrieve,
}

impl NextAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextAction::AskClarify => "ask_clarify",
            NextAction::PartsListAnswer => "parts_list_answer",
            NextAction::PartLookupAnswer => "part_lookup_answer",
            NextAction::CompatibilityAnswer => "compatibility_answer",
            NextAction::FindModelHelp => "find_model_help",
            NextAction::Retrieve => "retrieve",
        }
    }
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NextAction {
    type Err = String;

    /// Accepts the canonical names plus the short planner vocabulary
    /// (`clarify`, `parts_list`, `part_detail`, `compatibility`,
    /// `troubleshoot`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ask_clarify" | "clarify" => Ok(NextAction::AskClarify),
            "parts_list_answer" | "parts_list" => Ok(NextAction::PartsListAnswer),
            "part_lookup_answer" | "part_lookup" | "part_detail" => Ok(NextAction::PartLookupAnswer),
            "compatibility_answer" | "compatibility" => Ok(NextAction::CompatibilityAnswer),
            "find_model_help" => Ok(NextAction::FindModelHelp),
            "retrieve" | "troubleshoot" => Ok(NextAction::Retrieve),
            other => Err(other.to_string()),
        }
    }
}

/// Named pieces of information extracted from the conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Slots {
    pub model_number: Option<String>,
    /// Manufacturer revision suffix, e.g. `00` in `WRF535SWHZ (00)`.
    pub model_revision: Option<String>,
    pub part_number: Option<String>,
    pub appliance_type: Option<ApplianceType>,
    pub intent: Intent,
}

/// Triage outcome carried into routing and retrieval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Diagnosis {
    pub symptom: Symptom,
    pub section: Section,
    pub state: Option<DiagnosticState>,
}

/// Arguments the router hands to the selected action.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionArgs {
    /// Question text for `ask_clarify`.
    pub question: Option<String>,
}

/// Pipeline progress. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Received,
    ScopeChecked,
    Routed,
    Handled,
    Composed,
    Responded,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationState {
    pub message: String,
    pub history: Vec<ChatMessage>,
    pub stage: Stage,
    pub scope_label: Option<ScopeLabel>,
    pub slots: Slots,
    pub diagnosis: Diagnosis,
    pub next_action: Option<NextAction>,
    pub action_args: ActionArgs,
    pub evidence: Vec<EvidenceChunk>,
    pub answer: Option<String>,
    pub citations: Vec<Citation>,
    pub product_cards: Vec<ProductCard>,
}

/// Partial update returned by a stage. `None` means "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub stage: Option<Stage>,
    pub scope_label: Option<ScopeLabel>,
    pub model_number: Option<String>,
    pub model_revision: Option<String>,
    pub part_number: Option<String>,
    pub appliance_type: Option<ApplianceType>,
    pub intent: Option<Intent>,
    pub diagnosis: Option<Diagnosis>,
    pub next_action: Option<NextAction>,
    pub action_args: Option<ActionArgs>,
    pub evidence: Option<Vec<EvidenceChunk>>,
    pub answer: Option<String>,
    pub citations: Option<Vec<Citation>>,
    pub product_cards: Option<Vec<ProductCard>>,
}

impl StateUpdate {
    /// Update carrying only answer content, with both output lists cleared.
    pub fn answer_only(content: impl Into<String>) -> Self {
        Self {
            answer: Some(content.into()),
            citations: Some(Vec::new()),
            product_cards: Some(Vec::new()),
            ..Default::default()
        }
    }
}

impl ConversationState {
    pub fn new(message: impl Into<String>, history: Vec<ChatMessage>) -> Self {
        Self {
            message: message.into(),
            history,
            ..Default::default()
        }
    }

    /// Merge an update into a new state value.
    pub fn apply(mut self, update: StateUpdate) -> Self {
        if let Some(stage) = update.stage {
            self.stage = self.stage.max(stage);
        }
        if let Some(label) = update.scope_label {
            self.scope_label = Some(label);
        }
        if let Some(model) = update.model_number {
            self.slots.model_number = Some(model);
        }
        if let Some(rev) = update.model_revision {
            self.slots.model_revision = Some(rev);
        }
        if let Some(part) = update.part_number {
            self.slots.part_number = Some(part);
        }
        if let Some(appliance) = update.appliance_type {
            self.slots.appliance_type = Some(appliance);
        }
        if let Some(intent) = update.intent {
            self.slots.intent = intent;
        }
        if let Some(diagnosis) = update.diagnosis {
            self.diagnosis = diagnosis;
        }
        if let Some(action) = update.next_action {
            self.next_action = Some(action);
        }
        if let Some(args) = update.action_args {
            self.action_args = args;
        }
        if let Some(evidence) = update.evidence {
            self.evidence = evidence;
        }
        if let Some(answer) = update.answer {
            self.answer = Some(answer);
        }
        if let Some(citations) = update.citations {
            self.citations = citations;
        }
        if let Some(cards) = update.product_cards {
            self.product_cards = cards;
        }
        self
    }

    /// Most recent assistant turn, or `""`.
    pub fn last_assistant(&self) -> &str {
        self.history
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    /// Prior user turns, most recent first.
    pub fn prior_user_turns(&self) -> impl Iterator<Item = &str> {
        self.history
            .iter()
            .rev()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}
