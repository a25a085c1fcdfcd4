//! Scope classification against the [`ScopeContract`].
//!
//! The contract is a versioned TOML artifact loaded once at startup and
//! compiled into a [`CompiledScope`]. [`CompiledScope::classify_rules`] is
//! deterministic and total: it returns either a decided label or an
//! [`Inconclusive`] summary. The pipeline resolves inconclusive messages
//! with the optional [`ScopeModel`] capability (bounded by a timeout), or
//! with [`CompiledScope::resolve_without_model`] when no model is wired.
//!
//! # Rule order
//!
//! | # | Rule | Label |
//! |---|------|-------|
//! | 1 | out-of-scope phrase | OUT_OF_SCOPE |
//! | 2 | forbidden topic (word boundary) | OUT_OF_SCOPE |
//! | 3 | greeting only | IN_SCOPE |
//! | 4 | part/model pattern, appliance + number, "find my model number" | IN_SCOPE |
//! | 5 | symptom keyword | IN_SCOPE |
//! | 6 | "appliance" + trouble word | IN_SCOPE |
//! | 7 | two or more domain keywords (brands count) | IN_SCOPE |
//! | 8 | follow-up to a support answer | IN_SCOPE |

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::models::ChatMessage;
use crate::state::ScopeLabel;

pub const DEFAULT_REDIRECT: &str = "I can only help with appliance parts and related support: \
finding parts, checking compatibility, installation, troubleshooting, and orders for \
refrigerators and dishwashers. What would you like help with?";

#[derive(Debug, Clone, Deserialize)]
pub struct ScopeContract {
    pub version: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub allowed_appliance_types: Vec<String>,
    #[serde(default)]
    pub allowed_intents: Vec<String>,
    #[serde(default)]
    pub allowed_entities: Vec<String>,
    #[serde(default)]
    pub allowed_brands: Vec<String>,
    #[serde(default)]
    pub forbidden_topics: Vec<String>,
    #[serde(default)]
    pub out_of_scope_phrases: Vec<String>,
    #[serde(default)]
    pub symptom_keywords: Vec<String>,
    #[serde(default)]
    pub in_scope_keywords: Vec<String>,
    pub part_number_pattern: String,
    pub model_number_pattern: String,
    #[serde(default = "default_min_words")]
    pub clarification_min_words: usize,
    #[serde(default = "default_redirect")]
    pub redirect_message: String,
}

fn default_min_words() -> usize {
    2
}

fn default_redirect() -> String {
    DEFAULT_REDIRECT.to_string()
}

/// What the rules could establish about an undecided message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inconclusive {
    pub keyword_hits: usize,
    pub word_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleVerdict {
    Decided(ScopeLabel),
    Inconclusive(Inconclusive),
}

/// Language-model classifier consulted for inconclusive messages.
#[async_trait]
pub trait ScopeModel: Send + Sync {
    async fn classify(&self, message: &str, history: &[ChatMessage]) -> Result<ScopeLabel>;
}

static APPLIANCE_NOUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(refrigerator|fridge|freezer|dishwasher)\b").expect("valid regex")
});

static BARE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4,8}\b").expect("valid regex"));

static FIND_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(find|where|locate|how\s+to\s+find)\b").expect("valid regex")
});

static MODEL_NUMBER_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bmodel\s*(number|#)").expect("valid regex"));

static TROUBLE_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(working|broken|problem|issue|fix|repair|right)\b").expect("valid regex")
});

static GREETING_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(hi|hello|hey|howdy|greetings?|hi there|hey there|good\s+(morning|afternoon|evening)|how\s+are\s+you|what'?s\s+up|yo)[\s.!?]*$",
    )
    .expect("valid regex")
});

const CONTINUITY_HINTS: &[&str] = &[
    "partselect",
    "repair",
    "troubleshoot",
    "model number",
    "part number",
    "refrigerator",
    "dishwasher",
    "parts list",
    "compatible",
    "view parts",
    "cooling",
    "leak",
    "drain",
];

const FOLLOW_UP_WORDS: &[&str] = &[
    "freezer",
    "fridge",
    "refrigerator",
    "cold",
    "warm",
    "cooling",
    "leak",
    "drain",
    "part",
    "model",
];

/// Whether the message is only a greeting.
pub fn is_greeting(message: &str) -> bool {
    GREETING_ONLY.is_match(message.trim())
}

/// The contract with its patterns compiled. Read-only after construction.
#[derive(Debug)]
pub struct CompiledScope {
    contract: ScopeContract,
    part_pattern: Regex,
    model_pattern: Regex,
    forbidden: Option<Regex>,
    out_of_scope_phrases: Vec<String>,
    symptom_keywords: Vec<String>,
    keywords: Vec<String>,
}

impl CompiledScope {
    pub fn from_contract(contract: ScopeContract) -> Result<Self> {
        let part_pattern = Regex::new(&contract.part_number_pattern)
            .with_context(|| "Invalid part_number_pattern in scope contract")?;
        let model_pattern = Regex::new(&contract.model_number_pattern)
            .with_context(|| "Invalid model_number_pattern in scope contract")?;

        let forbidden = if contract.forbidden_topics.is_empty() {
            None
        } else {
            let alternation = contract
                .forbidden_topics
                .iter()
                .map(|t| regex::escape(&t.to_lowercase()))
                .collect::<Vec<_>>()
                .join("|");
            Some(
                Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))
                    .with_context(|| "Invalid forbidden_topics in scope contract")?,
            )
        };

        let lower = |v: &[String]| v.iter().map(|s| s.to_lowercase()).collect::<Vec<_>>();
        let mut keywords = lower(&contract.in_scope_keywords);
        keywords.extend(lower(&contract.allowed_brands));

        Ok(Self {
            out_of_scope_phrases: lower(&contract.out_of_scope_phrases),
            symptom_keywords: lower(&contract.symptom_keywords)
                .into_iter()
                .map(|k| k.replace('\u{2019}', "'"))
                .collect(),
            keywords,
            part_pattern,
            model_pattern,
            forbidden,
            contract,
        })
    }

    pub fn contract(&self) -> &ScopeContract {
        &self.contract
    }

    pub fn redirect_message(&self) -> &str {
        &self.contract.redirect_message
    }

    /// Apply the deterministic rules.
    pub fn classify_rules(&self, message: &str, last_assistant: &str) -> RuleVerdict {
        let msg = message.trim();
        let lower = msg.to_lowercase().replace('\u{2019}', "'");
        let words: HashSet<&str> = lower
            .split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .filter(|w| !w.is_empty())
            .collect();
        let word_count = msg.split_whitespace().count();

        if self
            .out_of_scope_phrases
            .iter()
            .any(|p| lower.contains(p.as_str()))
        {
            return RuleVerdict::Decided(ScopeLabel::OutOfScope);
        }
        if self.forbidden.as_ref().is_some_and(|re| re.is_match(&lower)) {
            return RuleVerdict::Decided(ScopeLabel::OutOfScope);
        }
        if is_greeting(msg) {
            return RuleVerdict::Decided(ScopeLabel::InScope);
        }

        let has_entity = self.part_pattern.is_match(msg)
            || self.model_pattern.is_match(msg)
            || (APPLIANCE_NOUN.is_match(msg) && BARE_NUMBER.is_match(msg))
            || (FIND_VERB.is_match(msg) && MODEL_NUMBER_WORDS.is_match(msg));
        if has_entity {
            return RuleVerdict::Decided(ScopeLabel::InScope);
        }

        if self
            .symptom_keywords
            .iter()
            .any(|k| lower.contains(k.as_str()))
        {
            return RuleVerdict::Decided(ScopeLabel::InScope);
        }

        if words.contains("appliance") && TROUBLE_WORDS.is_match(&lower) {
            return RuleVerdict::Decided(ScopeLabel::InScope);
        }

        let keyword_hits = self
            .keywords
            .iter()
            .filter(|k| mentions(&lower, &words, k))
            .count();
        if keyword_hits >= 2 {
            return RuleVerdict::Decided(ScopeLabel::InScope);
        }

        if self.continues_support_thread(&lower, &words, word_count, keyword_hits, last_assistant) {
            return RuleVerdict::Decided(ScopeLabel::InScope);
        }

        RuleVerdict::Inconclusive(Inconclusive {
            keyword_hits,
            word_count,
        })
    }

    fn continues_support_thread(
        &self,
        lower: &str,
        words: &HashSet<&str>,
        word_count: usize,
        keyword_hits: usize,
        last_assistant: &str,
    ) -> bool {
        let prev = last_assistant.to_lowercase();
        if prev.is_empty() || !CONTINUITY_HINTS.iter().any(|h| prev.contains(h)) {
            return false;
        }
        keyword_hits >= 1
            || ((3..=40).contains(&word_count)
                && FOLLOW_UP_WORDS.iter().any(|w| mentions(lower, words, w)))
    }

    /// Decide an inconclusive message when no language model is available.
    pub fn resolve_without_model(&self, inconclusive: Inconclusive) -> ScopeLabel {
        if inconclusive.keyword_hits >= 1
            && inconclusive.word_count >= 3
            && inconclusive.word_count > self.contract.clarification_min_words
        {
            ScopeLabel::InScope
        } else {
            ScopeLabel::OutOfScope
        }
    }
}

/// Single words match whole tokens; phrases match as substrings.
fn mentions(lower: &str, words: &HashSet<&str>, term: &str) -> bool {
    if term.contains(' ') {
        lower.contains(term)
    } else {
        words.contains(term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> CompiledScope {
        let contract: ScopeContract = toml::from_str(
            r#"
version = "test"
part_number_pattern = '(?i)\bPS\d{5,15}\b'
model_number_pattern = '\b[A-Z]{1,6}\d[A-Z0-9\-]{3,22}\b'
forbidden_topics = ["poem", "recipe", "weather"]
out_of_scope_phrases = ["write me a", "tell me a joke"]
symptom_keywords = ["not cooling", "not draining", "leaking", "not making ice", "won't start"]
in_scope_keywords = ["refrigerator", "fridge", "dishwasher", "part", "parts", "ice", "gasket", "install"]
allowed_brands = ["whirlpool", "ge"]
"#,
        )
        .unwrap();
        CompiledScope::from_contract(contract).unwrap()
    }

    fn label(s: &CompiledScope, msg: &str) -> RuleVerdict {
        s.classify_rules(msg, "")
    }

    #[test]
    fn test_out_of_scope_phrase() {
        assert_eq!(
            label(&scope(), "Write me a poem"),
            RuleVerdict::Decided(ScopeLabel::OutOfScope)
        );
    }

    #[test]
    fn test_forbidden_topic_needs_word_boundary() {
        let s = scope();
        assert_eq!(
            label(&s, "what's the weather"),
            RuleVerdict::Decided(ScopeLabel::OutOfScope)
        );
        // "recipes" does not contain the whole word "recipe"
        assert!(matches!(label(&s, "recipes"), RuleVerdict::Inconclusive(_)));
    }

    #[test]
    fn test_entities_are_in_scope() {
        let s = scope();
        for msg in [
            "Is PS11752778 compatible with WDT780SAEM1?",
            "Parts for WRF535SWHZ",
            "Where can I find my model number?",
            "my fridge 1065123",
        ] {
            assert_eq!(
                label(&s, msg),
                RuleVerdict::Decided(ScopeLabel::InScope),
                "expected in scope: {}",
                msg
            );
        }
    }

    #[test]
    fn test_symptom_keyword_with_curly_apostrophe() {
        assert_eq!(
            label(&scope(), "Dishwasher won\u{2019}t start"),
            RuleVerdict::Decided(ScopeLabel::InScope)
        );
    }

    #[test]
    fn test_brand_counts_as_keyword_but_not_substring() {
        let s = scope();
        assert_eq!(
            label(&s, "whirlpool fridge"),
            RuleVerdict::Decided(ScopeLabel::InScope)
        );
        // "ge" must not match inside "get"
        assert_eq!(
            label(&s, "get the gasket"),
            RuleVerdict::Inconclusive(Inconclusive {
                keyword_hits: 1,
                word_count: 3
            })
        );
    }

    #[test]
    fn test_follow_up_to_support_answer() {
        let s = scope();
        let prev = "Is the freezer cold, or is it also not cooling? Check the refrigerator vents.";
        assert_eq!(
            s.classify_rules("the freezer is still cold", prev),
            RuleVerdict::Decided(ScopeLabel::InScope)
        );
        assert!(matches!(
            s.classify_rules("the freezer is still cold", ""),
            RuleVerdict::Inconclusive(_)
        ));
    }

    #[test]
    fn test_greeting_is_in_scope() {
        assert_eq!(
            label(&scope(), "Hello!"),
            RuleVerdict::Decided(ScopeLabel::InScope)
        );
    }

    #[test]
    fn test_resolve_without_model() {
        let s = scope();
        assert_eq!(
            s.resolve_without_model(Inconclusive {
                keyword_hits: 1,
                word_count: 4
            }),
            ScopeLabel::InScope
        );
        assert_eq!(
            s.resolve_without_model(Inconclusive {
                keyword_hits: 1,
                word_count: 2
            }),
            ScopeLabel::OutOfScope
        );
        assert_eq!(
            s.resolve_without_model(Inconclusive {
                keyword_hits: 0,
                word_count: 12
            }),
            ScopeLabel::OutOfScope
        );
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let mut contract: ScopeContract =
            toml::from_str("version = \"1\"\npart_number_pattern = 'PS'\nmodel_number_pattern = 'x'")
                .unwrap();
        contract.model_number_pattern = "(".into();
        assert!(CompiledScope::from_contract(contract).is_err());
    }
}
