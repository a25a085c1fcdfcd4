//! Source policy: which evidence each diagnostic state may draw on.
//!
//! Loaded once from `config/source_policy.toml`:
//!
//! ```toml
//! version = "2024-06"
//!
//! [states.REF_S7_FREEZER_COLD_FRIDGE_WARM]
//! appliance_types = ["refrigerator"]
//! allowed_symptom_tags = ["too_warm", "not_cooling"]
//! forbidden_symptom_tags = ["too_cold", "ice_maker_issue"]
//! adjacent_states = ["REF_S6_BOTH_WARM"]
//! ```
//!
//! [`SourcePolicy::filter_for`] turns a state into an [`EvidenceFilter`];
//! [`SourcePolicy::adjacent_filter`] builds the relaxed filter for the
//! second retrieval hop. Filters are plain predicates over
//! [`ChunkMetadata`], so every store applies them the same way.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{ApplianceType, ChunkMetadata};
use crate::state::DiagnosticState;

/// Doc type of catalog pages, excluded from guide-only retrieval.
pub const PART_CATALOG_DOC_TYPE: &str = "part_catalog";

#[derive(Debug, Clone, Deserialize)]
struct RawPolicy {
    version: String,
    #[serde(default)]
    states: BTreeMap<String, RawEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawEntry {
    #[serde(default)]
    appliance_types: Vec<ApplianceType>,
    #[serde(default)]
    allowed_symptom_tags: Vec<String>,
    #[serde(default)]
    forbidden_symptom_tags: Vec<String>,
    #[serde(default)]
    adjacent_states: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyEntry {
    pub appliance_types: Vec<ApplianceType>,
    pub allowed_symptom_tags: BTreeSet<String>,
    pub forbidden_symptom_tags: BTreeSet<String>,
    pub adjacent_states: Vec<DiagnosticState>,
}

#[derive(Debug, Clone)]
pub struct SourcePolicy {
    pub version: String,
    entries: BTreeMap<DiagnosticState, PolicyEntry>,
}

/// Metadata predicate applied to every candidate chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvidenceFilter {
    /// `None` means appliance-agnostic.
    pub appliance_type: Option<ApplianceType>,
    /// Empty means any tag.
    pub allowed_symptom_tags: BTreeSet<String>,
    pub forbidden_symptom_tags: BTreeSet<String>,
    /// Exclude catalog pages.
    pub guides_only: bool,
}

impl EvidenceFilter {
    pub fn appliance_only(appliance_type: Option<ApplianceType>, guides_only: bool) -> Self {
        Self {
            appliance_type,
            guides_only,
            ..Default::default()
        }
    }

    /// Whether the filter restricts symptom tags at all.
    pub fn has_symptom_constraints(&self) -> bool {
        !self.allowed_symptom_tags.is_empty() || !self.forbidden_symptom_tags.is_empty()
    }

    pub fn matches(&self, meta: &ChunkMetadata) -> bool {
        if let Some(appliance) = self.appliance_type {
            if meta.appliance_type != Some(appliance) {
                return false;
            }
        }
        let tag = meta.symptom_tag.as_deref();
        if !self.allowed_symptom_tags.is_empty()
            && !tag.is_some_and(|t| self.allowed_symptom_tags.contains(t))
        {
            return false;
        }
        if tag.is_some_and(|t| self.forbidden_symptom_tags.contains(t)) {
            return false;
        }
        if self.guides_only && meta.doc_type.as_deref() == Some(PART_CATALOG_DOC_TYPE) {
            return false;
        }
        true
    }
}

impl SourcePolicy {
    pub fn from_toml(content: &str) -> Result<Self> {
        let raw: RawPolicy = toml::from_str(content)?;
        let mut entries = BTreeMap::new();
        for (name, entry) in raw.states {
            let state: DiagnosticState = name.parse().map_err(anyhow::Error::msg)?;
            let adjacent_states = entry
                .adjacent_states
                .iter()
                .map(|s| s.parse::<DiagnosticState>().map_err(anyhow::Error::msg))
                .collect::<Result<Vec<_>>>()?;
            if adjacent_states.contains(&state) {
                bail!("source policy: {} lists itself as adjacent", state);
            }
            entries.insert(
                state,
                PolicyEntry {
                    appliance_types: entry.appliance_types,
                    allowed_symptom_tags: entry.allowed_symptom_tags.into_iter().collect(),
                    forbidden_symptom_tags: entry.forbidden_symptom_tags.into_iter().collect(),
                    adjacent_states,
                },
            );
        }
        Ok(Self {
            version: raw.version,
            entries,
        })
    }

    pub fn entry(&self, state: DiagnosticState) -> Option<&PolicyEntry> {
        self.entries.get(&state)
    }

    pub fn adjacent_states(&self, state: DiagnosticState) -> &[DiagnosticState] {
        self.entry(state)
            .map(|e| e.adjacent_states.as_slice())
            .unwrap_or(&[])
    }

    /// Filter for the first retrieval hop.
    ///
    /// The appliance comes from the conversation when named, else from the
    /// state. States without an entry get an appliance-only filter.
    pub fn filter_for(
        &self,
        state: DiagnosticState,
        appliance: Option<ApplianceType>,
        guides_only: bool,
    ) -> EvidenceFilter {
        let appliance_type = appliance.or(Some(state.appliance()));
        match self.entry(state) {
            Some(entry) => EvidenceFilter {
                appliance_type: appliance_type
                    .filter(|a| entry.appliance_types.is_empty() || entry.appliance_types.contains(a))
                    .or_else(|| entry.appliance_types.first().copied()),
                allowed_symptom_tags: entry.allowed_symptom_tags.clone(),
                forbidden_symptom_tags: entry.forbidden_symptom_tags.clone(),
                guides_only,
            },
            None => EvidenceFilter::appliance_only(appliance_type, guides_only),
        }
    }

    /// Filter for the adjacent-state hop, or `None` when the state has no
    /// neighbours.
    ///
    /// Allowed tags are the union over the state and its neighbours. If any
    /// of them allows every tag, the union does too. Forbidden tags are the
    /// union minus anything allowed.
    pub fn adjacent_filter(
        &self,
        state: DiagnosticState,
        appliance: Option<ApplianceType>,
        guides_only: bool,
    ) -> Option<EvidenceFilter> {
        let adjacent = self.adjacent_states(state);
        if adjacent.is_empty() {
            return None;
        }
        let base = self.filter_for(state, appliance, guides_only);
        let mut allowed = base.allowed_symptom_tags.clone();
        let mut forbidden = base.forbidden_symptom_tags.clone();
        let mut unrestricted = allowed.is_empty();
        for neighbour in adjacent {
            let f = self.filter_for(*neighbour, base.appliance_type, guides_only);
            unrestricted |= f.allowed_symptom_tags.is_empty();
            allowed.extend(f.allowed_symptom_tags);
            forbidden.extend(f.forbidden_symptom_tags);
        }
        if unrestricted {
            allowed.clear();
        }
        let forbidden = forbidden.difference(&allowed).cloned().collect();
        Some(EvidenceFilter {
            appliance_type: base.appliance_type,
            allowed_symptom_tags: allowed,
            forbidden_symptom_tags: forbidden,
            guides_only,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"
version = "test"

[states.REF_S6_BOTH_WARM]
appliance_types = ["refrigerator"]
allowed_symptom_tags = ["not_cooling", "too_warm"]
forbidden_symptom_tags = ["too_cold", "ice_maker_issue"]
adjacent_states = ["REF_S7_FREEZER_COLD_FRIDGE_WARM"]

[states.REF_S7_FREEZER_COLD_FRIDGE_WARM]
appliance_types = ["refrigerator"]
allowed_symptom_tags = ["too_warm"]
forbidden_symptom_tags = ["too_cold"]
adjacent_states = ["REF_S6_BOTH_WARM"]

[states.REF_ICE_MAKER]
appliance_types = ["refrigerator"]
allowed_symptom_tags = ["ice_maker_issue"]
adjacent_states = ["REF_S9_FALLBACK"]

[states.REF_S9_FALLBACK]
appliance_types = ["refrigerator"]
"#;

    fn meta(appliance: Option<ApplianceType>, tag: Option<&str>) -> ChunkMetadata {
        ChunkMetadata {
            appliance_type: appliance,
            symptom_tag: tag.map(String::from),
            source_url: "https://www.partselect.com/Repair/".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_for_state() {
        let policy = SourcePolicy::from_toml(POLICY).unwrap();
        let f = policy.filter_for(DiagnosticState::RefS6BothWarm, None, true);
        assert_eq!(f.appliance_type, Some(ApplianceType::Refrigerator));
        assert!(f.matches(&meta(Some(ApplianceType::Refrigerator), Some("not_cooling"))));
        assert!(!f.matches(&meta(Some(ApplianceType::Refrigerator), Some("too_cold"))));
        assert!(!f.matches(&meta(Some(ApplianceType::Dishwasher), Some("not_cooling"))));
        assert!(!f.matches(&meta(None, Some("not_cooling"))));
        assert!(!f.matches(&meta(Some(ApplianceType::Refrigerator), None)));
    }

    #[test]
    fn test_guides_only_excludes_catalog() {
        let f = EvidenceFilter::appliance_only(None, true);
        let mut m = meta(None, None);
        assert!(f.matches(&m));
        m.doc_type = Some(PART_CATALOG_DOC_TYPE.into());
        assert!(!f.matches(&m));
    }

    #[test]
    fn test_adjacent_union() {
        let policy = SourcePolicy::from_toml(POLICY).unwrap();
        let f = policy
            .adjacent_filter(DiagnosticState::RefS7FreezerColdFridgeWarm, None, false)
            .unwrap();
        let expected: BTreeSet<String> = ["not_cooling", "too_warm"].iter().map(|s| s.to_string()).collect();
        assert_eq!(f.allowed_symptom_tags, expected);
        assert!(f.forbidden_symptom_tags.contains("too_cold"));
        assert!(f.forbidden_symptom_tags.contains("ice_maker_issue"));
    }

    #[test]
    fn test_adjacent_to_unrestricted_state_drops_allowed_set() {
        let policy = SourcePolicy::from_toml(POLICY).unwrap();
        let f = policy
            .adjacent_filter(DiagnosticState::RefIceMaker, None, false)
            .unwrap();
        assert!(f.allowed_symptom_tags.is_empty());
        assert_eq!(f.appliance_type, Some(ApplianceType::Refrigerator));
        assert!(policy
            .adjacent_filter(DiagnosticState::RefS9Fallback, None, false)
            .is_none());
    }

    #[test]
    fn test_unknown_state_name_is_rejected() {
        let err = SourcePolicy::from_toml("version = \"x\"\n[states.REF_S99]\n").unwrap_err();
        assert!(err.to_string().contains("REF_S99"));
    }

    #[test]
    fn test_missing_entry_falls_back_to_appliance_only() {
        let policy = SourcePolicy::from_toml(POLICY).unwrap();
        let f = policy.filter_for(DiagnosticState::DwLeaking, None, false);
        assert_eq!(f, EvidenceFilter::appliance_only(Some(ApplianceType::Dishwasher), false));
    }

    #[test]
    fn test_narrowing_never_admits_more() {
        let chunks = [
            meta(Some(ApplianceType::Refrigerator), Some("too_warm")),
            meta(Some(ApplianceType::Refrigerator), Some("not_cooling")),
            meta(Some(ApplianceType::Dishwasher), Some("leaking")),
            meta(None, None),
        ];
        let wide = EvidenceFilter::default();
        let appliance = EvidenceFilter::appliance_only(Some(ApplianceType::Refrigerator), false);
        let mut narrow = appliance.clone();
        narrow.allowed_symptom_tags.insert("too_warm".into());
        let count = |f: &EvidenceFilter| chunks.iter().filter(|m| f.matches(m)).count();
        assert!(count(&wide) >= count(&appliance));
        assert!(count(&appliance) >= count(&narrow));
        assert_eq!(count(&narrow), 1);
    }
}
