//! Core data models.
//!
//! These types flow between the stores, the handlers and the HTTP layer:
//!
//! ```text
//! DocumentStore ──► EvidenceChunk ──► Composer ──► Citation
//! CatalogStore  ──► PartRecord / ModelRecord ──► ProductCard
//! ```
//!
//! All response-facing types serialize with `serde` in the shape the chat
//! endpoints return.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Appliance families the agent supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplianceType {
    Refrigerator,
    Dishwasher,
}

impl ApplianceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplianceType::Refrigerator => "refrigerator",
            ApplianceType::Dishwasher => "dishwasher",
        }
    }
}

impl fmt::Display for ApplianceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplianceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "refrigerator" | "fridge" | "freezer" => Ok(ApplianceType::Refrigerator),
            "dishwasher" | "dish washer" => Ok(ApplianceType::Dishwasher),
            other => Err(format!("unknown appliance type '{}'", other)),
        }
    }
}

/// Role of a turn in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One prior turn, as sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Provenance and filter metadata attached to a stored chunk.
///
/// `symptom_tag` uses the triage vocabulary (`not_cooling`, `leaking`, ...)
/// and is what the source policy filters on. `doc_type` distinguishes repair
/// guides from catalog pages (`part_catalog`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub appliance_type: Option<ApplianceType>,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub symptom_tag: Option<String>,
    pub source_url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub model_number: Option<String>,
    #[serde(default)]
    pub part_number: Option<String>,
}

/// A retrievable unit of source text, scored against a query vector.
///
/// `score` is the cosine similarity computed at retrieval time; it is `0.0`
/// for chunks that have not been through a search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

/// A source link backing part of an answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    pub title: String,
}

impl Citation {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Structured part suggestion rendered by the client as a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductCard {
    pub part_number: String,
    pub name: String,
    pub price: Option<String>,
    pub url: String,
    pub image_url: Option<String>,
    pub brand: Option<String>,
}

/// Row from the `parts` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartRecord {
    pub partselect_number: String,
    #[serde(default)]
    pub manufacturer_part_number: Option<String>,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub stock_status: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub appliance_type: Option<ApplianceType>,
}

impl PartRecord {
    pub fn formatted_price(&self) -> Option<String> {
        self.price.map(|p| format!("${:.2}", p))
    }
}

/// Row from the `models` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub model_number: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub appliance_type: Option<ApplianceType>,
    #[serde(default)]
    pub url: Option<String>,
}

/// A page found by the external discovery capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPage {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appliance_aliases() {
        assert_eq!(
            "Fridge".parse::<ApplianceType>().unwrap(),
            ApplianceType::Refrigerator
        );
        assert_eq!(
            "dishwasher".parse::<ApplianceType>().unwrap(),
            ApplianceType::Dishwasher
        );
        assert!("microwave".parse::<ApplianceType>().is_err());
    }

    #[test]
    fn test_chunk_metadata_defaults() {
        let meta: ChunkMetadata =
            serde_json::from_str(r#"{"source_url": "https://example.com/a"}"#).unwrap();
        assert_eq!(meta.appliance_type, None);
        assert_eq!(meta.symptom_tag, None);
    }

    #[test]
    fn test_formatted_price() {
        let part = PartRecord {
            partselect_number: "PS11752778".into(),
            manufacturer_part_number: None,
            name: "Door Shelf Bin".into(),
            brand: None,
            price: Some(36.5),
            stock_status: None,
            url: None,
            image_url: None,
            appliance_type: None,
        };
        assert_eq!(part.formatted_price().as_deref(), Some("$36.50"));
    }
}
