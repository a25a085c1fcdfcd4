//! Storage and capability abstractions.
//!
//! The engine reads from three collaborators, each behind a trait so the
//! app crate can plug in SQLite and HTTP backends while tests use the
//! in-memory versions in [`memory`]:
//!
//! | Trait | Backing data | Used by |
//! |-------|--------------|---------|
//! | [`DocumentStore`] | `documents` / `chunks` with embeddings | retrieve |
//! | [`CatalogStore`] | `parts`, `models`, `part_fitment`, `part_symptoms`, `model_symptom_rank` | parts list, part lookup, compatibility |
//! | [`PageDiscovery`] | external web search | fallback when the catalog misses |
//!
//! All of them are read-only from the engine's point of view. Implementations
//! must be `Send + Sync`; one instance is shared by every request.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{DiscoveredPage, EvidenceChunk, ModelRecord, PartRecord};
use crate::policy::EvidenceFilter;

/// Vector-searchable chunk store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Dimensionality of the stored vectors, or `None` when empty.
    async fn embedding_dims(&self) -> Result<Option<usize>>;

    /// Top `k` chunks passing `filter`, by descending cosine similarity.
    ///
    /// Must fail with [`EngineError::EmbeddingMismatch`](crate::EngineError::EmbeddingMismatch)
    /// when `query_vec` does not match the stored dimensionality.
    async fn similarity_search(
        &self,
        query_vec: &[f32],
        filter: &EvidenceFilter,
        k: usize,
    ) -> Result<Vec<EvidenceChunk>>;
}

/// Structured parts and models catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Resolve a PartSelect or manufacturer part number.
    async fn find_part(&self, number: &str) -> Result<Option<PartRecord>>;

    async fn find_model(&self, model_number: &str) -> Result<Option<ModelRecord>>;

    /// Parts with a fitment row for the model.
    async fn parts_for_model(&self, model_number: &str, limit: usize) -> Result<Vec<PartRecord>>;

    /// Parts for the model that fix a symptom, best-ranked first.
    async fn parts_for_symptom(
        &self,
        model_number: &str,
        symptom_tag: &str,
        limit: usize,
    ) -> Result<Vec<PartRecord>>;

    /// Whether a fitment row exists for the pair.
    async fn has_fitment(&self, partselect_number: &str, model_number: &str) -> Result<bool>;
}

/// Best-effort external page search.
#[async_trait]
pub trait PageDiscovery: Send + Sync {
    async fn find_pages(&self, query: &str, limit: usize) -> Result<Vec<DiscoveredPage>>;
}
