//! In-memory [`DocumentStore`] and [`CatalogStore`] for tests and local runs.
//!
//! Uses `Vec`/`HashMap` behind `std::sync::RwLock`. Similarity search is
//! brute-force cosine over every stored vector that passes the filter.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::EngineError;
use crate::models::{EvidenceChunk, ModelRecord, PartRecord};
use crate::policy::EvidenceFilter;

use super::{CatalogStore, DocumentStore};

struct StoredChunk {
    chunk: EvidenceChunk,
    vector: Vec<f32>,
}

#[derive(Default)]
pub struct InMemoryDocumentStore {
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a chunk. All vectors must share one dimensionality.
    pub fn insert(&self, chunk: EvidenceChunk, vector: Vec<f32>) -> Result<()> {
        let mut chunks = self.chunks.write().unwrap();
        if let Some(first) = chunks.first() {
            if first.vector.len() != vector.len() {
                return Err(EngineError::EmbeddingMismatch {
                    query_dims: vector.len(),
                    store_dims: first.vector.len(),
                }
                .into());
            }
        }
        chunks.retain(|sc| sc.chunk.chunk_id != chunk.chunk_id);
        chunks.push(StoredChunk { chunk, vector });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn embedding_dims(&self) -> Result<Option<usize>> {
        Ok(self.chunks.read().unwrap().first().map(|sc| sc.vector.len()))
    }

    async fn similarity_search(
        &self,
        query_vec: &[f32],
        filter: &EvidenceFilter,
        k: usize,
    ) -> Result<Vec<EvidenceChunk>> {
        let chunks = self.chunks.read().unwrap();
        if let Some(first) = chunks.first() {
            if first.vector.len() != query_vec.len() {
                return Err(EngineError::EmbeddingMismatch {
                    query_dims: query_vec.len(),
                    store_dims: first.vector.len(),
                }
                .into());
            }
        }
        let mut results: Vec<EvidenceChunk> = chunks
            .iter()
            .filter(|sc| filter.matches(&sc.chunk.metadata))
            .map(|sc| EvidenceChunk {
                score: cosine_similarity(query_vec, &sc.vector),
                ..sc.chunk.clone()
            })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(k);
        Ok(results)
    }
}

// ============ Catalog ============

#[derive(Default)]
pub struct InMemoryCatalog {
    parts: RwLock<HashMap<String, PartRecord>>,
    models: RwLock<HashMap<String, ModelRecord>>,
    fitment: RwLock<HashSet<(String, String)>>,
    /// (partselect_number, symptom_tag)
    part_symptoms: RwLock<Vec<(String, String)>>,
    /// (model_number, symptom_tag, partselect_number, rank)
    symptom_ranks: RwLock<Vec<(String, String, String, i64)>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_part(&self, part: PartRecord) {
        self.parts
            .write()
            .unwrap()
            .insert(part.partselect_number.to_ascii_uppercase(), part);
    }

    pub fn add_model(&self, model: ModelRecord) {
        self.models
            .write()
            .unwrap()
            .insert(model.model_number.to_ascii_uppercase(), model);
    }

    pub fn add_fitment(&self, partselect_number: &str, model_number: &str) {
        self.fitment.write().unwrap().insert((
            partselect_number.to_ascii_uppercase(),
            model_number.to_ascii_uppercase(),
        ));
    }

    pub fn add_part_symptom(&self, partselect_number: &str, symptom_tag: &str) {
        self.part_symptoms
            .write()
            .unwrap()
            .push((partselect_number.to_ascii_uppercase(), symptom_tag.to_string()));
    }

    pub fn add_symptom_rank(&self, model_number: &str, symptom_tag: &str, partselect_number: &str, rank: i64) {
        self.symptom_ranks.write().unwrap().push((
            model_number.to_ascii_uppercase(),
            symptom_tag.to_string(),
            partselect_number.to_ascii_uppercase(),
            rank,
        ));
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn find_part(&self, number: &str) -> Result<Option<PartRecord>> {
        let key = number.trim().to_ascii_uppercase();
        let parts = self.parts.read().unwrap();
        Ok(parts.get(&key).cloned().or_else(|| {
            parts
                .values()
                .find(|p| {
                    p.manufacturer_part_number
                        .as_deref()
                        .is_some_and(|m| m.eq_ignore_ascii_case(&key))
                })
                .cloned()
        }))
    }

    async fn find_model(&self, model_number: &str) -> Result<Option<ModelRecord>> {
        let key = model_number.trim().to_ascii_uppercase();
        Ok(self.models.read().unwrap().get(&key).cloned())
    }

    async fn parts_for_model(&self, model_number: &str, limit: usize) -> Result<Vec<PartRecord>> {
        let key = model_number.trim().to_ascii_uppercase();
        let fitment = self.fitment.read().unwrap();
        let parts = self.parts.read().unwrap();
        let mut numbers: Vec<&String> = fitment
            .iter()
            .filter(|(_, m)| *m == key)
            .map(|(p, _)| p)
            .collect();
        numbers.sort();
        Ok(numbers
            .into_iter()
            .filter_map(|n| parts.get(n).cloned())
            .take(limit)
            .collect())
    }

    async fn parts_for_symptom(
        &self,
        model_number: &str,
        symptom_tag: &str,
        limit: usize,
    ) -> Result<Vec<PartRecord>> {
        let key = model_number.trim().to_ascii_uppercase();
        let ranks = self.symptom_ranks.read().unwrap();
        let mut ranked: Vec<(i64, String)> = ranks
            .iter()
            .filter(|(m, tag, _, _)| *m == key && tag == symptom_tag)
            .map(|(_, _, p, rank)| (*rank, p.clone()))
            .collect();
        if ranked.is_empty() {
            let fitment = self.fitment.read().unwrap();
            let symptoms = self.part_symptoms.read().unwrap();
            ranked = symptoms
                .iter()
                .filter(|(p, tag)| tag == symptom_tag && fitment.contains(&(p.clone(), key.clone())))
                .map(|(p, _)| (i64::MAX, p.clone()))
                .collect();
        }
        ranked.sort();
        let mut seen = HashSet::new();
        ranked.retain(|(_, p)| seen.insert(p.clone()));
        let parts = self.parts.read().unwrap();
        Ok(ranked
            .into_iter()
            .filter_map(|(_, p)| parts.get(&p).cloned())
            .take(limit)
            .collect())
    }

    async fn has_fitment(&self, partselect_number: &str, model_number: &str) -> Result<bool> {
        Ok(self.fitment.read().unwrap().contains(&(
            partselect_number.trim().to_ascii_uppercase(),
            model_number.trim().to_ascii_uppercase(),
        )))
    }
}
