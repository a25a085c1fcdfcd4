//! SQLite-backed [`DocumentStore`] and [`CatalogStore`].
//!
//! Vector search is brute force: every chunk row is loaded, decoded from
//! its little-endian BLOB, filtered with [`EvidenceFilter::matches`] and
//! scored with cosine similarity in Rust. The chunk table of a parts
//! support site is small enough for this to stay fast.
//!
//! Any `sqlx` failure is reported as [`EngineError::StoreUnavailable`] so
//! handlers can degrade instead of failing the request.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use partselect_core::embedding::{blob_to_vec, cosine_similarity};
use partselect_core::models::{ChunkMetadata, EvidenceChunk, ModelRecord, PartRecord};
use partselect_core::policy::EvidenceFilter;
use partselect_core::store::{CatalogStore, DocumentStore};
use partselect_core::EngineError;

fn store_err(e: sqlx::Error) -> EngineError {
    EngineError::StoreUnavailable(e.to_string())
}

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn embedding_dims(&self) -> Result<Option<usize>> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM chunks LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(dims.map(|d| d as usize))
    }

    async fn similarity_search(
        &self,
        query_vec: &[f32],
        filter: &EvidenceFilter,
        k: usize,
    ) -> Result<Vec<EvidenceChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.chunk_id, c.doc_id, c.text, c.metadata_json, c.embedding, c.dims
            FROM chunks c
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut results = Vec::new();
        for row in &rows {
            let dims: i64 = row.get("dims");
            if dims as usize != query_vec.len() {
                return Err(EngineError::EmbeddingMismatch {
                    query_dims: query_vec.len(),
                    store_dims: dims as usize,
                }
                .into());
            }
            let metadata_json: String = row.get("metadata_json");
            let metadata: ChunkMetadata = match serde_json::from_str(&metadata_json) {
                Ok(m) => m,
                Err(e) => {
                    let chunk_id: String = row.get("chunk_id");
                    tracing::warn!(chunk_id = %chunk_id, error = %e, "skipping chunk with bad metadata");
                    continue;
                }
            };
            if !filter.matches(&metadata) {
                continue;
            }
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            results.push(EvidenceChunk {
                chunk_id: row.get("chunk_id"),
                doc_id: row.get("doc_id"),
                text: row.get("text"),
                metadata,
                score: cosine_similarity(query_vec, &vector),
            });
        }

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

pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const PART_COLUMNS: &str = "p.partselect_number, p.manufacturer_part_number, p.name, p.brand, \
p.price, p.stock_status, p.url, p.image_url, p.appliance_type";

fn part_from_row(row: &SqliteRow) -> PartRecord {
    let appliance: Option<String> = row.get("appliance_type");
    PartRecord {
        partselect_number: row.get("partselect_number"),
        manufacturer_part_number: row.get("manufacturer_part_number"),
        name: row.get("name"),
        brand: row.get("brand"),
        price: row.get("price"),
        stock_status: row.get("stock_status"),
        url: row.get("url"),
        image_url: row.get("image_url"),
        appliance_type: appliance.and_then(|a| a.parse().ok()),
    }
}

fn key(s: &str) -> String {
    s.trim().to_ascii_uppercase()
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn find_part(&self, number: &str) -> Result<Option<PartRecord>> {
        let sql = format!(
            "SELECT {} FROM parts p
             WHERE upper(p.partselect_number) = ?1 OR upper(p.manufacturer_part_number) = ?1
             ORDER BY upper(p.partselect_number) = ?1 DESC
             LIMIT 1",
            PART_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(key(number))
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.as_ref().map(part_from_row))
    }

    async fn find_model(&self, model_number: &str) -> Result<Option<ModelRecord>> {
        let row = sqlx::query(
            "SELECT model_number, brand, appliance_type, url FROM models WHERE upper(model_number) = ?1",
        )
        .bind(key(model_number))
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(row.map(|row| {
            let appliance: Option<String> = row.get("appliance_type");
            ModelRecord {
                model_number: row.get("model_number"),
                brand: row.get("brand"),
                appliance_type: appliance.and_then(|a| a.parse().ok()),
                url: row.get("url"),
            }
        }))
    }

    async fn parts_for_model(&self, model_number: &str, limit: usize) -> Result<Vec<PartRecord>> {
        let sql = format!(
            "SELECT {} FROM parts p
             JOIN part_fitment f ON upper(f.partselect_number) = upper(p.partselect_number)
             WHERE upper(f.model_number) = ?1
             ORDER BY p.partselect_number
             LIMIT ?2",
            PART_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(key(model_number))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.iter().map(part_from_row).collect())
    }

    async fn parts_for_symptom(
        &self,
        model_number: &str,
        symptom_tag: &str,
        limit: usize,
    ) -> Result<Vec<PartRecord>> {
        let ranked_sql = format!(
            "SELECT {} FROM parts p
             JOIN model_symptom_rank r ON upper(r.partselect_number) = upper(p.partselect_number)
             WHERE upper(r.model_number) = ?1 AND r.symptom_tag = ?2
             ORDER BY r.rank ASC
             LIMIT ?3",
            PART_COLUMNS
        );
        let rows = sqlx::query(&ranked_sql)
            .bind(key(model_number))
            .bind(symptom_tag)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        if !rows.is_empty() {
            return Ok(rows.iter().map(part_from_row).collect());
        }

        let tagged_sql = format!(
            "SELECT DISTINCT {} FROM parts p
             JOIN part_symptoms s ON upper(s.partselect_number) = upper(p.partselect_number)
             JOIN part_fitment f ON upper(f.partselect_number) = upper(p.partselect_number)
             WHERE upper(f.model_number) = ?1 AND s.symptom_tag = ?2
             ORDER BY p.partselect_number
             LIMIT ?3",
            PART_COLUMNS
        );
        let rows = sqlx::query(&tagged_sql)
            .bind(key(model_number))
            .bind(symptom_tag)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.iter().map(part_from_row).collect())
    }

    async fn has_fitment(&self, partselect_number: &str, model_number: &str) -> Result<bool> {
        let found: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM part_fitment
             WHERE upper(partselect_number) = ?1 AND upper(model_number) = ?2",
        )
        .bind(key(partselect_number))
        .bind(key(model_number))
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(found)
    }
}
