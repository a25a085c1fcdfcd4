//! Seed import for `psa import <file.json>`.
//!
//! Loads a JSON seed file into SQLite:
//!
//! ```json
//! {
//!   "documents": [{ "source": "repair_guides", "url": "...", "title": "...",
//!                   "text": "...", "appliance_type": "refrigerator",
//!                   "symptom_tag": "ice_maker_issue" }],
//!   "parts": [{ "partselect_number": "PS11752778", "name": "...", "price": 36.5 }],
//!   "models": [{ "model_number": "WDT780SAEM1", "appliance_type": "dishwasher" }],
//!   "fitment": [{ "partselect_number": "PS11752778", "model_number": "WDT780SAEM1" }],
//!   "part_symptoms": [{ "partselect_number": "PS11752778", "symptom_tag": "leaking" }],
//!   "symptom_ranks": [{ "model_number": "WDT780SAEM1", "symptom_tag": "leaking",
//!                       "partselect_number": "PS11752778", "rank": 1 }]
//! }
//! ```
//!
//! Documents are upserted by `(source, url)`. A document whose text hash is
//! unchanged keeps its chunks; otherwise its chunks are replaced and
//! re-embedded with the configured provider. Part and model numbers are
//! stored uppercased.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

use partselect_core::embedding::{vec_to_blob, EmbeddingProvider};
use partselect_core::models::{ApplianceType, ChunkMetadata, ModelRecord, PartRecord};

use crate::chunk::{chunk_text, DEFAULT_CHUNK_CHARS};
use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;

#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub documents: Vec<SeedDocument>,
    #[serde(default)]
    pub parts: Vec<PartRecord>,
    #[serde(default)]
    pub models: Vec<ModelRecord>,
    #[serde(default)]
    pub fitment: Vec<SeedFitment>,
    #[serde(default)]
    pub part_symptoms: Vec<SeedPartSymptom>,
    #[serde(default)]
    pub symptom_ranks: Vec<SeedSymptomRank>,
}

#[derive(Debug, Deserialize)]
pub struct SeedDocument {
    #[serde(default = "default_source")]
    pub source: String,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    pub text: String,
    #[serde(default)]
    pub appliance_type: Option<ApplianceType>,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub symptom_tag: Option<String>,
    #[serde(default)]
    pub model_number: Option<String>,
    #[serde(default)]
    pub part_number: Option<String>,
}

fn default_source() -> String {
    "repair_guides".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SeedFitment {
    pub partselect_number: String,
    pub model_number: String,
}

#[derive(Debug, Deserialize)]
pub struct SeedPartSymptom {
    pub partselect_number: String,
    pub symptom_tag: String,
}

#[derive(Debug, Deserialize)]
pub struct SeedSymptomRank {
    pub model_number: String,
    pub symptom_tag: String,
    pub partselect_number: String,
    pub rank: i64,
}

/// Row counts written by one import.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub documents: usize,
    pub documents_unchanged: usize,
    pub chunks: usize,
    pub parts: usize,
    pub models: usize,
    pub fitment: usize,
    pub part_symptoms: usize,
    pub symptom_ranks: usize,
}

/// Entry point for the CLI command.
pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
    let seed: SeedFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse seed file: {}", path.display()))?;

    if !seed.documents.is_empty() && !config.embedding.is_enabled() {
        bail!("Importing documents requires an embedding provider. Set [embedding] provider in config.");
    }
    let provider = create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let stats = import_seed(&pool, provider.as_ref(), &seed, config.embedding.batch_size).await?;

    println!("import {}", path.display());
    println!("  documents: {} ({} unchanged)", stats.documents, stats.documents_unchanged);
    println!("  chunks written: {}", stats.chunks);
    println!("  parts: {}", stats.parts);
    println!("  models: {}", stats.models);
    println!("  fitment rows: {}", stats.fitment);
    println!("  part symptoms: {}", stats.part_symptoms);
    println!("  symptom ranks: {}", stats.symptom_ranks);
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Write a parsed seed into an initialized database.
pub async fn import_seed(
    pool: &SqlitePool,
    provider: &dyn EmbeddingProvider,
    seed: &SeedFile,
    batch_size: usize,
) -> Result<ImportStats> {
    let mut stats = ImportStats::default();

    for doc in &seed.documents {
        let (doc_id, changed) = upsert_document(pool, doc).await?;
        stats.documents += 1;
        if !changed {
            stats.documents_unchanged += 1;
            continue;
        }
        stats.chunks += replace_chunks(pool, provider, &doc_id, doc, batch_size).await?;
    }

    for part in &seed.parts {
        upsert_part(pool, part).await?;
        stats.parts += 1;
    }
    for model in &seed.models {
        sqlx::query(
            r#"
            INSERT INTO models (model_number, brand, appliance_type, url) VALUES (?, ?, ?, ?)
            ON CONFLICT(model_number) DO UPDATE SET
                brand = excluded.brand,
                appliance_type = excluded.appliance_type,
                url = excluded.url
            "#,
        )
        .bind(upper(&model.model_number))
        .bind(&model.brand)
        .bind(model.appliance_type.map(|a| a.as_str()))
        .bind(&model.url)
        .execute(pool)
        .await?;
        stats.models += 1;
    }
    for f in &seed.fitment {
        sqlx::query("INSERT OR IGNORE INTO part_fitment (partselect_number, model_number) VALUES (?, ?)")
            .bind(upper(&f.partselect_number))
            .bind(upper(&f.model_number))
            .execute(pool)
            .await?;
        stats.fitment += 1;
    }
    for s in &seed.part_symptoms {
        sqlx::query("INSERT OR IGNORE INTO part_symptoms (partselect_number, symptom_tag) VALUES (?, ?)")
            .bind(upper(&s.partselect_number))
            .bind(s.symptom_tag.trim())
            .execute(pool)
            .await?;
        stats.part_symptoms += 1;
    }
    for r in &seed.symptom_ranks {
        sqlx::query(
            r#"
            INSERT INTO model_symptom_rank (model_number, symptom_tag, partselect_number, rank)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(model_number, symptom_tag, partselect_number) DO UPDATE SET rank = excluded.rank
            "#,
        )
        .bind(upper(&r.model_number))
        .bind(r.symptom_tag.trim())
        .bind(upper(&r.partselect_number))
        .bind(r.rank)
        .execute(pool)
        .await?;
        stats.symptom_ranks += 1;
    }

    Ok(stats)
}

fn upper(s: &str) -> String {
    s.trim().to_ascii_uppercase()
}

fn content_hash(doc: &SeedDocument) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc.source.as_bytes());
    hasher.update(doc.url.as_bytes());
    hasher.update(doc.text.as_bytes());
    if let Ok(meta) = serde_json::to_string(&metadata_for(doc)) {
        hasher.update(meta.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn metadata_for(doc: &SeedDocument) -> ChunkMetadata {
    ChunkMetadata {
        appliance_type: doc.appliance_type,
        doc_type: doc.doc_type.clone(),
        symptom_tag: doc.symptom_tag.clone(),
        source_url: doc.url.clone(),
        title: doc.title.clone(),
        model_number: doc.model_number.as_deref().map(upper),
        part_number: doc.part_number.as_deref().map(upper),
    }
}

/// Returns the document id and whether its content changed.
async fn upsert_document(pool: &SqlitePool, doc: &SeedDocument) -> Result<(String, bool)> {
    let hash = content_hash(doc);
    let existing: Option<(String, String)> =
        sqlx::query_as("SELECT doc_id, content_hash FROM documents WHERE source = ? AND url = ?")
            .bind(&doc.source)
            .bind(&doc.url)
            .fetch_optional(pool)
            .await?;

    if let Some((doc_id, old_hash)) = &existing {
        if *old_hash == hash {
            return Ok((doc_id.clone(), false));
        }
    }
    let doc_id = existing
        .map(|(id, _)| id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    sqlx::query(
        r#"
        INSERT INTO documents (doc_id, source, url, title, raw_text, content_hash, ingested_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source, url) DO UPDATE SET
            title = excluded.title,
            raw_text = excluded.raw_text,
            content_hash = excluded.content_hash,
            ingested_at = excluded.ingested_at
        "#,
    )
    .bind(&doc_id)
    .bind(&doc.source)
    .bind(&doc.url)
    .bind(&doc.title)
    .bind(&doc.text)
    .bind(&hash)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;

    Ok((doc_id, true))
}

async fn replace_chunks(
    pool: &SqlitePool,
    provider: &dyn EmbeddingProvider,
    doc_id: &str,
    doc: &SeedDocument,
    batch_size: usize,
) -> Result<usize> {
    let texts = chunk_text(&doc.text, DEFAULT_CHUNK_CHARS);
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let embedded = provider
            .embed(batch)
            .await
            .with_context(|| format!("Failed to embed chunks of {}", doc.url))?;
        if embedded.len() != batch.len() {
            bail!(
                "Embedding provider returned {} vectors for {} chunks",
                embedded.len(),
                batch.len()
            );
        }
        vectors.extend(embedded);
    }
    let metadata_json = serde_json::to_string(&metadata_for(doc))?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
        .bind(doc_id)
        .execute(&mut *tx)
        .await?;
    for (index, (text, vector)) in texts.iter().zip(&vectors).enumerate() {
        sqlx::query(
            r#"
            INSERT INTO chunks (chunk_id, doc_id, chunk_index, text, metadata_json, embedding, embedding_model, dims)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(doc_id)
        .bind(index as i64)
        .bind(text)
        .bind(&metadata_json)
        .bind(vec_to_blob(vector))
        .bind(provider.model_name())
        .bind(vector.len() as i64)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(texts.len())
}

async fn upsert_part(pool: &SqlitePool, part: &PartRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO parts (partselect_number, manufacturer_part_number, name, brand, price, stock_status, url, image_url, appliance_type)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(partselect_number) DO UPDATE SET
            manufacturer_part_number = excluded.manufacturer_part_number,
            name = excluded.name,
            brand = excluded.brand,
            price = excluded.price,
            stock_status = excluded.stock_status,
            url = excluded.url,
            image_url = excluded.image_url,
            appliance_type = excluded.appliance_type
        "#,
    )
    .bind(upper(&part.partselect_number))
    .bind(part.manufacturer_part_number.as_deref().map(upper))
    .bind(&part.name)
    .bind(&part.brand)
    .bind(part.price)
    .bind(&part.stock_status)
    .bind(&part.url)
    .bind(&part.image_url)
    .bind(part.appliance_type.map(|a| a.as_str()))
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use partselect_core::embedding::HashingEmbedder;
    use partselect_core::store::{CatalogStore, DocumentStore};

    use crate::migrate::apply_schema;
    use crate::sqlite_store::{SqliteCatalog, SqliteDocumentStore};

    const SEED: &str = r#"{
        "documents": [{
            "url": "https://www.partselect.com/Repair/Refrigerator/Not-Making-Ice/",
            "title": "Refrigerator not making ice",
            "text": "Check the water inlet valve.\n\nMake sure the ice maker arm is down.",
            "appliance_type": "refrigerator",
            "symptom_tag": "ice_maker_issue"
        }],
        "parts": [{ "partselect_number": "ps11752778", "manufacturer_part_number": "WPW10321304",
                    "name": "Refrigerator Door Shelf Bin", "price": 36.5 }],
        "models": [{ "model_number": "wrf535swhz", "appliance_type": "refrigerator" }],
        "fitment": [{ "partselect_number": "PS11752778", "model_number": "WRF535SWHZ" }]
    }"#;

    async fn memory_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_import_seed_and_reimport_unchanged() {
        let pool = memory_pool().await;
        let seed: SeedFile = serde_json::from_str(SEED).unwrap();
        let embedder = HashingEmbedder::new(32);

        let stats = import_seed(&pool, &embedder, &seed, 8).await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.parts, 1);

        let again = import_seed(&pool, &embedder, &seed, 8).await.unwrap();
        assert_eq!(again.documents_unchanged, 1);
        assert_eq!(again.chunks, 0);

        let docs = SqliteDocumentStore::new(pool.clone());
        assert_eq!(docs.embedding_dims().await.unwrap(), Some(32));

        let catalog = SqliteCatalog::new(pool);
        let part = catalog.find_part("WPW10321304").await.unwrap().unwrap();
        assert_eq!(part.partselect_number, "PS11752778");
        assert!(catalog.has_fitment("PS11752778", "WRF535SWHZ").await.unwrap());
        assert!(catalog.find_model("WRF535SWHZ").await.unwrap().is_some());
    }
}
