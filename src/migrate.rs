//! Schema creation for `psa init`.
//!
//! Two groups of tables:
//!
//! - **Evidence**: `documents` 1:N `chunks`. Each chunk stores its metadata
//!   as JSON plus the embedding BLOB, the model that produced it and its
//!   dimensionality, so the retriever can refuse a mismatched query.
//! - **Catalog**: `parts`, `models`, `part_fitment`, `part_symptoms`,
//!   `model_symptom_rank`.
//!
//! Every statement is `IF NOT EXISTS`; running it twice is a no-op.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        doc_id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        url TEXT NOT NULL,
        title TEXT,
        raw_text TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        ingested_at INTEGER NOT NULL,
        UNIQUE(source, url)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        chunk_id TEXT PRIMARY KEY,
        doc_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        text TEXT NOT NULL,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        embedding BLOB NOT NULL,
        embedding_model TEXT NOT NULL,
        dims INTEGER NOT NULL,
        UNIQUE(doc_id, chunk_index),
        FOREIGN KEY (doc_id) REFERENCES documents(doc_id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS parts (
        partselect_number TEXT PRIMARY KEY,
        manufacturer_part_number TEXT,
        name TEXT NOT NULL,
        brand TEXT,
        price REAL,
        stock_status TEXT,
        url TEXT,
        image_url TEXT,
        appliance_type TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS models (
        model_number TEXT PRIMARY KEY,
        brand TEXT,
        appliance_type TEXT,
        url TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS part_fitment (
        partselect_number TEXT NOT NULL,
        model_number TEXT NOT NULL,
        UNIQUE(partselect_number, model_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS part_symptoms (
        partselect_number TEXT NOT NULL,
        symptom_tag TEXT NOT NULL,
        UNIQUE(partselect_number, symptom_tag)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS model_symptom_rank (
        model_number TEXT NOT NULL,
        symptom_tag TEXT NOT NULL,
        partselect_number TEXT NOT NULL,
        rank INTEGER NOT NULL,
        UNIQUE(model_number, symptom_tag, partselect_number)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id)",
    "CREATE INDEX IF NOT EXISTS idx_parts_mfr ON parts(manufacturer_part_number COLLATE NOCASE)",
    "CREATE INDEX IF NOT EXISTS idx_fitment_model ON part_fitment(model_number)",
    "CREATE INDEX IF NOT EXISTS idx_rank_model_symptom ON model_symptom_rank(model_number, symptom_tag)",
];

/// Create all tables on an open pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        apply_schema(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        for expected in [
            "chunks",
            "documents",
            "model_symptom_rank",
            "models",
            "part_fitment",
            "part_symptoms",
            "parts",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {}", expected);
        }
    }
}
