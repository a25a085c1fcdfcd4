//! External page discovery via SerpApi.
//!
//! Used only when the catalog has nothing for a part or model. Discovery is
//! optional: with `[discovery] provider = "disabled"` or no
//! `SERPAPI_API_KEY` in the environment, [`create_discovery`] returns
//! `None` and handlers fall back to plain PartSelect links.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use partselect_core::models::DiscoveredPage;
use partselect_core::store::PageDiscovery;

use crate::config::DiscoveryConfig;

const SERPAPI_URL: &str = "https://serpapi.com/search";

#[derive(Debug, Deserialize)]
struct SerpResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
}

pub struct SerpApiDiscovery {
    api_key: String,
    client: reqwest::Client,
}

impl SerpApiDiscovery {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { api_key, client })
    }
}

fn into_pages(response: SerpResponse, limit: usize) -> Result<Vec<DiscoveredPage>> {
    if let Some(error) = response.error {
        // SerpApi reports "no results" as an error string.
        if error.to_ascii_lowercase().contains("hasn't returned any results") {
            return Ok(Vec::new());
        }
        bail!("SerpApi error: {}", error);
    }
    Ok(response
        .organic_results
        .into_iter()
        .filter(|r| r.link.starts_with("http"))
        .map(|r| DiscoveredPage {
            title: if r.title.trim().is_empty() {
                r.link.clone()
            } else {
                r.title.trim().to_string()
            },
            url: r.link,
            snippet: r.snippet,
            thumbnail: r.thumbnail,
        })
        .take(limit)
        .collect())
}

#[async_trait]
impl PageDiscovery for SerpApiDiscovery {
    async fn find_pages(&self, query: &str, limit: usize) -> Result<Vec<DiscoveredPage>> {
        let num = limit.to_string();
        let response = self
            .client
            .get(SERPAPI_URL)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("num", num.as_str()),
                ("gl", "us"),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("SerpApi error {}: {}", status, text);
        }
        let parsed: SerpResponse = response.json().await?;
        into_pages(parsed, limit)
    }
}

/// Build the configured discovery backend, if any.
pub fn create_discovery(config: &DiscoveryConfig) -> Result<Option<Arc<dyn PageDiscovery>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "serpapi" => {
            let key = std::env::var("SERPAPI_API_KEY").unwrap_or_default();
            if key.trim().is_empty() {
                tracing::warn!("SERPAPI_API_KEY not set; page discovery disabled");
                return Ok(None);
            }
            let discovery =
                SerpApiDiscovery::new(key.trim().to_string(), Duration::from_secs(config.timeout_secs))?;
            Ok(Some(Arc::new(discovery)))
        }
        other => bail!("Unknown discovery provider: {}", other),
    }
}
