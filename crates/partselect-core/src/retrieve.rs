//! Evidence retrieval with an explicit expansion plan.
//!
//! A query is embedded once; the same vector is reused for every hop.
//!
//! | Hop | Runs when | Filter |
//! |-----|-----------|--------|
//! | [`Hop::Strict`] | always | state filter from the source policy |
//! | [`Hop::Adjacent`] | strict returned fewer than `min_results` and the state has neighbours | union of the state and neighbour tags |
//! | [`Hop::ApplianceOnly`] | still nothing and the strict filter had symptom tags | appliance only |
//!
//! Later hops only append chunks not already present, so strict results
//! always rank first. An empty result is valid and handled by the composer.

use anyhow::Result;
use std::collections::HashSet;
use tracing::debug;

use crate::models::{ApplianceType, EvidenceChunk};
use crate::policy::{EvidenceFilter, SourcePolicy};
use crate::state::DiagnosticState;
use crate::store::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    Strict,
    Adjacent,
    ApplianceOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalSettings {
    pub top_k: usize,
    /// Strict hops returning fewer chunks than this trigger the adjacent hop.
    pub min_results: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_results: 2,
        }
    }
}

/// What to search for.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalRequest<'a> {
    pub query_vec: &'a [f32],
    pub state: Option<DiagnosticState>,
    pub appliance: Option<ApplianceType>,
    /// Exclude catalog pages (no model number in the conversation).
    pub guides_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Retrieved {
    pub chunks: Vec<EvidenceChunk>,
    pub hops: Vec<Hop>,
}

/// The hop plan for a request, as filters in execution order.
pub fn plan(policy: &SourcePolicy, req: &RetrievalRequest<'_>) -> Vec<(Hop, EvidenceFilter)> {
    let strict = match req.state {
        Some(state) => policy.filter_for(state, req.appliance, req.guides_only),
        None => EvidenceFilter::appliance_only(req.appliance, req.guides_only),
    };
    let mut hops = Vec::with_capacity(3);
    if let Some(adjacent) = req
        .state
        .and_then(|s| policy.adjacent_filter(s, req.appliance, req.guides_only))
    {
        hops.push((Hop::Adjacent, adjacent));
    }
    if strict.has_symptom_constraints() {
        hops.push((
            Hop::ApplianceOnly,
            EvidenceFilter::appliance_only(strict.appliance_type, req.guides_only),
        ));
    }
    hops.insert(0, (Hop::Strict, strict));
    hops
}

/// Run the hop plan against `store`.
pub async fn retrieve(
    store: &dyn DocumentStore,
    policy: &SourcePolicy,
    req: &RetrievalRequest<'_>,
    settings: RetrievalSettings,
) -> Result<Retrieved> {
    let mut out = Retrieved::default();
    let mut seen: HashSet<String> = HashSet::new();

    for (hop, filter) in plan(policy, req) {
        let should_run = match hop {
            Hop::Strict => true,
            Hop::Adjacent => out.chunks.len() < settings.min_results,
            Hop::ApplianceOnly => out.chunks.is_empty(),
        };
        if !should_run {
            continue;
        }
        let found = store
            .similarity_search(req.query_vec, &filter, settings.top_k)
            .await?;
        debug!(hop = ?hop, found = found.len(), "retrieval hop");
        out.hops.push(hop);
        for chunk in found {
            if out.chunks.len() >= settings.top_k {
                break;
            }
            if seen.insert(chunk.chunk_id.clone()) {
                out.chunks.push(chunk);
            }
        }
    }

    Ok(out)
}
