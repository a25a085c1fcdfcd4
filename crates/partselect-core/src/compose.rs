//! Grounded answer composition and the citation gate.
//!
//! Answers are assembled from *claims*. Each claim names the evidence
//! chunks that support it, and only claims whose ids exist in the evidence
//! passed to [`compose`] survive. The content is rebuilt from the surviving
//! claims, and citations are the distinct URLs of the chunks they reference.
//! A citation can therefore never point outside the turn's evidence.
//!
//! Claims come from a [`ClaimWriter`] (a language model in production) or
//! from [`extractive_claims`], the deterministic fallback used when no
//! writer is configured or the writer fails.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::EngineError;
use crate::models::{Citation, EvidenceChunk};

pub const NO_EVIDENCE_MESSAGE: &str = "I didn't find a repair guide that matches this yet. \
If you share your appliance model number I can pull up the right parts, or I can help you \
find the model number on your appliance. You can also describe the symptom in a bit more detail.";

pub const UNGROUNDED_MESSAGE: &str = "I couldn't ground a safe answer in our guides for this. \
Please share your appliance model number so I can suggest the right repair steps or parts.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub text: String,
    #[serde(default)]
    pub supporting_chunk_ids: Vec<String>,
}

/// Raw writer output, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimDraft {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub claims: Vec<Claim>,
}

/// What the composer knows about the question.
#[derive(Debug, Clone, Copy)]
pub struct QueryContext<'a> {
    pub message: &'a str,
    pub appliance: Option<&'a str>,
    pub scenario_hint: Option<&'a str>,
}

/// Produces claims grounded in the supplied evidence.
#[async_trait]
pub trait ClaimWriter: Send + Sync {
    async fn write_claims(
        &self,
        evidence: &[EvidenceChunk],
        ctx: &QueryContext<'_>,
    ) -> Result<ClaimDraft>;
}

#[derive(Debug)]
pub struct Composed {
    pub content: String,
    pub citations: Vec<Citation>,
    /// Why the answer was degraded, if it was.
    pub degraded: Option<EngineError>,
}

/// Keep only claims with non-empty text whose supporting ids are all in
/// the evidence. Unknown ids are dropped from a claim; a claim left without
/// support is dropped entirely.
pub fn validate_claims(draft: ClaimDraft, evidence: &[EvidenceChunk]) -> Vec<Claim> {
    let known: HashSet<&str> = evidence.iter().map(|c| c.chunk_id.as_str()).collect();
    draft
        .claims
        .into_iter()
        .filter_map(|claim| {
            let text = claim.text.trim().to_string();
            let ids: Vec<String> = claim
                .supporting_chunk_ids
                .into_iter()
                .filter(|id| known.contains(id.as_str()))
                .collect();
            (!text.is_empty() && !ids.is_empty()).then_some(Claim {
                text,
                supporting_chunk_ids: ids,
            })
        })
        .collect()
}

/// Citations for the chunks the claims use, in first-use order, one per URL.
pub fn citations_for(claims: &[Claim], evidence: &[EvidenceChunk]) -> Vec<Citation> {
    let by_id: HashMap<&str, &EvidenceChunk> =
        evidence.iter().map(|c| (c.chunk_id.as_str(), c)).collect();
    let mut seen = HashSet::new();
    let mut citations = Vec::new();
    for id in claims.iter().flat_map(|c| c.supporting_chunk_ids.iter()) {
        let Some(chunk) = by_id.get(id.as_str()) else {
            continue;
        };
        let url = chunk.metadata.source_url.trim();
        if url.is_empty() || !seen.insert(url.to_string()) {
            continue;
        }
        citations.push(Citation::new(url, citation_title(chunk)));
    }
    citations
}

/// Deterministic claims: the leading sentences of the top chunks.
pub fn extractive_claims(evidence: &[EvidenceChunk], max_claims: usize) -> ClaimDraft {
    let claims = evidence
        .iter()
        .filter_map(|chunk| {
            let text = leading_sentences(&chunk.text, 2);
            (!text.is_empty()).then(|| Claim {
                text,
                supporting_chunk_ids: vec![chunk.chunk_id.clone()],
            })
        })
        .take(max_claims)
        .collect();
    ClaimDraft {
        answer: String::new(),
        claims,
    }
}

/// Compose the final answer from a draft.
pub fn compose(evidence: &[EvidenceChunk], draft: ClaimDraft) -> Composed {
    if evidence.is_empty() {
        return Composed {
            content: NO_EVIDENCE_MESSAGE.to_string(),
            citations: Vec::new(),
            degraded: Some(EngineError::RetrievalEmpty),
        };
    }

    let claims = validate_claims(draft, evidence);
    let citations = citations_for(&claims, evidence);
    if claims.is_empty() || citations.is_empty() {
        return Composed {
            content: UNGROUNDED_MESSAGE.to_string(),
            citations: Vec::new(),
            degraded: Some(EngineError::Ungrounded),
        };
    }

    let content = claims
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    Composed {
        content,
        citations,
        degraded: None,
    }
}

fn leading_sentences(text: &str, n: usize) -> String {
    let clean = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::new();
    let mut count = 0;
    for (i, ch) in clean.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            let next = clean[i + ch.len_utf8()..].chars().next();
            if next.is_none() || next == Some(' ') {
                count += 1;
                if count == n {
                    out = clean[..i + ch.len_utf8()].to_string();
                    break;
                }
            }
        }
    }
    if out.is_empty() {
        out = clean;
    }
    out.trim().to_string()
}

fn is_generic_title(title: &str) -> bool {
    let t = title.trim().to_lowercase();
    t.is_empty() || t == "content" || t == "guide" || t.starts_with("about this repair")
}

/// Chunk title, or a title derived from the last URL path segment.
pub fn citation_title(chunk: &EvidenceChunk) -> String {
    if let Some(title) = chunk.metadata.title.as_deref() {
        if !is_generic_title(title) {
            return title.trim().to_string();
        }
    }
    let path = chunk
        .metadata
        .source_url
        .split(['?', '#'])
        .next()
        .unwrap_or("");
    let segment = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .trim_end_matches(".htm")
        .trim_end_matches(".html");
    let words: Vec<String> = segment
        .split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        "PartSelect Repair Guide".to_string()
    } else {
        format!("PartSelect Repair Guide: {}", words.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn chunk(id: &str, url: &str, text: &str) -> EvidenceChunk {
        EvidenceChunk {
            chunk_id: id.into(),
            doc_id: "d".into(),
            text: text.into(),
            metadata: ChunkMetadata {
                source_url: url.into(),
                ..Default::default()
            },
            score: 0.5,
        }
    }

    fn claim(text: &str, ids: &[&str]) -> Claim {
        Claim {
            text: text.into(),
            supporting_chunk_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_unknown_ids_never_become_citations() {
        let evidence = vec![chunk("c1", "https://a/one/", "One.")];
        let draft = ClaimDraft {
            answer: String::new(),
            claims: vec![
                claim("Supported.", &["c1", "ghost"]),
                claim("Invented.", &["ghost"]),
            ],
        };
        let composed = compose(&evidence, draft);
        assert_eq!(composed.content, "Supported.");
        assert_eq!(composed.citations.len(), 1);
        assert_eq!(composed.citations[0].url, "https://a/one/");
        assert!(composed.degraded.is_none());
    }

    #[test]
    fn test_citations_dedupe_by_url() {
        let evidence = vec![
            chunk("c1", "https://a/guide/", "First."),
            chunk("c2", "https://a/guide/", "Second."),
            chunk("c3", "https://a/other/", "Third."),
        ];
        let claims = vec![claim("x", &["c2"]), claim("y", &["c1", "c3"])];
        let urls: Vec<String> = citations_for(&claims, &evidence)
            .into_iter()
            .map(|c| c.url)
            .collect();
        assert_eq!(urls, vec!["https://a/guide/", "https://a/other/"]);
    }

    #[test]
    fn test_empty_evidence_fallback() {
        let composed = compose(&[], extractive_claims(&[], 3));
        assert_eq!(composed.content, NO_EVIDENCE_MESSAGE);
        assert!(composed.citations.is_empty());
        assert!(matches!(composed.degraded, Some(EngineError::RetrievalEmpty)));
    }

    #[test]
    fn test_gate_blocks_ungrounded_draft() {
        let evidence = vec![chunk("c1", "https://a/one/", "One.")];
        let draft = ClaimDraft {
            answer: "Trust me.".into(),
            claims: vec![claim("Trust me.", &[])],
        };
        let composed = compose(&evidence, draft);
        assert_eq!(composed.content, UNGROUNDED_MESSAGE);
        assert!(composed.citations.is_empty());
    }

    #[test]
    fn test_gate_blocks_chunks_without_urls() {
        let evidence = vec![chunk("c1", "  ", "One.")];
        let composed = compose(&evidence, extractive_claims(&evidence, 3));
        assert!(matches!(composed.degraded, Some(EngineError::Ungrounded)));
    }

    #[test]
    fn test_extractive_uses_leading_sentences() {
        let evidence = vec![chunk(
            "c1",
            "https://a/ice/",
            "Check the water inlet valve.  Make sure the arm is down! Then call us.",
        )];
        let draft = extractive_claims(&evidence, 3);
        assert_eq!(
            draft.claims[0].text,
            "Check the water inlet valve. Make sure the arm is down!"
        );
        let composed = compose(&evidence, draft);
        assert_eq!(composed.citations.len(), 1);
    }

    #[test]
    fn test_citation_title_from_url() {
        let mut c = chunk(
            "c1",
            "https://www.partselect.com/Repair/Refrigerator/Not-Making-Ice/",
            "x",
        );
        c.metadata.title = Some("About this repair".into());
        assert_eq!(citation_title(&c), "PartSelect Repair Guide: Not Making Ice");
        c.metadata.title = Some("Ice maker troubleshooting".into());
        assert_eq!(citation_title(&c), "Ice maker troubleshooting");
    }
}
