//! OpenAI chat-completions client.
//!
//! One [`OpenAIChat`] backs three injected capabilities:
//!
//! - [`ScopeModel`]: one-word IN_SCOPE / OUT_OF_SCOPE verdict for messages
//!   the scope rules could not decide.
//! - [`Planner`]: JSON proposal of the next action and slots. Output is
//!   untrusted and validated by the router.
//! - [`ClaimWriter`]: JSON claims citing chunk ids. Output is untrusted and
//!   validated by the composer's citation gate.
//!
//! No retries: each call is bounded by the pipeline's timeout and every
//! caller has a deterministic fallback.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use partselect_core::compose::{ClaimDraft, ClaimWriter, QueryContext};
use partselect_core::models::{ChatMessage, EvidenceChunk};
use partselect_core::router::{Planner, PlannerProposal};
use partselect_core::scope::ScopeModel;
use partselect_core::state::{ScopeLabel, Slots};

use crate::config::LlmConfig;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

const SCOPE_SYSTEM: &str = "This assistant only helps with refrigerator and dishwasher parts: \
parts lookup, compatibility, installation, troubleshooting and orders. Reply with exactly one \
word: IN_SCOPE or OUT_OF_SCOPE. IN_SCOPE only if the user is clearly asking about fridge or \
dishwasher parts, repair, installation, compatibility or an appliance problem. OUT_OF_SCOPE for \
anything else.";

const PLANNER_SYSTEM: &str = "You route messages for a refrigerator and dishwasher parts \
assistant. Reply with a JSON object with keys next_action, model_number, part_number, \
appliance_type, clarify_question. next_action must be one of: clarify, parts_list, part_lookup, \
compatibility, find_model_help, troubleshoot. Use null for unknown slots. Never invent model or \
part numbers that are not in the conversation.";

const CLAIMS_SYSTEM: &str = "You answer appliance repair questions using only the evidence \
chunks provided. Reply with a JSON object {\"answer\": string, \"claims\": [{\"text\": string, \
\"supporting_chunk_ids\": [string]}]}. Every claim must cite at least one chunk id from the \
evidence. Do not state anything the evidence does not support. Do not include links. Use short \
sentences and bullet steps where helpful.";

const HISTORY_TURNS: usize = 6;

pub struct OpenAIChat {
    model: String,
    max_tokens: u32,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIChat {
    /// Requires `OPENAI_API_KEY`.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            api_key,
            client,
        })
    }

    async fn complete(&self, messages: serde_json::Value, json_mode: bool, max_tokens: u32) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": 0.2,
        });
        if json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, text);
        }
        let json: serde_json::Value = response.json().await?;
        message_content(&json)
    }
}

fn message_content(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|c| c.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
}

/// Drop a surrounding ```json fence if the model added one.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn parse_scope_reply(reply: &str) -> Result<ScopeLabel> {
    let upper = reply.to_ascii_uppercase();
    if upper.contains("OUT_OF_SCOPE") {
        Ok(ScopeLabel::OutOfScope)
    } else if upper.contains("IN_SCOPE") {
        Ok(ScopeLabel::InScope)
    } else {
        bail!("unrecognized scope reply: {}", reply)
    }
}

fn history_messages(history: &[ChatMessage]) -> Vec<serde_json::Value> {
    let start = history.len().saturating_sub(HISTORY_TURNS);
    history[start..]
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect()
}

fn evidence_prompt(evidence: &[EvidenceChunk], ctx: &QueryContext<'_>) -> String {
    let mut prompt = String::new();
    if let Some(hint) = ctx.scenario_hint {
        prompt.push_str(&format!("Context: {}\n", hint));
    }
    if let Some(appliance) = ctx.appliance {
        prompt.push_str(&format!("Appliance: {}\n", appliance));
    }
    prompt.push_str("Evidence:\n");
    for chunk in evidence {
        prompt.push_str(&format!("[{}] {}\n", chunk.chunk_id, chunk.text.trim()));
    }
    prompt.push_str(&format!("\nUser question: {}", ctx.message));
    prompt
}

#[async_trait]
impl ScopeModel for OpenAIChat {
    async fn classify(&self, message: &str, _history: &[ChatMessage]) -> Result<ScopeLabel> {
        let messages = json!([
            { "role": "system", "content": SCOPE_SYSTEM },
            { "role": "user", "content": message.trim() },
        ]);
        let reply = self.complete(messages, false, 10).await?;
        parse_scope_reply(&reply)
    }
}

#[async_trait]
impl Planner for OpenAIChat {
    async fn propose(
        &self,
        message: &str,
        history: &[ChatMessage],
        slots: &Slots,
    ) -> Result<PlannerProposal> {
        let mut messages = vec![json!({ "role": "system", "content": PLANNER_SYSTEM })];
        messages.extend(history_messages(history));
        messages.push(json!({
            "role": "user",
            "content": format!(
                "Known slots: model_number={:?}, part_number={:?}\n\nMessage: {}",
                slots.model_number, slots.part_number, message
            ),
        }));
        let reply = self
            .complete(serde_json::Value::Array(messages), true, 200)
            .await?;
        serde_json::from_str(strip_code_fence(&reply)).context("planner returned invalid JSON")
    }
}

#[async_trait]
impl ClaimWriter for OpenAIChat {
    async fn write_claims(
        &self,
        evidence: &[EvidenceChunk],
        ctx: &QueryContext<'_>,
    ) -> Result<ClaimDraft> {
        let messages = json!([
            { "role": "system", "content": CLAIMS_SYSTEM },
            { "role": "user", "content": evidence_prompt(evidence, ctx) },
        ]);
        let reply = self.complete(messages, true, self.max_tokens).await?;
        serde_json::from_str(strip_code_fence(&reply)).context("claim writer returned invalid JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partselect_core::models::ChunkMetadata;

    #[test]
    fn test_scope_reply() {
        assert_eq!(parse_scope_reply("IN_SCOPE").unwrap(), ScopeLabel::InScope);
        assert_eq!(parse_scope_reply("out_of_scope.").unwrap(), ScopeLabel::OutOfScope);
        assert!(parse_scope_reply("maybe").is_err());
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence(" {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_planner_json_with_nulls() {
        let p: PlannerProposal = serde_json::from_str(
            r#"{"next_action":"parts_list","model_number":"WRF535SWHZ","part_number":null}"#,
        )
        .unwrap();
        assert_eq!(p.next_action, "parts_list");
        assert_eq!(p.part_number, None);
    }

    #[test]
    fn test_message_content() {
        let json = json!({ "choices": [ { "message": { "content": " IN_SCOPE " } } ] });
        assert_eq!(message_content(&json).unwrap(), "IN_SCOPE");
        assert!(message_content(&json!({ "choices": [] })).is_err());
    }

    #[test]
    fn test_evidence_prompt_lists_chunk_ids() {
        let evidence = vec![EvidenceChunk {
            chunk_id: "c-1".into(),
            doc_id: "d".into(),
            text: "Check the water inlet valve.".into(),
            metadata: ChunkMetadata::default(),
            score: 0.9,
        }];
        let ctx = QueryContext {
            message: "no ice",
            appliance: Some("refrigerator"),
            scenario_hint: None,
        };
        let prompt = evidence_prompt(&evidence, &ctx);
        assert!(prompt.contains("[c-1] Check the water inlet valve."));
        assert!(prompt.ends_with("User question: no ice"));
    }
}
