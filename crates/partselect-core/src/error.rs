//! Error taxonomy shared by the engine.
//!
//! Most of these are recoverable: the pipeline turns them into a redirect,
//! a clarifying question, or a degraded answer. Only malformed requests
//! reach callers as failures, and those are rejected by the server before
//! the engine runs.

use thiserror::Error;

use crate::state::ScopeLabel;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Message is outside the supported domain. Answered with the redirect.
    #[error("message rejected by scope gate ({0})")]
    ScopeRejected(ScopeLabel),

    /// A routed action needs a slot the conversation has not supplied.
    #[error("missing required slot: {0}")]
    SlotMissing(&'static str),

    /// No chunk passed the retrieval filters.
    #[error("no evidence passed the retrieval filters")]
    RetrievalEmpty,

    /// Evidence was retrieved but no claim could be grounded in it.
    #[error("no claim could be grounded in the retrieved evidence")]
    Ungrounded,

    /// Embedding, language model or search call failed or timed out.
    #[error("{service} unavailable: {reason}")]
    ExternalServiceUnavailable {
        service: &'static str,
        reason: String,
    },

    /// Structured or document store could not be queried.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Planner proposed an action outside the closed action set.
    #[error("planner proposed unknown action '{0}'")]
    InvalidPlan(String),

    /// Query and stored vectors come from different embedding spaces.
    #[error("embedding space mismatch: query has {query_dims} dims, store has {store_dims}")]
    EmbeddingMismatch { query_dims: usize, store_dims: usize },
}

impl EngineError {
    /// Shorthand for wrapping an external failure.
    pub fn unavailable(service: &'static str, reason: impl ToString) -> Self {
        EngineError::ExternalServiceUnavailable {
            service,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
