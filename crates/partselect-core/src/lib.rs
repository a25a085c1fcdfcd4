//! # PartSelect Core
//!
//! IO-free logic for the PartSelect parts-support agent: the typed
//! conversation state, scope rules, slot extraction, symptom triage,
//! routing, source policy, evidence filtering and answer composition.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem I/O.
//! External capabilities (vector store, parts catalog, language model,
//! page discovery) are expressed as traits and implemented by the
//! `partselect-agent` app crate; in-memory stores live in [`store::memory`]
//! for tests.
//!
//! # Pipeline
//!
//! ```text
//! message ─► scope ─► slots + triage ─► router ─► one handler ─► compose ─► response
//!              │
//!              └─ OUT_OF_SCOPE / AMBIGUOUS ─► fixed redirect
//! ```

pub mod compose;
pub mod embedding;
pub mod error;
pub mod models;
pub mod policy;
pub mod retrieve;
pub mod router;
pub mod scope;
pub mod slots;
pub mod state;
pub mod store;
pub mod triage;

pub use error::{EngineError, Result};
