//! # PartSelect agent
//!
//! Chat engine for refrigerator and dishwasher parts support. Every message
//! passes a scope gate, is routed to exactly one action, and is answered
//! from the structured catalog or from retrieved repair-guide evidence with
//! citations drawn only from that evidence.
//!
//! The pure engine logic lives in `partselect-core`. This crate adds the
//! native pieces: SQLite stores, network capabilities with timeouts, the
//! request pipeline, the HTTP server and the `psa` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────────────┐   ┌──────────┐
//! │  HTTP /  │──▶│ Engine: scope ▶ slots ▶ route │──▶│ handlers │
//! │   CLI    │   └───────────────────────────────┘   └────┬─────┘
//! └──────────┘                                            │
//!                  ┌──────────────┬───────────────┬───────┴──────┐
//!                  ▼              ▼               ▼              ▼
//!             ┌─────────┐   ┌──────────┐   ┌───────────┐   ┌─────────┐
//!             │ catalog │   │  chunks  │   │ embedding │   │ SerpApi │
//!             │ (cache) │   │ (SQLite) │   │ / OpenAI  │   │ (opt.)  │
//!             └─────────┘   └──────────┘   └───────────┘   └─────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | Document and catalog stores |
//! | [`cache`] | TTL cache over catalog lookups |
//! | [`embedding`] | Embedding provider construction |
//! | [`llm`] | OpenAI scope model, planner and claim writer |
//! | [`discovery`] | SerpApi page discovery |
//! | [`handlers`] | One handler per action |
//! | [`pipeline`] | The request state machine |
//! | [`server`] | HTTP server |
//! | [`chunk`] | Guide text chunking |
//! | [`import`] | Seed import |

pub mod cache;
pub mod chunk;
pub mod config;
pub mod db;
pub mod discovery;
pub mod embedding;
pub mod handlers;
pub mod import;
pub mod llm;
pub mod migrate;
pub mod pipeline;
pub mod server;
pub mod sqlite_store;
