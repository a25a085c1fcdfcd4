//! Request pipeline: scope gate, slot extraction, routing, one handler.
//!
//! ```text
//! message ─▶ scope ──(OUT / AMBIGUOUS)──▶ redirect
//!              │
//!              ▼ IN_SCOPE
//!            slots ─▶ router ─▶ handler ─▶ ChatResponse
//! ```
//!
//! Each stage produces a [`StateUpdate`] merged through
//! [`ConversationState::apply`]. Exactly one of redirect, clarify or a
//! handler answer is produced per request. All external calls (scope model,
//! planner, embeddings, stores, discovery) run under a timeout and degrade
//! instead of failing the request.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use partselect_core::compose::ClaimWriter;
use partselect_core::embedding::EmbeddingProvider;
use partselect_core::models::{ChatMessage, Citation, ProductCard};
use partselect_core::policy::SourcePolicy;
use partselect_core::retrieve::RetrievalSettings;
use partselect_core::router::{self, Planner, Routing};
use partselect_core::scope::{CompiledScope, RuleVerdict, ScopeContract, ScopeModel};
use partselect_core::slots::extract_slots;
use partselect_core::state::{ConversationState, ScopeLabel, Stage, StateUpdate};
use partselect_core::store::{CatalogStore, DocumentStore, PageDiscovery};

use crate::cache::CachedCatalog;
use crate::config::{Config, Timeouts};
use crate::discovery::create_discovery;
use crate::embedding::create_provider;
use crate::handlers::{self, bounded, Capabilities, HandlerSettings, Service};
use crate::llm::OpenAIChat;
use crate::sqlite_store::{SqliteCatalog, SqliteDocumentStore};

/// Response body for one chat turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub citations: Vec<Citation>,
    pub product_cards: Vec<ProductCard>,
    pub scope_label: ScopeLabel,
}

impl From<ConversationState> for ChatResponse {
    fn from(state: ConversationState) -> Self {
        Self {
            content: state.answer.unwrap_or_default(),
            citations: state.citations,
            product_cards: state.product_cards,
            scope_label: state.scope_label.unwrap_or(ScopeLabel::Ambiguous),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterStrategy {
    Rules,
    Planner,
}

/// The chat engine. Cheap to clone; share one per process.
#[derive(Clone)]
pub struct Engine {
    scope: Arc<CompiledScope>,
    capabilities: Capabilities,
    scope_model: Option<Arc<dyn ScopeModel>>,
    planner: Option<Arc<dyn Planner>>,
    strategy: RouterStrategy,
}

impl Engine {
    /// Engine with the rule router and no language model.
    pub fn new(
        scope: CompiledScope,
        policy: SourcePolicy,
        documents: Arc<dyn DocumentStore>,
        catalog: Arc<dyn CatalogStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            scope: Arc::new(scope),
            capabilities: Capabilities {
                documents,
                catalog,
                embedder,
                policy: Arc::new(policy),
                discovery: None,
                claim_writer: None,
                settings: HandlerSettings::default(),
            },
            scope_model: None,
            planner: None,
            strategy: RouterStrategy::Rules,
        }
    }

    /// Route through `planner` for turns the explicit rules leave open.
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self.strategy = RouterStrategy::Planner;
        self
    }

    pub fn with_scope_model(mut self, model: Arc<dyn ScopeModel>) -> Self {
        self.scope_model = Some(model);
        self
    }

    pub fn with_claim_writer(mut self, writer: Arc<dyn ClaimWriter>) -> Self {
        self.capabilities.claim_writer = Some(writer);
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn PageDiscovery>) -> Self {
        self.capabilities.discovery = Some(discovery);
        self
    }

    pub fn with_settings(mut self, settings: HandlerSettings) -> Self {
        self.capabilities.settings = settings;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.capabilities.settings.timeouts = timeouts;
        self
    }

    pub fn strategy(&self) -> RouterStrategy {
        self.strategy
    }

    /// Build the engine described by `config` on top of an open pool.
    pub async fn from_config(config: &Config, pool: SqlitePool) -> Result<Self> {
        let scope = load_scope(config)?;
        let policy = load_policy(config)?;

        let documents: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(pool.clone()));
        let catalog = CachedCatalog::wrap(
            Arc::new(SqliteCatalog::new(pool)),
            config.catalog.cache_ttl_secs,
            config.catalog.cache_capacity,
        );
        let embedder = create_provider(&config.embedding)?;

        match documents.embedding_dims().await {
            Ok(Some(stored)) if embedder.dims() != 0 && stored != embedder.dims() => warn!(
                stored,
                provider = embedder.dims(),
                "stored chunk vectors do not match the embedding provider; retrieval will return nothing"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not read stored embedding dims"),
        }

        let settings = HandlerSettings {
            retrieval: RetrievalSettings {
                top_k: config.retrieval.top_k,
                min_results: config.retrieval.min_results_before_expansion,
            },
            query_chars: config.retrieval.query_chars,
            max_claims: config.retrieval.max_claims,
            discovery_results: config.discovery.max_results,
            timeouts: config.timeouts(),
            ..HandlerSettings::default()
        };

        let mut engine = Engine::new(scope, policy, documents, catalog, embedder).with_settings(settings);

        if let Some(discovery) = create_discovery(&config.discovery)? {
            engine = engine.with_discovery(discovery);
        }

        if config.llm.is_enabled() {
            let chat = Arc::new(OpenAIChat::new(&config.llm)?);
            engine = engine
                .with_scope_model(chat.clone())
                .with_claim_writer(chat.clone());
            if config.router.strategy == "planner" {
                engine = engine.with_planner(chat);
            }
        }

        info!(
            strategy = ?engine.strategy,
            embedding = engine.capabilities.embedder.model_name(),
            scope_contract = %engine.scope.contract().version,
            source_policy = %engine.capabilities.policy.version,
            "engine ready"
        );
        Ok(engine)
    }

    /// Answer one message.
    pub async fn respond(&self, message: &str, history: Vec<ChatMessage>) -> ChatResponse {
        self.run(message, history).await.into()
    }

    /// Run the pipeline and return the final state.
    pub async fn run(&self, message: &str, history: Vec<ChatMessage>) -> ConversationState {
        let state = ConversationState::new(message, history);

        let label = self.check_scope(&state).await;
        let mut state = state.apply(StateUpdate {
            stage: Some(Stage::ScopeChecked),
            scope_label: Some(label),
            ..Default::default()
        });
        info!(scope = %label, "scope checked");

        if !label.is_in_scope() {
            return state.apply(StateUpdate {
                stage: Some(Stage::Responded),
                ..StateUpdate::answer_only(self.scope.redirect_message())
            });
        }

        let slots = slot_update(&state);
        state = state.apply(slots);
        let routing = self.route(&state).await;
        state = state.apply(StateUpdate {
            stage: Some(Stage::Routed),
            ..routing.into_update()
        });

        let Some(action) = state.next_action else {
            return state;
        };
        info!(
            action = action.as_str(),
            model = state.slots.model_number.as_deref().unwrap_or("-"),
            part = state.slots.part_number.as_deref().unwrap_or("-"),
            "routed"
        );

        let update = handlers::dispatch(&self.capabilities, &state, action).await;
        state = state.apply(update);
        debug!(
            citations = state.citations.len(),
            cards = state.product_cards.len(),
            "handled"
        );

        state.apply(StateUpdate {
            stage: Some(Stage::Responded),
            ..Default::default()
        })
    }

    async fn check_scope(&self, state: &ConversationState) -> ScopeLabel {
        let inconclusive = match self.scope.classify_rules(&state.message, state.last_assistant()) {
            RuleVerdict::Decided(label) => return label,
            RuleVerdict::Inconclusive(inc) => inc,
        };
        let Some(model) = self.scope_model.as_ref() else {
            return self.scope.resolve_without_model(inconclusive);
        };
        match bounded(
            self.capabilities.settings.timeouts.llm,
            Service::External("scope model"),
            model.classify(&state.message, &state.history),
        )
        .await
        {
            Ok(label) => label,
            Err(e) => {
                warn!(error = %e, "scope model unavailable");
                ScopeLabel::Ambiguous
            }
        }
    }

    async fn route(&self, state: &ConversationState) -> Routing {
        let t = router::triage_state(state);
        if let Some(routing) = router::route_explicit(state, &t) {
            return routing;
        }
        let planner = match (self.strategy, self.planner.as_ref()) {
            (RouterStrategy::Planner, Some(planner)) => planner,
            _ => return router::route_symptoms(&t),
        };

        let proposal = bounded(
            self.capabilities.settings.timeouts.llm,
            Service::External("planner"),
            planner.propose(&state.message, &state.history, &state.slots),
        )
        .await;
        match proposal.and_then(|p| router::accept_proposal(state, &t, p)) {
            Ok(routing) => routing,
            Err(e) => {
                warn!(error = %e, "planner rejected; using rule router");
                router::route_symptoms(&t)
            }
        }
    }
}

fn slot_update(state: &ConversationState) -> StateUpdate {
    let slots = extract_slots(&state.message, &state.history);
    let (model_number, model_revision) = match slots.model {
        Some(m) => (Some(m.base), m.revision),
        None => (None, None),
    };
    StateUpdate {
        model_number,
        model_revision,
        part_number: slots.part_number,
        appliance_type: slots.appliance_type,
        ..Default::default()
    }
}

fn load_scope(config: &Config) -> Result<CompiledScope> {
    let path = &config.policy.scope_contract;
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scope contract: {}", path.display()))?;
    let contract: ScopeContract = toml::from_str(&content)
        .with_context(|| format!("Failed to parse scope contract: {}", path.display()))?;
    if contract.version.trim().is_empty() {
        bail!("scope contract {} has no version", path.display());
    }
    CompiledScope::from_contract(contract)
}

fn load_policy(config: &Config) -> Result<SourcePolicy> {
    let path = &config.policy.source_policy;
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read source policy: {}", path.display()))?;
    SourcePolicy::from_toml(&content)
        .with_context(|| format!("Failed to parse source policy: {}", path.display()))
}
