//! Action handlers, one per [`NextAction`].
//!
//! [`dispatch`] is an exhaustive `match`: adding an action without a handler
//! does not compile. Every handler reads the routed [`ConversationState`]
//! and returns a [`StateUpdate`] carrying `answer`, `citations` and
//! `product_cards`; the pipeline merges it.
//!
//! | Action | Reads | Cards | Citations |
//! |--------|-------|-------|-----------|
//! | ask_clarify | routed question | no | no |
//! | parts_list_answer | model, symptom | ≤ 5 | no |
//! | part_lookup_answer | part, model | ≤ 1 (catalog hit) | no |
//! | compatibility_answer | part, model | no | no |
//! | find_model_help | appliance | no | locator pages |
//! | retrieve | message, diagnosis | never | evidence only |
//!
//! Store failures and timeouts degrade the answer text; they never fail the
//! request.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use partselect_core::compose::{self, ClaimWriter, QueryContext};
use partselect_core::embedding::{embed_query, EmbeddingProvider};
use partselect_core::models::{ApplianceType, Citation, DiscoveredPage, PartRecord, ProductCard};
use partselect_core::policy::SourcePolicy;
use partselect_core::retrieve::{self, RetrievalRequest, RetrievalSettings};
use partselect_core::router::{CLARIFY_COMPATIBILITY, CLARIFY_NEED_MODEL};
use partselect_core::slots::{extract_part_number, model_page_url, part_image_url, search_url};
use partselect_core::state::{ConversationState, Intent, NextAction, Stage, StateUpdate};
use partselect_core::store::{CatalogStore, DocumentStore, PageDiscovery};
use partselect_core::EngineError;

use crate::config::Timeouts;

pub const DEFAULT_CLARIFY: &str =
    "Before we narrow this down, can you tell me which section is affected?";

pub const FIND_MODEL_TEXT: &str = "Your model number is usually on a label or sticker, often \
inside the door, along the side wall, or near the crisper drawers. On dishwashers, check the \
edge of the door or the tub frame. PartSelect has step-by-step guides with photos to help you \
locate it.";

pub const FRIDGE_LOCATOR_URL: &str = "https://www.partselect.com/Find-Your-Refrigerator-Model-Number/";
pub const DISHWASHER_LOCATOR_URL: &str = "https://www.partselect.com/Find-Your-Dishwasher-Model-Number/";

const NO_MODEL_FOR_PARTS: &str =
    "Please share your appliance model number so I can look up parts for it.";

const NO_PART_FOR_LOOKUP: &str = "Please share the part number (PartSelect or manufacturer \
number) so I can look up details and installation info.";

/// Discovery results for these appliances are dropped.
const FOREIGN_APPLIANCES: &[&str] = &["microwave", "oven", "stove", "washer", "dryer", "lawn", "garden"];

// ============ Capabilities ============

/// Limits applied by every handler.
#[derive(Debug, Clone, Copy)]
pub struct HandlerSettings {
    pub retrieval: RetrievalSettings,
    pub query_chars: usize,
    pub max_claims: usize,
    pub max_parts: usize,
    pub discovery_results: usize,
    pub timeouts: Timeouts,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            retrieval: RetrievalSettings::default(),
            query_chars: 100,
            max_claims: 3,
            max_parts: 5,
            discovery_results: 5,
            timeouts: Timeouts::default(),
        }
    }
}

/// Everything a handler may call. Shared, read-only, cheap to clone.
#[derive(Clone)]
pub struct Capabilities {
    pub documents: Arc<dyn DocumentStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub policy: Arc<SourcePolicy>,
    pub discovery: Option<Arc<dyn PageDiscovery>>,
    pub claim_writer: Option<Arc<dyn ClaimWriter>>,
    pub settings: HandlerSettings,
}

/// Which failure an expired or failed call turns into.
#[derive(Debug, Clone, Copy)]
pub enum Service {
    Store,
    External(&'static str),
}

impl Service {
    fn error(self, reason: String) -> EngineError {
        match self {
            Service::Store => EngineError::StoreUnavailable(reason),
            Service::External(name) => EngineError::unavailable(name, reason),
        }
    }
}

/// Run `fut` with a time limit, mapping failures onto the engine taxonomy.
/// Errors that already are [`EngineError`]s keep their kind.
pub async fn bounded<T, F>(limit: Duration, service: Service, fut: F) -> std::result::Result<T, EngineError>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(match e.downcast::<EngineError>() {
            Ok(engine) => engine,
            Err(other) => service.error(other.to_string()),
        }),
        Err(_) => Err(service.error(format!("timed out after {}ms", limit.as_millis()))),
    }
}

// ============ Dispatch ============

/// Run the handler for `action`.
pub async fn dispatch(caps: &Capabilities, state: &ConversationState, action: NextAction) -> StateUpdate {
    let mut update = match action {
        NextAction::AskClarify => ask_clarify(state),
        NextAction::FindModelHelp => find_model_help(state),
        NextAction::CompatibilityAnswer => compatibility_answer(caps, state).await,
        NextAction::PartsListAnswer => parts_list_answer(caps, state).await,
        NextAction::PartLookupAnswer => part_lookup_answer(caps, state).await,
        NextAction::Retrieve => retrieve_answer(caps, state).await,
    };
    update.stage = Some(Stage::Handled);
    update
}

pub fn ask_clarify(state: &ConversationState) -> StateUpdate {
    let question = state
        .action_args
        .question
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .unwrap_or(DEFAULT_CLARIFY);
    StateUpdate::answer_only(question)
}

pub fn find_model_help(state: &ConversationState) -> StateUpdate {
    let fridge = Citation::new(FRIDGE_LOCATOR_URL, "Find your refrigerator model number");
    let dishwasher = Citation::new(DISHWASHER_LOCATOR_URL, "Find your dishwasher model number");
    let citations = match state.slots.appliance_type {
        Some(ApplianceType::Refrigerator) => vec![fridge],
        Some(ApplianceType::Dishwasher) => vec![dishwasher],
        None => vec![fridge, dishwasher],
    };
    StateUpdate {
        citations: Some(citations),
        ..StateUpdate::answer_only(FIND_MODEL_TEXT)
    }
}

// ============ Catalog handlers ============

pub async fn compatibility_answer(caps: &Capabilities, state: &ConversationState) -> StateUpdate {
    let (Some(part), Some(model)) = (
        state.slots.part_number.as_deref(),
        state.slots.model_number.as_deref(),
    ) else {
        return StateUpdate::answer_only(CLARIFY_COMPATIBILITY);
    };
    let model_url = model_page_url(model, state.slots.model_revision.as_deref());
    let model_link = format!("[View model {} on PartSelect]({})", model, model_url);

    let limit = caps.settings.timeouts.store;
    // Fitment is keyed by PartSelect number; manufacturer numbers resolve through the catalog.
    let partselect_number = match bounded(limit, Service::Store, caps.catalog.find_part(part)).await {
        Ok(Some(found)) => found.partselect_number,
        Ok(None) => part.to_string(),
        Err(e) => {
            debug!(error = %e, part, "part resolution failed, checking fitment with raw number");
            part.to_string()
        }
    };
    let fitment = caps.catalog.has_fitment(&partselect_number, model);
    let content = match bounded(limit, Service::Store, fitment).await {
        Ok(true) => format!("Yes. {} fits your model {}. {}", part, model, model_link),
        Ok(false) => format!(
            "No. We don't have a fitment record for part {} and model {}, so I can't confirm it \
fits. Check the parts list for your model on PartSelect: {}",
            part, model, model_link
        ),
        Err(e) => {
            warn!(error = %e, part, model, "fitment check failed");
            format!(
                "No. I couldn't verify that {} fits {} right now, so I can't confirm it. Please \
check on PartSelect: {}",
                part, model, model_link
            )
        }
    };
    StateUpdate::answer_only(content)
}

pub async fn parts_list_answer(caps: &Capabilities, state: &ConversationState) -> StateUpdate {
    let Some(model) = state.slots.model_number.as_deref() else {
        return StateUpdate::answer_only(NO_MODEL_FOR_PARTS);
    };
    let max = caps.settings.max_parts;
    let limit = caps.settings.timeouts.store;
    let model_url = model_page_url(model, state.slots.model_revision.as_deref());

    let symptom = state.diagnosis.symptom;
    let mut lookup = Ok(Vec::new());
    if symptom.is_specific() {
        lookup = bounded(limit, Service::Store, caps.catalog.parts_for_symptom(model, symptom.tag(), max)).await;
    }
    if matches!(&lookup, Ok(parts) if parts.is_empty()) {
        lookup = bounded(limit, Service::Store, caps.catalog.parts_for_model(model, max)).await;
    }

    let parts = match lookup {
        Ok(parts) => parts,
        Err(e) => {
            warn!(error = %e, model, "parts lookup failed");
            let content = format!(
                "I couldn't look up parts for **{}** right now. Here is the PartSelect page: \
[View parts for {}]({})",
                model, model, model_url
            );
            return StateUpdate {
                product_cards: Some(vec![overview_card(model, &model_url)]),
                ..StateUpdate::answer_only(content)
            };
        }
    };

    if !parts.is_empty() {
        let lines: Vec<String> = parts
            .iter()
            .take(max)
            .map(|p| format!("- [{}]({}) ({})", p.name, part_url(p), p.partselect_number))
            .collect();
        let content = format!("Parts for **{}**:\n{}", model, lines.join("\n"));
        let cards = parts.iter().take(max).map(part_card).collect();
        return StateUpdate {
            product_cards: Some(cards),
            ..StateUpdate::answer_only(content)
        };
    }

    let query = format!("site:partselect.com {} parts", model);
    let pages = discover(caps, &query).await;
    if !pages.is_empty() {
        let lines: Vec<String> = pages
            .iter()
            .map(|p| format!("- [{}]({})", p.title, p.url))
            .collect();
        let content = format!(
            "I don't have a parts list for **{}** in our catalog yet. Here is what I found on \
PartSelect:\n{}",
            model,
            lines.join("\n")
        );
        let cards = pages.iter().map(|p| page_card(p, model)).collect();
        return StateUpdate {
            product_cards: Some(cards),
            ..StateUpdate::answer_only(content)
        };
    }

    let content = format!(
        "Here is the PartSelect page for **{}**: [View parts for {}]({}). You can browse and \
order there.",
        model, model, model_url
    );
    StateUpdate {
        product_cards: Some(vec![overview_card(model, &model_url)]),
        ..StateUpdate::answer_only(content)
    }
}

pub async fn part_lookup_answer(caps: &Capabilities, state: &ConversationState) -> StateUpdate {
    let Some(number) = state.slots.part_number.as_deref() else {
        return StateUpdate::answer_only(NO_PART_FOR_LOOKUP);
    };
    let limit = caps.settings.timeouts.store;
    let search = search_url(number);

    let part = match bounded(limit, Service::Store, caps.catalog.find_part(number)).await {
        Ok(Some(part)) => part,
        Ok(None) => return part_not_found(caps, number, &search).await,
        Err(e) => {
            warn!(error = %e, part = number, "part lookup failed");
            let content = format!(
                "I couldn't look up that part right now. Please try again in a moment or search \
on PartSelect: [Search for {}]({})",
                number, search
            );
            return StateUpdate::answer_only(content);
        }
    };

    let mut lines = vec![format!("**{}**", part.name)];
    match part.manufacturer_part_number.as_deref() {
        Some(mfr) => lines.push(format!(
            "PartSelect: {} | Manufacturer: {}",
            part.partselect_number, mfr
        )),
        None => lines.push(format!("PartSelect: {}", part.partselect_number)),
    }
    if let Some(price) = part.formatted_price() {
        lines.push(format!("Price: {}", price));
    }
    if let Some(stock) = part.stock_status.as_deref() {
        lines.push(format!("Availability: {}", stock));
    }

    if let Some(model) = state.slots.model_number.as_deref() {
        match bounded(limit, Service::Store, caps.catalog.has_fitment(&part.partselect_number, model)).await {
            Ok(true) => lines.push(format!("This part fits your model {}.", model)),
            Ok(false) => lines.push(format!(
                "I don't have a fitment record for model {}, so double-check before ordering.",
                model
            )),
            Err(e) => debug!(error = %e, "fitment note skipped"),
        }
    } else if state.slots.intent == Intent::PartInstall {
        lines.push(CLARIFY_NEED_MODEL.to_string());
    }

    if state.slots.intent == Intent::PartInstall {
        lines.push("Installation instructions and videos are on the part page.".to_string());
    }
    lines.push(format!("Details: [View on PartSelect]({})", part_url(&part)));

    StateUpdate {
        product_cards: Some(vec![part_card(&part)]),
        ..StateUpdate::answer_only(lines.join("\n"))
    }
}

async fn part_not_found(caps: &Capabilities, number: &str, search: &str) -> StateUpdate {
    let pages = discover(caps, &format!("site:partselect.com {}", number)).await;
    if pages.is_empty() {
        let content = format!(
            "I couldn't find an exact match for **{}** in our catalog. You can search on \
PartSelect: [Search for {}]({})",
            number, number, search
        );
        return StateUpdate::answer_only(content);
    }
    let lines: Vec<String> = pages
        .iter()
        .map(|p| format!("- [{}]({})", p.title, p.url))
        .collect();
    let content = format!(
        "I couldn't find an exact match for **{}** in our catalog. Here are the closest results on \
PartSelect:\n{}",
        number,
        lines.join("\n")
    );
    let cards = pages.iter().map(|p| page_card(p, number)).collect();
    StateUpdate {
        product_cards: Some(cards),
        ..StateUpdate::answer_only(content)
    }
}

/// Best-effort discovery; failures and a missing backend yield nothing.
async fn discover(caps: &Capabilities, query: &str) -> Vec<DiscoveredPage> {
    let Some(discovery) = caps.discovery.as_ref() else {
        return Vec::new();
    };
    let limit = caps.settings.discovery_results;
    match bounded(
        caps.settings.timeouts.discovery,
        Service::External("page discovery"),
        discovery.find_pages(query, limit),
    )
    .await
    {
        Ok(pages) => pages.into_iter().filter(|p| !is_foreign_appliance(p)).collect(),
        Err(e) => {
            warn!(error = %e, "page discovery failed");
            Vec::new()
        }
    }
}

fn is_foreign_appliance(page: &DiscoveredPage) -> bool {
    let text = format!(
        "{} {}",
        page.title.to_lowercase(),
        page.snippet.as_deref().unwrap_or("").to_lowercase()
    );
    text.contains("washing machine")
        || text
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| FOREIGN_APPLIANCES.contains(&word))
}

fn part_url(part: &PartRecord) -> String {
    part.url
        .clone()
        .unwrap_or_else(|| search_url(&part.partselect_number))
}

fn part_card(part: &PartRecord) -> ProductCard {
    ProductCard {
        part_number: part.partselect_number.clone(),
        name: part.name.clone(),
        price: part.formatted_price(),
        url: part_url(part),
        image_url: Some(
            part.image_url
                .clone()
                .unwrap_or_else(|| part_image_url(&part.partselect_number)),
        ),
        brand: part.brand.clone(),
    }
}

fn page_card(page: &DiscoveredPage, fallback_number: &str) -> ProductCard {
    let part_number = extract_part_number(&page.title)
        .or_else(|| extract_part_number(&page.url))
        .unwrap_or_else(|| fallback_number.to_ascii_uppercase());
    ProductCard {
        part_number,
        name: page.title.clone(),
        price: None,
        url: page.url.clone(),
        image_url: page.thumbnail.clone(),
        brand: None,
    }
}

fn overview_card(model: &str, url: &str) -> ProductCard {
    ProductCard {
        part_number: model.to_string(),
        name: format!("{} - Overview", model),
        price: None,
        url: url.to_string(),
        image_url: None,
        brand: None,
    }
}

// ============ Retrieve ============

/// Query text: the leading `max_chars` characters of the message. Short
/// follow-up replies are prefixed with the previous user turn.
pub fn query_text(state: &ConversationState, max_chars: usize) -> String {
    let message = state.message.trim();
    let text = match state.prior_user_turns().next() {
        Some(prev) if message.split_whitespace().count() < 4 => format!("{} {}", prev.trim(), message),
        _ => message.to_string(),
    };
    text.chars().take(max_chars).collect()
}

pub async fn retrieve_answer(caps: &Capabilities, state: &ConversationState) -> StateUpdate {
    let settings = caps.settings;
    let query = query_text(state, settings.query_chars);
    let appliance = state
        .diagnosis
        .state
        .map(|s| s.appliance())
        .or(state.slots.appliance_type);

    let evidence = match bounded(
        settings.timeouts.embedding,
        Service::External("embedding"),
        embed_query(caps.embedder.as_ref(), &query),
    )
    .await
    {
        Ok(query_vec) => {
            let request = RetrievalRequest {
                query_vec: &query_vec,
                state: state.diagnosis.state,
                appliance,
                guides_only: state.slots.model_number.is_none(),
            };
            match bounded(
                settings.timeouts.store,
                Service::Store,
                retrieve::retrieve(caps.documents.as_ref(), &caps.policy, &request, settings.retrieval),
            )
            .await
            {
                Ok(found) => {
                    debug!(chunks = found.chunks.len(), hops = ?found.hops, "evidence retrieved");
                    found.chunks
                }
                Err(e) => {
                    warn!(error = %e, "retrieval failed");
                    Vec::new()
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "query embedding failed");
            Vec::new()
        }
    };

    let ctx = QueryContext {
        message: &state.message,
        appliance: appliance.map(|a| a.as_str()),
        scenario_hint: state.diagnosis.state.map(|s| s.as_str()),
    };
    let mut draft = None;
    if let (Some(writer), false) = (caps.claim_writer.as_ref(), evidence.is_empty()) {
        match bounded(
            settings.timeouts.llm,
            Service::External("claim writer"),
            writer.write_claims(&evidence, &ctx),
        )
        .await
        {
            Ok(d) if !compose::validate_claims(d.clone(), &evidence).is_empty() => draft = Some(d),
            Ok(_) => warn!("claim writer produced no grounded claims; using extractive answer"),
            Err(e) => warn!(error = %e, "claim writer failed; using extractive answer"),
        }
    }
    let draft = draft.unwrap_or_else(|| compose::extractive_claims(&evidence, settings.max_claims));
    let composed = compose::compose(&evidence, draft);
    if let Some(reason) = &composed.degraded {
        debug!(reason = %reason, "composer degraded");
    }

    StateUpdate {
        stage: Some(Stage::Composed),
        evidence: Some(evidence),
        answer: Some(composed.content),
        citations: Some(composed.citations),
        product_cards: Some(Vec::new()),
        ..Default::default()
    }
}
