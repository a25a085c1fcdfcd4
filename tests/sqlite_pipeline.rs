//! The full engine over a real SQLite database: schema, seed import, and
//! answers served from the SQLite stores.

use serde_json::json;
use tempfile::TempDir;

use partselect_agent::config::{validate, Config};
use partselect_agent::embedding::create_provider;
use partselect_agent::import::{import_seed, SeedFile};
use partselect_agent::pipeline::Engine;
use partselect_agent::{db, migrate};
use partselect_core::models::ApplianceType;
use partselect_core::state::{NextAction, ScopeLabel};

const ICE_URL: &str = "https://www.partselect.com/Repair/Refrigerator/Not-Making-Ice/";

fn test_config(tmp: &TempDir) -> Config {
    let root = env!("CARGO_MANIFEST_DIR");
    let content = format!(
        r#"
[db]
path = "{db}"

[retrieval]
top_k = 5

[embedding]
provider = "hashing"
dims = 64

[policy]
scope_contract = "{root}/config/scope_contract.toml"
source_policy = "{root}/config/source_policy.toml"

[server]
bind = "127.0.0.1:0"
"#,
        db = tmp.path().join("data").join("psa.sqlite").display(),
        root = root,
    );
    let config: Config = toml::from_str(&content).unwrap();
    validate(&config).unwrap();
    config
}

fn seed() -> SeedFile {
    serde_json::from_value(json!({
        "documents": [
            {
                "url": ICE_URL,
                "title": "Refrigerator Not Making Ice",
                "text": "If your fridge is not making ice, check the water inlet valve.\n\nMake sure the ice maker shut-off arm is down.",
                "appliance_type": "refrigerator",
                "symptom_tag": "ice_maker_issue"
            },
            {
                "url": "https://www.partselect.com/Repair/Dishwasher/Not-Draining/",
                "title": "Dishwasher Not Draining",
                "text": "If the dishwasher is not draining, clean the filter and check the drain hose.",
                "appliance_type": "dishwasher",
                "symptom_tag": "not_draining"
            }
        ],
        "parts": [
            { "partselect_number": "ps11752778", "manufacturer_part_number": "WPW10348269",
              "name": "Dishwasher Door Gasket", "price": 36.5, "stock_status": "In Stock" },
            { "partselect_number": "PS12345678", "name": "Refrigerator Ice Maker Assembly",
              "price": 119.0 }
        ],
        "models": [
            { "model_number": "wdt780saem1", "brand": "Whirlpool", "appliance_type": "dishwasher" },
            { "model_number": "WRF535SWHZ", "brand": "Whirlpool", "appliance_type": "refrigerator" }
        ],
        "fitment": [
            { "partselect_number": "PS11752778", "model_number": "WDT780SAEM1" },
            { "partselect_number": "PS12345678", "model_number": "WRF535SWHZ" }
        ],
        "part_symptoms": [
            { "partselect_number": "PS11752778", "symptom_tag": "leaking" }
        ],
        "symptom_ranks": [
            { "model_number": "WDT780SAEM1", "symptom_tag": "leaking",
              "partselect_number": "PS11752778", "rank": 1 }
        ]
    }))
    .unwrap()
}

async fn seeded_engine(tmp: &TempDir) -> (Engine, sqlx::SqlitePool) {
    let config = test_config(tmp);
    let pool = db::connect(&config).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    let provider = create_provider(&config.embedding).unwrap();
    import_seed(&pool, provider.as_ref(), &seed(), 16).await.unwrap();
    let engine = Engine::from_config(&config, pool.clone()).await.unwrap();
    (engine, pool)
}

// ─── Import ───

#[tokio::test]
async fn test_reimport_skips_unchanged_documents() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let pool = db::connect(&config).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    let provider = create_provider(&config.embedding).unwrap();

    let first = import_seed(&pool, provider.as_ref(), &seed(), 16).await.unwrap();
    assert_eq!(first.documents, 2);
    assert_eq!(first.documents_unchanged, 0);
    assert!(first.chunks >= 2);

    let second = import_seed(&pool, provider.as_ref(), &seed(), 16).await.unwrap();
    assert_eq!(second.documents_unchanged, 2);
    assert_eq!(second.chunks, 0);
}

// ─── Answers from SQLite ───

#[tokio::test]
async fn test_compatibility_from_fitment_table() {
    let tmp = TempDir::new().unwrap();
    let (engine, _pool) = seeded_engine(&tmp).await;

    let yes = engine
        .respond("Is PS11752778 compatible with WDT780SAEM1?", Vec::new())
        .await;
    assert!(yes.content.starts_with("Yes."));

    let no = engine
        .respond("Is PS12345678 compatible with WDT780SAEM1?", Vec::new())
        .await;
    assert!(no.content.starts_with("No."));
}

#[tokio::test]
async fn test_part_lookup_by_partselect_number() {
    let tmp = TempDir::new().unwrap();
    let (engine, _pool) = seeded_engine(&tmp).await;

    let state = engine.run("Tell me about PS11752778", Vec::new()).await;
    assert_eq!(state.next_action, Some(NextAction::PartLookupAnswer));
    assert_eq!(state.product_cards.len(), 1);
    assert_eq!(state.product_cards[0].name, "Dishwasher Door Gasket");
    assert!(state.answer.unwrap().contains("Dishwasher Door Gasket"));
}

#[tokio::test]
async fn test_parts_list_from_fitment_table() {
    let tmp = TempDir::new().unwrap();
    let (engine, _pool) = seeded_engine(&tmp).await;

    let state = engine.run("Parts for WRF535SWHZ", Vec::new()).await;
    assert_eq!(state.next_action, Some(NextAction::PartsListAnswer));
    assert_eq!(state.product_cards.len(), 1);
    assert_eq!(state.product_cards[0].name, "Refrigerator Ice Maker Assembly");
}

#[tokio::test]
async fn test_troubleshooting_cites_imported_guides() {
    let tmp = TempDir::new().unwrap();
    let (engine, _pool) = seeded_engine(&tmp).await;

    let state = engine.run("My fridge is not making ice", Vec::new()).await;
    assert_eq!(state.scope_label, Some(ScopeLabel::InScope));
    assert_eq!(state.next_action, Some(NextAction::Retrieve));
    assert!(!state.evidence.is_empty());
    for chunk in &state.evidence {
        assert_eq!(chunk.metadata.appliance_type, Some(ApplianceType::Refrigerator));
    }
    assert!(!state.citations.is_empty());
    assert!(state.citations.iter().all(|c| c.url == ICE_URL));
}

#[tokio::test]
async fn test_manufacturer_number_through_cached_catalog() {
    let tmp = TempDir::new().unwrap();
    let (engine, _pool) = seeded_engine(&tmp).await;

    for _ in 0..2 {
        let response = engine
            .respond("Is part number WPW10348269 compatible with WDT780SAEM1?", Vec::new())
            .await;
        assert!(response.content.starts_with("Yes."));
    }

    let state = engine
        .run("Tell me about part number WPW10348269", Vec::new())
        .await;
    assert_eq!(state.next_action, Some(NextAction::PartLookupAnswer));
    assert_eq!(state.product_cards[0].part_number, "PS11752778");
}
