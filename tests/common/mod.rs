//! Shared fixtures: the shipped scope contract and source policy, a small
//! guide corpus embedded with the hashing embedder, and a parts catalog.

#![allow(dead_code)]

use std::sync::Arc;

use partselect_agent::pipeline::Engine;
use partselect_core::embedding::HashingEmbedder;
use partselect_core::models::{ApplianceType, ChunkMetadata, EvidenceChunk, PartRecord};
use partselect_core::policy::SourcePolicy;
use partselect_core::scope::{CompiledScope, ScopeContract};
use partselect_core::store::memory::{InMemoryCatalog, InMemoryDocumentStore};

pub const DIMS: usize = 64;

pub const ICE_URL: &str = "https://www.partselect.com/Repair/Refrigerator/Not-Making-Ice/";
pub const WARM_URL: &str = "https://www.partselect.com/Repair/Refrigerator/Not-Cooling/";
pub const DW_DRAIN_URL: &str = "https://www.partselect.com/Repair/Dishwasher/Not-Draining/";
pub const DW_ICE_URL: &str = "https://www.partselect.com/Repair/Dishwasher/Ice-Buildup/";

pub fn scope() -> CompiledScope {
    let content = std::fs::read_to_string(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/config/scope_contract.toml"
    ))
    .unwrap();
    let contract: ScopeContract = toml::from_str(&content).unwrap();
    CompiledScope::from_contract(contract).unwrap()
}

pub fn policy() -> SourcePolicy {
    let content = std::fs::read_to_string(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/config/source_policy.toml"
    ))
    .unwrap();
    SourcePolicy::from_toml(&content).unwrap()
}

pub fn chunk(id: &str, url: &str, appliance: ApplianceType, tag: &str, text: &str) -> EvidenceChunk {
    EvidenceChunk {
        chunk_id: id.to_string(),
        doc_id: format!("doc-{}", id),
        text: text.to_string(),
        metadata: ChunkMetadata {
            appliance_type: Some(appliance),
            symptom_tag: Some(tag.to_string()),
            source_url: url.to_string(),
            title: None,
            ..Default::default()
        },
        score: 0.0,
    }
}

pub fn documents() -> InMemoryDocumentStore {
    let embedder = HashingEmbedder::new(DIMS);
    let store = InMemoryDocumentStore::new();
    let chunks = [
        chunk(
            "ice-1",
            ICE_URL,
            ApplianceType::Refrigerator,
            "ice_maker_issue",
            "If your fridge is not making ice, check the water inlet valve. The ice maker needs water pressure of at least 20 psi.",
        ),
        chunk(
            "ice-2",
            ICE_URL,
            ApplianceType::Refrigerator,
            "ice_maker_issue",
            "Make sure the ice maker shut-off arm is down. A raised arm stops ice production.",
        ),
        chunk(
            "warm-1",
            WARM_URL,
            ApplianceType::Refrigerator,
            "not_cooling",
            "If the fridge is not cooling, clean the condenser coils. Check that the evaporator fan runs.",
        ),
        chunk(
            "dw-1",
            DW_DRAIN_URL,
            ApplianceType::Dishwasher,
            "not_draining",
            "If the dishwasher is not draining, clean the filter. Check the drain hose for kinks.",
        ),
        chunk(
            "dw-ice",
            DW_ICE_URL,
            ApplianceType::Dishwasher,
            "ice_maker_issue",
            "My fridge is not making ice making ice ice maker ice.",
        ),
    ];
    for c in chunks {
        let vector = embedder.embed_one(&c.text);
        store.insert(c, vector).unwrap();
    }
    store
}

pub fn part(ps: &str, name: &str) -> PartRecord {
    PartRecord {
        partselect_number: ps.to_string(),
        manufacturer_part_number: None,
        name: name.to_string(),
        brand: Some("Whirlpool".to_string()),
        price: Some(44.95),
        stock_status: Some("In Stock".to_string()),
        url: Some(format!("https://www.partselect.com/{}.htm", ps)),
        image_url: None,
        appliance_type: None,
    }
}

pub fn catalog() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    catalog.add_part(part("PS11752778", "Dishwasher Door Gasket"));
    catalog.add_part(part("PS12345678", "Refrigerator Ice Maker Assembly"));
    catalog.add_part(part("PS11739035", "Refrigerator Door Shelf Bin"));
    catalog.add_fitment("PS11752778", "WDT780SAEM1");
    catalog.add_fitment("PS12345678", "WRF535SWHZ");
    catalog.add_fitment("PS11739035", "WRF535SWHZ");
    catalog.add_part(PartRecord {
        manufacturer_part_number: Some("WPW10321304".to_string()),
        ..part("PS11739999", "Dishwasher Upper Rack Adjuster")
    });
    catalog.add_fitment("PS11739999", "WDT780SAEM1");
    catalog
}

pub fn engine() -> Engine {
    Engine::new(
        scope(),
        policy(),
        Arc::new(documents()),
        Arc::new(catalog()),
        Arc::new(HashingEmbedder::new(DIMS)),
    )
}
