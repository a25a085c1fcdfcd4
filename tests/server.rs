//! HTTP surface tests: the chat router is served on an ephemeral port over
//! in-memory stores and exercised with reqwest.

mod common;

use serde_json::Value;

use partselect_agent::server::router;

async fn spawn_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = router(common::engine());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("Server did not become ready within 5 seconds");
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_reports_version() {
    let base = spawn_server().await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_empty_message_is_bad_request() {
    let base = spawn_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&serde_json::json!({ "message": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let base = spawn_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn test_chat_returns_compatibility_answer() {
    let base = spawn_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&serde_json::json!({
            "message": "Is PS11752778 compatible with WDT780SAEM1?",
            "session_id": "abc"
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert!(body["content"].as_str().unwrap().starts_with("Yes"));
    assert_eq!(body["scope_label"], "IN_SCOPE");
}

#[tokio::test]
async fn test_chat_with_history() {
    let base = spawn_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&serde_json::json!({
            "message": "Is it compatible with my WDT780SAEM1?",
            "history": [
                { "role": "user", "content": "Tell me about PS11752778" },
                { "role": "assistant", "content": "**Dishwasher Door Gasket**\nPartSelect: PS11752778" }
            ]
        }))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert!(body["content"].as_str().unwrap().starts_with("Yes."));
}

#[tokio::test]
async fn test_stream_emits_events_in_order() {
    let base = spawn_server().await;
    let text = reqwest::Client::new()
        .post(format!("{}/chat/stream", base))
        .json(&serde_json::json!({ "message": "Parts for WRF535SWHZ" }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let scope = text.find("event: scope").unwrap();
    let message = text.find("event: message").unwrap();
    let sources = text.find("event: sources").unwrap();
    let cards = text.find("event: product_cards").unwrap();
    let done = text.find("event: done").unwrap();
    assert!(scope < message && message < sources && sources < cards && cards < done);
    assert!(text.contains("data: [DONE]"));
}

#[tokio::test]
async fn test_stream_redirect_has_no_sources() {
    let base = spawn_server().await;
    let text = reqwest::Client::new()
        .post(format!("{}/chat/stream", base))
        .json(&serde_json::json!({ "message": "Write me a poem" }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(text.contains("data: OUT_OF_SCOPE"));
    assert!(!text.contains("event: sources"));
    assert!(!text.contains("event: product_cards"));
    assert!(text.contains("event: done"));
}
