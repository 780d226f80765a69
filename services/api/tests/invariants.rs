//! Properties that hold across the whole pipeline.

mod common;

use api_lib::adapters::MemoryStore;
use api_lib::queue::JobClient;
use api_lib::service::{EventService, SessionService, UrlRegistry};
use axum::http::Method;
use common::{Scripted, TestApp, TestWorker, CORE_ONLY_GRAPH};
use mindhit_core::ai::ProviderType;
use mindhit_core::domain::BatchEvent;
use mindhit_core::ports::{AiProvider, MindmapRepository};
use mindhit_core::{MindmapStatus, SessionStatus};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn event_strategy() -> impl Strategy<Value = BatchEvent> {
    (
        prop::sample::select(vec!["page_visit", "highlight", "scroll", "click", "tab_switch"]),
        0i64..4_000_000_000_000,
        "[a-z]{1,8}",
    )
        .prop_map(|(kind, timestamp, word)| {
            serde_json::from_value(json!({
                "type": kind,
                "timestamp": timestamp,
                "url": format!("https://{word}.example/{word}"),
                "payload": {"text": word},
            }))
            .unwrap()
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn raw_events_mirror_the_batch_in_order(events in prop::collection::vec(event_strategy(), 1..20)) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let (stored, summary) = rt.block_on(async {
            let store = Arc::new(MemoryStore::new());
            let user = store.seed_user();
            let sessions = SessionService::new(store.clone());
            let service = EventService::new(
                store.clone(),
                store.clone(),
                sessions.clone(),
                UrlRegistry::new(store.clone()),
            );
            let session = sessions.start(user).await.unwrap();
            let summary = service.ingest_batch(user, session.id, &events).await.unwrap();
            (store.raw_events(session.id), summary)
        });

        prop_assert_eq!(summary.processed, events.len());
        prop_assert_eq!(stored.len(), events.len());
        for (raw, event) in stored.iter().zip(&events) {
            prop_assert_eq!(&raw.event_type, &event.event_type);
            prop_assert_eq!(raw.timestamp.timestamp_millis(), event.timestamp);
        }
    }
}

#[tokio::test]
async fn only_completed_sessions_hold_a_completed_mindmap() {
    let app = TestApp::new();
    let (_, token) = app.user();
    let id = app.start_session(&token).await;
    app.send(Method::POST, &format!("/v1/sessions/{id}/stop"), Some(&token), None)
        .await;

    let claude = Scripted::ok(ProviderType::Claude, CORE_ONLY_GRAPH);
    let worker = TestWorker::new(app.store.clone(), vec![claude.clone() as Arc<dyn AiProvider>]).await;
    worker.server.drain_due().await;
    assert_eq!(app.store.session_row(id).unwrap().session_status, SessionStatus::Completed);
    assert_eq!(
        app.store.find_mindmap(id).await.unwrap().unwrap().status,
        MindmapStatus::Completed
    );

    // Without force the completed graph is returned untouched.
    let (_, body) = app
        .send(Method::POST, &format!("/v1/sessions/{id}/mindmap/generate"), Some(&token), None)
        .await;
    assert_eq!(body["mindmap"]["status"], "completed");
    assert_eq!(app.store.jobs_of_type("mindmap:generate").len(), 1);

    let (_, body) = app
        .send(
            Method::POST,
            &format!("/v1/sessions/{id}/mindmap/generate"),
            Some(&token),
            Some(json!({"force": true})),
        )
        .await;
    assert_eq!(body["mindmap"]["status"], "pending");
    assert_eq!(body["mindmap"]["nodes"], json!([]));
    assert!(body["mindmap"]["layout"].is_null());
    assert_eq!(app.store.session_row(id).unwrap().session_status, SessionStatus::Processing);
    let pending = app.store.find_mindmap(id).await.unwrap().unwrap();
    assert_ne!(pending.status, MindmapStatus::Completed);
    assert!(pending.nodes.is_empty());
    assert!(pending.edges.is_empty());
    assert!(pending.layout.is_none());

    worker.server.drain_due().await;
    let mindmap = app.store.find_mindmap(id).await.unwrap().unwrap();
    assert_eq!(mindmap.status, MindmapStatus::Completed);
    assert_eq!(mindmap.version, 2);
    assert_eq!(app.store.session_row(id).unwrap().session_status, SessionStatus::Completed);
}

#[tokio::test]
async fn every_logged_call_accounts_for_its_tokens() {
    let app = TestApp::new();
    let (_, token) = app.user();
    let id = app.start_session(&token).await;
    app.send(
        Method::POST,
        &format!("/v1/sessions/{id}/events/batch"),
        Some(&token),
        Some(json!({"events": [
            {"type": "page_visit", "timestamp": 1000, "url": "https://tokio.rs", "content": "An async runtime."}
        ]})),
    )
    .await;
    app.send(Method::POST, &format!("/v1/sessions/{id}/stop"), Some(&token), None)
        .await;

    let gemini = Scripted::ok(ProviderType::Gemini, r#"{"keywords":["async"],"summary":"Tokio"}"#);
    let claude = Scripted::ok(ProviderType::Claude, CORE_ONLY_GRAPH);
    let worker = TestWorker::new(
        app.store.clone(),
        vec![gemini as Arc<dyn AiProvider>, claude as Arc<dyn AiProvider>],
    )
    .await;
    assert_eq!(worker.server.drain_due().await, 2);

    let logs = app.store.ai_logs();
    assert_eq!(logs.len(), 2);
    for log in logs {
        assert!(log.entry.total_tokens >= log.entry.input_tokens + log.entry.output_tokens);
        assert!(log.entry.latency_ms >= 0);
    }
}

#[tokio::test]
async fn tag_extraction_runs_once_per_url() {
    let app = TestApp::new();
    let (_, token) = app.user();
    let id = app.start_session(&token).await;
    app.send(
        Method::POST,
        &format!("/v1/sessions/{id}/events/batch"),
        Some(&token),
        Some(json!({"events": [
            {"type": "page_visit", "timestamp": 1000, "url": "https://serde.rs", "title": "Serde", "content": "Serialization framework."}
        ]})),
    )
    .await;

    let gemini = Scripted::ok(
        ProviderType::Gemini,
        r#"{"keywords":["serde","serialization"],"summary":"A serialization framework."}"#,
    );
    let worker = TestWorker::new(app.store.clone(), vec![gemini.clone() as Arc<dyn AiProvider>]).await;
    assert_eq!(worker.server.drain_due().await, 1);
    let first = app.store.urls().pop().unwrap();
    assert_eq!(first.keywords, vec!["serde", "serialization"]);
    assert_eq!(first.summary.as_deref(), Some("A serialization framework."));

    gemini.set_reply(Ok(r#"{"keywords":["other"],"summary":"Different."}"#.to_string()));
    let client = JobClient::new(app.store.clone());
    client.enqueue_tag_extraction(first.id).await.unwrap();
    assert_eq!(worker.server.drain_due().await, 1);

    let second = app.store.urls().pop().unwrap();
    assert_eq!(second.keywords, first.keywords);
    assert_eq!(second.summary, first.summary);
    assert_eq!(gemini.calls(), 1);
}
