//! End-to-end flows through the router, the services and the job worker.

mod common;

use api_lib::queue::JobClient;
use api_lib::service::UrlRegistry;
use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{Scripted, TestApp, TestWorker, CORE_ONLY_GRAPH};
use mindhit_core::ai::{AiError, AiLogStatus, ChatRequest, ProviderType, TaskType};
use mindhit_core::domain::DEFAULT_HIGHLIGHT_COLOR;
use mindhit_core::mindmap::{build_galaxy, CoreTheme, NodeType, RelationshipGraphResponse, Topic};
use mindhit_core::ports::{AiProvider, MindmapRepository, SessionRepository};
use mindhit_core::{MindmapStatus, SessionStatus};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn session_happy_path_ends_with_a_core_only_mindmap() {
    let app = TestApp::new();
    let (_, token) = app.user();
    let id = app.start_session(&token).await;

    let (status, body) = app
        .send(Method::PATCH, &format!("/v1/sessions/{id}/pause"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["session_status"], "paused");

    let (status, body) = app
        .send(Method::PATCH, &format!("/v1/sessions/{id}/resume"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["session_status"], "recording");

    let (status, body) = app
        .send(Method::POST, &format!("/v1/sessions/{id}/stop"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["session_status"], "processing");
    assert!(body["session"]["ended_at"].is_string());

    let claude = Scripted::ok(ProviderType::Claude, CORE_ONLY_GRAPH);
    let worker = TestWorker::new(app.store.clone(), vec![claude.clone() as Arc<dyn AiProvider>]).await;
    assert_eq!(worker.server.drain_due().await, 1);

    let session = app.store.session_row(id).unwrap();
    assert_eq!(session.session_status, SessionStatus::Completed);
    let mindmap = app.store.find_mindmap(id).await.unwrap().unwrap();
    assert_eq!(mindmap.status, MindmapStatus::Completed);
    assert_eq!(mindmap.nodes.len(), 1);
    assert_eq!(mindmap.nodes[0].node_type, NodeType::Core);
    assert_eq!(mindmap.nodes[0].label, "X");
    assert_eq!(mindmap.version, 1);
    assert_eq!(claude.calls(), 1);

    let usage = app.store.token_usage();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].tokens_used, 150);

    let (status, body) = app
        .send(Method::GET, &format!("/v1/sessions/{id}/mindmap"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mindmap"]["status"], "completed");
    assert_eq!(body["mindmap"]["nodes"][0]["id"], "core");
}

#[tokio::test]
async fn batch_ingestion_projects_visits_highlights_and_urls() {
    let app = TestApp::new();
    let (_, token) = app.user();
    let id = app.start_session(&token).await;

    let batch = json!({
        "events": [
            {"type": "page_visit", "timestamp": 1000, "url": "https://Example.com/foo/#frag", "title": "Foo"},
            {"type": "page_visit", "timestamp": 2000, "url": "https://example.com/foo"},
            {"type": "highlight", "timestamp": 3000, "payload": {"text": "hi"}}
        ]
    });
    let (status, body) = app
        .send(
            Method::POST,
            &format!("/v1/sessions/{id}/events/batch"),
            Some(&token),
            Some(batch),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"processed": 3, "total": 3}));

    let urls = app.store.urls();
    assert_eq!(urls.len(), 1);
    assert_eq!(urls[0].url, "https://example.com/foo");
    assert_eq!(app.store.page_visits(id).len(), 2);
    let highlights = app.store.highlights(id);
    assert_eq!(highlights.len(), 1);
    assert_eq!(highlights[0].color, DEFAULT_HIGHLIGHT_COLOR);
    assert_eq!(app.store.raw_events(id).len(), 3);

    let (status, stats) = app
        .send(Method::GET, &format!("/v1/sessions/{id}/events/stats"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_events"], 3);
    assert_eq!(stats["page_visits"], 2);
    assert_eq!(stats["highlights"], 1);
    assert_eq!(stats["unique_urls"], 1);
}

#[tokio::test]
async fn dispatcher_falls_back_to_the_next_provider() {
    let app = TestApp::new();
    let openai = Scripted::failing(ProviderType::OpenAi, AiError::Request("connection reset".into()));
    let gemini = Scripted::ok(ProviderType::Gemini, r#"{"ok":true}"#);
    let claude = Scripted::ok(ProviderType::Claude, r#"{"ok":"claude"}"#);
    let worker = TestWorker::new(
        app.store.clone(),
        vec![
            openai.clone() as Arc<dyn AiProvider>,
            gemini.clone() as Arc<dyn AiProvider>,
            claude.clone() as Arc<dyn AiProvider>,
        ],
    )
    .await;
    worker.set_config("mindmap", "openai", &["gemini", "claude"]).await;

    let response = worker
        .ai
        .chat(TaskType::Mindmap, ChatRequest::new("system", "user"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.provider, ProviderType::Gemini);
    assert_eq!(response.content, r#"{"ok":true}"#);
    assert_eq!(claude.calls(), 0);

    let logs = app.store.ai_logs();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].entry.provider, "openai");
    assert_eq!(logs[0].entry.status, AiLogStatus::Error);
    assert_eq!(logs[1].entry.provider, "gemini");
    assert_eq!(logs[1].entry.status, AiLogStatus::Success);
}

#[tokio::test]
async fn cleanup_sweep_fails_only_stale_recordings() {
    let app = TestApp::new();
    let (_, token) = app.user();
    let stale = app.start_session(&token).await;
    let fresh = app.start_session(&token).await;
    app.store.set_session_updated_at(stale, Utc::now() - Duration::hours(48));
    app.store.set_session_updated_at(fresh, Utc::now() - Duration::hours(1));

    let client = JobClient::new(app.store.clone());
    client.enqueue_session_cleanup(24).await.unwrap();
    let worker = TestWorker::new(app.store.clone(), vec![]).await;
    assert_eq!(worker.server.drain_due().await, 1);

    assert_eq!(
        app.store.session_row(stale).unwrap().session_status,
        SessionStatus::Failed
    );
    assert_eq!(
        app.store.session_row(fresh).unwrap().session_status,
        SessionStatus::Recording
    );
}

#[tokio::test]
async fn concurrent_registration_of_one_url_yields_one_row() {
    let app = TestApp::new();
    let registry = UrlRegistry::new(app.store.clone());
    let (a, b) = tokio::join!(
        registry.get_or_create("https://example.com/race", Some("Race"), None),
        registry.get_or_create("https://EXAMPLE.com/race/", None, Some("body")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.id, b.id);
    assert_eq!(app.store.urls().len(), 1);
}

#[test]
fn galaxy_layout_puts_topics_on_the_ring() {
    let graph = RelationshipGraphResponse {
        core: CoreTheme {
            label: "Rust".into(),
            description: "systems".into(),
        },
        topics: (0..4)
            .map(|i| Topic {
                id: format!("t{i}"),
                label: format!("Topic {i}"),
                ..Topic::default()
            })
            .collect(),
        connections: vec![],
    };
    let data = build_galaxy(&graph, &HashMap::new());

    let core = data.nodes.iter().find(|n| n.node_type == NodeType::Core).unwrap();
    let origin = core.position.unwrap();
    assert_eq!((origin.x, origin.y), (0.0, 0.0));

    let topics: Vec<_> = data
        .nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Topic)
        .collect();
    assert_eq!(topics.len(), 4);
    for topic in topics {
        let p = topic.position.unwrap();
        assert!((p.x * p.x + p.y * p.y - 40_000.0).abs() <= 1.0, "{p:?}");
    }
}

#[tokio::test]
async fn exhausted_mindmap_job_fails_the_session() {
    let app = TestApp::new();
    let (_, token) = app.user();
    let id = app.start_session(&token).await;
    app.send(Method::POST, &format!("/v1/sessions/{id}/stop"), Some(&token), None)
        .await;

    let claude = Scripted::failing(ProviderType::Claude, AiError::Request("overloaded".into()));
    let worker = TestWorker::new(app.store.clone(), vec![claude.clone() as Arc<dyn AiProvider>]).await;
    // One attempt plus three retries.
    assert_eq!(worker.server.drain_due().await, 4);

    let session = app.store.find_session(id).await.unwrap().unwrap();
    assert_eq!(session.session_status, SessionStatus::Failed);
    let mindmap = app.store.find_mindmap(id).await.unwrap().unwrap();
    assert_eq!(mindmap.status, MindmapStatus::Failed);
    assert!(mindmap.error_message.is_some());
    assert!(mindmap.nodes.is_empty());
    assert!(mindmap.layout.is_none());
    assert!(app.store.token_usage().is_empty());
}

#[tokio::test]
async fn failed_regeneration_drops_the_previous_graph() {
    let app = TestApp::new();
    let (_, token) = app.user();
    let id = app.start_session(&token).await;
    app.send(Method::POST, &format!("/v1/sessions/{id}/stop"), Some(&token), None)
        .await;

    let claude = Scripted::ok(ProviderType::Claude, CORE_ONLY_GRAPH);
    let worker = TestWorker::new(app.store.clone(), vec![claude.clone() as Arc<dyn AiProvider>]).await;
    worker.server.drain_due().await;
    let first = app.store.find_mindmap(id).await.unwrap().unwrap();
    assert_eq!(first.status, MindmapStatus::Completed);
    assert_eq!(first.version, 1);
    assert!(!first.nodes.is_empty());

    claude.set_reply(Err(AiError::Request("overloaded".into())));
    app.send(
        Method::POST,
        &format!("/v1/sessions/{id}/mindmap/generate"),
        Some(&token),
        Some(json!({"force": true})),
    )
    .await;
    worker.server.drain_due().await;

    let (status, body) = app
        .send(Method::GET, &format!("/v1/sessions/{id}/mindmap"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mindmap"]["status"], "failed");
    assert_eq!(body["mindmap"]["nodes"], json!([]));
    assert_eq!(body["mindmap"]["edges"], json!([]));
    assert!(body["mindmap"]["layout"].is_null());
    assert_eq!(app.store.session_row(id).unwrap().session_status, SessionStatus::Failed);

    // A later successful run is the second commit.
    claude.set_reply(Ok(CORE_ONLY_GRAPH.to_string()));
    app.send(Method::POST, &format!("/v1/sessions/{id}/mindmap/generate"), Some(&token), None)
        .await;
    worker.server.drain_due().await;
    let second = app.store.find_mindmap(id).await.unwrap().unwrap();
    assert_eq!(second.status, MindmapStatus::Completed);
    assert_eq!(second.version, 2);
}

#[tokio::test(start_paused = true)]
async fn provider_outliving_the_job_deadline_is_logged_as_timeout() {
    let app = TestApp::new();
    let (_, token) = app.user();
    let id = app.start_session(&token).await;
    app.send(Method::POST, &format!("/v1/sessions/{id}/stop"), Some(&token), None)
        .await;

    let claude = Scripted::ok(ProviderType::Claude, CORE_ONLY_GRAPH);
    claude.set_delay(std::time::Duration::from_secs(3600));
    let worker = TestWorker::new(app.store.clone(), vec![claude.clone() as Arc<dyn AiProvider>]).await;
    // Every attempt runs into the job deadline.
    assert_eq!(worker.server.drain_due().await, 4);

    let logs = app.store.ai_logs();
    assert_eq!(logs.len(), 4);
    for log in &logs {
        assert_eq!(log.entry.status, AiLogStatus::Timeout);
        assert_eq!(log.entry.task_type, "mindmap");
        assert_eq!(log.entry.session_id, Some(id));
    }

    let mindmap = app.store.find_mindmap(id).await.unwrap().unwrap();
    assert_eq!(mindmap.status, MindmapStatus::Failed);
    assert!(mindmap.error_message.unwrap().contains("timed out"));
    assert!(app.store.token_usage().is_empty());
}

#[tokio::test]
async fn malformed_mindmap_json_is_not_retried() {
    let app = TestApp::new();
    let (_, token) = app.user();
    let id = app.start_session(&token).await;
    app.send(Method::POST, &format!("/v1/sessions/{id}/stop"), Some(&token), None)
        .await;

    let claude = Scripted::ok(ProviderType::Claude, "this is not json");
    let worker = TestWorker::new(app.store.clone(), vec![claude.clone() as Arc<dyn AiProvider>]).await;
    assert_eq!(worker.server.drain_due().await, 1);
    assert_eq!(claude.calls(), 1);
    assert_eq!(
        app.store.session_row(id).unwrap().session_status,
        SessionStatus::Failed
    );
}
