//! services/api/src/bin/worker.rs
//!
//! Runs the job server, the periodic scheduler and a small metrics listener.

use api_lib::{
    adapters::{ClaudeChatAdapter, DbAdapter, GeminiChatAdapter, OpenAiChatAdapter},
    config::{init_tracing, Config},
    error::ApiError,
    metrics::{get_metrics, init_metrics},
    queue::{JobClient, JobServer, Scheduler, ServerConfig},
    service::{AiConfigService, AiDispatcher, UsageService},
    shutdown::cancel_on_signal,
    worker::{backfill_summaries, build_router, WorkerDeps, BACKFILL_LIMIT},
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{response::Json, routing::get, Router};
use mindhit_core::jobs::{NewJob, TYPE_SESSION_CLEANUP};
use mindhit_core::ports::AiProvider;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    init_tracing(&config);
    init_metrics();
    info!(
        environment = %config.environment,
        concurrency = config.worker_concurrency,
        "configuration loaded, starting worker"
    );

    // --- 2. Connect to Database ---
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    if !config.is_production() {
        info!("Running database migrations...");
        db_adapter.run_migrations().await?;
    }

    // --- 3. AI Configuration & Providers ---
    let ai_configs = Arc::new(AiConfigService::new(
        db_adapter.clone(),
        config.ai_config_cache_ttl,
    ));
    match ai_configs.seed_defaults().await {
        Ok(created) => info!(created, "ai config defaults seeded"),
        Err(e) => warn!(error = %e, "failed to seed ai config defaults"),
    }

    let http = reqwest::Client::new();
    let mut providers: Vec<Arc<dyn AiProvider>> = Vec::new();
    if let Some(key) = &config.openai_api_key {
        let client = Client::with_config(OpenAIConfig::new().with_api_key(key.clone()));
        providers.push(Arc::new(OpenAiChatAdapter::new(
            client,
            config.openai_model.clone(),
        )));
    }
    if let Some(key) = &config.gemini_api_key {
        providers.push(Arc::new(GeminiChatAdapter::new(
            http.clone(),
            key.clone(),
            config.gemini_model.clone(),
        )));
    }
    if let Some(key) = &config.anthropic_api_key {
        providers.push(Arc::new(ClaudeChatAdapter::new(
            http.clone(),
            key.clone(),
            config.claude_model.clone(),
        )));
    }

    let dispatcher = AiDispatcher::new(providers, ai_configs, db_adapter.clone())
        .with_usage(UsageService::new(db_adapter.clone()));
    let deps = WorkerDeps::new(db_adapter.clone(), Arc::new(dispatcher));

    // --- 4. Job Bus ---
    let client = JobClient::new(db_adapter.clone());
    if let Err(e) = backfill_summaries(&deps.urls, &client, BACKFILL_LIMIT).await {
        warn!(error = %e, "url summary backfill failed");
    }

    let max_age_hours = config.stale_session_max_age_hours;
    let scheduler = Scheduler::new(client).every(
        TYPE_SESSION_CLEANUP,
        config.cleanup_interval,
        move || NewJob::session_cleanup(max_age_hours),
    );
    let server = JobServer::new(
        db_adapter.clone(),
        build_router(&deps),
        ServerConfig::from_config(&config),
    );

    // --- 5. Run Until Signalled ---
    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let metrics_app = Router::new()
        .route("/metrics", get(get_metrics))
        .route("/healthz", get(|| async { Json(json!({ "status": "ok" })) }));
    let listener = tokio::net::TcpListener::bind(&config.metrics_bind_address).await?;
    info!("Serving worker metrics on {}", config.metrics_bind_address);
    let metrics_shutdown = shutdown.clone();
    let metrics_server = tokio::spawn(async move {
        axum::serve(listener, metrics_app)
            .with_graceful_shutdown(async move { metrics_shutdown.cancelled().await })
            .await
    });

    tokio::join!(scheduler.run(shutdown.clone()), server.run(shutdown.clone()));

    match metrics_server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "metrics server failed"),
        Err(e) => error!(error = %e, "metrics server task panicked"),
    }
    info!("worker stopped");
    Ok(())
}
