//! payrisk-orchestrator binary entrypoint.
//! Wires the persistent store, cache, rules/ML/decision engines, and the
//! HTTP ingress boundary together, then serves the assessment API.

#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use payrisk_core::api::{assess_handler, health_handler, metrics_handler, outcomes_handler, AppState};
use payrisk_core::auth::{auth_middleware, JwtHandler};
use payrisk_core::cache::InMemoryCache;
use payrisk_core::config::AppConfig;
use payrisk_core::context::ContextEngine;
use payrisk_core::middleware::{
    rate_limit::rate_limit_middleware, request_logging, RateLimitConfig, RateLimitLayer,
};
use payrisk_core::ml::MlEngine;
use payrisk_core::orchestrator::RiskOrchestrator;
use payrisk_core::rules::RulesEngine;
use payrisk_core::store::Store;
use payrisk_core::trust::TrustUpdater;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    let config = AppConfig::from_env();
    init_tracing(&config.log_filter);

    info!("payrisk-orchestrator starting up");

    let store = Store::open(&config.store.path).context("failed to open persistent store")?;
    info!(path = %config.store.path, "persistent store ready");

    let cache = InMemoryCache::new().into_shared();
    let context = Arc::new(ContextEngine::new(store.clone(), cache, config.clone()));

    let rules = RulesEngine::new(config.geo);
    let ml = MlEngine::new(None);
    let trust_updater = Arc::new(TrustUpdater::new(store.clone(), context.clone()));

    let orchestrator = Arc::new(RiskOrchestrator::new(
        context.clone(),
        rules,
        ml,
        store.clone(),
        config.deadline.total(),
        config.deadline.ml(),
        config.deadline.store_write(),
        config.ruleset_version.clone(),
    ));

    let jwt_handler = Arc::new(JwtHandler::new(AppConfig::jwt_secret()));
    let metrics_handle =
        Arc::new(payrisk_core::metrics::install().context("failed to install metrics recorder")?);

    let app_state = AppState {
        orchestrator,
        trust_updater,
        store: store.clone(),
        context,
        jwt: jwt_handler.clone(),
        metrics_handle,
    };

    spawn_retry_queue_worker(store.clone());

    let rate_limiter = RateLimitLayer::new(RateLimitConfig {
        max_requests: config.rate_limit.max_requests,
        window: Duration::from_secs(config.rate_limit.window_secs),
        burst: config.rate_limit.burst,
    });

    let protected_routes = Router::new()
        .route("/v1/assess", post(assess_handler))
        .route("/v1/outcomes", post(outcomes_handler))
        .route_layer(axum_mw::from_fn_with_state(jwt_handler.clone(), auth_middleware))
        .with_state(app_state.clone());

    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(app_state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .route_layer(axum_mw::from_fn_with_state(rate_limiter, rate_limit_middleware))
        .layer(axum_mw::from_fn(request_logging))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.bind_addr, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "listening for assessment requests");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}

/// Periodically drains the durable retry queue and replays each queued
/// write against the store, clearing it on success.
fn spawn_retry_queue_worker(store: Store) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            let store_for_drain = store.clone();
            let drained =
                tokio::task::spawn_blocking(move || store_for_drain.drain_retry_queue(50)).await;

            match drained {
                Ok(Ok(rows)) => {
                    for (txn, event) in rows {
                        let store = store.clone();
                        let txn_id = txn.id;
                        let result = tokio::task::spawn_blocking(move || {
                            store.persist_assessment(&txn, &event)
                        })
                        .await;
                        if matches!(result, Ok(Ok(()))) {
                            let store = store.clone();
                            let _ = tokio::task::spawn_blocking(move || {
                                store.remove_from_retry_queue(txn_id)
                            })
                            .await;
                        }
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "retry queue drain failed"),
                Err(e) => warn!(error = %e, "retry queue drain task panicked"),
            }

            if let Ok(depth) = store.retry_queue_depth() {
                payrisk_core::metrics::record_retry_queue_depth(depth);
            }
        }
    });
}

fn init_tracing(filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
