//! Webhook Dispatcher (C5) + TwiML rendering (C4) + Queue Engine (C7) +
//! Transfer Orchestrator (C8) + Call-Log Writer (C11). Boots a Redis-backed
//! [`StateStore`] and an in-memory [`RecordStore`] fake (the real record
//! backend is an external collaborator, per the design doc) and serves the
//! carrier webhooks that drive the call-control FSM.

mod call_log_writer;
mod config;
mod dispatch;
mod error;
mod handlers;
mod queue;
mod state;

use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use models::external::fakes::InMemoryRecordStore;
use models::{EventBus, RedisStateStore, StateStore};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::state::AppState;

async fn health() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into())))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::Config::from_env();

    let store: Arc<dyn StateStore> = match RedisStateStore::connect(&cfg.redis_url).await {
        Ok(redis) => Arc::new(redis),
        Err(error) => {
            tracing::error!(%error, redis_url = %cfg.redis_url, "failed to connect to redis, call state will not persist");
            Arc::new(models::InMemoryStateStore::new())
        }
    };

    let records: Arc<dyn models::RecordStore> = Arc::new(InMemoryRecordStore::new());
    let events = EventBus::new(store.clone());

    let app_state = AppState { store, records, events, config: Arc::new(cfg.clone()) };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods([Method::GET, Method::POST]).allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/voice/inbound", post(handlers::voice_inbound))
        .route("/voice/outbound", post(handlers::voice_outbound))
        .route("/voice/gather", post(handlers::voice_gather))
        .route("/voice/status", post(handlers::voice_status))
        .route("/transfer/after-connect", post(handlers::transfer_after_connect))
        .route("/transfer/status", post(handlers::transfer_status))
        .route("/queue/enqueue", post(queue::enqueue))
        .route("/queue/wait", post(queue::wait))
        .route("/queue/dequeue", post(queue::dequeue))
        .layer(cors)
        .with_state(app_state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.port));
    tracing::info!(%addr, "call-control service starting");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, %addr, "failed to bind call-control listener");
            return;
        }
    };

    if let Err(error) = axum::serve(listener, app).await {
        tracing::error!(%error, "call-control server exited with error");
    }
}
