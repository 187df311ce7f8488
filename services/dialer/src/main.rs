//! Outbound Wave Scheduler (C9): polls the record backend for unfilled
//! shifts and dials eligible employees in successive rounds, over the same
//! Redis-backed [`StateStore`] and in-memory [`RecordStore`] fake the rest
//! of the system boots with.

mod carrier;
mod config;
mod error;
mod handlers;
mod scheduler;
mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use models::external::fakes::InMemoryRecordStore;
use models::{EventBus, RedisStateStore, StateStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::carrier::CarrierClient;
use crate::state::AppState;

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
            tracing::error!(%error, redis_url = %cfg.redis_url, "failed to connect to redis, wave state will not persist");
            Arc::new(models::InMemoryStateStore::new())
        }
    };

    let records: Arc<dyn models::RecordStore> = Arc::new(InMemoryRecordStore::new());
    let events = EventBus::new(store.clone());
    let carrier = Arc::new(CarrierClient::new(cfg.carrier_api_base_url.clone(), cfg.carrier_account_sid.clone(), cfg.carrier_auth_token.clone()));

    let app_state = AppState { store, records, events, carrier, config: Arc::new(cfg.clone()) };

    tokio::spawn(scheduler::run(app_state.clone()));

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/wave/status", post(handlers::wave_status))
        .with_state(app_state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.port));
    tracing::info!(%addr, "dialer service starting");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, %addr, "failed to bind dialer listener");
            return;
        }
    };

    if let Err(error) = axum::serve(listener, app).await {
        tracing::error!(%error, "dialer server exited with error");
    }
}
