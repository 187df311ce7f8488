//! Event Bus (C10): authenticates an operator-portal session and streams a
//! provider's event feed (queue, transfer, and wave events published by the
//! other services via [`models::EventBus`]) as Server-Sent Events. Adapted
//! from the teacher's JWT-gated presence WebSocket, swapping the push-style
//! presence channel for a poll-and-fan-out reader over the shared event
//! stream `models::event` already writes to.

mod state;

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use dto::sse::{CallEventPayload, ConnectedPayload};
use futures_util::stream::Stream;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use models::config::{SSE_KEEPALIVE_SECS, SSE_POLL_INTERVAL_SECS};
use models::{InMemoryStateStore, RedisStateStore, StateStore};
use serde::Deserialize;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::state::{AppState, SubscriberGuard};

#[derive(Deserialize)]
struct EventsQuery {
    token: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers.get(axum::http::header::AUTHORIZATION).and_then(|h| h.to_str().ok()).and_then(|v| v.strip_prefix("Bearer ")).map(str::to_string)
}

async fn health() -> &'static str {
    "ok"
}

/// `GET /sse/operator?token=...` (or `Authorization: Bearer`) — a provider-scoped
/// SSE feed. The token's `provider_id` claim is the only thing that decides
/// which provider's stream is read; there is no per-occurrence filtering,
/// matching the operator portal's dashboard-wide view.
async fn events(
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, axum::http::StatusCode> {
    let token = bearer_token(&headers).or(query.token).ok_or(axum::http::StatusCode::UNAUTHORIZED)?;
    let claims = match decode::<dto::OperatorClaims>(&token, &state.decoding_key, &state.validation) {
        Ok(decoded) => decoded.claims,
        Err(error) => {
            tracing::warn!(%error, "jwt decode failed");
            return Err(axum::http::StatusCode::UNAUTHORIZED);
        }
    };

    let Some(guard) = state.subscribers.try_acquire(&claims.provider_id) else {
        tracing::warn!(provider_id = %claims.provider_id, "rejecting sse connection, provider at subscriber cap");
        return Err(axum::http::StatusCode::SERVICE_UNAVAILABLE);
    };

    let stream = event_stream(state.store.clone(), claims.provider_id.clone(), guard);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(SSE_KEEPALIVE_SECS)).text("keepalive")))
}

/// Bridges the poll loop to axum's SSE `Sse::new` via a channel: a
/// background task owns `guard` (and the poll cadence) and is dropped,
/// releasing the subscriber slot, as soon as the receiver side disconnects.
fn event_stream(store: Arc<dyn StateStore>, provider_id: String, guard: SubscriberGuard) -> impl Stream<Item = Result<Event, Infallible>> {
    let (tx, rx) = tokio::sync::mpsc::channel(64);

    tokio::spawn(async move {
        let _guard = guard;
        let stream_key = models::event::event_stream_key(&provider_id, chrono::Utc::now().date_naive());
        let mut cursor = match current_cursor(&store, &provider_id).await {
            Ok(cursor) => cursor,
            Err(error) => {
                tracing::warn!(%error, provider_id, "failed to establish sse cursor");
                return;
            }
        };

        let connected = match Event::default().event("connected").json_data(&ConnectedPayload { stream_key }) {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(%error, provider_id, "failed to encode connected event");
                return;
            }
        };
        if tx.send(Ok(connected)).await.is_err() {
            return;
        }

        let mut ticker = tokio::time::interval(Duration::from_secs(SSE_POLL_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            let key = models::event::event_stream_key(&provider_id, chrono::Utc::now().date_naive());
            match store.stream_range(&key, cursor.as_deref()).await {
                Ok(entries) => {
                    for (id, fields) in entries {
                        cursor = Some(id);
                        let Some(payload) = decode_event(fields) else { continue };
                        let event = match Event::default().event("call-event").json_data(&payload) {
                            Ok(event) => event,
                            Err(error) => {
                                tracing::warn!(%error, provider_id, "failed to encode sse event");
                                continue;
                            }
                        };
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, provider_id, "failed to poll event stream");
                }
            }
        }
    });

    ReceiverStream::new(rx)
}

/// New connections start from "now" rather than replaying the day's full
/// backlog: the portal already loads history through the record backend's
/// REST surface, so the SSE feed only needs to carry what happens next.
async fn current_cursor(store: &Arc<dyn StateStore>, provider_id: &str) -> Result<Option<String>, models::StateStoreError> {
    let key = models::event::event_stream_key(provider_id, chrono::Utc::now().date_naive());
    let entries = store.stream_range(&key, None).await?;
    Ok(entries.last().map(|(id, _)| id.clone()))
}

fn decode_event(fields: Vec<(String, String)>) -> Option<CallEventPayload> {
    let mut id = None;
    let mut event_type = None;
    let mut call_sid = None;
    let mut timestamp = None;
    let mut data = None;
    for (key, value) in fields {
        match key.as_str() {
            "id" => id = Some(value),
            "event_type" => event_type = Some(value),
            "call_sid" => call_sid = Some(value),
            "timestamp" => timestamp = chrono::DateTime::parse_from_rfc3339(&value).ok().map(|dt| dt.with_timezone(&chrono::Utc)),
            "data" => data = serde_json::from_str(&value).ok(),
            _ => {}
        }
    }
    Some(CallEventPayload { id: id?, event_type: event_type?, call_sid: call_sid?, timestamp: timestamp?, data: data.unwrap_or(serde_json::Value::Null) })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into())))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| "dev_secret_change_me".to_string());
    let decoding_key = Arc::new(DecodingKey::from_secret(jwt_secret.as_bytes()));
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let store: Arc<dyn StateStore> = match RedisStateStore::connect(&redis_url).await {
        Ok(redis) => Arc::new(redis),
        Err(error) => {
            tracing::error!(%error, redis_url, "failed to connect to redis, event feed will be empty");
            Arc::new(InMemoryStateStore::new())
        }
    };

    let port: u16 = std::env::var("OPERATOR_EVENTS_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8085);
    let app_state = AppState { store, decoding_key, validation, subscribers: Arc::new(state::SubscriberLimiter::new()) };

    let app = Router::new().route("/health", get(health)).route("/sse/operator", get(events)).with_state(app_state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "operator-events service starting");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, %addr, "failed to bind operator-events listener");
            return;
        }
    };

    if let Err(error) = axum::serve(listener, app).await {
        tracing::error!(%error, "operator-events server exited with error");
    }
}
