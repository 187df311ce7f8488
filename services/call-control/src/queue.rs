//! Queue Engine (C7): holds callers who asked to wait for a representative
//! in a per-provider sorted set keyed by enqueue time, and reports position
//! and an ETA back to the carrier while they wait.

use axum::extract::{Form, State};
use axum::response::IntoResponse;
use dto::twiml::{Document, GatherInput};
use dto::webhook_forms::QueueWaitForm;
use models::config::{SSE_POLL_INTERVAL_SECS, VOICE_DEFAULT};
use models::event::event_types;
use models::queue::{estimated_wait_secs_default, queue_key, QueueEntry};

use crate::error::DispatchError;
use crate::state::AppState;

fn twiml_response(xml: String) -> impl IntoResponse {
    (axum::http::StatusCode::OK, [("Content-Type", "text/xml")], xml)
}

/// `POST /queue/enqueue` — places the caller in the provider's wait line and
/// immediately redirects into the wait loop.
pub async fn enqueue(State(app): State<AppState>, Form(form): Form<QueueWaitForm>) -> Result<impl IntoResponse, DispatchError> {
    let state = app.load_call(&form.call_sid).await?;
    let Some(provider_id) = state.identity.provider_id.clone() else {
        return Err(DispatchError::BadRequest("call has no associated provider".to_string()));
    };

    let entry = QueueEntry {
        call_sid: form.call_sid.clone(),
        caller_phone: state.caller_phone.clone().unwrap_or_default(),
        caller_name: None,
        enqueued_at: app.now(),
        job_info: state.work_item.job_template_id.clone(),
    };
    let key = queue_key(&provider_id);
    let payload = serde_json::to_vec(&entry).map_err(|e| DispatchError::BadRequest(e.to_string()))?;
    app.store.set(&format!("queueentry:{}", form.call_sid), payload, std::time::Duration::from_secs(3600)).await?;
    app.store.zadd(&key, &form.call_sid, entry.enqueued_at.timestamp() as f64).await?;

    app.events.publish(&provider_id, event_types::CALLER_ENQUEUED, &form.call_sid, serde_json::json!({})).await;

    let wait_url = dispatch_action_url(&app, "/queue/wait", &form.call_sid);
    Ok(twiml_response(Document::new().redirect(&wait_url).render()))
}

/// `POST /queue/wait` — polled by the carrier's `<Gather>`/`<Redirect>` loop
/// while the caller holds; reports position, plays hold music, and bails out
/// once a representative becomes available (signaled by removal from the
/// sorted set, done by the operator-events/representative-side workflow).
pub async fn wait(State(app): State<AppState>, Form(form): Form<QueueWaitForm>) -> Result<impl IntoResponse, DispatchError> {
    let state = app.load_call(&form.call_sid).await?;
    let Some(provider_id) = state.identity.provider_id.clone() else {
        return Err(DispatchError::BadRequest("call has no associated provider".to_string()));
    };
    let key = queue_key(&provider_id);

    let Some(rank) = app.store.zrank(&key, &form.call_sid).await? else {
        app.events.publish(&provider_id, event_types::CALLER_DEQUEUED, &form.call_sid, serde_json::json!({})).await;
        let transfer_url = dispatch_action_url(&app, "/transfer/after-connect", &form.call_sid);
        return Ok(twiml_response(Document::new().redirect(&transfer_url).render()));
    };

    let position = rank + 1;
    let eta = estimated_wait_secs_default(position);
    let wait_url = dispatch_action_url(&app, "/queue/wait", &form.call_sid);
    let doc = Document::new()
        .say(
            VOICE_DEFAULT,
            &state.lang,
            &format!("You are caller number {position} in line. Estimated wait time is about {} minutes.", (eta / 60).max(1)),
        )
        .gather_with_fallback(
            GatherInput::Dtmf,
            SSE_POLL_INTERVAL_SECS,
            None,
            &wait_url,
            dto::twiml::Verb::Play { url: "https://assets.example.com/hold-music.mp3".to_string(), loop_count: 1 },
            "",
        );
    Ok(twiml_response(doc.render()))
}

fn dispatch_action_url(app: &AppState, path: &str, call_sid: &str) -> String {
    crate::dispatch::action_url(&app.config, path, call_sid)
}

#[derive(Debug, serde::Deserialize)]
pub struct DequeueRequest {
    pub provider_id: String,
    pub call_sid: String,
}

/// `POST /queue/dequeue` — called by the operator portal when a
/// representative picks up a waiting caller; the next `/queue/wait` poll
/// then redirects the caller out of the hold loop.
pub async fn dequeue(State(app): State<AppState>, axum::Json(req): axum::Json<DequeueRequest>) -> Result<impl IntoResponse, DispatchError> {
    let key = queue_key(&req.provider_id);
    app.store.zrem(&key, &req.call_sid).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
