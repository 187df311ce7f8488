//! Carrier-facing webhook endpoints (C5). Each handler normalizes the raw
//! form body into an [`fsm::Input`], loads or creates the [`CallState`], and
//! hands off to [`crate::dispatch::run_turn`] for the actual state machine
//! turn and TwiML rendering.

use axum::extract::{Form, State};
use axum::response::IntoResponse;
use dto::webhook_forms::{AfterConnectForm, DialOutcome, GatherForm, OutboundTwimlForm, StatusCallbackForm, TransferStatusForm, VoiceInboundForm};
use dto::twiml::Document;
use models::call_state::{ActionType, CallState, Direction, Phase};
use models::config::{DIAL_TIMEOUT_SECS, LANG_DEFAULT, VOICE_DEFAULT};
use models::fsm::Input;

use crate::call_log_writer;
use crate::dispatch;
use crate::error::DispatchError;
use crate::state::AppState;

fn twiml_response(xml: String) -> impl IntoResponse {
    (axum::http::StatusCode::OK, [("Content-Type", "text/xml")], xml)
}

/// `POST /voice/inbound` — first webhook hit on an answered inbound call.
pub async fn voice_inbound(State(app): State<AppState>, Form(form): Form<VoiceInboundForm>) -> Result<impl IntoResponse, DispatchError> {
    let lock = app.lock_call(&form.call_sid).await?;
    let now = app.now();
    let state = CallState::new(&form.call_sid, Direction::Inbound, LANG_DEFAULT, now);
    let log = dispatch::new_call_log(&form.call_sid, Direction::Inbound, now);
    call_log_writer::append(app.records.as_ref(), &log).await;
    let doc = dispatch::run_turn(&app, state, Input::StartInbound { caller_phone: form.from }).await?;
    lock.release().await;
    Ok(twiml_response(doc.render()))
}

/// `POST /voice/outbound` — TwiML webhook the carrier hits once an
/// employee answers a wave-dispatched outbound call (see `services/dialer`).
pub async fn voice_outbound(State(app): State<AppState>, Form(form): Form<OutboundTwimlForm>) -> Result<impl IntoResponse, DispatchError> {
    let lock = app.lock_call(&form.call_sid).await?;
    let now = app.now();
    let state = CallState::new(&form.call_sid, Direction::Outbound, LANG_DEFAULT, now);
    let log = dispatch::new_call_log(&form.call_sid, Direction::Outbound, now);
    call_log_writer::append(app.records.as_ref(), &log).await;
    let input = Input::StartOutbound {
        employee_id: form.employee_id,
        occurrence_id: form.occurrence_id,
        round: form.round,
        caller_phone: form.to,
    };
    let doc = dispatch::run_turn(&app, state, input).await?;
    lock.release().await;
    Ok(twiml_response(doc.render()))
}

/// `POST /voice/gather` — result of the previous turn's `<Gather>`.
pub async fn voice_gather(State(app): State<AppState>, Form(form): Form<GatherForm>) -> Result<impl IntoResponse, DispatchError> {
    let lock = app.lock_call(&form.call_sid).await?;
    let state = app.load_call(&form.call_sid).await?;
    let input = match (form.digits, form.speech_result) {
        (Some(digits), _) if !digits.is_empty() => Input::Digits { digits },
        (_, Some(text)) if !text.trim().is_empty() => Input::SpeechResult { text },
        _ => Input::Silence,
    };
    let doc = dispatch::run_turn(&app, state, input).await?;
    lock.release().await;
    Ok(twiml_response(doc.render()))
}

/// `POST /voice/status` — carrier call-status callback; closes out the call
/// log once the leg has actually ended.
pub async fn voice_status(State(app): State<AppState>, Form(form): Form<StatusCallbackForm>) -> Result<impl IntoResponse, DispatchError> {
    if matches!(form.call_status.as_str(), "completed" | "busy" | "no-answer" | "failed" | "canceled") {
        let lock = app.lock_call(&form.call_sid).await?;
        let detected_intent = app.load_call(&form.call_sid).await.ok().and_then(|s| detected_intent_for(s.work_item.action_type));
        let update = models::external::CallLogUpdate {
            ended_at: Some(app.now()),
            seconds: form.call_duration_secs,
            recording_url: form.recording_url,
            detected_intent,
        };
        call_log_writer::update(app.records.as_ref(), &form.call_sid, update).await;
        let _ = app.store.del(&CallState::state_key(&form.call_sid)).await;
        lock.release().await;
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// Maps the dialog's eventual action onto the call-log's `detectedIntent`
/// column; `None` when the call never reached a terminal action (hung up
/// mid-flow).
fn detected_intent_for(action_type: Option<ActionType>) -> Option<String> {
    let intent = match action_type? {
        ActionType::ReportAbsence => "absence",
        ActionType::Reschedule => "reschedule",
        ActionType::LeaveOpen => "leave_open",
        ActionType::TransferToHuman => "transfer",
        ActionType::AcceptShift => "accept_shift",
        ActionType::DeclineShift => "decline_shift",
    };
    Some(intent.to_string())
}

/// `POST /transfer/after-connect` — fired once the `<Connect><Stream>` leg
/// that put the caller on hold for a transfer has been torn down. Emits the
/// `<Dial>` to the representative directly (C8's transfer orchestrator owns
/// this, not the FSM — see `step_pending_transfer`), followed by a fallback
/// `<Redirect>` into the wait queue, then clears `pendingTransfer`.
///
/// Also reached when a previously-enqueued caller is dequeued by an
/// operator (`queue::wait` redirects here once the caller's entry
/// disappears from the sorted set) — in that case `pendingTransfer` is
/// already cleared, and `dispatch::resolve_transfer_number` falls through
/// to the provider's configured number.
pub async fn transfer_after_connect(State(app): State<AppState>, Form(form): Form<AfterConnectForm>) -> Result<impl IntoResponse, DispatchError> {
    let lock = app.lock_call(&form.call_sid).await?;
    let mut state = app.load_call(&form.call_sid).await?;
    let number = dispatch::resolve_transfer_number(&state, &app.config);
    state.pending_transfer = None;

    let doc = if number.is_empty() {
        state.transition(Phase::Done, app.now());
        Document::new()
            .say(VOICE_DEFAULT, &state.lang, "I'm sorry, no representative is available right now. Please call back later.")
            .hangup()
    } else {
        Document::new()
            .say(VOICE_DEFAULT, &state.lang, "One moment while I connect you.")
            .dial(&app.config.caller_id, &number, DIAL_TIMEOUT_SECS, &dispatch::action_url(&app.config, "/transfer/status", &form.call_sid), true)
            .redirect(&dispatch::action_url(&app.config, "/queue/enqueue", &form.call_sid))
    };

    app.save_call(&state).await?;
    lock.release().await;
    Ok(twiml_response(doc.render()))
}

/// `POST /transfer/status` — outcome of the `<Dial>` leg to the
/// representative's phone (C8's transfer orchestrator). A failed leg sends
/// the caller back into the provider's wait queue rather than hanging up.
pub async fn transfer_status(State(app): State<AppState>, Form(form): Form<TransferStatusForm>) -> Result<impl IntoResponse, DispatchError> {
    let lock = app.lock_call(&form.call_sid).await?;
    let outcome = DialOutcome::parse(&form.dial_call_status);
    let success = outcome.map(DialOutcome::is_success).unwrap_or(false);
    let mut state = app.load_call(&form.call_sid).await?;

    if let Some(provider_id) = state.identity.provider_id.clone() {
        let event_type = if success { models::event::event_types::TRANSFER_STARTED } else { models::event::event_types::TRANSFER_FAILED };
        app.events.publish(&provider_id, event_type, &form.call_sid, serde_json::json!({ "dialCallStatus": form.dial_call_status })).await;
    }

    let doc = if success {
        state.transition(Phase::Done, app.now());
        Document::new().hangup()
    } else {
        Document::new().redirect(&dispatch::action_url(&app.config, "/queue/enqueue", &form.call_sid))
    };

    app.save_call(&state).await?;
    lock.release().await;
    Ok(twiml_response(doc.render()))
}
