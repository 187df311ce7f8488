//! The effect loop: turns a single carrier-facing [`fsm::Input`] into a
//! rendered TwiML [`Document`], executing any [`fsm::Effect`]s the pure core
//! requests against [`models::RecordStore`] along the way.

use chrono::{DateTime, Utc};
use dto::twiml::{Document, GatherInput, Verb};
use models::call_state::{ActionType, CallState, Direction};
use models::config::VOICE_DEFAULT;
use models::event::event_types;
use models::external::OccurrenceStatus;
use models::fsm::{self, Effect, ExternalEventPayload, Input, Output};
use models::wave::{AttemptOutcome, OutboundWave};
use models::RecordStore;

use crate::error::DispatchError;
use crate::state::AppState;

/// Guards against a pure-core bug turning one carrier turn into an infinite
/// effect round-trip; no phase chain in the dialog is longer than a handful
/// of lookups.
const MAX_EFFECT_CHAIN: u32 = 8;

pub fn action_url(cfg: &crate::config::Config, path: &str, call_sid: &str) -> String {
    dto::twiml::action_url(&cfg.public_base_url, path, call_sid)
}

/// The one place the transfer-number fallback chain is evaluated (§4.8):
/// the call's own `pendingTransfer`, then the provider's configured
/// `transferNumber`, then the service-wide default.
pub fn resolve_transfer_number(state: &CallState, cfg: &crate::config::Config) -> String {
    state
        .pending_transfer
        .as_ref()
        .map(|t| t.representative_phone.clone())
        .filter(|n| !n.is_empty())
        .or_else(|| state.identity.transfer_number.clone().filter(|n| !n.is_empty()))
        .unwrap_or_else(|| cfg.default_transfer_number.clone())
}

async fn execute_effect(records: &dyn RecordStore, effect: Effect) -> Result<(String, ExternalEventPayload), DispatchError> {
    match effect {
        Effect::LookupEmployeeByPhone { phone } => {
            let matches = records.employee_by_phone(&phone).await?;
            Ok(("employee_lookup".to_string(), ExternalEventPayload::EmployeeLookup(matches)))
        }
        Effect::LookupEmployeeByPin { pin } => {
            let matches = records.employee_by_pin(&pin).await?;
            Ok(("pin_lookup".to_string(), ExternalEventPayload::EmployeeLookup(matches)))
        }
        Effect::LookupProvidersForEmployee { employee_id } => {
            let providers = records.providers_for_employee(&employee_id).await?;
            Ok(("providers_lookup".to_string(), ExternalEventPayload::ProvidersLookup(providers)))
        }
        Effect::LookupJobTemplate { provider_id, code } => {
            let template = records.job_template_by_code(&provider_id, &code).await?;
            Ok(("job_template_lookup".to_string(), ExternalEventPayload::JobTemplateLookup(template)))
        }
        Effect::LookupOccurrencesForTemplate { template_id } => {
            let occurrences = records.occurrences_for_template(&template_id).await?;
            Ok(("occurrences_lookup".to_string(), ExternalEventPayload::OccurrencesLookup(occurrences)))
        }
        Effect::MarkOccurrenceUnfilled { occurrence_id } => {
            records.update_occurrence_status(&occurrence_id, OccurrenceStatus::Unfilled).await?;
            Ok(("occurrence_marked_unfilled".to_string(), ExternalEventPayload::Ack))
        }
        Effect::MarkOccurrenceLeaveOpen { occurrence_id } => {
            records.update_occurrence_status(&occurrence_id, OccurrenceStatus::Unfilled).await?;
            Ok(("occurrence_left_open".to_string(), ExternalEventPayload::Ack))
        }
        Effect::CreateOccurrence { template_id, scheduled_at } => {
            let occ = records.create_occurrence(&template_id, scheduled_at).await?;
            Ok(("occurrence_created".to_string(), ExternalEventPayload::OccurrenceWritten(occ)))
        }
        // Never constructed by the current phase set; handled so the effect
        // loop stays total if a future phase starts emitting it.
        Effect::PublishEvent { event_type } => Ok((event_type, ExternalEventPayload::Ack)),
    }
}

/// Drives `fsm::step` until it yields a carrier-facing output, persists the
/// resulting state, and renders the TwiML response.
pub async fn run_turn(app: &AppState, mut state: CallState, mut input: Input) -> Result<Document, DispatchError> {
    let now = app.now();
    let mut chain = 0u32;

    let output = loop {
        let (next_state, output) = fsm::step(state, input, now);
        state = next_state;

        let Output::Effect(effect) = output else {
            break output;
        };

        chain += 1;
        if chain > MAX_EFFECT_CHAIN {
            tracing::error!(call_sid = %state.sid, "effect chain exceeded bound, aborting turn");
            break Output::Hangup("I'm sorry, something went wrong on our end. Please call back shortly.".to_string());
        }

        let (name, payload) = execute_effect(app.records.as_ref(), effect).await?;
        input = Input::ExternalEvent { name, payload };
    };

    if state.is_terminal() && state.phase == models::call_state::Phase::Done {
        if state.direction == Direction::Outbound {
            record_wave_outcome(app, &state).await;
        }
        publish_completion_event(app, &state).await;
    }

    app.save_call(&state).await?;
    Ok(render_output(&output, &state, &app.config))
}

/// An outbound wave call's accept/decline is the canonical outcome for its
/// [`OutboundWave`] attempt; the event bus publish below is best-effort
/// dashboard fan-out, so the wave record itself is written here rather than
/// solely inferred by the dialer from a status callback it might miss.
async fn record_wave_outcome(app: &AppState, state: &CallState) {
    let outcome = match state.work_item.action_type {
        Some(ActionType::AcceptShift) => AttemptOutcome::Accepted,
        Some(ActionType::DeclineShift) => AttemptOutcome::Declined,
        _ => return,
    };
    let (Some(occurrence_id), Some(employee_id)) = (state.work_item.occurrence_id.clone(), state.identity.employee_id.clone()) else {
        return;
    };
    let key = models::wave::wave_key(&occurrence_id);
    let wave = match app.store.get(&key).await {
        Ok(Some(bytes)) => serde_json::from_slice::<OutboundWave>(&bytes).ok(),
        Ok(None) => None,
        Err(error) => {
            tracing::warn!(%error, occurrence_id, "failed to load wave for outcome recording");
            None
        }
    };
    let Some(mut wave) = wave else {
        tracing::warn!(occurrence_id, employee_id, "no in-flight wave found for outbound call outcome");
        return;
    };
    wave.record_outcome(&employee_id, outcome, state.updated_at);
    match serde_json::to_vec(&wave) {
        Ok(bytes) => {
            if let Err(error) = app.store.set(&key, bytes, std::time::Duration::from_secs(models::config::WAVE_TTL_SECS)).await {
                tracing::warn!(%error, occurrence_id, "failed to persist wave outcome");
            }
        }
        Err(error) => tracing::error!(%error, occurrence_id, "failed to serialize wave after outcome update"),
    }
}

async fn publish_completion_event(app: &AppState, state: &CallState) {
    let Some(provider_id) = state.identity.provider_id.clone() else { return };
    let event_type = match state.work_item.action_type {
        Some(ActionType::ReportAbsence) => event_types::ABSENCE_REPORTED,
        Some(ActionType::Reschedule) => event_types::SHIFT_RESCHEDULED,
        Some(ActionType::LeaveOpen) => event_types::SHIFT_LEFT_OPEN,
        Some(ActionType::AcceptShift) => event_types::WAVE_ACCEPTED,
        Some(ActionType::DeclineShift) => event_types::WAVE_DECLINED,
        Some(ActionType::TransferToHuman) | None => return,
    };
    app.events
        .publish(
            &provider_id,
            event_type,
            &state.sid,
            serde_json::json!({ "occurrenceId": state.work_item.occurrence_id }),
        )
        .await;
}

fn render_output(output: &Output, state: &CallState, cfg: &crate::config::Config) -> Document {
    let sid = &state.sid;
    let lang = &state.lang;
    let gather_url = action_url(cfg, "/voice/gather", sid);

    match output {
        Output::AskDtmf { text, timeout_secs, max_digits } => Document::new().gather_with_fallback(
            GatherInput::Dtmf,
            *timeout_secs,
            Some(*max_digits),
            &gather_url,
            Verb::Say { voice: VOICE_DEFAULT.to_string(), lang: lang.clone(), text: text.clone() },
            "I didn't receive any input.",
        ),
        Output::AskSpeech { text, timeout_secs } => Document::new().gather_with_fallback(
            GatherInput::Both,
            *timeout_secs,
            None,
            &gather_url,
            Verb::Say { voice: VOICE_DEFAULT.to_string(), lang: lang.clone(), text: text.clone() },
            "I didn't hear anything.",
        ),
        Output::Say(text) => Document::new().say(VOICE_DEFAULT, lang, text).hangup(),
        Output::Play(url) => Document::new().play(url, 1).hangup(),
        Output::Hangup(text) => Document::new().say(VOICE_DEFAULT, lang, text).hangup(),
        Output::ConnectStream(target) => {
            // Every ConnectStream — transfer hold included — bridges into
            // media-stream first; the transfer orchestrator only takes over
            // once the carrier's `after-connect` callback fires on stream
            // end (services/call-control's transfer_after_connect).
            let mut params = vec![("callSid".to_string(), sid.clone()), ("callType".to_string(), target.call_type.to_string())];
            if let Some(occurrence_id) = &target.occurrence_id {
                params.push(("occurrenceId".to_string(), occurrence_id.clone()));
            }
            if let Some(round) = target.round {
                params.push(("round".to_string(), round.to_string()));
            }
            Document::new().connect_stream(&cfg.media_stream_ws_url, params)
        }
        Output::Noop => {
            if state.phase == models::call_state::Phase::Done {
                Document::new().hangup()
            } else {
                Document::new().redirect(&gather_url)
            }
        }
        Output::Effect(_) => unreachable!("run_turn resolves all effects before rendering"),
    }
}

pub fn new_call_log(sid: &str, direction: Direction, started_at: DateTime<Utc>) -> models::CallLog {
    models::CallLog::new(sid, direction, "voice_dialog", started_at)
}
