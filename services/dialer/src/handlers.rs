use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Form;
use dto::webhook_forms::{DialOutcome, WaveStatusForm, WaveStatusQuery};
use models::wave::{wave_key, AttemptOutcome, OutboundWave};

use crate::error::DialerError;
use crate::state::AppState;

pub async fn health() -> &'static str {
    "ok"
}

/// Carrier status callback for a wave-dispatched call that never reaches
/// the call-control answer webhook (busy, no-answer, failed, canceled).
/// An answered call's accept/decline is instead recorded directly by
/// call-control's dispatcher, so this handler only fills in outcomes for
/// attempts still `outcome: None` and never overwrites one already set.
pub async fn wave_status(
    State(app): State<AppState>,
    Query(query): Query<WaveStatusQuery>,
    Form(form): Form<WaveStatusForm>,
) -> Result<impl IntoResponse, DialerError> {
    let Some(outcome) = DialOutcome::parse(&form.call_status) else {
        return Ok(axum::http::StatusCode::OK);
    };
    if outcome.is_success() {
        // The call was answered; call-control's FSM owns the accept/decline
        // outcome for this attempt once the dialog concludes.
        return Ok(axum::http::StatusCode::OK);
    }

    let attempt_outcome = match outcome {
        DialOutcome::Busy => AttemptOutcome::Failed,
        DialOutcome::NoAnswer => AttemptOutcome::NoAnswer,
        DialOutcome::Failed | DialOutcome::Canceled => AttemptOutcome::Failed,
        DialOutcome::Answered => unreachable!("handled above"),
    };

    let key = wave_key(&query.occurrence_id);
    let Some(bytes) = app.store.get(&key).await? else {
        tracing::warn!(occurrence_id = %query.occurrence_id, "wave status callback for unknown wave");
        return Ok(axum::http::StatusCode::OK);
    };
    let mut wave: OutboundWave = match serde_json::from_slice(&bytes) {
        Ok(wave) => wave,
        Err(error) => {
            tracing::error!(%error, occurrence_id = %query.occurrence_id, "failed to deserialize wave on status callback");
            return Ok(axum::http::StatusCode::OK);
        }
    };

    wave.record_outcome(&query.employee_id, attempt_outcome, chrono::Utc::now());

    let payload = serde_json::to_vec(&wave).map_err(|e| DialerError::CarrierResponse(e.to_string()))?;
    app.store.set(&key, payload, std::time::Duration::from_secs(models::config::WAVE_TTL_SECS)).await?;

    Ok(axum::http::StatusCode::OK)
}
