use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call_state::Direction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLog {
    pub sid: String,
    pub provider_id: Option<String>,
    pub employee_id: Option<String>,
    pub direction: Direction,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub seconds: Option<i64>,
    pub recording_url: Option<String>,
    pub detected_intent: Option<String>,
    pub purpose: String,
    pub raw_payload: serde_json::Value,
    pub related_occurrence_id: Option<String>,
}

impl CallLog {
    pub fn new(sid: impl Into<String>, direction: Direction, purpose: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            sid: sid.into(),
            provider_id: None,
            employee_id: None,
            direction,
            started_at,
            ended_at: None,
            seconds: None,
            recording_url: None,
            detected_intent: None,
            purpose: purpose.into(),
            raw_payload: serde_json::Value::Null,
            related_occurrence_id: None,
        }
    }

    pub fn mark_ended(&mut self, ended_at: DateTime<Utc>) {
        self.ended_at = Some(ended_at);
        self.seconds = Some((ended_at - self.started_at).num_seconds().max(0));
    }
}

pub fn call_log_key(sid: &str) -> String {
    format!("callog:{sid}")
}

/// Sentinel recording-url value written when the carrier's recording upload
/// has not landed yet; a background task retries separately (out of core
/// scope per the design doc's error-handling table).
pub const RECORDING_PENDING_SENTINEL: &str = "pending-upload";

/// Call-Log Writer (C11): a bounded-retry wrapper around
/// [`crate::external::RecordStore`]'s `append_call_log`/`update_call_log`.
/// Shared by every service that opens or closes a call leg (call-control's
/// carrier webhooks, the dialer's wave attempts) so retry/backoff policy
/// lives in one place. Call-log writes are best-effort from the caller's
/// point of view — a failure here must never interrupt or re-prompt them —
/// but worth a few retries since the record backend's write path is the
/// system of record for billing and reporting.
pub mod writer {
    use crate::config::CALL_LOG_MAX_RETRIES;
    use crate::external::{CallLogUpdate, RecordStore};
    use crate::CallLog;

    pub async fn append(records: &dyn RecordStore, log: &CallLog) {
        for attempt in 1..=CALL_LOG_MAX_RETRIES {
            match records.append_call_log(log).await {
                Ok(()) => return,
                Err(error) if attempt == CALL_LOG_MAX_RETRIES => {
                    tracing::error!(%error, call_sid = %log.sid, attempt, "giving up on call log append");
                }
                Err(error) => {
                    tracing::warn!(%error, call_sid = %log.sid, attempt, "retrying call log append");
                }
            }
        }
    }

    pub async fn update(records: &dyn RecordStore, sid: &str, update: CallLogUpdate) {
        for attempt in 1..=CALL_LOG_MAX_RETRIES {
            match records.update_call_log(sid, update.clone()).await {
                Ok(()) => return,
                Err(error) if attempt == CALL_LOG_MAX_RETRIES => {
                    tracing::error!(%error, call_sid = %sid, attempt, "giving up on call log update");
                }
                Err(error) => {
                    tracing::warn!(%error, call_sid = %sid, attempt, "retrying call log update");
                }
            }
        }
    }
}
