use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for [`CallState`]. Bump and add a migration branch
/// in [`CallState::from_stored_json`] rather than changing field meaning in
/// place.
pub const CALL_STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PhoneAuth,
    PinAuth,
    ProviderSelect,
    ProviderGreeting,
    CollectJobCode,
    ConfirmJobCode,
    JobOptions,
    OccurrenceSelect,
    CollectReason,
    ConfirmLeaveOpen,
    CollectDay,
    CollectMonth,
    CollectTime,
    ConfirmDateTime,
    PendingTransfer,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ReportAbsence,
    Reschedule,
    LeaveOpen,
    TransferToHuman,
    AcceptShift,
    DeclineShift,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub employee_id: Option<String>,
    pub provider_id: Option<String>,
    pub provider_name: Option<String>,
    pub transfer_number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub job_template_id: Option<String>,
    pub patient_id: Option<String>,
    pub occurrence_id: Option<String>,
    pub proposed_date_time: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub action_type: Option<ActionType>,
    /// Wave round this call belongs to, set on `StartOutbound`; `None` for
    /// inbound self-service calls.
    pub round: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTransfer {
    pub representative_phone: String,
    pub caller_phone: String,
}

/// Durable per-call record owned exclusively by the FSM core and mutated only
/// through the webhook dispatcher / media-stream server. Persisted as JSON
/// under `call:{sid}` in the [`crate::state_store::StateStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallState {
    pub version: u32,
    pub sid: String,
    pub direction: Direction,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lang: String,
    pub caller_phone: Option<String>,
    pub phase: Phase,
    pub attempts: HashMap<Phase, u32>,
    pub identity: Identity,
    pub work_item: WorkItem,
    pub pending_transfer: Option<PendingTransfer>,
    /// Carries a raw menu choice across an effect round-trip, e.g. the
    /// provider-select DTMF ordinal while the provider list is re-fetched.
    pub pending_choice: Option<String>,
}

impl CallState {
    pub fn new(sid: impl Into<String>, direction: Direction, lang: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            version: CALL_STATE_VERSION,
            sid: sid.into(),
            direction,
            created_at: now,
            updated_at: now,
            lang: lang.into(),
            caller_phone: None,
            phase: Phase::PhoneAuth,
            attempts: HashMap::new(),
            identity: Identity::default(),
            work_item: WorkItem::default(),
            pending_transfer: None,
            pending_choice: None,
        }
    }

    pub fn state_key(sid: &str) -> String {
        format!("call:{sid}")
    }

    pub fn attempts_for(&self, phase: Phase) -> u32 {
        self.attempts.get(&phase).copied().unwrap_or(0)
    }

    pub fn increment_attempts(&mut self, phase: Phase) -> u32 {
        let entry = self.attempts.entry(phase).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn reset_attempts(&mut self, phase: Phase) {
        self.attempts.remove(&phase);
    }

    pub fn transition(&mut self, phase: Phase, now: DateTime<Utc>) {
        self.phase = phase;
        self.updated_at = now;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Done | Phase::Error)
    }

    /// Deserializes a stored value, applying schema migrations when the
    /// persisted version is older than [`CALL_STATE_VERSION`]. There is
    /// currently only one schema version, so this is a direct decode; future
    /// versions add a `match stored_version { ... }` branch here.
    pub fn from_stored_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn to_stored_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Identifies a media-stream connection's attachment point, carried as
/// `<Parameter>`s on `<Connect><Stream>` and resolved by the media-stream
/// server on the `start` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamAttachment {
    pub call_sid: String,
    pub occurrence_id: Option<String>,
    pub round: Option<u32>,
    pub call_type: StreamCallType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamCallType {
    Inbound,
    Outbound,
}

pub fn new_call_sid() -> String {
    format!("CA{}", Uuid::new_v4().simple())
}
