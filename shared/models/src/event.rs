use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_store::{StateStore, StoreResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub event_type: String,
    pub call_sid: String,
    pub timestamp: DateTime<Utc>,
    pub data_json: serde_json::Value,
}

pub fn event_stream_key(provider_id: &str, date: NaiveDate) -> String {
    format!("events:provider:{provider_id}:{}", date.format("%Y-%m-%d"))
}

/// Known event types published by C5/C7/C8/C9, kept as constants so
/// publishers and dashboards agree on spelling.
pub mod event_types {
    pub const ABSENCE_REPORTED: &str = "absence_reported";
    pub const SHIFT_RESCHEDULED: &str = "shift_rescheduled";
    pub const SHIFT_LEFT_OPEN: &str = "shift_left_open";
    pub const TRANSFER_STARTED: &str = "transfer_started";
    pub const TRANSFER_FAILED: &str = "transfer_failed";
    pub const CALLER_ENQUEUED: &str = "caller_enqueued";
    pub const CALLER_DEQUEUED: &str = "caller_dequeued";
    pub const WAVE_DISPATCHED: &str = "wave_dispatched";
    pub const WAVE_ACCEPTED: &str = "wave_accepted";
    pub const WAVE_DECLINED: &str = "wave_declined";
    pub const WAVE_UNFILLED: &str = "wave_unfilled";
}

/// Thin publisher shared by every service that writes to a provider's event
/// stream. Failures are logged and swallowed: the event bus is a dashboard
/// feed, not a system of record, so a down Redis must never fail the call
/// flow or wave dispatch that triggered the publish.
#[derive(Clone)]
pub struct EventBus {
    store: Arc<dyn StateStore>,
}

impl EventBus {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub async fn publish(&self, provider_id: &str, event_type: &str, call_sid: &str, data: serde_json::Value) {
        let now = Utc::now();
        let record = EventRecord {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            call_sid: call_sid.to_string(),
            timestamp: now,
            data_json: data,
        };
        if let Err(error) = self.append(provider_id, &record, now.date_naive()).await {
            tracing::warn!(%error, provider_id, event_type, "failed to publish event");
        }
    }

    async fn append(&self, provider_id: &str, record: &EventRecord, date: NaiveDate) -> StoreResult<String> {
        let key = event_stream_key(provider_id, date);
        let fields = vec![
            ("id".to_string(), record.id.clone()),
            ("event_type".to_string(), record.event_type.clone()),
            ("call_sid".to_string(), record.call_sid.clone()),
            ("timestamp".to_string(), record.timestamp.to_rfc3339()),
            ("data".to_string(), record.data_json.to_string()),
        ];
        self.store.stream_append(&key, fields).await
    }
}
