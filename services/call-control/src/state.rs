use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use models::call_state::CallState;
use models::config::{
    CALL_LOCK_MAX_WAIT_MS, CALL_LOCK_RETRY_DELAY_MS, CALL_LOCK_TTL_SECS, CALL_STATE_IDLE_TTL_SECS, CALL_STATE_TTL_SECS,
};
use models::state_store::StateStore;
use models::{EventBus, RecordStore};

use crate::error::DispatchError;

/// Shared across every handler, cloned per request the way the teacher's
/// `AppState` wraps a connection pool behind `Clone`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StateStore>,
    pub records: Arc<dyn RecordStore>,
    pub events: EventBus,
    pub config: Arc<crate::config::Config>,
}

/// Held across one webhook's load-process-save cycle so two callbacks for
/// the same `callSid` (a carrier retry racing the original delivery) never
/// interleave their reads and writes. `key` expires on its own after
/// [`CALL_LOCK_TTL_SECS`] as a crash backstop; `release` clears it early on
/// the happy path.
pub struct CallLockGuard {
    store: Arc<dyn StateStore>,
    key: String,
}

impl CallLockGuard {
    pub async fn release(self) {
        let _ = self.store.del(&self.key).await;
    }
}

impl AppState {
    pub async fn load_call(&self, sid: &str) -> Result<CallState, DispatchError> {
        let bytes = self.store.get(&CallState::state_key(sid)).await?;
        let bytes = bytes.ok_or_else(|| DispatchError::UnknownCall(sid.to_string()))?;
        CallState::from_stored_json(&bytes).map_err(|e| DispatchError::BadRequest(e.to_string()))
    }

    /// TTL shortens once the dialog reaches a terminal phase so abandoned
    /// calls don't linger at the full in-progress TTL. When the stored state
    /// is unchanged apart from the timestamp — a carrier retrying a webhook
    /// it already delivered — `updated_at` is pinned to the previously
    /// stored value instead of advancing, so a duplicate delivery is a no-op
    /// as far as any reader of `updatedAt` is concerned.
    pub async fn save_call(&self, state: &CallState) -> Result<(), DispatchError> {
        let mut state = state.clone();
        if let Ok(Some(bytes)) = self.store.get(&CallState::state_key(&state.sid)).await {
            if let Ok(existing) = CallState::from_stored_json(&bytes) {
                let mut comparable = state.clone();
                comparable.updated_at = existing.updated_at;
                if comparable == existing {
                    state.updated_at = existing.updated_at;
                }
            }
        }
        let ttl = if state.is_terminal() { CALL_STATE_IDLE_TTL_SECS } else { CALL_STATE_TTL_SECS };
        let bytes = state.to_stored_json().map_err(|e| DispatchError::BadRequest(e.to_string()))?;
        self.store.set(&CallState::state_key(&state.sid), bytes, Duration::from_secs(ttl)).await?;
        Ok(())
    }

    /// Claims `lock:call:{sid}` via the same `set_nx` primitive the dialer
    /// uses to claim a wave round, retrying with a short delay until a
    /// concurrent holder releases it or `CALL_LOCK_MAX_WAIT_MS` elapses.
    pub async fn lock_call(&self, sid: &str) -> Result<CallLockGuard, DispatchError> {
        let key = format!("lock:call:{sid}");
        let deadline = tokio::time::Instant::now() + Duration::from_millis(CALL_LOCK_MAX_WAIT_MS);
        loop {
            if self.store.set_nx(&key, b"1".to_vec(), Duration::from_secs(CALL_LOCK_TTL_SECS)).await? {
                return Ok(CallLockGuard { store: self.store.clone(), key });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DispatchError::BadRequest(format!("call {sid} is busy processing another webhook")));
            }
            tokio::time::sleep(Duration::from_millis(CALL_LOCK_RETRY_DELAY_MS)).await;
        }
    }

    pub fn now(&self) -> chrono::DateTime<Utc> {
        Utc::now()
    }
}
