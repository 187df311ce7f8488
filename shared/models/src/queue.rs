use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::HOLD_AVG_CALL_SECS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub call_sid: String,
    pub caller_phone: String,
    pub caller_name: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub job_info: Option<String>,
}

pub fn queue_key(provider_id: &str) -> String {
    format!("queue:{provider_id}")
}

/// `position * AVG_CALL_SECONDS`. `position` is 1-based.
pub fn estimated_wait_secs(position: u64, avg_call_secs: u64) -> u64 {
    position.saturating_mul(avg_call_secs)
}

pub fn estimated_wait_secs_default(position: u64) -> u64 {
    estimated_wait_secs(position, HOLD_AVG_CALL_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_scales_with_position() {
        assert_eq!(estimated_wait_secs(1, 180), 180);
        assert_eq!(estimated_wait_secs(3, 180), 540);
    }
}
