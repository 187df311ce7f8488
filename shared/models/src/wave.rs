use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveStatus {
    Pending,
    Dispatched,
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted,
    Declined,
    NoAnswer,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveAttempt {
    pub employee_id: String,
    pub call_sid: Option<String>,
    pub outcome: Option<AttemptOutcome>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundWave {
    pub occurrence_id: String,
    pub wave_number: u32,
    pub scheduled_at: DateTime<Utc>,
    pub status: WaveStatus,
    pub attempts: Vec<WaveAttempt>,
}

impl OutboundWave {
    pub fn new(occurrence_id: impl Into<String>, wave_number: u32, scheduled_at: DateTime<Utc>) -> Self {
        Self { occurrence_id: occurrence_id.into(), wave_number, scheduled_at, status: WaveStatus::Pending, attempts: Vec::new() }
    }

    pub fn has_accepted(&self) -> bool {
        self.attempts.iter().any(|a| a.outcome == Some(AttemptOutcome::Accepted))
    }

    pub fn record_outcome(&mut self, employee_id: &str, outcome: AttemptOutcome, at: DateTime<Utc>) {
        if let Some(attempt) = self.attempts.iter_mut().find(|a| a.employee_id == employee_id && a.outcome.is_none()) {
            attempt.outcome = Some(outcome);
            attempt.at = at;
        } else {
            self.attempts.push(WaveAttempt { employee_id: employee_id.to_string(), call_sid: None, outcome: Some(outcome), at });
        }
        if outcome == AttemptOutcome::Accepted {
            self.status = WaveStatus::Completed;
        }
    }
}

pub fn wave_key(occurrence_id: &str) -> String {
    format!("wave:{occurrence_id}")
}

/// Backoff schedule applied between rounds; index 0 is the delay before the
/// first round (always immediate).
pub fn round_delay_secs(round: u32, schedule: &[u64]) -> u64 {
    schedule.get(round as usize).copied().unwrap_or(*schedule.last().unwrap_or(&0))
}

/// Deterministic pseudo-jitter derived from the occurrence id and attempt
/// number, avoiding a dependency on `rand` for a single bounded jitter value
/// (documented in DESIGN.md).
pub fn jitter_secs(seed: &str, attempt: u32, max_jitter_secs: u64) -> u64 {
    let mut hash: u64 = 1469598103934665603; // FNV offset basis
    for byte in seed.bytes().chain(attempt.to_le_bytes()) {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211); // FNV prime
    }
    if max_jitter_secs == 0 {
        0
    } else {
        hash % max_jitter_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn accepted_outcome_completes_wave() {
        let mut wave = OutboundWave::new("O1", 1, Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap());
        wave.attempts.push(WaveAttempt { employee_id: "E1".into(), call_sid: Some("CA1".into()), outcome: None, at: Utc::now() });
        wave.record_outcome("E1", AttemptOutcome::Accepted, Utc.with_ymd_and_hms(2026, 1, 15, 9, 1, 0).unwrap());
        assert_eq!(wave.status, WaveStatus::Completed);
        assert!(wave.has_accepted());
    }

    #[test]
    fn backoff_schedule_indexes_by_round() {
        let schedule = [0, 900, 2700];
        assert_eq!(round_delay_secs(0, &schedule), 0);
        assert_eq!(round_delay_secs(1, &schedule), 900);
        assert_eq!(round_delay_secs(2, &schedule), 2700);
        assert_eq!(round_delay_secs(5, &schedule), 2700);
    }

    #[test]
    fn jitter_is_deterministic_and_bounded() {
        let a = jitter_secs("O1", 1, 30);
        let b = jitter_secs("O1", 1, 30);
        assert_eq!(a, b);
        assert!(a < 30);
    }
}
