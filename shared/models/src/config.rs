//! Defaults for the environment-style configuration enumerated in the design
//! doc. Each service builds its own `Config::from_env()` using these as
//! fallbacks, mirroring the teacher services' `unwrap_or_else` convention.

pub const MAX_ATTEMPTS_PER_FIELD: u32 = 2;
pub const GATHER_TIMEOUT_SECS: u64 = 15;
pub const DIAL_TIMEOUT_SECS: u64 = 30;
pub const CALL_STATE_TTL_SECS: u64 = 3600;
pub const CALL_STATE_IDLE_TTL_SECS: u64 = 900;
pub const CALL_LOCK_TTL_SECS: u64 = 10;
pub const CALL_LOCK_RETRY_DELAY_MS: u64 = 25;
pub const CALL_LOCK_MAX_WAIT_MS: u64 = 2000;
pub const HOLD_AVG_CALL_SECS: u64 = 180;
pub const WAVE_ROUNDS: u32 = 3;
pub const WAVE_BACKOFF_SECS: [u64; 3] = [0, 900, 2700];
pub const WAVE_CONCURRENCY: usize = 2;
pub const WAVE_EMPLOYEES_PER_ROUND: usize = 3;
pub const WAVE_ROUND_SETTLE_SECS: u64 = DIAL_TIMEOUT_SECS + 15;
pub const WAVE_MAX_JITTER_SECS: u64 = 30;
pub const WAVE_TTL_SECS: u64 = 21_600;
pub const SSE_POLL_INTERVAL_SECS: u64 = 2;
pub const SSE_KEEPALIVE_SECS: u64 = 15;
pub const SSE_MAX_SUBSCRIBERS_PER_PROVIDER: usize = 16;
pub const VAD_SILENCE_MS: u64 = 800;
pub const VAD_ENERGY_THRESHOLD: f32 = 0.02;
pub const LANG_DEFAULT: &str = "en-AU";
pub const VOICE_DEFAULT: &str = "Polly.Olivia";
pub const CALL_LOG_MAX_RETRIES: u32 = 3;
