//! Environment configuration for the outbound wave scheduler, mirroring the
//! `Config::from_env()` shape used across the other services.

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    /// Base URL of `services/call-control`, where `/voice/outbound` renders
    /// the answered-call dialog.
    pub call_control_base_url: String,
    /// This service's own externally reachable base URL, used for the
    /// carrier's `StatusCallback` on wave-dispatched calls.
    pub self_base_url: String,
    pub caller_id: String,
    pub carrier_api_base_url: String,
    pub carrier_account_sid: String,
    pub carrier_auth_token: String,
    /// Providers the scheduler polls for unfilled shifts. The record backend
    /// has no "list all providers" query in its interface (per the design
    /// doc's external-collaborator scoping), so the deployment enumerates
    /// them here.
    pub provider_ids: Vec<String>,
    pub poll_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("DIALER_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8084),
            redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            call_control_base_url: std::env::var("CALL_CONTROL_BASE_URL").unwrap_or_else(|_| "http://localhost:8081".to_string()),
            self_base_url: std::env::var("DIALER_BASE_URL").unwrap_or_else(|_| "http://localhost:8084".to_string()),
            caller_id: std::env::var("CALLER_ID").unwrap_or_else(|_| "+61490000000".to_string()),
            carrier_api_base_url: std::env::var("CARRIER_API_BASE_URL").unwrap_or_else(|_| "https://carrier.invalid/2010-04-01".to_string()),
            carrier_account_sid: std::env::var("CARRIER_ACCOUNT_SID").unwrap_or_default(),
            carrier_auth_token: std::env::var("CARRIER_AUTH_TOKEN").unwrap_or_default(),
            provider_ids: std::env::var("PROVIDER_IDS")
                .ok()
                .map(|raw| raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
                .unwrap_or_default(),
            poll_interval_secs: std::env::var("DIALER_POLL_INTERVAL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(60),
        }
    }
}
