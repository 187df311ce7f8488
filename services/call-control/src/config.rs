//! Environment-derived configuration, read once at boot. Falls back to
//! development defaults the same way the teacher's services read
//! `DATABASE_URL`/`API_PORT` with `unwrap_or_else`.

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub public_base_url: String,
    pub caller_id: String,
    pub media_stream_ws_url: String,
    /// Last resort of the transfer-number resolution chain (§4.8): used only
    /// when neither the call's `pendingTransfer` nor the provider's own
    /// `transferNumber` is set.
    pub default_transfer_number: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("CALL_CONTROL_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8081),
            redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            public_base_url: std::env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:8081".to_string()),
            caller_id: std::env::var("CALLER_ID").unwrap_or_else(|_| "+61490000000".to_string()),
            media_stream_ws_url: std::env::var("MEDIA_STREAM_WS_URL")
                .unwrap_or_else(|_| "wss://localhost:8083/stream".to_string()),
            default_transfer_number: std::env::var("DEFAULT_TRANSFER_NUMBER")
                .unwrap_or_else(|_| "+61490000001".to_string()),
        }
    }
}
