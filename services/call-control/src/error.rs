use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dto::twiml::Document;

/// Dispatcher-level failure. Carrier-facing handlers never bubble a bare
/// 500 to the carrier — they fall back to a spoken apology and a hangup so
/// the call terminates cleanly instead of timing out on dead air.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("call state unavailable: {0}")]
    StateUnavailable(#[from] models::state_store::StateStoreError),
    #[error("record backend error: {0}")]
    RecordStore(#[from] models::external::RecordStoreError),
    #[error("no call state found for {0}")]
    UnknownCall(String),
    #[error("malformed webhook body: {0}")]
    BadRequest(String),
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        match &self {
            DispatchError::BadRequest(msg) => {
                tracing::warn!(%msg, "rejecting malformed webhook");
                return (StatusCode::BAD_REQUEST, msg.clone()).into_response();
            }
            DispatchError::UnknownCall(sid) => {
                tracing::warn!(call_sid = %sid, "webhook referenced unknown call");
            }
            DispatchError::StateUnavailable(err) => tracing::error!(%err, "state store unavailable"),
            DispatchError::RecordStore(err) => tracing::error!(%err, "record store error"),
        }
        let apology = Document::new()
            .say("Polly.Olivia", "en-AU", "I'm sorry, something went wrong on our end. Please call back shortly.")
            .hangup()
            .render();
        (StatusCode::OK, [("Content-Type", "text/xml")], apology).into_response()
    }
}
