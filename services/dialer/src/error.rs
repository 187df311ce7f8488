use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use models::external::RecordStoreError;
use models::state_store::StateStoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DialerError {
    #[error("state store unavailable: {0}")]
    State(#[from] StateStoreError),
    #[error("record backend unavailable: {0}")]
    Record(#[from] RecordStoreError),
    #[error("carrier call-create request failed: {0}")]
    Carrier(#[from] reqwest::Error),
    #[error("carrier returned an unexpected call-create response: {0}")]
    CarrierResponse(String),
}

/// The carrier only cares that its status callback got a 2xx; internal
/// failures are logged and still answered with 200 so it never retries a
/// callback that already did its job on our side.
impl IntoResponse for DialerError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "wave status callback handling failed");
        StatusCode::OK.into_response()
    }
}
