pub mod auth;
pub mod media_stream;
pub mod sse;
pub mod twiml;
pub mod webhook_forms;

pub use auth::OperatorClaims;
