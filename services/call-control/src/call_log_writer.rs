//! Thin re-export of [`models::call_log::writer`], kept as its own module
//! here so call-sites read `call_log_writer::append`/`update` the way the
//! rest of this service's modules are named.
pub use models::call_log::writer::{append, update};
