//! fresco Transport - HTTP Adapter
//!
//! Remote calls for fetchers. Every call resolves to an
//! [`Outcome`](fresco_core::Outcome): success decodes the JSON body, failures
//! are classified into [`ApiError`](fresco_core::ApiError) as `Network`,
//! `Http` or `Unknown`. Nothing here retries.

pub mod call;
pub mod client;

pub use call::{classify_reqwest_error, decode_response, outcome_call};
pub use client::{RestClient, TransportConfig, TransportError, DEFAULT_REQUEST_TIMEOUT_MS};
