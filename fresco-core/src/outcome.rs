//! Success/failure container for single fallible async operations.
//!
//! `Outcome` is plain [`Result`] with [`ApiError`] as the default failure
//! type, so `?`, `map`, `map_err`, `and_then` and friends all apply.

use crate::error::ApiError;

/// Result of one fallible operation, typically one fetch attempt.
pub type Outcome<T, E = ApiError> = Result<T, E>;

/// Fold a foreign error type into [`ApiError::Unknown`].
///
/// Fetchers built on APIs that don't speak [`ApiError`] use this at their
/// boundary so only values cross into the store.
pub trait OrUnknown<T> {
    fn or_unknown(self) -> Outcome<T>;
}

impl<T, E> OrUnknown<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn or_unknown(self) -> Outcome<T> {
        self.map_err(|e| ApiError::unknown(e.to_string()))
    }
}
