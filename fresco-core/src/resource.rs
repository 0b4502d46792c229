//! The three-state lifecycle of an observed value.
//!
//! A [`DataResource`] is what a store stream emits: `Loading` while a fetch is
//! underway, `Data` for a cached or freshly fetched value, `Error` when a
//! fetch attempt failed. Consumers match on it exhaustively.
//!
//! Combining several resources follows a fixed precedence: loading dominates
//! error, error dominates data. A view should not show a stale error while a
//! retry is in flight.

use crate::error::ApiError;
use crate::outcome::Outcome;

/// Lifecycle state of an observed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataResource<T, E = ApiError> {
    /// A fetch is in flight and nothing newer is known yet.
    Loading,
    /// A cached or freshly fetched value.
    Data(T),
    /// The last fetch attempt failed.
    Error(E),
}

impl<T, E> DataResource<T, E> {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Borrow the data payload, if any.
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Data(value) => Some(value),
            _ => None,
        }
    }

    /// Consume and return the data payload, if any.
    pub fn into_data(self) -> Option<T> {
        match self {
            Self::Data(value) => Some(value),
            _ => None,
        }
    }

    /// Borrow the error, if any.
    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Data payload, or `default` for `Loading` and `Error`.
    pub fn data_or_else(self, default: T) -> T {
        match self {
            Self::Data(value) => value,
            _ => default,
        }
    }

    pub fn as_ref(&self) -> DataResource<&T, &E> {
        match self {
            Self::Loading => DataResource::Loading,
            Self::Data(value) => DataResource::Data(value),
            Self::Error(e) => DataResource::Error(e),
        }
    }

    /// Transform the data payload, leaving `Loading` and `Error` untouched.
    pub fn map<U, F>(self, f: F) -> DataResource<U, E>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Loading => DataResource::Loading,
            Self::Data(value) => DataResource::Data(f(value)),
            Self::Error(e) => DataResource::Error(e),
        }
    }

    pub fn map_error<E2, F>(self, f: F) -> DataResource<T, E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::Loading => DataResource::Loading,
            Self::Data(value) => DataResource::Data(value),
            Self::Error(e) => DataResource::Error(f(e)),
        }
    }

    /// Chain a resource-producing step onto the data payload.
    pub fn and_then<U, F>(self, f: F) -> DataResource<U, E>
    where
        F: FnOnce(T) -> DataResource<U, E>,
    {
        match self {
            Self::Loading => DataResource::Loading,
            Self::Data(value) => f(value),
            Self::Error(e) => DataResource::Error(e),
        }
    }

    /// Terminal view of the resource: `None` while loading.
    pub fn into_outcome(self) -> Option<Outcome<T, E>> {
        match self {
            Self::Loading => None,
            Self::Data(value) => Some(Ok(value)),
            Self::Error(e) => Some(Err(e)),
        }
    }
}

impl<T, E> From<Outcome<T, E>> for DataResource<T, E> {
    fn from(outcome: Outcome<T, E>) -> Self {
        match outcome {
            Ok(value) => Self::Data(value),
            Err(e) => Self::Error(e),
        }
    }
}

// ============================================================================
// COMBINATORS
// ============================================================================

/// Combine N resources into one.
///
/// Any `Loading` input makes the result `Loading`. Otherwise the first
/// `Error` in input order wins. Otherwise every input is `Data` and the
/// result is `Data(transform(values))`, values in input order.
pub fn combine_data_resources<T, E, R, F>(
    resources: impl IntoIterator<Item = DataResource<T, E>>,
    transform: F,
) -> DataResource<R, E>
where
    F: FnOnce(Vec<T>) -> R,
{
    let mut values = Vec::new();
    let mut first_error = None;

    for resource in resources {
        match resource {
            DataResource::Loading => return DataResource::Loading,
            DataResource::Error(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            DataResource::Data(value) => values.push(value),
        }
    }

    match first_error {
        Some(e) => DataResource::Error(e),
        None => DataResource::Data(transform(values)),
    }
}

/// Two-input form of [`combine_data_resources`] for heterogeneous payloads.
pub fn combine2<A, B, E, R, F>(
    a: DataResource<A, E>,
    b: DataResource<B, E>,
    transform: F,
) -> DataResource<R, E>
where
    F: FnOnce(A, B) -> R,
{
    match (a, b) {
        (DataResource::Loading, _) | (_, DataResource::Loading) => DataResource::Loading,
        (DataResource::Error(e), _) | (_, DataResource::Error(e)) => DataResource::Error(e),
        (DataResource::Data(a), DataResource::Data(b)) => DataResource::Data(transform(a, b)),
    }
}

/// Three-input form of [`combine_data_resources`] for heterogeneous payloads.
pub fn combine3<A, B, C, E, R, F>(
    a: DataResource<A, E>,
    b: DataResource<B, E>,
    c: DataResource<C, E>,
    transform: F,
) -> DataResource<R, E>
where
    F: FnOnce(A, B, C) -> R,
{
    match (a, b, c) {
        (DataResource::Loading, _, _)
        | (_, DataResource::Loading, _)
        | (_, _, DataResource::Loading) => DataResource::Loading,
        (DataResource::Error(e), _, _)
        | (_, DataResource::Error(e), _)
        | (_, _, DataResource::Error(e)) => DataResource::Error(e),
        (DataResource::Data(a), DataResource::Data(b), DataResource::Data(c)) => {
            DataResource::Data(transform(a, b, c))
        }
    }
}
