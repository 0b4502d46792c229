//! Helpers over streams of [`DataResource`].

use futures_util::future::ready;
use futures_util::stream::{BoxStream, Stream, StreamExt};

use crate::error::ApiError;
use crate::outcome::Outcome;
use crate::resource::DataResource;

/// Combinators for `Stream<Item = DataResource<T, E>>`.
pub trait DataResourceStreamExt<T, E>: Stream<Item = DataResource<T, E>> + Send + Sized + 'static {
    /// Map the data payload of every item.
    fn map_data<U, F>(self, mut f: F) -> BoxStream<'static, DataResource<U, E>>
    where
        T: Send + 'static,
        E: Send + 'static,
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        self.map(move |resource| resource.map(&mut f)).boxed()
    }

    /// Drop `Loading` items.
    fn filter_not_loading(self) -> BoxStream<'static, DataResource<T, E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        self.filter(|resource| ready(!resource.is_loading())).boxed()
    }

    /// Drop `Loading` items and surface the rest as outcomes.
    fn data_or_error(self) -> BoxStream<'static, Outcome<T, E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        self.filter_map(|resource| ready(resource.into_outcome())).boxed()
    }
}

impl<S, T, E> DataResourceStreamExt<T, E> for S where
    S: Stream<Item = DataResource<T, E>> + Send + Sized + 'static
{
}

/// Await the first non-loading item of a stream as an outcome.
///
/// A stream that completes without ever producing data or an error yields
/// `ApiError::Unknown`.
pub async fn first_outcome<S, T>(stream: S) -> Outcome<T>
where
    S: Stream<Item = DataResource<T>>,
{
    let mut stream = std::pin::pin!(stream);
    while let Some(resource) = stream.next().await {
        if let Some(outcome) = resource.into_outcome() {
            return outcome;
        }
    }
    Err(ApiError::unknown("stream completed without a value"))
}
