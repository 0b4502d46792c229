//! fresco Core - Data Types
//!
//! Pure data structures shared by every fresco crate: the three-state
//! [`DataResource`], the [`Outcome`] of one fetch attempt, freshness
//! strategies, the persisted [`CachedEntry`], and the error taxonomy.
//! No I/O lives here.

pub mod entry;
pub mod error;
pub mod freshness;
pub mod outcome;
pub mod resource;
pub mod stream;

pub use entry::CachedEntry;
pub use error::{ApiError, ConfigError, FrescoError, FrescoResult, StorageError};
pub use freshness::{FreshnessStrategy, KeyedFreshnessStrategy, RefreshStrategy};
pub use outcome::{OrUnknown, Outcome};
pub use resource::{combine2, combine3, combine_data_resources, DataResource};
pub use stream::{first_outcome, DataResourceStreamExt};
