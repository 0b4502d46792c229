//! Error types for fresco operations

use thiserror::Error;

/// Failure of a single remote fetch attempt.
///
/// This is the closed taxonomy every fetcher reports through
/// [`Outcome`](crate::Outcome). Transport adapters classify their native
/// errors into one of these three variants.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// I/O-level failure: no connectivity, connect refused, timeout.
    #[error("Network error: {reason}")]
    Network { reason: String },

    /// The server answered with a non-2xx status.
    #[error("HTTP error {code}: {body}")]
    Http { code: u16, body: String },

    /// Anything else, including malformed response bodies.
    #[error("Unknown API error: {reason}")]
    Unknown { reason: String },
}

impl ApiError {
    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network {
            reason: reason.into(),
        }
    }

    pub fn http(code: u16, body: impl Into<String>) -> Self {
        Self::Http {
            code,
            body: body.into(),
        }
    }

    pub fn unknown(reason: impl Into<String>) -> Self {
        Self::Unknown {
            reason: reason.into(),
        }
    }

    /// Connectivity-class failures are the only ones worth retrying blindly.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Http { code, .. } => *code == 408 || *code == 429 || *code >= 500,
            Self::Unknown { .. } => false,
        }
    }

    /// HTTP status code, if the server answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Persistence layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{backend} backend failure: {reason}")]
    Backend {
        backend: &'static str,
        reason: String,
    },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Deserialization failed: {reason}")]
    Deserialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file: {reason}")]
    Io { reason: String },

    #[error("Failed to parse config: {reason}")]
    Parse { reason: String },
}

/// Master error type for all fresco errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrescoError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

/// Result type alias for fresco operations.
pub type FrescoResult<T> = Result<T, FrescoError>;

impl StorageError {
    /// Encoding a key or value for storage failed.
    pub fn serialization(e: impl std::fmt::Display) -> Self {
        Self::Serialization {
            reason: e.to_string(),
        }
    }

    /// Decoding a stored payload failed.
    pub fn deserialization(e: impl std::fmt::Display) -> Self {
        Self::Deserialization {
            reason: e.to_string(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
