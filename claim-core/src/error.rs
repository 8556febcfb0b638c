//! Error types for the claim core

use std::time::Duration;
use thiserror::Error;

/// Result type for store and engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Store-level errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// No authenticated actor behind the request
    #[error("Unauthenticated request")]
    Unauthenticated,

    /// Rejected "post listing" input
    #[error("Invalid listing: {0}")]
    InvalidListing(String),

    /// Listing ID already present
    #[error("Duplicate listing: {0}")]
    DuplicateListing(String),

    /// Invariant violation (negative stock, status drift, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The attempt was abandoned before commit
    #[error("Transaction cancelled before commit")]
    Cancelled,

    /// The store did not answer within the bounded window
    #[error("Store timed out after {0:?}")]
    Timeout(Duration),

    /// Concurrency error (blocking task panicked, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Why a claim attempt failed
///
/// `Unauthorized`, `NotFound`, `Expired` and `OutOfStock` are expected
/// outcomes. `StoreUnavailable` and `Internal` need operator attention.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimFailure {
    /// No valid actor
    #[error("Unauthorized: no authenticated actor")]
    Unauthorized,

    /// Listing does not exist
    #[error("Listing not found")]
    NotFound,

    /// Deadline passed
    #[error("Listing expired")]
    Expired,

    /// Quantity already 0 or consumed by a concurrent winner
    #[error("Listing out of stock")]
    OutOfStock,

    /// Transactional backend unreachable or timed out
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Invariant violation; nothing was committed
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClaimFailure {
    /// Should be surfaced to operators
    pub fn is_operator_visible(&self) -> bool {
        matches!(
            self,
            ClaimFailure::StoreUnavailable(_) | ClaimFailure::Internal(_)
        )
    }

    /// Retrying the same listing can never succeed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClaimFailure::NotFound | ClaimFailure::Expired | ClaimFailure::OutOfStock
        )
    }

    /// Stable label (metrics, logs)
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimFailure::Unauthorized => "unauthorized",
            ClaimFailure::NotFound => "not_found",
            ClaimFailure::Expired => "expired",
            ClaimFailure::OutOfStock => "out_of_stock",
            ClaimFailure::StoreUnavailable(_) => "store_unavailable",
            ClaimFailure::Internal(_) => "internal",
        }
    }
}

impl From<Error> for ClaimFailure {
    fn from(err: Error) -> Self {
        match err {
            Error::Unauthenticated => ClaimFailure::Unauthorized,
            Error::Storage(_)
            | Error::Io(_)
            | Error::Cancelled
            | Error::Timeout(_)
            | Error::Concurrency(_) => ClaimFailure::StoreUnavailable(err.to_string()),
            Error::Serialization(_)
            | Error::InvalidListing(_)
            | Error::DuplicateListing(_)
            | Error::InvariantViolation(_)
            | Error::Metrics(_)
            | Error::Config(_) => ClaimFailure::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        assert!(!ClaimFailure::OutOfStock.is_operator_visible());
        assert!(ClaimFailure::OutOfStock.is_terminal());
        assert!(!ClaimFailure::Unauthorized.is_terminal());
        assert!(ClaimFailure::Internal("x".into()).is_operator_visible());
        assert!(ClaimFailure::StoreUnavailable("x".into()).is_operator_visible());
    }

    #[test]
    fn test_error_mapping() {
        let timeout = ClaimFailure::from(Error::Timeout(Duration::from_millis(5)));
        assert!(matches!(timeout, ClaimFailure::StoreUnavailable(_)));

        let drift = ClaimFailure::from(Error::InvariantViolation("negative".into()));
        assert!(matches!(drift, ClaimFailure::Internal(_)));
        assert_eq!(drift.as_str(), "internal");
    }
}
