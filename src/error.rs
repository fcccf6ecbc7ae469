//! Error types for the cost allocation core.

use thiserror::Error;

use crate::domain::dispatch::{DispatchId, DispatchNumber};

/// Result type alias using the costeo error type.
pub type Result<T> = std::result::Result<T, CosteoError>;

/// Main error type for the cost allocation core.
#[derive(Error, Debug)]
pub enum CosteoError {
    /// Input rejected before any network call (zero exchange rate, zero pooled
    /// FOB, zero-quantity line, margin never reviewed, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// No product lines exist for a dispatch number
    #[error("No product lines found for dispatch {0}")]
    NotFound(DispatchNumber),

    /// Dispatch record missing from the registry
    #[error("Dispatch not found: {0}")]
    DispatchNotFound(DispatchId),

    /// A dispatch cannot be associated with a resolvable company at creation time
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Another allocation run holds the lease on a dispatch in this pool
    #[error("Allocation already in progress for dispatch '{0}'")]
    LeaseHeld(String),

    /// Dispatch status may not move this way
    #[error("Invalid status transition: dispatch {0} is '{1}' and cannot move to '{2}'")]
    InvalidState(DispatchId, String, String),

    /// Catalog or registry read/write failure
    #[error("External service failure: {0}")]
    ExternalService(#[source] anyhow::Error),

    /// Ingestion service call failure
    #[error("Ingestion request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
