//! Aggregation error model.

use thiserror::Error;

use stockforge_core::{DomainError, StorageUnitId};

use crate::repository::RepositoryError;

/// Failure of a whole aggregation call.
///
/// Every variant is terminal for the call that produced it: a bad node
/// anywhere in a subtree fails the subtree, never a partial result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AggregationError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("storage unit {storage_id} is its own ancestor")]
    CycleDetected { storage_id: StorageUnitId },

    #[error("storage unit {storage_id} lies deeper than the maximum depth of {max_depth}")]
    DepthExceeded {
        storage_id: StorageUnitId,
        max_depth: usize,
    },

    #[error("storage unit {child} is listed under {parent} but records a different parent")]
    InconsistentHierarchy {
        parent: StorageUnitId,
        child: StorageUnitId,
        actual: Option<StorageUnitId>,
    },

    #[error("repository unavailable after {attempts} attempt(s): {message}")]
    Unavailable { attempts: u32, message: String },

    #[error("repository failure: {0}")]
    Backend(String),
}

impl AggregationError {
    /// Whether the caller may reasonably try the whole call again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AggregationError::Unavailable { .. })
    }

    pub(crate) fn from_repository(err: RepositoryError, attempts: u32) -> Self {
        match err {
            RepositoryError::InvalidId(msg) => AggregationError::InvalidId(msg),
            RepositoryError::NotFound { entity, id } => AggregationError::NotFound { entity, id },
            RepositoryError::Unavailable(message) => AggregationError::Unavailable { attempts, message },
            RepositoryError::Backend(msg) => AggregationError::Backend(msg),
        }
    }
}

impl From<RepositoryError> for AggregationError {
    fn from(err: RepositoryError) -> Self {
        Self::from_repository(err, 1)
    }
}

impl From<DomainError> for AggregationError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidId(msg) => AggregationError::InvalidId(msg),
        }
    }
}
