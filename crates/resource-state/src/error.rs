use crate::metadata::Pointer;

/// Errors returned by [`State`](crate::State) operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The resource does not exist.
    #[error("resource {0} doesn't exist")]
    NotFound(Pointer),
    /// The resource already exists, or the caller's version is stale.
    #[error("resource {pointer} conflict: {reason}")]
    Conflict {
        /// Resource in conflict.
        pointer: Pointer,
        /// What conflicted.
        reason: String,
    },
    /// The resource is owned by another producer.
    #[error("resource {pointer} is owned by {owner:?}, not {caller:?}")]
    OwnerConflict {
        /// Resource in conflict.
        pointer: Pointer,
        /// Current owner.
        owner: String,
        /// Owner the caller presented.
        caller: String,
    },
    /// The resource still has finalizers attached and can't be destroyed.
    #[error("resource {pointer} has pending finalizers {finalizers:?}")]
    HasFinalizers {
        /// Resource being destroyed.
        pointer: Pointer,
        /// Finalizers still attached.
        finalizers: Vec<String>,
    },
    /// The resource is tearing down and can't be updated.
    #[error("resource {0} is tearing down")]
    PhaseConflict(Pointer),
    /// The stored spec doesn't match the requested type.
    #[error("resource {pointer} doesn't match the expected schema: {source}")]
    SchemaMismatch {
        /// Resource being converted.
        pointer: Pointer,
        /// Underlying conversion error.
        source: serde_json::Error,
    },
    /// The call was interrupted by context cancellation.
    #[error("context cancelled")]
    Cancelled,
    /// The call didn't complete in time.
    #[error("timed out waiting for {0}")]
    Timeout(String),
}

impl Error {
    /// Returns true if the error reports a missing resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Returns true if the error reports a create/update conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Returns true if the error is a bare context cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Convenience alias for store results.
pub type Result<T> = std::result::Result<T, Error>;
