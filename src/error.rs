//! Error types for the network driver.

use std::path::PathBuf;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the driver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Claim Protocol Errors
    // =========================================================================
    /// Claim has no allocation result recorded upstream. Prepare was invoked
    /// before the orchestrator allocated the claim; the caller must not retry
    /// with the same state.
    #[error("claim {namespace}/{name} not allocated")]
    ClaimNotAllocated { namespace: String, name: String },

    /// The fetched claim object's identity no longer matches the reference
    /// the caller supplied (the claim was deleted and recreated).
    #[error("claim {namespace}/{name} got replaced: expected uid {expected}, found {found}")]
    ClaimIdentityMismatch {
        namespace: String,
        name: String,
        expected: String,
        found: String,
    },

    /// Retrieving the claim object from the orchestrator failed.
    #[error("failed to retrieve claim {namespace}/{name}: {reason}")]
    ClaimFetch {
        namespace: String,
        name: String,
        reason: String,
    },

    /// A device configuration blob addressed to this driver did not parse.
    #[error("invalid device configuration for claim {namespace}/{name}: {reason}")]
    InvalidDeviceConfig {
        namespace: String,
        name: String,
        reason: String,
    },

    // =========================================================================
    // Device Move Errors
    // =========================================================================
    /// Interface absent at a resolution step.
    #[error("link not found: {0}")]
    LinkNotFound(String),

    /// Renaming an interface failed because the target name is taken.
    #[error("failed to rename link '{name}' to '{target}': {reason}")]
    RenameCollision {
        name: String,
        target: String,
        reason: String,
    },

    /// Switching the executing thread into a network namespace failed.
    #[error("failed to switch into namespace {path}: {reason}")]
    NamespaceSwitchFailed { path: PathBuf, reason: String },

    /// Rollback itself failed; the interface is in a logged, non-original
    /// state and may need operator attention.
    #[error("failed to restore link '{name}' after error: {reason}")]
    StateRestoreFailed { name: String, reason: String },

    /// A kernel link operation failed.
    #[error("failed to {op} link '{name}': {reason}")]
    LinkOperation {
        op: String,
        name: String,
        reason: String,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Driver configuration is invalid.
    #[error("invalid driver configuration: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // =========================================================================
    // Timeout Errors
    // =========================================================================
    /// Operation timed out.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for a failed kernel link operation.
    pub fn link_op(op: impl Into<String>, name: impl Into<String>, reason: impl ToString) -> Self {
        Error::LinkOperation {
            op: op.into(),
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}
