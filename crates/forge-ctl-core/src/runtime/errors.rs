// forge-ctl-core/src/runtime/errors.rs
// ============================================================================
// Module: Control Plane Errors
// Description: The closed error type engines return, and its HTTP-status
//              classification.
// Purpose: Give every engine call site one error type with one error-kind
//          mapping, instead of ad hoc per-handler branching.
// Dependencies: thiserror, crate::interfaces
// ============================================================================

//! ## Overview
//! Every public engine method returns `Result<T, ForgeError>`. The HTTP
//! boundary (in `forge-ctl-server`) maps [`ForgeError::kind`] to a status
//! code and `{error, code}` body in exactly one place.

use thiserror::Error;

use crate::interfaces::BusError;
use crate::interfaces::CriticError;
use crate::interfaces::DeployError;
use crate::interfaces::ModelAdapterError;
use crate::interfaces::RepoHostError;
use crate::interfaces::RetrievalError;
use crate::interfaces::StoreError;
use crate::interfaces::WorkerError;

/// The closed set of error kinds the error-handling design recognizes.
/// Every [`ForgeError`] variant maps to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input failed preconditions.
    Validation,
    /// Missing or invalid credentials.
    Auth,
    /// Insufficient privilege for an authenticated principal.
    Forbidden,
    /// The referenced record does not exist.
    NotFound,
    /// The action is not legal from the current state.
    StateConflict,
    /// A uniqueness, foreign-key, or DAG-cycle constraint was violated.
    Integrity,
    /// An optimistic claim or lease mismatch.
    Conflict,
    /// A model or external-service timeout/5xx, surfaced after retries.
    Transient,
    /// An external collaborator authoritatively refused the request.
    PermanentUpstream,
    /// Unexpected; always logged with a trace id.
    Internal,
}

/// The control plane's closed error type.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// Input failed preconditions.
    #[error("validation error: {0}")]
    Validation(String),
    /// Missing or invalid credentials.
    #[error("authentication error: {0}")]
    Unauthenticated(String),
    /// Authenticated but not permitted.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// The referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The action is not legal from the current state; carries the state.
    #[error("state conflict: action not legal from state {current_state}")]
    StateConflict {
        /// The state the action was attempted against.
        current_state: String,
    },
    /// A uniqueness, foreign-key, or DAG-cycle constraint was violated.
    #[error("integrity error: {0}")]
    Integrity(String),
    /// An optimistic claim or lease mismatch.
    #[error("conflict: {0}")]
    Conflict(String),
    /// A model or external-service timeout/5xx, surfaced after retries.
    #[error("transient upstream failure: {0}")]
    Transient(String),
    /// An external collaborator authoritatively refused the request.
    #[error("permanent upstream failure: {0}")]
    PermanentUpstream(String),
    /// Unexpected; always logged with a trace id before returning.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ForgeError {
    /// Classifies this error into one of the recognized [`ErrorKind`]s.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Unauthenticated(_) => ErrorKind::Auth,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::StateConflict { .. } => ErrorKind::StateConflict,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Transient(_) => ErrorKind::Transient,
            Self::PermanentUpstream(_) => ErrorKind::PermanentUpstream,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<StoreError> for ForgeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::Integrity(msg) => Self::Integrity(msg),
            StoreError::Storage(msg) => Self::Internal(msg),
        }
    }
}

impl From<ModelAdapterError> for ForgeError {
    fn from(err: ModelAdapterError) -> Self {
        match err {
            ModelAdapterError::Transient(msg) => Self::Transient(msg),
            ModelAdapterError::Permanent(msg) => Self::PermanentUpstream(msg),
        }
    }
}

impl From<WorkerError> for ForgeError {
    fn from(err: WorkerError) -> Self {
        Self::Transient(err.to_string())
    }
}

impl From<CriticError> for ForgeError {
    fn from(err: CriticError) -> Self {
        match err {
            CriticError::Transient(msg) => Self::Transient(msg),
            CriticError::Permanent(msg) => Self::PermanentUpstream(msg),
        }
    }
}

impl From<DeployError> for ForgeError {
    fn from(err: DeployError) -> Self {
        Self::Transient(err.to_string())
    }
}

impl From<RetrievalError> for ForgeError {
    fn from(err: RetrievalError) -> Self {
        Self::Transient(err.to_string())
    }
}

impl From<RepoHostError> for ForgeError {
    fn from(err: RepoHostError) -> Self {
        Self::Transient(err.to_string())
    }
}

impl From<BusError> for ForgeError {
    fn from(err: BusError) -> Self {
        // Absence of subscribers is informational to callers, but a
        // publish call that reaches this conversion point means the
        // caller chose to surface it; treat it as non-fatal internal
        // context rather than failing the transaction it followed.
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_conflict_carries_current_state() {
        let err = ForgeError::StateConflict { current_state: "reviewing".to_string() };
        assert_eq!(err.kind(), ErrorKind::StateConflict);
        assert!(err.to_string().contains("reviewing"));
    }

    #[test]
    fn store_conflict_maps_to_conflict_kind() {
        let err: ForgeError = StoreError::Conflict("stale version".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
