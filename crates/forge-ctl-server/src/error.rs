// forge-ctl-server/src/error.rs
// ============================================================================
// Module: HTTP Error Mapping
// Description: Maps ForgeError's closed error-kind taxonomy to HTTP status
//              codes and a uniform JSON error body.
// Purpose: Give every handler one error type and one mapping, never ad hoc
//          per-handler status branching.
// Dependencies: forge-ctl-core, axum, serde_json
// ============================================================================

//! ## Overview
//! [`ApiError`] is the one error type every handler in [`crate::routes`]
//! returns. It wraps [`ForgeError`] plus the handful of boundary-only
//! failure modes (bad request bodies, authentication) that never occur
//! inside the engines. The [`axum::response::IntoResponse`] impl is the
//! single place §7's kind-to-status mapping is expressed.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use forge_ctl_core::ErrorKind;
use forge_ctl_core::ForgeError;
use serde_json::json;

use crate::token::TokenError;

/// The one error type every HTTP/WebSocket handler returns.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A classified engine-level failure.
    #[error(transparent)]
    Forge(#[from] ForgeError),
    /// The request body failed to parse or validate before reaching an
    /// engine call.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// No bearer token was presented, or it failed verification.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        Self::Unauthenticated(err.to_string())
    }
}

impl ApiError {
    /// Maps this error to the status code and `{error, code}` body §7
    /// pins for its kind.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "validation"),
            Self::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "auth"),
            Self::Forge(err) => match err.kind() {
                ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation"),
                ErrorKind::Auth => (StatusCode::UNAUTHORIZED, "auth"),
                ErrorKind::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
                ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
                ErrorKind::StateConflict => (StatusCode::CONFLICT, "state_conflict"),
                ErrorKind::Integrity => (StatusCode::CONFLICT, "integrity"),
                ErrorKind::Conflict => (StatusCode::CONFLICT, "conflict"),
                ErrorKind::Transient => (StatusCode::SERVICE_UNAVAILABLE, "transient"),
                ErrorKind::PermanentUpstream => (StatusCode::BAD_GATEWAY, "permanent_upstream"),
                ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, code, "internal error crossing HTTP boundary");
        } else {
            tracing::debug!(error = %self, code, "request failed");
        }
        let body = json!({"error": self.to_string(), "code": code});
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_conflict_maps_to_409_with_state_conflict_code() {
        let err = ApiError::Forge(ForgeError::StateConflict { current_state: "reviewing".to_string() });
        let (status, code) = err.status_and_code();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "state_conflict");
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = ApiError::Forge(ForgeError::NotFound("ticket t1".to_string()));
        let (status, _) = err.status_and_code();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn unauthenticated_maps_to_401() {
        let err = ApiError::Unauthenticated("missing bearer token".to_string());
        let (status, code) = err.status_and_code();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(code, "auth");
    }
}
