// forge-ctl-server/src/auth.rs
// ============================================================================
// Module: Request Authentication
// Description: Resolves the authenticated Principal from a bearer token on
//              every request, as an axum extractor.
// Purpose: Make authentication a type-level precondition on a handler's
//          signature rather than a line inside its body.
// Dependencies: axum, forge-ctl-core, crate::{state, token, error}
// ============================================================================

//! ## Overview
//! The tenant/user is resolved from a bearer token once at the HTTP
//! boundary and passed as an explicit parameter into the engines;
//! [`AuthenticatedPrincipal`] is that boundary. Handlers that
//! need an authenticated caller simply add it to their extractor list —
//! axum runs extraction before the handler body, so a missing or invalid
//! token never reaches engine code.

use axum::extract::FromRef;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use forge_ctl_core::Principal;

use crate::error::ApiError;
use crate::state::AppState;
use crate::token::TokenCodec;

/// The authenticated caller, resolved from the request's bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal(pub Principal);

impl<S> FromRequestParts<S> for AuthenticatedPrincipal
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let token = bearer_token(parts).ok_or_else(|| ApiError::Unauthenticated("missing bearer token".to_string()))?;
        let codec = TokenCodec::new(app_state.signing_key.as_ref());
        let principal = codec.verify(&token)?;
        Ok(Self(principal))
    }
}

/// Extracts the bearer token from the `Authorization` header, falling back
/// to a `forge_ctl_token` cookie for browser clients that cannot set
/// custom headers on a WebSocket upgrade request.
fn bearer_token(parts: &Parts) -> Option<String> {
    if let Some(header) = parts.headers.get(axum::http::header::AUTHORIZATION) {
        let value = header.to_str().ok()?;
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    cookie_token(parts)
}

fn cookie_token(parts: &Parts) -> Option<String> {
    let raw = parts.headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "forge_ctl_token").then(|| value.to_string())
    })
}

/// Extracts a bearer token carried in a query parameter, used by the
/// WebSocket upgrade path where no `Authorization` header can be set.
#[must_use]
pub fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == "token").then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_from_query_extracts_the_token_parameter() {
        assert_eq!(token_from_query("token=abc.def&other=1"), Some("abc.def".to_string()));
        assert_eq!(token_from_query("other=1"), None);
    }
}
