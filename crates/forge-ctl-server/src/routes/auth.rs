// forge-ctl-server/src/routes/auth.rs
// ============================================================================
// Module: Auth Routes
// Description: Issues and echoes bearer tokens. Credential verification
//              beyond a non-empty password is out of scope.
// Purpose: Implement `POST /api/auth/login` and `GET /api/auth/me`.
// Dependencies: axum, forge-ctl-core
// ============================================================================

//! ## Overview
//! There is no credential store in the data model and authentication flows
//! beyond issuing/verifying bearer tokens are explicitly out of scope.
//! Login therefore accepts any non-empty `{email, password}` pair scoped to
//! an optional `tenant_id` (defaulting to a single-tenant deployment's
//! `"default"`) and issues a token binding that identity — the boundary
//! this system owns is the token, not the password check.

use axum::Json;
use axum::extract::State;
use axum::routing::get;
use axum::routing::post;
use forge_ctl_core::Principal;
use forge_ctl_core::TenantId;
use forge_ctl_core::UserId;
use serde::Deserialize;
use serde::Serialize;

use crate::auth::AuthenticatedPrincipal;
use crate::error::ApiError;
use crate::state::AppState;
use crate::token::TokenCodec;

const DEFAULT_TENANT: &str = "default";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
    #[serde(default)]
    tenant_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct UserView {
    email: String,
    tenant_id: TenantId,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    user: UserView,
    token: String,
}

async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> Result<Json<LoginResponse>, ApiError> {
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::BadRequest("email and password are required".to_string()));
    }
    let tenant_id = TenantId::new(body.tenant_id.unwrap_or_else(|| DEFAULT_TENANT.to_string()));
    let principal = Principal::tenant_user(tenant_id.clone(), UserId::new(body.email.clone()));
    let codec = TokenCodec::new(state.signing_key.as_ref());
    let token = codec.issue(&principal);
    Ok(Json(LoginResponse { user: UserView { email: body.email, tenant_id }, token }))
}

#[derive(Debug, Serialize)]
struct MeResponse {
    user: UserView,
    /// A refreshed token is not issued on `me`; present for wire-shape
    /// parity with `login`'s response and always `null` here.
    token: Option<String>,
}

async fn me(AuthenticatedPrincipal(principal): AuthenticatedPrincipal) -> Json<MeResponse> {
    Json(MeResponse { user: UserView { email: principal.user_id.as_str().to_string(), tenant_id: principal.tenant_id }, token: None })
}

/// Builds the `/api/auth/*` router.
pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/login", post(login)).route("/me", get(me))
}
