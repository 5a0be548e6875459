// forge-ctl-server/src/routes/hitl.rs
// ============================================================================
// Module: HITL Routes
// Description: Session creation, dialogue, approval, and build-start routes.
// Purpose: Implement the `/api/hitl*` surface of the client HTTP interface.
// Dependencies: axum, forge-ctl-core, crate::{auth, error, state}
// ============================================================================

//! ## Overview
//! Every handler here does exactly one thing: extract the authenticated
//! principal and the request body, call the matching
//! [`forge_ctl_core::SessionEngine`] method, and serialize the result.
//! State-machine legality, ownership checks, and event publication all
//! happen inside the engine, never here.

use axum::Json;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use forge_ctl_core::CreateSessionRequest;
use forge_ctl_core::Message;
use forge_ctl_core::Session;
use forge_ctl_core::SessionFilter;
use forge_ctl_core::SessionId;
use forge_ctl_core::SessionState;
use serde::Deserialize;
use serde::Serialize;

use crate::auth::AuthenticatedPrincipal;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct RespondRequest {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RequestRevisionRequest {
    feedback: String,
}

#[derive(Debug, Deserialize)]
struct StartBuildRequest {
    #[serde(default)]
    confirmed: bool,
}

#[derive(Debug, Deserialize)]
struct ListSessionsQuery {
    state: Option<SessionState>,
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct SessionWithMessages {
    #[serde(flatten)]
    session: Session,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct RespondResponse {
    session: Session,
    assistant_message: Message,
}

#[derive(Debug, Serialize)]
struct StartBuildResponse {
    session: Session,
    ticket_count: usize,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

async fn create_session(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<Session>, ApiError> {
    let session = state.sessions.create_session(&principal, request).await?;
    Ok(Json(session))
}

async fn list_sessions(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Vec<Session>>, ApiError> {
    let filter = SessionFilter { state: query.state, limit: query.limit };
    let sessions = state.store.list_sessions(&principal.tenant_id, filter).await.map_err(forge_ctl_core::ForgeError::from)?;
    Ok(Json(sessions))
}

async fn get_session(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionWithMessages>, ApiError> {
    let session_id = SessionId::new(id);
    let session = state
        .store
        .get_session(&principal.tenant_id, &session_id)
        .await
        .map_err(forge_ctl_core::ForgeError::from)?
        .ok_or_else(|| ApiError::Forge(forge_ctl_core::ForgeError::NotFound(format!("session {session_id}"))))?;
    if !principal.may_access_tenant(&session.tenant_id) {
        return Err(ApiError::Forge(forge_ctl_core::ForgeError::Forbidden(format!("session {session_id} belongs to another tenant"))));
    }
    let messages = state.store.list_messages(&principal.tenant_id, &session_id).await.map_err(forge_ctl_core::ForgeError::from)?;
    Ok(Json(SessionWithMessages { session, messages }))
}

async fn list_messages(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let session_id = SessionId::new(id);
    let messages = state.store.list_messages(&principal.tenant_id, &session_id).await.map_err(forge_ctl_core::ForgeError::from)?;
    Ok(Json(messages))
}

async fn respond(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RespondRequest>,
) -> Result<Json<RespondResponse>, ApiError> {
    let result = state.sessions.respond(&principal, &SessionId::new(id), body.message).await?;
    Ok(Json(RespondResponse { session: result.session, assistant_message: result.assistant_message }))
}

async fn start_clarification(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let session = state.sessions.start_clarification(&principal, &SessionId::new(id)).await?;
    Ok(Json(session))
}

async fn generate_spec(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let session = state.sessions.generate_spec(&principal, &SessionId::new(id)).await?;
    Ok(Json(session))
}

async fn approve(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let session = state.sessions.approve(&principal, &SessionId::new(id)).await?;
    Ok(Json(session))
}

async fn request_revision(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RequestRevisionRequest>,
) -> Result<Json<Session>, ApiError> {
    let session = state.sessions.request_revision(&principal, &SessionId::new(id), body.feedback).await?;
    Ok(Json(session))
}

async fn start_build(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<StartBuildRequest>,
) -> Result<Json<StartBuildResponse>, ApiError> {
    let result = state.sessions.start_build(&principal, &SessionId::new(id), body.confirmed).await?;
    Ok(Json(StartBuildResponse { session: result.session, ticket_count: result.ticket_count }))
}

async fn cancel_session(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.sessions.cancel(&principal, &SessionId::new(id)).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Builds the `/api/hitl*` router.
pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/", post(create_session).get(list_sessions))
        .route("/{id}", get(get_session).delete(cancel_session))
        .route("/{id}/respond", post(respond))
        .route("/{id}/start-clarification", post(start_clarification))
        .route("/{id}/generate-spec", post(generate_spec))
        .route("/{id}/approve", post(approve))
        .route("/{id}/request-revision", post(request_revision))
        .route("/{id}/start-build", post(start_build))
        .route("/{id}/messages", get(list_messages))
}
