// forge-ctl-server/src/routes/tickets.rs
// ============================================================================
// Module: Ticket Routes
// Description: Ticket CRUD, the agent claim/heartbeat/complete protocol, the
//              activity stream, and inbound deploy-completion.
// Purpose: Implement the `/api/tickets*` surface of the client HTTP
//          interface.
// Dependencies: axum, forge-ctl-core, crate::{auth, error, state}
// ============================================================================

//! ## Overview
//! Two families of caller hit this router: dashboard/API clients doing
//! ordinary CRUD and listing, and agent workers driving the claim →
//! heartbeat → complete protocol. `complete`'s body carries `attempt` and
//! `trace_id` in addition to the baseline `{success, pr_url?, error?, files?}`
//! shape — [`forge_ctl_core::DispatchLoop::handle_worker_completion`] needs
//! both for its idempotence check, and workers already receive both in the
//! work unit they were dispatched, so this is not new information for the
//! caller, only a wider body. A supplemental `/deploy-complete` route is
//! exposed here too: `DeployClient::enqueue_deploy` on the dispatch side
//! only covers enqueueing, and the resulting completion notification needs
//! an inbound HTTP route of its own.

use axum::Json;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use forge_ctl_core::AssigneeId;
use forge_ctl_core::AssigneeKind;
use forge_ctl_core::Clock;
use forge_ctl_core::Event;
use forge_ctl_core::FileChange;
use forge_ctl_core::ForgeError;
use forge_ctl_core::ProjectId;
use forge_ctl_core::Room;
use forge_ctl_core::SystemClock;
use forge_ctl_core::Ticket;
use forge_ctl_core::TicketFilter;
use forge_ctl_core::TicketId;
use forge_ctl_core::TicketPriority;
use forge_ctl_core::TicketScope;
use forge_ctl_core::TicketState;
use forge_ctl_core::TraceId;
use forge_ctl_core::WorkerFailureClass;
use serde::Deserialize;
use serde::Serialize;

use crate::auth::AuthenticatedPrincipal;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct ListTicketsQuery {
    state: Option<TicketState>,
    project: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateTicketRequest {
    project_id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    scope: Option<TicketScope>,
    #[serde(default)]
    priority: Option<TicketPriority>,
    #[serde(default)]
    file_hints: Vec<String>,
    #[serde(default)]
    repository_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateTicketRequest {
    title: Option<String>,
    description: Option<String>,
    acceptance_criteria: Option<Vec<String>>,
    priority: Option<TicketPriority>,
    file_hints: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct HoldRequest {
    reason: String,
}

#[derive(Debug, Serialize)]
struct ClaimResponse {
    ticket: Ticket,
    /// Per-tenant overrides (model name, retry ceiling) layered over the
    /// claimed ticket's project; distribution of those overrides to agents
    /// is not wired at the HTTP boundary in this pass, so this is always
    /// `null` — the config crate resolves them at the CLI/dispatcher layer
    /// instead.
    project_settings: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct HeartbeatResponse {
    lease_expires: forge_ctl_core::Timestamp,
}

#[derive(Debug, Deserialize)]
struct CompleteRequest {
    success: bool,
    #[serde(default)]
    pr_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    files: Vec<FileChange>,
    attempt: u32,
    trace_id: String,
}

#[derive(Debug, Deserialize)]
struct DeployCompleteRequest {
    success: bool,
    #[serde(default)]
    reason: Option<String>,
}

async fn list_tickets(
    AuthenticatedPrincipal(_principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Query(query): Query<ListTicketsQuery>,
) -> Result<Json<Vec<Ticket>>, ApiError> {
    let filter = TicketFilter { state: query.state, project_id: query.project.map(ProjectId::new) };
    let tickets = state.store.list_tickets(filter).await.map_err(ForgeError::from)?;
    Ok(Json(tickets))
}

async fn create_ticket(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Json(body): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<Ticket>), ApiError> {
    if !principal.is_operator {
        return Err(ApiError::Forge(ForgeError::Forbidden("manual ticket creation requires an operator principal".to_string())));
    }
    let now = SystemClock.now();
    let ticket = Ticket {
        id: TicketId::new(uuid::Uuid::new_v4().to_string()),
        project_id: ProjectId::new(body.project_id),
        title: body.title,
        description: body.description,
        acceptance_criteria: body.acceptance_criteria,
        state: TicketState::Ready,
        epic: None,
        scope: body.scope.unwrap_or(TicketScope::Medium),
        file_hints: body.file_hints,
        assignee: None,
        assignee_kind: Some(AssigneeKind::Agent),
        branch_name: None,
        pull_request_url: None,
        rejection_count: 0,
        retry_count: 0,
        retry_after: None,
        critic_feedback: None,
        files_involved: vec![],
        lease_expires: None,
        last_heartbeat: None,
        row_version: 0,
        created_at: now,
        updated_at: now,
        trace_id: TraceId::new(uuid::Uuid::new_v4().to_string()),
        repository_url: body.repository_url,
        priority: body.priority.unwrap_or(TicketPriority::Medium),
    };
    let inserted = state.store.insert_tickets(vec![ticket], vec![]).await.map_err(ForgeError::from)?;
    let ticket = inserted.into_iter().next().ok_or_else(|| ApiError::Forge(ForgeError::Internal("ticket insert returned no rows".to_string())))?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn get_ticket(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = load_ticket_for_tenant(&state, &principal, &id).await?;
    Ok(Json(ticket))
}

async fn update_ticket(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateTicketRequest>,
) -> Result<Json<Ticket>, ApiError> {
    let mut ticket = load_ticket_for_tenant(&state, &principal, &id).await?;
    let expected_row_version = ticket.row_version;
    if let Some(title) = body.title {
        ticket.title = title;
    }
    if let Some(description) = body.description {
        ticket.description = description;
    }
    if let Some(acceptance_criteria) = body.acceptance_criteria {
        ticket.acceptance_criteria = acceptance_criteria;
    }
    if let Some(priority) = body.priority {
        ticket.priority = priority;
    }
    if let Some(file_hints) = body.file_hints {
        ticket.file_hints = file_hints;
    }
    let updated = state.store.update_ticket(ticket, expected_row_version, vec![]).await.map_err(ForgeError::from)?;
    Ok(Json(updated))
}

async fn delete_ticket(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = load_ticket_for_tenant(&state, &principal, &id).await?;
    let cancelled = state.tickets.cancel(ticket).await?;
    Ok(Json(cancelled))
}

async fn hold_ticket(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<HoldRequest>,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = load_ticket_for_tenant(&state, &principal, &id).await?;
    let held = state.tickets.hold(ticket, body.reason).await?;
    Ok(Json(held))
}

async fn resume_ticket(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = load_ticket_for_tenant(&state, &principal, &id).await?;
    let resumed = state.tickets.resume(ticket).await?;
    Ok(Json(resumed))
}

async fn claim(AuthenticatedPrincipal(principal): AuthenticatedPrincipal, State(state): State<AppState>) -> Result<Response, ApiError> {
    let assignee = AssigneeId::new(principal.user_id.as_str().to_string());
    match state.tickets.claim_next(&assignee).await? {
        Some(ticket) => Ok((StatusCode::OK, Json(ClaimResponse { ticket, project_settings: None })).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn heartbeat(
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let assignee = AssigneeId::new(principal.user_id.as_str().to_string());
    let lease_expires = state.tickets.renew_heartbeat(&TicketId::new(id), &assignee).await?;
    Ok(Json(HeartbeatResponse { lease_expires }))
}

async fn complete(
    AuthenticatedPrincipal(_principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CompleteRequest>,
) -> Result<Json<Option<Ticket>>, ApiError> {
    let ticket_id = TicketId::new(id);
    let trace_id = TraceId::new(body.trace_id);
    let outcome = if body.success {
        Ok(body.files)
    } else {
        Err(classify_failure(body.error.as_deref()))
    };
    let ticket = state.dispatch.handle_worker_completion(&ticket_id, body.attempt, &trace_id, outcome).await?;
    Ok(Json(ticket))
}

async fn deploy_complete(
    AuthenticatedPrincipal(_principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DeployCompleteRequest>,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = state.dispatch.handle_deploy_completion(&TicketId::new(id), body.success, body.reason).await?;
    Ok(Json(ticket))
}

async fn activity(
    AuthenticatedPrincipal(_principal): AuthenticatedPrincipal,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let events = state.store.list_events(&Room::Ticket(TicketId::new(id)), None).await.map_err(ForgeError::from)?;
    Ok(Json(events))
}

/// Loads a ticket and verifies the caller's tenant may access it via the
/// project's linked session; tickets carry no tenant field directly.
async fn load_ticket_for_tenant(state: &AppState, principal: &forge_ctl_core::Principal, id: &str) -> Result<Ticket, ApiError> {
    let ticket_id = TicketId::new(id.to_string());
    let ticket = state
        .store
        .get_ticket(&ticket_id)
        .await
        .map_err(ForgeError::from)?
        .ok_or_else(|| ApiError::Forge(ForgeError::NotFound(format!("ticket {ticket_id}"))))?;
    if principal.is_operator {
        return Ok(ticket);
    }
    let owning_session = state.store.get_session_by_project(&ticket.project_id).await.map_err(ForgeError::from)?;
    match owning_session {
        Some(session) if principal.may_access_tenant(&session.tenant_id) => Ok(ticket),
        _ => Err(ApiError::Forge(ForgeError::Forbidden(format!("ticket {ticket_id} belongs to another tenant")))),
    }
}

fn classify_failure(error: Option<&str>) -> WorkerFailureClass {
    let Some(error) = error else {
        return WorkerFailureClass::Infrastructure;
    };
    let lowered = error.to_ascii_lowercase();
    if lowered.contains("timeout") {
        WorkerFailureClass::Timeout
    } else if lowered.contains("tool") {
        WorkerFailureClass::ToolError
    } else if lowered.contains("model") {
        WorkerFailureClass::ModelError
    } else {
        WorkerFailureClass::Infrastructure
    }
}

/// Builds the `/api/tickets*` router.
pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/", get(list_tickets).post(create_ticket))
        .route("/claim", post(claim))
        .route("/{id}", get(get_ticket).put(update_ticket).delete(delete_ticket))
        .route("/{id}/hold", post(hold_ticket))
        .route("/{id}/resume", post(resume_ticket))
        .route("/{id}/heartbeat", post(heartbeat))
        .route("/{id}/complete", post(complete))
        .route("/{id}/deploy-complete", post(deploy_complete))
        .route("/{id}/activity", get(activity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_failure_matches_on_keyword_before_falling_back() {
        assert!(matches!(classify_failure(Some("request timeout after 30s")), WorkerFailureClass::Timeout));
        assert!(matches!(classify_failure(Some("tool invocation failed")), WorkerFailureClass::ToolError));
        assert!(matches!(classify_failure(Some("model refused the request")), WorkerFailureClass::ModelError));
        assert!(matches!(classify_failure(Some("connection reset")), WorkerFailureClass::Infrastructure));
    }

    #[test]
    fn classify_failure_defaults_to_infrastructure_when_no_message() {
        assert!(matches!(classify_failure(None), WorkerFailureClass::Infrastructure));
    }

    #[test]
    fn classify_failure_is_case_insensitive() {
        assert!(matches!(classify_failure(Some("TIMEOUT waiting for worker")), WorkerFailureClass::Timeout));
    }
}
