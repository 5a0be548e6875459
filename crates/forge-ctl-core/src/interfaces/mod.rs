// forge-ctl-core/src/interfaces/mod.rs
// ============================================================================
// Module: Control Plane Interfaces
// Description: Backend-agnostic interfaces for persistence, the real-time
//              bus, and external collaborators (model adapter, worker,
//              critic, deploy, retrieval).
// Purpose: Define the contract surfaces the runtime engines integrate through.
// Dependencies: crate::core, async-trait, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how the control plane integrates with external systems
//! without embedding backend-specific details into the engines.
//! Implementations must fail closed: a provider that cannot determine an
//! answer returns an error, never a default permit or an empty-but-ok
//! result that looks like "nothing happened".

use async_trait::async_trait;
use thiserror::Error;

use crate::core::AssigneeId;
use crate::core::CriticFeedback;
use crate::core::Dependency;
use crate::core::Event;
use crate::core::ProjectType;
use crate::core::Room;
use crate::core::Session;
use crate::core::Ticket;
use crate::core::TicketId;
use crate::core::TraceId;
use crate::core::Timestamp;

// ============================================================================
// SECTION: Persistence Store
// ============================================================================

/// Errors returned by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic update failed: the row's version no longer matches.
    #[error("optimistic concurrency conflict on {0}")]
    Conflict(String),
    /// The referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A uniqueness, foreign-key, or check constraint was violated,
    /// including a dependency edge that would close a cycle.
    #[error("integrity violation: {0}")]
    Integrity(String),
    /// Underlying storage transport failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Optional filters for listing sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Restrict to sessions in this state, if set.
    pub state: Option<crate::core::SessionState>,
    /// Maximum number of rows to return.
    pub limit: Option<u32>,
}

/// Optional filters for listing tickets.
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    /// Restrict to tickets in this state, if set.
    pub state: Option<crate::core::TicketState>,
    /// Restrict to this project, if set.
    pub project_id: Option<crate::core::ProjectId>,
}

/// Remaining-ticket counts used for session-completion propagation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TicketCompletionCounts {
    /// Tickets not yet in a terminal state.
    pub non_terminal: u64,
    /// Tickets that reached `done`.
    pub done: u64,
}

/// Transactional storage for sessions, messages, tickets, dependencies,
/// approvals, events, and leases.
///
/// Every state transition on a Session or Ticket is one call into this
/// trait: implementations must write the updated row, any derived rows
/// (e.g. unblocked successors), and the accompanying events in a single
/// transaction. There is no "write row then publish later" path.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Inserts a new session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Integrity`] on a duplicate identifier.
    async fn create_session(&self, session: Session) -> Result<Session, StoreError>;

    /// Fetches a session by id, scoped to tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on a transport failure.
    async fn get_session(
        &self,
        tenant: &crate::core::TenantId,
        id: &crate::core::SessionId,
    ) -> Result<Option<Session>, StoreError>;

    /// Lists sessions for a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on a transport failure.
    async fn list_sessions(
        &self,
        tenant: &crate::core::TenantId,
        filter: SessionFilter,
    ) -> Result<Vec<Session>, StoreError>;

    /// Applies a session update (state, clarification, approval fields)
    /// with the accompanying events, conditioned on `expected_row_version`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when `expected_row_version` is stale.
    async fn update_session(
        &self,
        updated: Session,
        expected_row_version: u64,
        events: Vec<Event>,
    ) -> Result<Session, StoreError>;

    /// Appends a dialogue message. Never mutated after insertion.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on a transport failure.
    async fn append_message(&self, message: crate::core::Message) -> Result<(), StoreError>;

    /// Lists a session's messages in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on a transport failure.
    async fn list_messages(
        &self,
        tenant: &crate::core::TenantId,
        session: &crate::core::SessionId,
    ) -> Result<Vec<crate::core::Message>, StoreError>;

    /// Creates an approval record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on a transport failure.
    async fn create_approval(&self, approval: crate::core::Approval) -> Result<(), StoreError>;

    /// Finds the most recent pending approval for a session, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on a transport failure.
    async fn find_pending_approval(
        &self,
        session_id: &crate::core::SessionId,
    ) -> Result<Option<crate::core::Approval>, StoreError>;

    /// Resolves a pending approval.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the approval does not exist, or
    /// [`StoreError::Conflict`] when it was already resolved.
    async fn resolve_approval(
        &self,
        id: &crate::core::ApprovalId,
        resolver: &crate::core::UserId,
        status: crate::core::ApprovalStatus,
        now: Timestamp,
    ) -> Result<crate::core::Approval, StoreError>;

    /// Atomically inserts a batch of tickets and dependency edges, validating
    /// that the resulting predecessor graph remains acyclic. Leaf tickets
    /// (no predecessors) are inserted in `ready`; all others in `blocked`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Integrity`] when the batch would close a cycle;
    /// in that case neither the tickets nor the edges are persisted.
    async fn insert_tickets(
        &self,
        tickets: Vec<Ticket>,
        dependencies: Vec<Dependency>,
    ) -> Result<Vec<Ticket>, StoreError>;

    /// Fetches a ticket by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on a transport failure.
    async fn get_ticket(&self, id: &TicketId) -> Result<Option<Ticket>, StoreError>;

    /// Lists tickets matching a filter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on a transport failure.
    async fn list_tickets(&self, filter: TicketFilter) -> Result<Vec<Ticket>, StoreError>;

    /// Executes the claim protocol in one transaction: selects a `ready`
    /// ticket with `assignee_kind = agent` and no live lease, ordered by
    /// priority then age, updates it to `assigned` with the lease holder
    /// and expiry, and writes a `lease:acquired` event. Returns `None` when
    /// no candidate exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on a transport failure.
    async fn claim_next_ready(
        &self,
        assignee: &AssigneeId,
        lease_duration: time::Duration,
        now: Timestamp,
    ) -> Result<Option<Ticket>, StoreError>;

    /// Renews a lease. Rejected when `holder` does not match the current
    /// lease holder; the lease state is left unchanged on rejection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when `holder` does not hold the
    /// ticket's current lease.
    async fn renew_heartbeat(
        &self,
        id: &TicketId,
        holder: &AssigneeId,
        lease_duration: time::Duration,
        now: Timestamp,
    ) -> Result<Timestamp, StoreError>;

    /// Applies a ticket update with the accompanying events, conditioned on
    /// `expected_row_version`. When the new state is `done` or `cancelled`,
    /// implementations cascade-unblock successors in the same transaction
    /// and append `ticket:unblocked` events for each.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when `expected_row_version` is stale.
    async fn update_ticket(
        &self,
        updated: Ticket,
        expected_row_version: u64,
        events: Vec<Event>,
    ) -> Result<Ticket, StoreError>;

    /// Finds tickets whose lease has expired while in `{assigned,
    /// in_progress, verifying}`, returns them to `ready` with
    /// `retry_count += 1` and `retry_after` computed by `backoff`, and
    /// writes `lease:expired` events. Returns the affected ticket ids.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on a transport failure.
    async fn reap_expired_leases(
        &self,
        now: Timestamp,
        backoff: fn(u32) -> time::Duration,
    ) -> Result<Vec<TicketId>, StoreError>;

    /// Returns remaining non-terminal and completed ticket counts for a
    /// session's linked project, used for session-completion propagation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on a transport failure.
    async fn open_tickets_remaining(
        &self,
        project: &crate::core::ProjectId,
    ) -> Result<TicketCompletionCounts, StoreError>;

    /// Finds the session linked to a project, used for session-completion
    /// propagation once a project's last ticket reaches a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on a transport failure.
    async fn get_session_by_project(
        &self,
        project: &crate::core::ProjectId,
    ) -> Result<Option<Session>, StoreError>;

    /// Appends an event outside of a row-update call (e.g. worker log
    /// narration that does not change ticket state).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on a transport failure.
    async fn append_event(&self, event: Event) -> Result<(), StoreError>;

    /// Lists events for a room, optionally since a timestamp, ordered
    /// non-decreasing by `created_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] on a transport failure.
    async fn list_events(
        &self,
        room: &Room,
        since: Option<Timestamp>,
    ) -> Result<Vec<Event>, StoreError>;
}

// ============================================================================
// SECTION: Real-Time Bus
// ============================================================================

/// Errors raised when publishing to the real-time bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The room has no active subscribers; not itself a failure the
    /// publisher should retry, surfaced so callers can choose to ignore it.
    #[error("no subscribers for room {0}")]
    NoSubscribers(String),
}

/// Publishes committed events into the real-time bus. The bus is not a
/// store: publishing is best-effort, at-least-once to currently subscribed
/// connections, with no replay.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes `event` into `room`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NoSubscribers`] when nobody is listening; callers
    /// should treat this as informational, not a dispatch failure.
    async fn publish(&self, room: Room, event: Event) -> Result<(), BusError>;
}

// ============================================================================
// SECTION: Model Adapter
// ============================================================================

/// Classification of a model-adapter failure, driving retry behavior.
#[derive(Debug, Error)]
pub enum ModelAdapterError {
    /// Timeout, 5xx, or rate-limit; safe to retry with backoff.
    #[error("transient model adapter error: {0}")]
    Transient(String),
    /// Authorization or bad-request; fails the action immediately.
    #[error("permanent model adapter error: {0}")]
    Permanent(String),
}

/// One dialogue exchange request.
#[derive(Debug, Clone)]
pub struct DialogueRequest {
    /// Full prior message history.
    pub history: Vec<crate::core::Message>,
    /// The new user turn's content.
    pub user_turn: String,
    /// Repository-analysis context block, injected only for build-feature
    /// sessions with an existing snapshot.
    pub repo_context: Option<serde_json::Value>,
}

/// The model adapter's structured dialogue reply. Malformed JSON from the
/// upstream model is tolerated by the caller falling back to
/// `DialogueReply { message: <raw text>, gathered: None, .. }`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DialogueReply {
    /// Assistant-facing message text.
    pub message: String,
    /// Newly gathered clarification fields, deep-merged by the caller.
    pub gathered: Option<serde_json::Value>,
    /// Model-reported weighted progress, 0.0..=100.0. Advisory only: the
    /// engine derives the authoritative composite from `gathered` itself
    /// rather than trusting this value.
    pub progress: Option<f64>,
    /// Whether the model believes clarification is complete.
    pub ready_for_spec: Option<bool>,
    /// Hint for which category the next question should target.
    pub next_category: Option<String>,
}

/// One drafted ticket plus its dependency edges, as returned by ticket
/// generation.
#[derive(Debug, Clone)]
pub struct TicketDraft {
    /// Draft ticket fields (id assigned by the caller before insertion).
    pub ticket: Ticket,
    /// Predecessor ticket titles or indices within the same batch; resolved
    /// to [`Dependency`] edges by the caller once ids are assigned.
    pub depends_on: Vec<String>,
}

/// Backend-agnostic language-model adapter.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Resolves one dialogue turn.
    ///
    /// # Errors
    ///
    /// Returns [`ModelAdapterError`] when the upstream call fails.
    async fn dialogue_turn(&self, request: DialogueRequest) -> Result<DialogueReply, ModelAdapterError>;

    /// Generates the spec card from an approved clarification context.
    ///
    /// # Errors
    ///
    /// Returns [`ModelAdapterError`] when the upstream call fails.
    async fn generate_spec(
        &self,
        session: &Session,
    ) -> Result<String, ModelAdapterError>;

    /// Decomposes an approved spec into ticket drafts with dependency
    /// edges, using a template appropriate to `project_type`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelAdapterError`] when the upstream call fails.
    async fn generate_tickets(
        &self,
        project_type: ProjectType,
        spec: &str,
    ) -> Result<Vec<TicketDraft>, ModelAdapterError>;
}

// ============================================================================
// SECTION: Worker Dispatch
// ============================================================================

/// Errors raised handing a work unit to a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The handoff failed (could not write input / enqueue / launch).
    #[error("worker handoff failed: {0}")]
    HandoffFailed(String),
}

/// The JSON envelope handed to a worker: ticket, repo URL, optional critic
/// feedback from the prior attempt, optional retrieved context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkUnit {
    /// The ticket being worked.
    pub ticket: Ticket,
    /// Repository reference the worker should clone.
    pub repository_url: Option<String>,
    /// Critic feedback from the previous attempt, if this is a retry.
    pub prior_feedback: Option<CriticFeedback>,
    /// Retrieved context: files to modify/create, relevant snippets.
    pub retrieved_context: Option<RetrievedContext>,
    /// Attempt number, for idempotent completion handling.
    pub attempt: u32,
    /// Correlation identifier threaded through this attempt.
    pub trace_id: TraceId,
}

/// A worker dispatcher: write input to a known location and launch or
/// enqueue the worker process. The worker's result arrives later, out of
/// band, through the ticket-completion interface — this trait only covers
/// the handoff, not the result.
#[async_trait]
pub trait WorkerDispatcher: Send + Sync {
    /// Hands `unit` off to a worker.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] when the handoff itself fails.
    async fn dispatch(&self, unit: &WorkUnit) -> Result<(), WorkerError>;
}

// ============================================================================
// SECTION: Critic
// ============================================================================

/// Errors raised calling the critic.
#[derive(Debug, Error)]
pub enum CriticError {
    /// Timeout or 5xx; safe to retry up to a small cap.
    #[error("transient critic error: {0}")]
    Transient(String),
    /// The critic authoritatively refused to render a verdict.
    #[error("permanent critic error: {0}")]
    Permanent(String),
}

/// The critic's verdict over a proposed diff.
#[derive(Debug, Clone)]
pub enum CriticVerdict {
    /// The diff satisfies the acceptance criteria.
    Approve,
    /// The diff needs changes; carries structured feedback.
    RequestChanges(CriticFeedback),
}

/// One file change as produced by a worker.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FileChange {
    /// Repository-relative path.
    pub path: String,
    /// Unified diff or full content, producer-defined.
    pub diff: String,
}

/// External collaborator that renders an approve / request-changes verdict.
#[async_trait]
pub trait CriticClient: Send + Sync {
    /// Evaluates `changes` against `ticket`'s acceptance criteria.
    ///
    /// # Errors
    ///
    /// Returns [`CriticError`] when the call fails.
    async fn evaluate(
        &self,
        ticket: &Ticket,
        changes: &[FileChange],
        trace_id: &TraceId,
    ) -> Result<CriticVerdict, CriticError>;
}

// ============================================================================
// SECTION: Deploy
// ============================================================================

/// Errors raised enqueuing a deploy.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The deploy collaborator could not be reached or refused the request.
    #[error("deploy enqueue failed: {0}")]
    EnqueueFailed(String),
}

/// External collaborator that runs deploy commands against a target
/// environment. Completion arrives later as an inbound notification; this
/// trait only covers enqueueing.
#[async_trait]
pub trait DeployClient: Send + Sync {
    /// Enqueues a deploy for an approved pull request.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError`] when the request could not be enqueued.
    async fn enqueue_deploy(
        &self,
        ticket: &TicketId,
        pull_request_url: &str,
        trace_id: &TraceId,
    ) -> Result<(), DeployError>;
}

// ============================================================================
// SECTION: Repository Host
// ============================================================================

/// Errors raised opening a pull request against the repository host.
#[derive(Debug, Error)]
pub enum RepoHostError {
    /// The repository host could not be reached or refused the request.
    #[error("repository host error: {0}")]
    Failed(String),
}

/// External collaborator that opens pull requests once the critic approves
/// a diff.
#[async_trait]
pub trait RepoHostClient: Send + Sync {
    /// Opens a pull request for `ticket`'s branch and returns its URL.
    ///
    /// # Errors
    ///
    /// Returns [`RepoHostError`] when the request could not be opened.
    async fn open_pull_request(
        &self,
        ticket: &Ticket,
        branch_name: &str,
        trace_id: &TraceId,
    ) -> Result<String, RepoHostError>;
}

// ============================================================================
// SECTION: Retrieval
// ============================================================================

/// Errors raised calling the retrieval collaborator.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The retrieval service failed or timed out.
    #[error("retrieval error: {0}")]
    Failed(String),
}

/// Retrieved repository context for a ticket: files to modify/create and
/// relevant snippets.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RetrievedContext {
    /// File paths the worker should focus on.
    pub candidate_files: Vec<String>,
    /// Relevant snippets, keyed by file path.
    pub snippets: Vec<(String, String)>,
}

/// External collaborator that chunks a repository and resolves relevant
/// context for a ticket via vector search.
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    /// Resolves retrieval context for `ticket`.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError`] when the call fails.
    async fn retrieve(&self, ticket: &Ticket) -> Result<RetrievedContext, RetrievalError>;
}
