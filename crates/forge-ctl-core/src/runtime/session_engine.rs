// forge-ctl-core/src/runtime/session_engine.rs
// ============================================================================
// Module: Session Engine
// Description: HITL dialogue state machine — orchestrates clarifying turns,
//              spec generation, approval, and hand-off to the ticket engine.
// Purpose: Implement the Session Engine component of the control plane.
// Dependencies: crate::{core, interfaces}, tracing
// ============================================================================

//! ## Overview
//! [`SessionEngine`] is generic over its collaborators, exactly as the
//! upstream control-plane engine is generic over its evidence provider,
//! dispatcher, and store: callers supply a [`PersistenceStore`], a
//! [`ModelAdapter`], and an [`EventPublisher`], and the engine contains only
//! the orchestration logic, none of the backend-specific detail.

use std::sync::Arc;

use crate::core::ApprovalStatus;
use crate::core::ClarificationContext;
use crate::core::Clock;
use crate::core::Event;
use crate::core::EventSubject;
use crate::core::EventType;
use crate::core::Message;
use crate::core::MessageId;
use crate::core::MessageRole;
use crate::core::MessageType;
use crate::core::Principal;
use crate::core::ProjectId;
use crate::core::ProjectType;
use crate::core::Session;
use crate::core::SessionId;
use crate::core::SessionState;
use crate::core::SystemClock;
use crate::interfaces::DialogueRequest;
use crate::interfaces::EventPublisher;
use crate::interfaces::ModelAdapter;
use crate::interfaces::PersistenceStore;
use crate::interfaces::TicketDraft;
use crate::runtime::errors::ForgeError;
use crate::runtime::ticket_engine::TicketBatch;

/// Request to create a new session.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    /// Human-readable project name.
    pub project_name: String,
    /// Free-text initial description.
    pub description: String,
    /// Project type; defaults to `new-application` when unset.
    pub project_type: Option<ProjectType>,
}

/// Result of a dialogue turn.
#[derive(Debug, Clone)]
pub struct RespondResult {
    /// The session after the turn.
    pub session: Session,
    /// The assistant's reply message.
    pub assistant_message: Message,
}

/// Result of starting a build: the session plus how many tickets were
/// generated.
#[derive(Debug, Clone)]
pub struct StartBuildResult {
    /// The session, now in `building`.
    pub session: Session,
    /// Number of tickets generated for the build.
    pub ticket_count: usize,
}

/// Orchestrates the HITL dialogue state machine.
pub struct SessionEngine<Store, Model, Bus, Clk = SystemClock> {
    store: Arc<Store>,
    model: Arc<Model>,
    bus: Arc<Bus>,
    clock: Clk,
}

impl<Store, Model, Bus, Clk> SessionEngine<Store, Model, Bus, Clk>
where
    Store: PersistenceStore,
    Model: ModelAdapter,
    Bus: EventPublisher,
    Clk: Clock,
{
    /// Builds a new session engine over the given collaborators.
    pub fn new(store: Arc<Store>, model: Arc<Model>, bus: Arc<Bus>, clock: Clk) -> Self {
        Self { store, model, bus, clock }
    }

    /// Creates a new session in state `input`.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::Validation`] when `project_name` is empty.
    pub async fn create_session(
        &self,
        principal: &Principal,
        request: CreateSessionRequest,
    ) -> Result<Session, ForgeError> {
        if request.project_name.trim().is_empty() {
            return Err(ForgeError::Validation("project_name must not be empty".to_string()));
        }
        let now = self.clock.now();
        let session = Session {
            id: SessionId::new(uuid::Uuid::new_v4().to_string()),
            tenant_id: principal.tenant_id.clone(),
            owner_id: principal.user_id.clone(),
            project_type: request.project_type.unwrap_or(ProjectType::NewApplication),
            project_name: request.project_name,
            description: request.description,
            state: SessionState::Input,
            clarification: ClarificationContext::default(),
            spec_card: None,
            project_id: None,
            repo_analysis: None,
            row_version: 0,
            created_at: now,
            updated_at: now,
            approved_at: None,
            approved_by: None,
        };
        let created = self.store.create_session(session).await?;
        self.publish_session_update(&created).await;
        Ok(created)
    }

    /// Submits a user dialogue turn. Legal from `input` (advances to
    /// `clarifying`) or `clarifying` (self-loop).
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::StateConflict`] outside those states, or a
    /// classified model-adapter error.
    pub async fn respond(
        &self,
        principal: &Principal,
        session_id: &SessionId,
        user_turn: String,
    ) -> Result<RespondResult, ForgeError> {
        let session = self.load_owned(principal, session_id).await?;
        if !matches!(session.state, SessionState::Input | SessionState::Clarifying) {
            return Err(state_conflict(session.state));
        }
        let history = self.store.list_messages(&principal.tenant_id, session_id).await?;
        let repo_context = (session.project_type == ProjectType::BuildFeature)
            .then(|| session.repo_analysis.clone())
            .flatten();

        let user_message = Message {
            id: MessageId::new(uuid::Uuid::new_v4().to_string()),
            session_id: session_id.clone(),
            role: MessageRole::User,
            content: user_turn.clone(),
            message_type: if history.is_empty() { MessageType::Initial } else { MessageType::Answer },
            created_at: self.clock.now(),
        };

        let reply = self
            .model
            .dialogue_turn(DialogueRequest { history, user_turn, repo_context })
            .await?;

        let assistant_message = Message {
            id: MessageId::new(uuid::Uuid::new_v4().to_string()),
            session_id: session_id.clone(),
            role: MessageRole::Assistant,
            content: reply.message.clone(),
            message_type: MessageType::Question,
            created_at: self.clock.now(),
        };

        let mut clarification = session.clarification.clone();
        if let Some(gathered) = &reply.gathered {
            clarification.merge_gathered(gathered);
        }
        clarification.progress = clarification.composite_progress();
        if reply.ready_for_spec.unwrap_or(false) {
            clarification.owner_confirmed = true;
        }

        let next_state = if session.state == SessionState::Input {
            SessionState::Clarifying
        } else if clarification.meets_readiness_threshold() {
            SessionState::ReadyForDocs
        } else {
            SessionState::Clarifying
        };
        if !session.state.is_legal_transition(next_state) {
            return Err(state_conflict(session.state));
        }

        let mut updated = session.clone();
        updated.state = next_state;
        updated.clarification = clarification;
        updated.updated_at = self.clock.now();

        self.store.append_message(user_message).await?;
        self.store.append_message(assistant_message.clone()).await?;
        let saved = self
            .store
            .update_session(updated, session.row_version, vec![self.message_event(&session, EventType::SessionMessage)])
            .await?;
        self.publish_session_update(&saved).await;
        Ok(RespondResult { session: saved, assistant_message })
    }

    /// Explicitly enters `clarifying` from `input` without a dialogue turn.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::StateConflict`] outside `input`.
    pub async fn start_clarification(
        &self,
        principal: &Principal,
        session_id: &SessionId,
    ) -> Result<Session, ForgeError> {
        let session = self.load_owned(principal, session_id).await?;
        self.transition(session, SessionState::Clarifying).await
    }

    /// Produces the spec card. Legal from `clarifying` or `ready_for_docs`;
    /// calling from `clarifying` is the owner-forces-readiness path.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::StateConflict`] outside those states, or a
    /// classified model-adapter error. On failure the session is left in
    /// its prior state.
    pub async fn generate_spec(
        &self,
        principal: &Principal,
        session_id: &SessionId,
    ) -> Result<Session, ForgeError> {
        let session = self.load_owned(principal, session_id).await?;
        if !matches!(session.state, SessionState::Clarifying | SessionState::ReadyForDocs) {
            return Err(state_conflict(session.state));
        }
        let spec = self.model.generate_spec(&session).await?;
        let mut updated = session.clone();
        updated.state = SessionState::Reviewing;
        updated.spec_card = Some(spec);
        updated.updated_at = self.clock.now();
        self.store
            .create_approval(crate::core::Approval {
                id: crate::core::ApprovalId::new(uuid::Uuid::new_v4().to_string()),
                session_id: session.id.clone(),
                approval_type: crate::core::ApprovalType::SpecApproval,
                target_action: "approve-spec".to_string(),
                context: serde_json::json!({}),
                status: ApprovalStatus::Pending,
                resolver: None,
                resolved_at: None,
            })
            .await?;
        let saved = self
            .store
            .update_session(updated, session.row_version, vec![self.simple_event(&session, EventType::SpecGenerated)])
            .await?;
        self.publish_approval_requested(&saved).await;
        self.publish_session_update(&saved).await;
        Ok(saved)
    }

    /// Approves the spec card, recording the approver and timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::StateConflict`] outside `reviewing`.
    pub async fn approve(
        &self,
        principal: &Principal,
        session_id: &SessionId,
    ) -> Result<Session, ForgeError> {
        let session = self.load_owned(principal, session_id).await?;
        if session.state != SessionState::Reviewing {
            return Err(state_conflict(session.state));
        }
        let now = self.clock.now();
        let mut updated = session.clone();
        updated.state = SessionState::Approved;
        updated.approved_at = Some(now);
        updated.approved_by = Some(principal.user_id.clone());
        updated.updated_at = now;
        if let Some(pending) = self.store.find_pending_approval(&session.id).await? {
            self.store
                .resolve_approval(&pending.id, &principal.user_id, ApprovalStatus::Approved, now)
                .await?;
        }
        let saved = self
            .store
            .update_session(updated, session.row_version, vec![self.simple_event(&session, EventType::SessionUpdate)])
            .await?;
        self.publish_approval_resolved(&saved).await;
        self.publish_session_update(&saved).await;
        Ok(saved)
    }

    /// Sends revision feedback back into the dialogue, returning the
    /// session to `clarifying` with the feedback appended as a message.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::StateConflict`] outside `reviewing`.
    pub async fn request_revision(
        &self,
        principal: &Principal,
        session_id: &SessionId,
        feedback: String,
    ) -> Result<Session, ForgeError> {
        let session = self.load_owned(principal, session_id).await?;
        if session.state != SessionState::Reviewing {
            return Err(state_conflict(session.state));
        }
        let message = Message {
            id: MessageId::new(uuid::Uuid::new_v4().to_string()),
            session_id: session_id.clone(),
            role: MessageRole::System,
            content: feedback,
            message_type: MessageType::Answer,
            created_at: self.clock.now(),
        };
        self.store.append_message(message).await?;
        let now = self.clock.now();
        if let Some(pending) = self.store.find_pending_approval(&session.id).await? {
            self.store
                .resolve_approval(&pending.id, &principal.user_id, ApprovalStatus::Rejected, now)
                .await?;
        }
        let mut updated = session.clone();
        updated.state = SessionState::Clarifying;
        updated.updated_at = now;
        let saved = self
            .store
            .update_session(updated, session.row_version, vec![self.simple_event(&session, EventType::SessionUpdate)])
            .await?;
        self.publish_approval_resolved(&saved).await;
        self.publish_session_update(&saved).await;
        Ok(saved)
    }

    /// Begins ticket generation and build. Requires `confirmed = true`.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::StateConflict`] outside `approved`, or
    /// [`ForgeError::Validation`] when `confirmed` is false, or
    /// [`ForgeError::Integrity`] when the generated tickets would close a
    /// dependency cycle — in which case no ticket from the batch is
    /// persisted and the session remains `approved`.
    pub async fn start_build(
        &self,
        principal: &Principal,
        session_id: &SessionId,
        confirmed: bool,
    ) -> Result<StartBuildResult, ForgeError> {
        if !confirmed {
            return Err(ForgeError::Validation("start-build requires confirmed=true".to_string()));
        }
        let session = self.load_owned(principal, session_id).await?;
        if session.state != SessionState::Approved {
            return Err(state_conflict(session.state));
        }
        let spec = session
            .spec_card
            .clone()
            .ok_or_else(|| ForgeError::Internal("approved session missing spec_card".to_string()))?;
        let drafts: Vec<TicketDraft> = self.model.generate_tickets(session.project_type, &spec).await?;
        let project_id = session.project_id.clone().unwrap_or_else(|| ProjectId::new(uuid::Uuid::new_v4().to_string()));

        let batch = TicketBatch::from_drafts(project_id.clone(), drafts, self.clock.now())?;
        let inserted = self.store.insert_tickets(batch.tickets, batch.dependencies).await?;

        let mut updated = session.clone();
        updated.state = SessionState::Building;
        updated.project_id = Some(project_id);
        updated.updated_at = self.clock.now();
        let saved = self
            .store
            .update_session(
                updated,
                session.row_version,
                vec![self.simple_event(&session, EventType::TicketsGenerated)],
            )
            .await?;
        self.publish_session_update(&saved).await;
        Ok(StartBuildResult { session: saved, ticket_count: inserted.len() })
    }

    /// Cancels a session from any non-terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::StateConflict`] when already terminal.
    pub async fn cancel(&self, principal: &Principal, session_id: &SessionId) -> Result<Session, ForgeError> {
        let session = self.load_owned(principal, session_id).await?;
        self.transition(session, SessionState::Cancelled).await
    }

    async fn transition(&self, session: Session, to: SessionState) -> Result<Session, ForgeError> {
        if !session.state.is_legal_transition(to) {
            return Err(state_conflict(session.state));
        }
        let mut updated = session.clone();
        updated.state = to;
        updated.updated_at = self.clock.now();
        let saved = self
            .store
            .update_session(updated, session.row_version, vec![self.simple_event(&session, EventType::SessionUpdate)])
            .await?;
        self.publish_session_update(&saved).await;
        Ok(saved)
    }

    async fn load_owned(&self, principal: &Principal, session_id: &SessionId) -> Result<Session, ForgeError> {
        let session = self
            .store
            .get_session(&principal.tenant_id, session_id)
            .await?
            .ok_or_else(|| ForgeError::NotFound(format!("session {session_id}")))?;
        if !principal.may_access_tenant(&session.tenant_id) {
            return Err(ForgeError::Forbidden(format!("session {session_id} belongs to another tenant")));
        }
        Ok(session)
    }

    fn simple_event(&self, session: &Session, event_type: EventType) -> Event {
        Event {
            id: crate::core::EventId::new(uuid::Uuid::new_v4().to_string()),
            subject: EventSubject::Session(session.id.clone()),
            event_type,
            payload: serde_json::json!({"state": session.state}),
            created_at: self.clock.now(),
        }
    }

    fn message_event(&self, session: &Session, event_type: EventType) -> Event {
        self.simple_event(session, event_type)
    }

    async fn publish_approval_requested(&self, session: &Session) {
        self.publish_simple(session, EventType::ApprovalRequested).await;
    }

    async fn publish_approval_resolved(&self, session: &Session) {
        self.publish_simple(session, EventType::ApprovalResolved).await;
    }

    async fn publish_simple(&self, session: &Session, event_type: EventType) {
        let event = self.simple_event(session, event_type);
        if let Err(err) = self.bus.publish(crate::core::Room::Session(session.id.clone()), event).await {
            tracing::debug!(session_id = %session.id, error = %err, "no subscribers for session room");
        }
    }

    async fn publish_session_update(&self, session: &Session) {
        let event = Event {
            id: crate::core::EventId::new(uuid::Uuid::new_v4().to_string()),
            subject: EventSubject::Session(session.id.clone()),
            event_type: EventType::SessionUpdate,
            payload: serde_json::json!({"state": session.state}),
            created_at: self.clock.now(),
        };
        if let Err(err) = self.bus.publish(crate::core::Room::Session(session.id.clone()), event).await {
            tracing::debug!(session_id = %session.id, error = %err, "no subscribers for session room");
        }
    }
}

/// Builds a state-conflict error carrying the current state.
fn state_conflict(current: SessionState) -> ForgeError {
    ForgeError::StateConflict { current_state: serde_json::to_value(current).map_or_else(|_| "unknown".to_string(), |v| v.as_str().unwrap_or("unknown").to_string()) }
}
