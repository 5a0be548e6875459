// forge-ctl-core/src/runtime/ticket_engine.rs
// ============================================================================
// Module: Ticket Engine
// Description: Lease-based claim protocol, heartbeat, reaper, retry/feedback
//              loop, dependency unblock, and session-completion propagation.
// Purpose: Implement the Ticket Engine component of the control plane.
// Dependencies: crate::{core, interfaces}, tracing
// ============================================================================

//! ## Overview
//! [`TicketEngine`] owns every ticket-row transition except the ones the
//! dispatch loop drives through external collaborators directly (worker
//! handoff, critic call, deploy enqueue) — those live in
//! [`crate::runtime::dispatch_loop`], which calls back into this engine to
//! persist the resulting state change. Dependency-unblock cascading and
//! lease reaping are store-transactional per the persistence contract;
//! session-completion propagation is orchestrated here because it spans
//! the ticket and session aggregates.

use std::sync::Arc;

use crate::core::AssigneeId;
use crate::core::AssigneeKind;
use crate::core::Clock;
use crate::core::Dependency;
use crate::core::Event;
use crate::core::EventId;
use crate::core::EventSubject;
use crate::core::EventType;
use crate::core::ProjectId;
use crate::core::Room;
use crate::core::SessionState;
use crate::core::SystemClock;
use crate::core::Ticket;
use crate::core::TicketId;
use crate::core::TicketState;
use crate::core::Timestamp;
use crate::core::TraceId;
use crate::core::ticket;
use crate::interfaces::CriticVerdict;
use crate::interfaces::EventPublisher;
use crate::interfaces::PersistenceStore;
use crate::interfaces::TicketDraft;
use crate::runtime::backoff::DEFAULT_LEASE_DURATION;
use crate::runtime::backoff::DEFAULT_RETRY_CEILING;
use crate::runtime::backoff::retry_backoff;
use crate::runtime::errors::ForgeError;

/// A validated batch of tickets plus dependency edges, ready for one
/// transactional insert.
#[derive(Debug, Clone)]
pub struct TicketBatch {
    /// Tickets with assigned identifiers and initial state.
    pub tickets: Vec<Ticket>,
    /// Dependency edges among the tickets in this batch.
    pub dependencies: Vec<Dependency>,
}

impl TicketBatch {
    /// Assigns identifiers to a set of ticket drafts, resolves `depends_on`
    /// references (matched by ticket title within the batch) into
    /// [`Dependency`] edges, and sets each ticket's initial state: `ready`
    /// when it has no predecessor in the batch, `blocked` otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::Integrity`] when a `depends_on` reference does
    /// not match any title in the batch, or when the resulting graph
    /// contains a cycle — in either case no ticket is returned.
    pub fn from_drafts(
        project_id: ProjectId,
        drafts: Vec<TicketDraft>,
        now: Timestamp,
    ) -> Result<Self, ForgeError> {
        let mut tickets = Vec::with_capacity(drafts.len());
        let mut titles_to_ids = std::collections::HashMap::new();
        let mut pending_edges = Vec::new();

        for draft in &drafts {
            let id = TicketId::new(uuid::Uuid::new_v4().to_string());
            titles_to_ids.insert(draft.ticket.title.clone(), id.clone());
        }

        for draft in drafts {
            let id = titles_to_ids
                .get(&draft.ticket.title)
                .cloned()
                .ok_or_else(|| ForgeError::Internal("ticket title lost during id assignment".to_string()))?;

            for predecessor_ref in &draft.depends_on {
                let predecessor_id = titles_to_ids.get(predecessor_ref).cloned().ok_or_else(|| {
                    ForgeError::Integrity(format!("dependency reference {predecessor_ref:?} matches no ticket in the batch"))
                })?;
                pending_edges.push(Dependency { ticket_id: id.clone(), depends_on: predecessor_id });
            }

            let mut ticket = draft.ticket;
            ticket.id = id;
            ticket.project_id = project_id.clone();
            ticket.trace_id = TraceId::new(uuid::Uuid::new_v4().to_string());
            ticket.row_version = 0;
            ticket.created_at = now;
            ticket.updated_at = now;
            tickets.push(ticket);
        }

        let has_predecessors: std::collections::HashSet<&TicketId> =
            pending_edges.iter().map(|edge| &edge.ticket_id).collect();
        for t in &mut tickets {
            t.state = if has_predecessors.contains(&t.id) { TicketState::Blocked } else { TicketState::Ready };
        }

        let ids: Vec<TicketId> = tickets.iter().map(|t| t.id.clone()).collect();
        if ticket::has_cycle(&ids, &pending_edges) {
            return Err(ForgeError::Integrity("generated ticket batch contains a dependency cycle".to_string()));
        }

        Ok(Self { tickets, dependencies: pending_edges })
    }
}

/// Orchestrates ticket lifecycle: claim, heartbeat, reaping, retry/feedback,
/// dependency unblock, and session-completion propagation.
pub struct TicketEngine<Store, Bus, Clk = SystemClock> {
    store: Arc<Store>,
    bus: Arc<Bus>,
    clock: Clk,
}

impl<Store, Bus, Clk> TicketEngine<Store, Bus, Clk>
where
    Store: PersistenceStore,
    Bus: EventPublisher,
    Clk: Clock,
{
    /// Builds a new ticket engine over the given collaborators.
    pub fn new(store: Arc<Store>, bus: Arc<Bus>, clock: Clk) -> Self {
        Self { store, bus, clock }
    }

    /// Executes the claim protocol for `assignee` using the default lease
    /// duration. Returns `None` when no ready candidate exists.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ForgeError`] on a store failure.
    pub async fn claim_next(&self, assignee: &AssigneeId) -> Result<Option<Ticket>, ForgeError> {
        let now = self.clock.now();
        let claimed = self.store.claim_next_ready(assignee, DEFAULT_LEASE_DURATION, now).await?;
        if let Some(ticket) = &claimed {
            self.publish_activity(ticket, EventType::LeaseAcquired, serde_json::json!({"assignee": assignee})).await;
        }
        Ok(claimed)
    }

    /// Renews a held lease's heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::Conflict`] when `holder` does not hold the
    /// ticket's current lease.
    pub async fn renew_heartbeat(&self, id: &TicketId, holder: &AssigneeId) -> Result<Timestamp, ForgeError> {
        let now = self.clock.now();
        Ok(self.store.renew_heartbeat(id, holder, DEFAULT_LEASE_DURATION, now).await?)
    }

    /// Records that a worker started work on a claimed ticket:
    /// `assigned` → `in_progress`.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::StateConflict`] outside `assigned`.
    pub async fn report_start(&self, ticket: Ticket) -> Result<Ticket, ForgeError> {
        self.apply_transition(ticket, TicketState::InProgress, EventType::TicketActivity, serde_json::json!({"note": "work started"})).await
    }

    /// Records that a worker produced a diff: `in_progress` → `verifying`,
    /// recording the files actually touched.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::StateConflict`] outside `in_progress`.
    pub async fn report_diff(&self, mut ticket: Ticket, files_involved: Vec<String>) -> Result<Ticket, ForgeError> {
        ticket.files_involved = files_involved;
        self.apply_transition(ticket, TicketState::Verifying, EventType::TicketActivity, serde_json::json!({"note": "diff produced"})).await
    }

    /// Applies a critic verdict to a ticket in `verifying`. On approval the
    /// caller supplies the opened pull request's URL; on request-changes
    /// the ticket returns to `ready` (with backoff) if the retry ceiling
    /// has not been reached, otherwise terminates in `needs_review`.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::StateConflict`] outside `verifying`.
    pub async fn apply_critic_verdict(
        &self,
        mut ticket: Ticket,
        verdict: CriticVerdict,
        pull_request_url: Option<String>,
    ) -> Result<Ticket, ForgeError> {
        if ticket.state != TicketState::Verifying {
            return Err(state_conflict(ticket.state));
        }
        match verdict {
            CriticVerdict::Approve => {
                ticket.pull_request_url = pull_request_url;
                self.apply_transition(ticket, TicketState::InReview, EventType::TicketActivity, serde_json::json!({"verdict": "approve"}))
                    .await
            }
            CriticVerdict::RequestChanges(feedback) => {
                ticket.critic_feedback = Some(feedback);
                ticket.rejection_count += 1;
                if ticket.retry_count >= DEFAULT_RETRY_CEILING {
                    self.apply_transition(
                        ticket,
                        TicketState::NeedsReview,
                        EventType::TicketActivity,
                        serde_json::json!({"verdict": "request-changes", "ceiling_reached": true}),
                    )
                    .await
                } else {
                    ticket.retry_count += 1;
                    ticket.retry_after = Some(self.clock.now().plus(retry_backoff(ticket.retry_count)));
                    ticket.assignee = None;
                    ticket.lease_expires = None;
                    self.apply_transition(
                        ticket,
                        TicketState::Ready,
                        EventType::TicketActivity,
                        serde_json::json!({"verdict": "request-changes", "ceiling_reached": false}),
                    )
                    .await
                }
            }
        }
    }

    /// Records an external deploy completion signal: `in_review` → `done`
    /// on success, or back to `changes_requested` with a reason on failure.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::StateConflict`] outside `in_review`.
    pub async fn complete_deploy(&self, ticket: Ticket, success: bool, reason: Option<String>) -> Result<Ticket, ForgeError> {
        if ticket.state != TicketState::InReview {
            return Err(state_conflict(ticket.state));
        }
        if success {
            let saved = self
                .apply_transition(ticket, TicketState::Done, EventType::TicketActivity, serde_json::json!({"deploy": "success"}))
                .await?;
            self.propagate_completion(&saved).await?;
            Ok(saved)
        } else {
            self.apply_transition(
                ticket,
                TicketState::ChangesRequested,
                EventType::TicketActivity,
                serde_json::json!({"deploy": "failed", "reason": reason}),
            )
            .await
        }
    }

    /// Cancels a ticket from any non-terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::StateConflict`] when already terminal.
    pub async fn cancel(&self, ticket: Ticket) -> Result<Ticket, ForgeError> {
        let saved = self
            .apply_transition(ticket, TicketState::Cancelled, EventType::TicketActivity, serde_json::json!({"note": "cancelled"}))
            .await?;
        self.propagate_completion(&saved).await?;
        Ok(saved)
    }

    /// Places a non-terminal, non-held ticket on hold, recording the prior
    /// state and `reason` on the `ticket:hold` event.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::StateConflict`] when terminal or already held.
    pub async fn hold(&self, ticket: Ticket, reason: String) -> Result<Ticket, ForgeError> {
        let prior_state = ticket.state;
        self.apply_transition(
            ticket,
            TicketState::OnHold,
            EventType::TicketHold,
            serde_json::json!({"prior_state": prior_state, "reason": reason}),
        )
        .await
    }

    /// Resumes a held ticket to the state recorded on its most recent
    /// `ticket:hold` event.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::StateConflict`] outside `on_hold`, or
    /// [`ForgeError::Internal`] when no hold event can be found.
    pub async fn resume(&self, ticket: Ticket) -> Result<Ticket, ForgeError> {
        if ticket.state != TicketState::OnHold {
            return Err(state_conflict(ticket.state));
        }
        let prior_state = self.last_hold_prior_state(&ticket.id).await?;
        self.apply_transition(ticket, prior_state, EventType::TicketActivity, serde_json::json!({"note": "resumed"})).await
    }

    /// Runs one reaper pass: returns tickets whose lease has expired while
    /// in a working state back to `ready` with incremented retry count and
    /// a backoff-computed `retry_after`.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ForgeError`] on a store failure.
    pub async fn run_reaper(&self) -> Result<Vec<TicketId>, ForgeError> {
        let now = self.clock.now();
        let reaped = self.store.reap_expired_leases(now, retry_backoff).await?;
        for id in &reaped {
            tracing::info!(ticket_id = %id, "reaped expired lease");
        }
        Ok(reaped)
    }

    async fn apply_transition(
        &self,
        mut ticket: Ticket,
        to: TicketState,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Result<Ticket, ForgeError> {
        if !ticket.state.is_legal_transition(to) {
            return Err(state_conflict(ticket.state));
        }
        let expected_row_version = ticket.row_version;
        ticket.state = to;
        ticket.updated_at = self.clock.now();
        let event = Event {
            id: EventId::new(uuid::Uuid::new_v4().to_string()),
            subject: EventSubject::Ticket(ticket.id.clone()),
            event_type,
            payload,
            created_at: self.clock.now(),
        };
        let saved = self.store.update_ticket(ticket, expected_row_version, vec![event.clone()]).await?;
        self.publish(&saved, event).await;
        Ok(saved)
    }

    /// On transition to a terminal ticket state, counts the owning
    /// project's remaining non-terminal tickets and, if none remain,
    /// advances the linked session to `completed`.
    async fn propagate_completion(&self, ticket: &Ticket) -> Result<(), ForgeError> {
        let counts = self.store.open_tickets_remaining(&ticket.project_id).await?;
        if counts.non_terminal > 0 {
            return Ok(());
        }
        let Some(session) = self.store.get_session_by_project(&ticket.project_id).await? else {
            return Ok(());
        };
        if session.state != SessionState::Building {
            return Ok(());
        }
        let mut updated = session.clone();
        updated.state = SessionState::Completed;
        updated.updated_at = self.clock.now();
        let event = Event {
            id: EventId::new(uuid::Uuid::new_v4().to_string()),
            subject: EventSubject::Session(session.id.clone()),
            event_type: EventType::SessionUpdate,
            payload: serde_json::json!({"state": "completed"}),
            created_at: self.clock.now(),
        };
        let saved = self.store.update_session(updated, session.row_version, vec![event.clone()]).await?;
        if let Err(err) = self.bus.publish(Room::Session(saved.id.clone()), event).await {
            tracing::debug!(session_id = %saved.id, error = %err, "no subscribers for session room");
        }
        Ok(())
    }

    async fn last_hold_prior_state(&self, ticket_id: &TicketId) -> Result<TicketState, ForgeError> {
        let events = self.store.list_events(&Room::Ticket(ticket_id.clone()), None).await?;
        events
            .into_iter()
            .rev()
            .find(|event| event.event_type == EventType::TicketHold)
            .and_then(|event| event.payload.get("prior_state").cloned())
            .and_then(|value| serde_json::from_value::<TicketState>(value).ok())
            .ok_or_else(|| ForgeError::Internal(format!("no hold event found for ticket {ticket_id}")))
    }

    async fn publish_activity(&self, ticket: &Ticket, event_type: EventType, payload: serde_json::Value) {
        let event = Event {
            id: EventId::new(uuid::Uuid::new_v4().to_string()),
            subject: EventSubject::Ticket(ticket.id.clone()),
            event_type,
            payload,
            created_at: self.clock.now(),
        };
        self.publish(ticket, event).await;
    }

    async fn publish(&self, ticket: &Ticket, event: Event) {
        if let Err(err) = self.bus.publish(Room::Ticket(ticket.id.clone()), event).await {
            tracing::debug!(ticket_id = %ticket.id, error = %err, "no subscribers for ticket room");
        }
    }
}

/// Builds a state-conflict error carrying the current ticket state.
fn state_conflict(current: TicketState) -> ForgeError {
    ForgeError::StateConflict {
        current_state: serde_json::to_value(current).map_or_else(|_| "unknown".to_string(), |v| v.as_str().unwrap_or("unknown").to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CriticFeedbackItem;
    use crate::core::FeedbackSeverity;
    use crate::core::ProjectId;
    use crate::core::TicketPriority;
    use crate::core::TicketScope;

    fn draft(title: &str, depends_on: Vec<&str>, now: Timestamp) -> TicketDraft {
        TicketDraft {
            ticket: Ticket {
                id: TicketId::new("placeholder"),
                project_id: ProjectId::new("placeholder"),
                title: title.to_string(),
                description: String::new(),
                acceptance_criteria: vec![],
                state: TicketState::Draft,
                epic: None,
                scope: TicketScope::Small,
                file_hints: vec![],
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
                trace_id: TraceId::new("placeholder"),
                repository_url: None,
                priority: TicketPriority::Medium,
            },
            depends_on: depends_on.into_iter().map(str::to_string).collect(),
        }
    }

    #[test]
    fn from_drafts_marks_leaf_tickets_ready_and_others_blocked() {
        let now = Timestamp::from_offset(time::OffsetDateTime::UNIX_EPOCH);
        let drafts = vec![draft("scaffold", vec![], now), draft("implement", vec!["scaffold"], now)];
        let batch = TicketBatch::from_drafts(ProjectId::new("p1"), drafts, now).expect("batch");
        assert_eq!(batch.dependencies.len(), 1);
        let scaffold = batch.tickets.iter().find(|t| t.title == "scaffold").expect("scaffold");
        let implement = batch.tickets.iter().find(|t| t.title == "implement").expect("implement");
        assert_eq!(scaffold.state, TicketState::Ready);
        assert_eq!(implement.state, TicketState::Blocked);
    }

    #[test]
    fn from_drafts_rejects_unresolvable_dependency_reference() {
        let now = Timestamp::from_offset(time::OffsetDateTime::UNIX_EPOCH);
        let drafts = vec![draft("implement", vec!["nonexistent"], now)];
        let result = TicketBatch::from_drafts(ProjectId::new("p1"), drafts, now);
        assert!(result.is_err());
    }

    #[test]
    fn from_drafts_rejects_a_cycle() {
        let now = Timestamp::from_offset(time::OffsetDateTime::UNIX_EPOCH);
        let drafts = vec![draft("a", vec!["b"], now), draft("b", vec!["a"], now)];
        let result = TicketBatch::from_drafts(ProjectId::new("p1"), drafts, now);
        assert!(matches!(result, Err(ForgeError::Integrity(_))));
    }

    #[test]
    fn critic_feedback_item_defaults_to_unspecified_severity() {
        let item = CriticFeedbackItem {
            severity: FeedbackSeverity::Unspecified,
            category: String::new(),
            file: None,
            line: None,
            description: "x".to_string(),
            suggestion: None,
        };
        assert_eq!(item.severity, FeedbackSeverity::Unspecified);
    }
}
