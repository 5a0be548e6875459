// forge-ctl-core/src/runtime/dispatch_loop.rs
// ============================================================================
// Module: Dispatch & Verification Loop
// Description: Drains the ready queue, hands work to workers, and drives
//              diffs through the critic and repository host.
// Purpose: Implement the Dispatch & Verification Loop component.
// Dependencies: crate::{core, interfaces, runtime}, tracing
// ============================================================================

//! ## Overview
//! [`DispatchLoop`] is stateless between ticks: every fact it needs lives in
//! the persistence layer. One `tick` claims and hands off ready work; worker
//! and deploy results arrive later, out of band, and are applied through
//! [`DispatchLoop::handle_worker_completion`] and
//! [`DispatchLoop::handle_deploy_completion`] — the HTTP boundary routes
//! inbound completion calls to these, it never calls them from inside
//! `tick`. A critic approval enqueues a deploy synchronously, inside
//! `verify_and_advance`, since opening the pull request and kicking off its
//! deploy are both side effects of the same verdict.

use std::sync::Arc;

use crate::core::Clock;
use crate::core::SystemClock;
use crate::core::Ticket;
use crate::core::TicketId;
use crate::core::TraceId;
use crate::interfaces::CriticClient;
use crate::interfaces::CriticVerdict;
use crate::interfaces::DeployClient;
use crate::interfaces::FileChange;
use crate::interfaces::PersistenceStore;
use crate::interfaces::RepoHostClient;
use crate::interfaces::RetrievalClient;
use crate::interfaces::WorkUnit;
use crate::interfaces::WorkerDispatcher;
use crate::runtime::backoff::CRITIC_TRANSIENT_RETRY_CAP;
use crate::runtime::errors::ForgeError;
use crate::runtime::ticket_engine::TicketEngine;

/// Classification of a worker-reported failure, recorded on the ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerFailureClass {
    /// The worker did not report within its allotted time.
    Timeout,
    /// A tool invocation inside the worker failed.
    ToolError,
    /// The underlying model declined or errored.
    ModelError,
    /// The worker's execution environment failed.
    Infrastructure,
}

/// Outcome of one dispatch tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickReport {
    /// Tickets claimed and handed to a worker this tick.
    pub dispatched: usize,
    /// Claimed tickets whose handoff failed and were returned for retry.
    pub handoff_failed: usize,
}

/// Drains ready tickets and drives them through the worker/critic/deploy
/// pipeline's dispatch half; the verification half is invoked separately as
/// worker results arrive.
pub struct DispatchLoop<Store, Bus, Worker, Critic, Repo, Retrieval, Deploy, Clk = SystemClock> {
    store: Arc<Store>,
    tickets: Arc<TicketEngine<Store, Bus, Clk>>,
    worker: Arc<Worker>,
    critic: Arc<Critic>,
    repo_host: Arc<Repo>,
    retrieval: Arc<Retrieval>,
    deploy: Arc<Deploy>,
    clock: Clk,
    parallelism_ceiling: usize,
}

impl<Store, Bus, Worker, Critic, Repo, Retrieval, Deploy, Clk> DispatchLoop<Store, Bus, Worker, Critic, Repo, Retrieval, Deploy, Clk>
where
    Store: PersistenceStore,
    Bus: crate::interfaces::EventPublisher,
    Worker: WorkerDispatcher,
    Critic: CriticClient,
    Repo: RepoHostClient,
    Retrieval: RetrievalClient,
    Deploy: DeployClient,
    Clk: Clock,
{
    /// Builds a new dispatch loop over the given collaborators.
    #[allow(clippy::too_many_arguments, reason = "one field per injected collaborator, no natural grouping")]
    pub fn new(
        store: Arc<Store>,
        tickets: Arc<TicketEngine<Store, Bus, Clk>>,
        worker: Arc<Worker>,
        critic: Arc<Critic>,
        repo_host: Arc<Repo>,
        retrieval: Arc<Retrieval>,
        deploy: Arc<Deploy>,
        clock: Clk,
        parallelism_ceiling: usize,
    ) -> Self {
        Self { store, tickets, worker, critic, repo_host, retrieval, deploy, clock, parallelism_ceiling }
    }

    /// Runs one tick: claims up to the parallelism ceiling of ready
    /// tickets whose `retry_after` has passed, assembles a work unit for
    /// each, and hands it off to the worker dispatcher. A handoff failure
    /// returns the ticket to `ready` via the reaper's next pass rather than
    /// retried in-line, since the lease already records the failed holder.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ForgeError`] when claiming fails outright.
    pub async fn tick(&self, worker_identity: &crate::core::AssigneeId) -> Result<TickReport, ForgeError> {
        let mut report = TickReport::default();
        for _ in 0..self.parallelism_ceiling {
            let Some(ticket) = self.tickets.claim_next(worker_identity).await? else {
                break;
            };
            match self.assemble_and_dispatch(&ticket).await {
                Ok(()) => report.dispatched += 1,
                Err(err) => {
                    tracing::warn!(ticket_id = %ticket.id, error = %err, "worker handoff failed, leaving lease to expire for reaping");
                    report.handoff_failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn assemble_and_dispatch(&self, ticket: &Ticket) -> Result<(), ForgeError> {
        let retrieved_context = match self.retrieval.retrieve(ticket).await {
            Ok(context) => Some(context),
            Err(err) => {
                tracing::debug!(ticket_id = %ticket.id, error = %err, "retrieval failed, proceeding without context");
                None
            }
        };
        let unit = WorkUnit {
            ticket: ticket.clone(),
            repository_url: ticket.repository_url.clone(),
            prior_feedback: ticket.critic_feedback.clone(),
            retrieved_context,
            attempt: ticket.retry_count + 1,
            trace_id: ticket.trace_id.clone(),
        };
        self.worker.dispatch(&unit).await?;
        Ok(())
    }

    /// Applies a worker's reported result: on success, transitions the
    /// ticket through `verifying` and into the critic, opening a pull
    /// request on approval; on failure, classifies the failure and applies
    /// the same retry/ceiling rules as a critic rejection.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ForgeError`] when persistence fails. A
    /// duplicate completion for an already-resolved attempt is a no-op.
    pub async fn handle_worker_completion(
        &self,
        ticket_id: &TicketId,
        attempt: u32,
        trace_id: &TraceId,
        outcome: Result<Vec<FileChange>, WorkerFailureClass>,
    ) -> Result<Option<Ticket>, ForgeError> {
        let Some(ticket) = self.store.get_ticket(ticket_id).await? else {
            return Err(ForgeError::NotFound(format!("ticket {ticket_id}")));
        };
        let awaiting_completion = matches!(ticket.state, crate::core::TicketState::Assigned | crate::core::TicketState::InProgress);
        if ticket.trace_id != *trace_id || attempt <= ticket.retry_count || !awaiting_completion {
            tracing::warn!(ticket_id = %ticket_id, attempt, state = ?ticket.state, "duplicate or stale worker completion ignored");
            return Ok(None);
        }
        match outcome {
            Ok(changes) => {
                let verifying = self.tickets.report_diff(ticket, changes.iter().map(|c| c.path.clone()).collect()).await?;
                Ok(Some(self.verify_and_advance(verifying, &changes, trace_id).await?))
            }
            Err(failure_class) => {
                tracing::warn!(ticket_id = %ticket_id, ?failure_class, "worker reported failure");
                let verdict = CriticVerdict::RequestChanges(crate::core::CriticFeedback::Structured(vec![
                    crate::core::CriticFeedbackItem {
                        severity: crate::core::FeedbackSeverity::Blocking,
                        category: "worker-failure".to_string(),
                        file: None,
                        line: None,
                        description: format!("{failure_class:?}"),
                        suggestion: None,
                    },
                ]));
                let mut verifying = ticket;
                verifying.state = crate::core::TicketState::Verifying;
                Ok(Some(self.tickets.apply_critic_verdict(verifying, verdict, None).await?))
            }
        }
    }

    async fn verify_and_advance(&self, ticket: Ticket, changes: &[FileChange], trace_id: &TraceId) -> Result<Ticket, ForgeError> {
        let mut attempts = 0;
        let verdict = loop {
            match self.critic.evaluate(&ticket, changes, trace_id).await {
                Ok(verdict) => break verdict,
                Err(crate::interfaces::CriticError::Transient(msg)) if attempts < CRITIC_TRANSIENT_RETRY_CAP => {
                    attempts += 1;
                    tracing::debug!(ticket_id = %ticket.id, attempts, error = %msg, "retrying transient critic error");
                }
                Err(err) => return Err(err.into()),
            }
        };
        match &verdict {
            CriticVerdict::Approve => {
                let branch_name = ticket
                    .branch_name
                    .clone()
                    .unwrap_or_else(|| format!("forge-ctl/{}", ticket.id));
                let pull_request_url = self.repo_host.open_pull_request(&ticket, &branch_name, trace_id).await?;
                let in_review = self.tickets.apply_critic_verdict(ticket, verdict, Some(pull_request_url.clone())).await?;
                if let Err(err) = self.deploy.enqueue_deploy(&in_review.id, &pull_request_url, trace_id).await {
                    tracing::warn!(ticket_id = %in_review.id, error = %err, "deploy enqueue failed, ticket remains in_review until retried out of band");
                }
                Ok(in_review)
            }
            CriticVerdict::RequestChanges(_) => self.tickets.apply_critic_verdict(ticket, verdict, None).await,
        }
    }

    /// Applies an external deploy completion signal for `ticket_id`:
    /// `in_review` → `done` on success (propagating session completion), or
    /// back to `changes_requested` on failure.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::NotFound`] when the ticket does not exist, or
    /// a classified error from [`crate::runtime::ticket_engine::TicketEngine::complete_deploy`].
    pub async fn handle_deploy_completion(&self, ticket_id: &TicketId, success: bool, reason: Option<String>) -> Result<Ticket, ForgeError> {
        let Some(ticket) = self.store.get_ticket(ticket_id).await? else {
            return Err(ForgeError::NotFound(format!("ticket {ticket_id}")));
        };
        self.tickets.complete_deploy(ticket, success, reason).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_report_defaults_to_zero() {
        let report = TickReport::default();
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.handoff_failed, 0);
    }
}
