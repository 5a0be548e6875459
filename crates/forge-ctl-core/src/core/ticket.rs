// forge-ctl-core/src/core/ticket.rs
// ============================================================================
// Module: Ticket Data Model
// Description: Ticket, Dependency, and Lease records plus the ticket state
//              transition graph.
// Purpose: Define the atomic scheduling unit as semantic records.
// Dependencies: serde, crate::core::{identifiers, time}
// ============================================================================

//! ## Overview
//! A [`Ticket`] is one unit of implementation work. State only ever advances
//! along the edges in [`TicketState::is_legal_transition`]; the ticket
//! engine is the only writer.

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::AssigneeId;
use crate::core::identifiers::ProjectId;
use crate::core::identifiers::TicketId;
use crate::core::identifiers::TraceId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Ticket State
// ============================================================================

/// The ticket state machine's state set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    /// Created but not yet placed into ready or blocked.
    Draft,
    /// Every predecessor is terminal; eligible for claim.
    Ready,
    /// At least one predecessor is not yet terminal.
    Blocked,
    /// Paused by an operator; prior state recorded on the hold event.
    OnHold,
    /// Claimed by a worker, lease held.
    Assigned,
    /// Worker reported work start.
    InProgress,
    /// Worker reported a diff; awaiting critic verdict.
    Verifying,
    /// Critic approved; pull request opened.
    InReview,
    /// Critic requested changes, attempts remaining.
    ChangesRequested,
    /// Critic requested changes, attempts exhausted; awaiting a human.
    NeedsReview,
    /// Deploy signalled success.
    Done,
    /// Cancelled.
    Cancelled,
}

impl TicketState {
    /// Returns true when no further transitions are legal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }

    /// Returns true when `to` is a legal transition target from `self`,
    /// excluding the hold/resume and cancel edges which are legal from any
    /// (non-terminal, for cancel) state and are checked by the caller.
    #[must_use]
    pub fn is_legal_transition(self, to: Self) -> bool {
        if to == Self::Cancelled {
            return !self.is_terminal();
        }
        if self == Self::OnHold {
            return !to.is_terminal();
        }
        if to == Self::OnHold {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Self::Draft, Self::Blocked)
                | (Self::Draft, Self::Ready)
                | (Self::Blocked, Self::Ready)
                | (Self::Ready, Self::Assigned)
                | (Self::Assigned, Self::InProgress)
                | (Self::Assigned, Self::Verifying)
                | (Self::InProgress, Self::Verifying)
                | (Self::Verifying, Self::InReview)
                | (Self::Verifying, Self::ChangesRequested)
                | (Self::Verifying, Self::NeedsReview)
                | (Self::ChangesRequested, Self::Ready)
                | (Self::InReview, Self::Done)
                | (Self::InReview, Self::ChangesRequested)
        )
    }
}

// ============================================================================
// SECTION: Ticket Attributes
// ============================================================================

/// Rough estimate of implementation scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketScope {
    /// Small.
    Small,
    /// Medium.
    Medium,
    /// Large.
    Large,
}

/// Scheduling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    /// Lowest priority; selected only after higher tiers are exhausted.
    Low,
    /// Default priority.
    Medium,
    /// Selected ahead of medium/low-priority ready tickets.
    High,
}

/// What kind of identity may hold a ticket's assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssigneeKind {
    /// An automated worker.
    Agent,
    /// A human.
    Human,
}

/// Severity of one critic feedback item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSeverity {
    /// Severity was not supplied by the critic.
    Unspecified,
    /// Informational, non-blocking.
    Info,
    /// Should be fixed before approval.
    Warning,
    /// Must be fixed before approval.
    Blocking,
}

/// One structured critic feedback item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticFeedbackItem {
    /// Severity of the finding.
    #[serde(default = "default_feedback_severity")]
    pub severity: FeedbackSeverity,
    /// Free-form category label.
    #[serde(default)]
    pub category: String,
    /// File the finding applies to, if any.
    #[serde(default)]
    pub file: Option<String>,
    /// Line the finding applies to, if any.
    #[serde(default)]
    pub line: Option<u32>,
    /// Human-readable description.
    pub description: String,
    /// Suggested remediation, if any.
    #[serde(default)]
    pub suggestion: Option<String>,
}

/// Returns the default severity used when a feedback item omits one.
const fn default_feedback_severity() -> FeedbackSeverity {
    FeedbackSeverity::Unspecified
}

/// Critic feedback, accepted either as the structured list or — for
/// backward compatibility with looser upstream producers — as a raw list
/// of strings, each normalized into a description-only item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CriticFeedback {
    /// The structured, preferred shape.
    Structured(Vec<CriticFeedbackItem>),
    /// A raw string list, normalized on read.
    Raw(Vec<String>),
}

impl CriticFeedback {
    /// Normalizes either representation into the structured shape.
    #[must_use]
    pub fn into_structured(self) -> Vec<CriticFeedbackItem> {
        match self {
            Self::Structured(items) => items,
            Self::Raw(strings) => strings
                .into_iter()
                .map(|description| CriticFeedbackItem {
                    severity: FeedbackSeverity::Unspecified,
                    category: String::new(),
                    file: None,
                    line: None,
                    description,
                    suggestion: None,
                })
                .collect(),
        }
    }
}

// ============================================================================
// SECTION: Ticket
// ============================================================================

/// One unit of implementation work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    /// Stable identifier.
    pub id: TicketId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Human-readable title.
    pub title: String,
    /// Implementation description.
    pub description: String,
    /// Acceptance criteria the critic evaluates against.
    pub acceptance_criteria: Vec<String>,
    /// Current state.
    pub state: TicketState,
    /// Epic tag, grouping related tickets.
    pub epic: Option<String>,
    /// Estimated implementation scope.
    pub scope: TicketScope,
    /// Hints about which files are likely involved.
    pub file_hints: Vec<String>,
    /// Current assignee identity, if claimed.
    pub assignee: Option<AssigneeId>,
    /// Kind of identity the assignee is.
    pub assignee_kind: Option<AssigneeKind>,
    /// Branch name once a worker starts.
    pub branch_name: Option<String>,
    /// Pull request URL once opened.
    pub pull_request_url: Option<String>,
    /// Number of critic rejections.
    pub rejection_count: u32,
    /// Number of reaper-driven or rejection-driven retries.
    pub retry_count: u32,
    /// Earliest time the ticket may be reclaimed after a retry.
    pub retry_after: Option<Timestamp>,
    /// Critic feedback from the most recent verdict, if any.
    pub critic_feedback: Option<CriticFeedback>,
    /// Files actually touched, populated by the worker on completion.
    pub files_involved: Vec<String>,
    /// Lease expiry; `None` when unleased.
    pub lease_expires: Option<Timestamp>,
    /// Last heartbeat renewal.
    pub last_heartbeat: Option<Timestamp>,
    /// Row version for optimistic-concurrency updates.
    pub row_version: u64,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last-update timestamp.
    pub updated_at: Timestamp,
    /// Correlation identifier threaded through dispatch and external calls.
    pub trace_id: TraceId,
    /// Repository URL, if known.
    pub repository_url: Option<String>,
    /// Scheduling priority.
    pub priority: TicketPriority,
}

impl Ticket {
    /// Returns true when the ticket currently holds a live lease at `now`.
    #[must_use]
    pub fn has_live_lease(&self, now: Timestamp) -> bool {
        self.lease_expires.is_some_and(|expiry| now.is_before(&expiry))
    }

    /// Returns true when the ticket may be claimed: state `ready`,
    /// `assignee_kind = agent`, no live lease, and `retry_after` passed.
    #[must_use]
    pub fn is_claimable(&self, now: Timestamp) -> bool {
        self.state == TicketState::Ready
            && !self.has_live_lease(now)
            && self.retry_after.is_none_or(|after| !now.is_before(&after))
    }
}

// ============================================================================
// SECTION: Dependency
// ============================================================================

/// A directed edge (dependent → dependency) in the ticket DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// The ticket that depends on `depends_on`.
    pub ticket_id: TicketId,
    /// The predecessor ticket.
    pub depends_on: TicketId,
}

// ============================================================================
// SECTION: Lease
// ============================================================================

/// A time-bounded exclusive claim of a ticket by a worker identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    /// The leased ticket.
    pub ticket_id: TicketId,
    /// Holder identity.
    pub holder: AssigneeId,
    /// When the lease was acquired.
    pub acquired_at: Timestamp,
    /// When the lease expires absent renewal.
    pub expires_at: Timestamp,
}

// ============================================================================
// SECTION: Dependency Graph
// ============================================================================

/// Returns true when `dependencies` contains a cycle over `ticket_ids`.
/// Cycles are rejected at creation time; this is the pure check both the
/// engine and the store run before committing a batch.
#[must_use]
pub fn has_cycle(ticket_ids: &[TicketId], dependencies: &[Dependency]) -> bool {
    use std::collections::HashMap;
    use std::collections::HashSet;

    let mut adjacency: HashMap<&TicketId, Vec<&TicketId>> = HashMap::new();
    for dep in dependencies {
        adjacency.entry(&dep.ticket_id).or_default().push(&dep.depends_on);
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: HashMap<&TicketId, Mark> = HashMap::new();

    fn visit<'a>(
        node: &'a TicketId,
        adjacency: &HashMap<&'a TicketId, Vec<&'a TicketId>>,
        marks: &mut HashMap<&'a TicketId, Mark>,
        stack: &mut HashSet<&'a TicketId>,
    ) -> bool {
        if let Some(mark) = marks.get(node) {
            return *mark == Mark::Visiting && stack.contains(node);
        }
        marks.insert(node, Mark::Visiting);
        stack.insert(node);
        if let Some(neighbors) = adjacency.get(node) {
            for neighbor in neighbors {
                if stack.contains(neighbor) || visit(neighbor, adjacency, marks, stack) {
                    return true;
                }
            }
        }
        stack.remove(node);
        marks.insert(node, Mark::Done);
        false
    }

    let mut stack = HashSet::new();
    for id in ticket_ids {
        if visit(id, &adjacency, &mut marks, &mut stack) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn legal_transition_graph_matches_specification() {
        assert!(TicketState::Draft.is_legal_transition(TicketState::Ready));
        assert!(TicketState::Draft.is_legal_transition(TicketState::Blocked));
        assert!(TicketState::Blocked.is_legal_transition(TicketState::Ready));
        assert!(TicketState::Ready.is_legal_transition(TicketState::Assigned));
        assert!(TicketState::Assigned.is_legal_transition(TicketState::Verifying));
        assert!(TicketState::Verifying.is_legal_transition(TicketState::InReview));
        assert!(TicketState::ChangesRequested.is_legal_transition(TicketState::Ready));
        assert!(TicketState::InReview.is_legal_transition(TicketState::Done));
        assert!(!TicketState::Done.is_legal_transition(TicketState::Ready));
    }

    #[test]
    fn cancel_legal_from_any_non_terminal_state() {
        assert!(TicketState::NeedsReview.is_legal_transition(TicketState::Cancelled));
        assert!(!TicketState::Done.is_legal_transition(TicketState::Cancelled));
    }

    #[test]
    fn hold_and_resume_round_trip_to_prior_state() {
        assert!(TicketState::InProgress.is_legal_transition(TicketState::OnHold));
        assert!(TicketState::OnHold.is_legal_transition(TicketState::InProgress));
        assert!(!TicketState::Done.is_legal_transition(TicketState::OnHold));
        assert!(!TicketState::OnHold.is_legal_transition(TicketState::Done));
    }

    proptest::proptest! {
        #[test]
        fn has_cycle_detects_any_single_back_edge(len in 2usize..8) {
            let ids: Vec<TicketId> = (0..len).map(|i| TicketId::new(format!("t{i}"))).collect();
            let mut deps: Vec<Dependency> = (1..len).map(|i| Dependency { ticket_id: ids[i].clone(), depends_on: ids[i - 1].clone() }).collect();
            prop_assert!(!has_cycle(&ids, &deps));

            deps.push(Dependency { ticket_id: ids[0].clone(), depends_on: ids[len - 1].clone() });
            prop_assert!(has_cycle(&ids, &deps));
        }

        #[test]
        fn has_cycle_is_false_for_a_self_loop_free_chain_of_any_order(mut order in proptest::collection::vec(0usize..8, 2..8)) {
            order.dedup();
            let ids: Vec<TicketId> = order.iter().map(|i| TicketId::new(format!("t{i}"))).collect();
            prop_assert!(!has_cycle(&ids, &[]));
        }
    }

    #[test]
    fn critic_feedback_raw_strings_normalize_to_description_only() {
        let raw: CriticFeedback = serde_json::from_str(r#"["missing validation"]"#).expect("parse");
        let items = raw.into_structured();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].description, "missing validation");
        assert_eq!(items[0].severity, FeedbackSeverity::Unspecified);
    }

    #[test]
    fn critic_feedback_structured_round_trips() {
        let json = serde_json::json!([{"severity": "blocking", "category": "tests", "description": "no coverage"}]);
        let parsed: CriticFeedback = serde_json::from_value(json).expect("parse");
        let items = parsed.into_structured();
        assert_eq!(items[0].severity, FeedbackSeverity::Blocking);
        assert_eq!(items[0].category, "tests");
    }
}
