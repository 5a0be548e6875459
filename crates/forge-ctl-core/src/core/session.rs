// forge-ctl-core/src/core/session.rs
// ============================================================================
// Module: Session Data Model
// Description: Session, Message, and Approval records plus the session state
//              transition graph.
// Purpose: Define the HITL dialogue aggregate as semantic records.
// Dependencies: serde, crate::core::{identifiers, time}
// ============================================================================

//! ## Overview
//! A [`Session`] is one project's journey from free-form idea to approved
//! specification and issued tickets. State only ever advances along the
//! edges in [`SessionState::is_legal_transition`]; the engine is the only
//! writer, but the graph itself is pure data so tests can walk it without a
//! store.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ProjectId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::TenantId;
use crate::core::identifiers::UserId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Session State
// ============================================================================

/// The HITL session state machine's state set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Awaiting the first user turn.
    Input,
    /// Dialogue in progress.
    Clarifying,
    /// Owner or model has confirmed readiness to generate a spec.
    ReadyForDocs,
    /// Spec generation in flight.
    GeneratingSpec,
    /// Spec produced, awaiting human approval.
    Reviewing,
    /// Spec approved, awaiting build start.
    Approved,
    /// Ticket generation and dispatch in progress.
    Building,
    /// All tickets reached a terminal state.
    Completed,
    /// Cancelled by owner or operator.
    Cancelled,
}

impl SessionState {
    /// Returns true when no further transitions are legal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Returns true when `to` is a legal transition target from `self`.
    ///
    /// Cancellation is legal from any non-terminal state and is checked by
    /// the caller rather than encoded as N separate edges here.
    #[must_use]
    pub fn is_legal_transition(self, to: Self) -> bool {
        if to == Self::Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Self::Input, Self::Clarifying)
                | (Self::Clarifying, Self::Clarifying)
                | (Self::Clarifying, Self::ReadyForDocs)
                | (Self::ReadyForDocs, Self::GeneratingSpec)
                | (Self::GeneratingSpec, Self::Reviewing)
                | (Self::GeneratingSpec, Self::Clarifying)
                | (Self::Reviewing, Self::Approved)
                | (Self::Reviewing, Self::Clarifying)
                | (Self::Approved, Self::Building)
                | (Self::Building, Self::Completed)
        )
    }
}

// ============================================================================
// SECTION: Project Type
// ============================================================================

/// Tag describing what kind of project a session is designing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectType {
    /// A new application built from scratch.
    NewApplication,
    /// A feature added to an existing repository.
    BuildFeature,
    /// An MCP server.
    McpServer,
}

// ============================================================================
// SECTION: Clarification Context
// ============================================================================

/// The five weighted progress categories and their fixed weights.
pub const PROGRESS_CATEGORIES: [(&str, f64); 5] = [
    ("project_type", 20.0),
    ("tech_stack", 25.0),
    ("scale", 15.0),
    ("features", 25.0),
    ("constraints", 15.0),
];

/// Structured bag of gathered requirements plus weighted completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationContext {
    /// Free-form gathered fields, keyed by category then field name.
    pub gathered: serde_json::Value,
    /// Weighted composite completion percentage, 0.0..=100.0.
    pub progress: f64,
    /// Whether the owner has confirmed readiness in the dialogue.
    pub owner_confirmed: bool,
}

impl Default for ClarificationContext {
    fn default() -> Self {
        Self {
            gathered: serde_json::Value::Object(serde_json::Map::new()),
            progress: 0.0,
            owner_confirmed: false,
        }
    }
}

impl ClarificationContext {
    /// Returns true when the model may set `ready_for_spec`.
    #[must_use]
    pub fn meets_readiness_threshold(&self) -> bool {
        self.progress >= 80.0 && self.owner_confirmed
    }

    /// Merges a newer turn's gathered fields into this context per the
    /// deep-merge law: recursive object merge, last-writer-wins at leaves,
    /// list fields replaced wholly, null-or-missing leaves preserving the
    /// older value. Never silently discards a field that was already set.
    pub fn merge_gathered(&mut self, newer: &serde_json::Value) {
        self.gathered = deep_merge(&self.gathered, newer);
    }

    /// Weighted composite completion over [`PROGRESS_CATEGORIES`]: a
    /// category credits its full weight once `gathered` holds any non-empty
    /// value under its key, nothing otherwise. Computed from `gathered`
    /// directly rather than trusted from the model's own estimate.
    #[must_use]
    pub fn composite_progress(&self) -> f64 {
        let Some(categories) = self.gathered.as_object() else {
            return 0.0;
        };
        PROGRESS_CATEGORIES
            .iter()
            .filter(|(name, _)| categories.get(*name).is_some_and(category_is_filled))
            .map(|(_, weight)| weight)
            .sum()
    }
}

/// Whether a gathered category's value counts as filled: present and
/// non-empty, not merely present.
fn category_is_filled(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Object(map) => !map.is_empty(),
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Bool(_) | serde_json::Value::Number(_) => true,
    }
}

/// Recursive object merge with last-writer-wins leaves, whole-list
/// replacement, and null-preserves-old semantics.
#[must_use]
pub fn deep_merge(old: &serde_json::Value, newer: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match (old, newer) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut merged: BTreeMap<String, Value> =
                old_map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            for (key, new_value) in new_map {
                if new_value.is_null() {
                    continue;
                }
                let merged_value = match old_map.get(key) {
                    Some(old_value) => deep_merge(old_value, new_value),
                    None => new_value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            let mut out = serde_json::Map::new();
            for (k, v) in merged {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        (_, Value::Null) => old.clone(),
        (_, newer) => newer.clone(),
    }
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// One project's journey from idea to approved specification and tickets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Stable identifier.
    pub id: SessionId,
    /// Tenant that owns the session.
    pub tenant_id: TenantId,
    /// Human who created the session.
    pub owner_id: UserId,
    /// What kind of project this session is designing.
    pub project_type: ProjectType,
    /// Human-readable project name.
    pub project_name: String,
    /// Free-text initial description.
    pub description: String,
    /// Current state in the session state machine.
    pub state: SessionState,
    /// Accumulated clarification context.
    pub clarification: ClarificationContext,
    /// The spec card: the opaque specification artifact produced after
    /// spec generation succeeds; null until produced.
    pub spec_card: Option<String>,
    /// Linked project once tickets are generated.
    pub project_id: Option<ProjectId>,
    /// Repository analysis snapshot, present only for build-feature sessions.
    pub repo_analysis: Option<serde_json::Value>,
    /// Row version for optimistic-concurrency updates.
    pub row_version: u64,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last-update timestamp.
    pub updated_at: Timestamp,
    /// Approval timestamp; non-null iff state has passed `reviewing`.
    pub approved_at: Option<Timestamp>,
    /// Approving principal; non-null iff state has passed `reviewing`.
    pub approved_by: Option<UserId>,
}

impl Session {
    /// Returns true when the approval fields are consistent with state:
    /// both set once the session has passed `reviewing`, both absent
    /// before.
    #[must_use]
    pub fn approval_fields_consistent(&self) -> bool {
        let passed_reviewing = matches!(
            self.state,
            SessionState::Approved | SessionState::Building | SessionState::Completed
        );
        passed_reviewing == (self.approved_at.is_some() && self.approved_by.is_some())
    }
}

// ============================================================================
// SECTION: Message
// ============================================================================

/// A turn in the dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The human driving the session.
    User,
    /// The model adapter's reply.
    Assistant,
    /// System-authored narration (e.g. revision feedback).
    System,
}

/// Tag describing the dialogue purpose of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// The initial project description.
    Initial,
    /// An assistant clarification question.
    Question,
    /// A user answer.
    Answer,
    /// The generated spec card.
    Spec,
    /// A build-progress narration.
    Progress,
}

/// One turn in a session's dialogue. Never mutated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Stable identifier.
    pub id: crate::core::identifiers::MessageId,
    /// Owning session.
    pub session_id: SessionId,
    /// Speaker role.
    pub role: MessageRole,
    /// Message content.
    pub content: String,
    /// Dialogue purpose tag.
    pub message_type: MessageType,
    /// Creation timestamp; messages within a session form a total order by
    /// this field.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Approval
// ============================================================================

/// What a human gating decision is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    /// Approval of the generated spec card.
    SpecApproval,
    /// Approval to begin the build.
    BuildStart,
}

/// Resolution status of an approval record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a human decision.
    Pending,
    /// Approved.
    Approved,
    /// Rejected.
    Rejected,
}

/// Human gating record for a session transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    /// Stable identifier.
    pub id: crate::core::identifiers::ApprovalId,
    /// Session the approval gates.
    pub session_id: SessionId,
    /// What kind of gate this is.
    pub approval_type: ApprovalType,
    /// The action the approval unlocks, e.g. `"start-build"`.
    pub target_action: String,
    /// Free-form context supplied with the gate request.
    pub context: serde_json::Value,
    /// Current resolution status.
    pub status: ApprovalStatus,
    /// Principal who resolved the approval.
    pub resolver: Option<UserId>,
    /// Resolution timestamp.
    pub resolved_at: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn legal_transition_graph_matches_specification() {
        assert!(SessionState::Input.is_legal_transition(SessionState::Clarifying));
        assert!(SessionState::Clarifying.is_legal_transition(SessionState::Clarifying));
        assert!(SessionState::Clarifying.is_legal_transition(SessionState::ReadyForDocs));
        assert!(SessionState::Reviewing.is_legal_transition(SessionState::Approved));
        assert!(SessionState::Reviewing.is_legal_transition(SessionState::Clarifying));
        assert!(SessionState::Approved.is_legal_transition(SessionState::Building));
        assert!(SessionState::Building.is_legal_transition(SessionState::Completed));
        assert!(!SessionState::Input.is_legal_transition(SessionState::Approved));
        assert!(!SessionState::Completed.is_legal_transition(SessionState::Cancelled));
    }

    #[test]
    fn cancellation_legal_from_any_non_terminal_state() {
        for state in [
            SessionState::Input,
            SessionState::Clarifying,
            SessionState::ReadyForDocs,
            SessionState::GeneratingSpec,
            SessionState::Reviewing,
            SessionState::Approved,
            SessionState::Building,
        ] {
            assert!(state.is_legal_transition(SessionState::Cancelled));
        }
        assert!(!SessionState::Cancelled.is_legal_transition(SessionState::Cancelled));
    }

    #[test]
    fn deep_merge_preserves_old_leaves_on_null() {
        let old = json!({"tech_stack": {"frontend": "react"}, "scale": "small"});
        let newer = json!({"tech_stack": {"backend": "node"}, "scale": null});
        let merged = deep_merge(&old, &newer);
        assert_eq!(merged["tech_stack"]["frontend"], json!("react"));
        assert_eq!(merged["tech_stack"]["backend"], json!("node"));
        assert_eq!(merged["scale"], json!("small"));
    }

    #[test]
    fn deep_merge_replaces_lists_wholly() {
        let old = json!({"features": ["a", "b"]});
        let newer = json!({"features": ["c"]});
        let merged = deep_merge(&old, &newer);
        assert_eq!(merged["features"], json!(["c"]));
    }

    proptest::proptest! {
        #[test]
        fn deep_merge_null_leaves_never_erase_an_old_value(old_value in "[a-z]{1,8}") {
            let old = json!({"field": old_value});
            let newer = json!({"field": null});
            let merged = deep_merge(&old, &newer);
            prop_assert_eq!(merged["field"], json!(old_value));
        }

        #[test]
        fn deep_merge_non_null_scalars_always_win(old_value in "[a-z]{1,8}", new_value in "[a-z]{1,8}") {
            let old = json!({"field": old_value});
            let newer = json!({"field": new_value});
            let merged = deep_merge(&old, &newer);
            prop_assert_eq!(merged["field"], json!(new_value));
        }
    }

    #[test]
    fn readiness_threshold_requires_confirmation() {
        let mut ctx = ClarificationContext { progress: 90.0, ..Default::default() };
        assert!(!ctx.meets_readiness_threshold());
        ctx.owner_confirmed = true;
        assert!(ctx.meets_readiness_threshold());
    }

    #[test]
    fn composite_progress_sums_weights_of_filled_categories_only() {
        let mut ctx = ClarificationContext::default();
        ctx.merge_gathered(&json!({"project_type": "new_application", "tech_stack": {"language": "rust"}}));
        assert!((ctx.composite_progress() - 45.0).abs() < f64::EPSILON);
    }

    #[test]
    fn composite_progress_ignores_empty_or_null_categories() {
        let mut ctx = ClarificationContext::default();
        ctx.merge_gathered(&json!({"project_type": "", "tech_stack": null, "scale": {}, "features": ["realtime sync"]}));
        assert!((ctx.composite_progress() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn composite_progress_is_zero_for_empty_gathered() {
        let ctx = ClarificationContext::default();
        assert_eq!(ctx.composite_progress(), 0.0);
    }
}
