// forge-ctl-providers/src/wire.rs
// ============================================================================
// Module: Provider Wire Types
// Description: Serializable/deserializable shadows of core types that are
//              deliberately not given serde derives in the core crate.
// Purpose: Keep wire-format coupling inside the HTTP providers rather than
//          leaking onto domain types used by the engines.
// Dependencies: forge-ctl-core
// ============================================================================

//! ## Overview
//! [`forge_ctl_core::DialogueRequest`] and [`forge_ctl_core::TicketDraft`]
//! carry no serde derives because nothing in the core crate serializes
//! them — only this crate's HTTP boundary does. Rather than add derives to
//! core types for a concern only providers have, each gets a narrow wire
//! shadow here.

use forge_ctl_core::DialogueRequest;
use forge_ctl_core::Message;
use forge_ctl_core::Ticket;
use forge_ctl_core::TicketDraft;
use serde::Deserialize;
use serde::Serialize;

/// Wire shadow of [`DialogueRequest`] for outbound serialization.
#[derive(Serialize)]
pub struct DialogueRequestWire<'a> {
    /// Full prior message history.
    pub history: &'a [Message],
    /// The new user turn's content.
    pub user_turn: &'a str,
    /// Repository-analysis context block, if present.
    pub repo_context: &'a Option<serde_json::Value>,
}

impl<'a> DialogueRequestWire<'a> {
    /// Builds a wire request from the domain request.
    #[must_use]
    pub fn from_request(request: &'a DialogueRequest) -> Self {
        Self { history: &request.history, user_turn: &request.user_turn, repo_context: &request.repo_context }
    }
}

/// Wire shadow of [`TicketDraft`] for inbound deserialization.
#[derive(Deserialize)]
pub struct TicketDraftWire {
    /// Draft ticket fields.
    pub ticket: Ticket,
    /// Predecessor ticket titles within the same batch.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl TicketDraftWire {
    /// Converts into the domain type.
    #[must_use]
    pub fn into_draft(self) -> TicketDraft {
        TicketDraft { ticket: self.ticket, depends_on: self.depends_on }
    }
}
