// forge-ctl-core/src/core/event.rs
// ============================================================================
// Module: Event Data Model
// Description: Append-only audit/fan-out records and the room addressing
//              scheme used by the real-time bus.
// Purpose: Give every state change a durable, replayable, fan-out-able record.
// Dependencies: serde, crate::core::{identifiers, time}
// ============================================================================

//! ## Overview
//! Every state change writes one or more [`Event`] rows in the same
//! transaction as the row update it describes. Events are never deleted;
//! they are the source the real-time bus drains and the activity-stream
//! endpoints replay.

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::EventId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::TicketId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Event Type
// ============================================================================

/// The enumerated event types, matching the wire `type` field of §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A session row changed (state, clarification, or linkage).
    #[serde(rename = "session:update")]
    SessionUpdate,
    /// A new dialogue message was written.
    #[serde(rename = "session:message")]
    SessionMessage,
    /// An approval record was created.
    #[serde(rename = "approval:requested")]
    ApprovalRequested,
    /// An approval record was resolved.
    #[serde(rename = "approval:resolved")]
    ApprovalResolved,
    /// Build/dispatch narration for a session.
    #[serde(rename = "build:progress")]
    BuildProgress,
    /// Spec generation completed.
    #[serde(rename = "spec:generated")]
    SpecGenerated,
    /// Ticket generation completed.
    #[serde(rename = "tickets:generated")]
    TicketsGenerated,
    /// A ticket state change, lease action, worker log, AI exchange, or
    /// critic verdict.
    #[serde(rename = "ticket:activity")]
    TicketActivity,
    /// A worker lease was acquired.
    #[serde(rename = "lease:acquired")]
    LeaseAcquired,
    /// A worker lease expired and was reaped.
    #[serde(rename = "lease:expired")]
    LeaseExpired,
    /// A successor ticket was unblocked.
    #[serde(rename = "ticket:unblocked")]
    TicketUnblocked,
    /// A ticket was placed on hold; payload carries the prior state.
    #[serde(rename = "ticket:hold")]
    TicketHold,
}

// ============================================================================
// SECTION: Room
// ============================================================================

/// The real-time bus's subscription scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Room {
    /// Scoped to one session and its tickets.
    Session(SessionId),
    /// Scoped to one ticket.
    Ticket(TicketId),
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session(id) => write!(f, "session:{id}"),
            Self::Ticket(id) => write!(f, "ticket:{id}"),
        }
    }
}

impl Room {
    /// Parses a room token of the form `session:<id>` or `ticket:<id>`.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let (scope, id) = token.split_once(':')?;
        match scope {
            "session" => Some(Self::Session(SessionId::new(id))),
            "ticket" => Some(Self::Ticket(TicketId::new(id))),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Event
// ============================================================================

/// Which aggregate an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSubject {
    /// A session-scoped event.
    Session(SessionId),
    /// A ticket-scoped event.
    Ticket(TicketId),
}

impl EventSubject {
    /// Returns the room this event should be published into.
    #[must_use]
    pub fn room(&self) -> Room {
        match self {
            Self::Session(id) => Room::Session(id.clone()),
            Self::Ticket(id) => Room::Ticket(id.clone()),
        }
    }
}

/// An append-only audit/fan-out record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Stable identifier.
    pub id: EventId,
    /// Owning session or ticket.
    pub subject: EventSubject,
    /// The event type tag.
    pub event_type: EventType,
    /// Event-specific payload.
    pub payload: serde_json::Value,
    /// Creation timestamp; non-decreasing within a room.
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_display_matches_wire_format() {
        assert_eq!(Room::Session(SessionId::new("s1")).to_string(), "session:s1");
        assert_eq!(Room::Ticket(TicketId::new("t1")).to_string(), "ticket:t1");
    }

    #[test]
    fn room_parse_round_trips() {
        let room = Room::parse("session:s1").expect("parse");
        assert_eq!(room, Room::Session(SessionId::new("s1")));
        assert!(Room::parse("bogus").is_none());
    }
}
