// forge-ctl-core/src/core/identifiers.rs
// ============================================================================
// Module: Control Plane Identifiers
// Description: Canonical opaque identifiers for sessions, tickets, and events.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every entity referenced across crate boundaries is wrapped in a newtype
//! so that call sites cannot transpose, say, a [`TicketId`] and a
//! [`SessionId`]. Identifiers are opaque and serialize as plain strings;
//! validation (format, existence) happens at the persistence or HTTP
//! boundary, not in these wrappers.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

macro_rules! opaque_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

opaque_id!(TenantId, "Tenant identifier scoping every owned record.");
opaque_id!(UserId, "Principal identifier for a human owner, approver, or operator.");
opaque_id!(SessionId, "HITL session identifier.");
opaque_id!(MessageId, "Dialogue message identifier.");
opaque_id!(ProjectId, "Project identifier that owns a set of tickets.");
opaque_id!(TicketId, "Ticket identifier, the atomic scheduling unit.");
opaque_id!(ApprovalId, "Approval record identifier.");
opaque_id!(EventId, "Append-only event identifier.");
opaque_id!(TraceId, "Correlation identifier threaded through external calls.");
opaque_id!(AssigneeId, "Worker or human identity holding a ticket lease.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let id = TicketId::new("tkt-1");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"tkt-1\"");
        let back: TicketId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }

    #[test]
    fn displays_inner_value() {
        assert_eq!(SessionId::new("sess-9").to_string(), "sess-9");
    }
}
