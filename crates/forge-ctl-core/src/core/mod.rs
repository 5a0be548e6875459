// forge-ctl-core/src/core/mod.rs
// ============================================================================
// Module: Core Data Model
// Description: Entity records, identifiers, and pure state-transition graphs.
// Purpose: Group the data-level building blocks shared by every engine.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Everything in `core` is plain data plus pure functions over that data
//! (state-transition legality, deep-merge, hashing). No I/O, no engines —
//! those live in [`crate::runtime`].

pub mod event;
pub mod hashing;
pub mod identifiers;
pub mod principal;
pub mod session;
pub mod ticket;
pub mod time;

pub use event::Event;
pub use event::EventSubject;
pub use event::EventType;
pub use event::Room;
pub use identifiers::ApprovalId;
pub use identifiers::AssigneeId;
pub use identifiers::EventId;
pub use identifiers::MessageId;
pub use identifiers::ProjectId;
pub use identifiers::SessionId;
pub use identifiers::TenantId;
pub use identifiers::TicketId;
pub use identifiers::TraceId;
pub use identifiers::UserId;
pub use principal::Principal;
pub use session::Approval;
pub use session::ApprovalStatus;
pub use session::ApprovalType;
pub use session::ClarificationContext;
pub use session::Message;
pub use session::MessageRole;
pub use session::MessageType;
pub use session::ProjectType;
pub use session::Session;
pub use session::SessionState;
pub use ticket::AssigneeKind;
pub use ticket::CriticFeedback;
pub use ticket::CriticFeedbackItem;
pub use ticket::Dependency;
pub use ticket::FeedbackSeverity;
pub use ticket::Lease;
pub use ticket::Ticket;
pub use ticket::TicketPriority;
pub use ticket::TicketScope;
pub use ticket::TicketState;
pub use time::Clock;
pub use time::SystemClock;
pub use time::Timestamp;
