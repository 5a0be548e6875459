// forge-ctl-bus/src/lib.rs
// ============================================================================
// Module: Real-Time Bus Library
// Description: Public API surface for the in-process room-keyed pub/sub bus.
// Purpose: Expose the bus type and the connection heartbeat policy.
// Dependencies: forge-ctl-core
// ============================================================================

//! ## Overview
//! The real-time bus fans committed events out to subscribers scoped to a
//! [`forge_ctl_core::Room`]. It is not a store: publishing is best-effort,
//! at-least-once to currently subscribed connections, with no replay on
//! reconnect. The transport-level framing (WebSocket upgrade, text envelope
//! parsing) lives at the HTTP boundary, not here.

mod bus;
mod heartbeat;

pub use bus::InProcessBus;
pub use bus::RoomSubscription;
pub use heartbeat::HeartbeatPolicy;
pub use heartbeat::PONG_GRACE_INTERVALS;
pub use heartbeat::PING_INTERVAL_SECS;
