// forge-ctl-server/src/lib.rs
// ============================================================================
// Module: Forge Server Library
// Description: Public API surface for the HTTP/WebSocket control-plane
//              boundary.
// Purpose: Expose router construction and the shared application state.
// Dependencies: forge-ctl-core, forge-ctl-bus, axum
// ============================================================================

//! ## Overview
//! The HTTP/WebSocket boundary is the only place that knows about bearer
//! tokens, status codes, and JSON envelopes; everything past [`routes`]
//! calls straight into [`forge_ctl_core::SessionEngine`],
//! [`forge_ctl_core::TicketEngine`], and [`forge_ctl_core::DispatchLoop`].
//! Collaborators are boxed behind trait objects here (`Arc<dyn Trait>`)
//! rather than threaded through as generic parameters: the engines in
//! `forge-ctl-core` stay fully generic, and this crate is where that
//! flexibility gets collapsed into one concrete, routable state type.

mod auth;
mod error;
mod routes;
mod state;
mod token;

pub use error::ApiError;
pub use routes::build_router;
pub use state::AppState;
pub use state::Dispatch;
pub use state::DynBus;
pub use state::DynCritic;
pub use state::DynDeploy;
pub use state::DynModel;
pub use state::DynRepoHost;
pub use state::DynRetrieval;
pub use state::DynStore;
pub use state::DynWorker;
pub use state::Sessions;
pub use state::Tickets;
pub use token::TokenCodec;
pub use token::TokenError;
