// forge-ctl-server/src/routes/mod.rs
// ============================================================================
// Module: HTTP/WebSocket Route Tree
// Description: Assembles the full `/api/*` and `/ws` surface over one
//              shared AppState.
// Purpose: Give the binary one function to mount onto a listener.
// Dependencies: axum, crate::state
// ============================================================================

mod auth;
mod hitl;
mod tickets;
mod ws;

use crate::state::AppState;

/// Builds the complete router: `/api/auth`, `/api/hitl`, `/api/tickets`,
/// and `/ws`, all sharing one [`AppState`].
pub fn build_router(state: AppState) -> axum::Router {
    axum::Router::new()
        .nest("/api/auth", auth::router())
        .nest("/api/hitl", hitl::router())
        .nest("/api/tickets", tickets::router())
        .nest("/ws", ws::router())
        .with_state(state)
}
