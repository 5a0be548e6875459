// forge-ctl-server/src/state.rs
// ============================================================================
// Module: Shared Server State
// Description: The concrete, routable collaborator assembly axum handlers
//              close over.
// Purpose: Collapse forge-ctl-core's generic engines into one Clone state.
// Dependencies: forge-ctl-core, forge-ctl-bus
// ============================================================================

//! ## Overview
//! Every collaborator is boxed behind a trait object so the engines can be
//! assembled once, at startup, from whatever concrete providers the CLI
//! wires up, without this crate or its handlers needing to be generic.

use std::sync::Arc;

use forge_ctl_bus::InProcessBus;
use forge_ctl_core::CriticClient;
use forge_ctl_core::DeployClient;
use forge_ctl_core::DispatchLoop;
use forge_ctl_core::EventPublisher;
use forge_ctl_core::ModelAdapter;
use forge_ctl_core::PersistenceStore;
use forge_ctl_core::RepoHostClient;
use forge_ctl_core::RetrievalClient;
use forge_ctl_core::SessionEngine;
use forge_ctl_core::SystemClock;
use forge_ctl_core::TicketEngine;
use forge_ctl_core::WorkerDispatcher;

/// Type-erased persistence store.
pub type DynStore = dyn PersistenceStore;
/// Type-erased model adapter.
pub type DynModel = dyn ModelAdapter;
/// Type-erased real-time bus.
pub type DynBus = dyn EventPublisher;
/// Type-erased worker dispatcher.
pub type DynWorker = dyn WorkerDispatcher;
/// Type-erased critic client.
pub type DynCritic = dyn CriticClient;
/// Type-erased repository host client.
pub type DynRepoHost = dyn RepoHostClient;
/// Type-erased retrieval client.
pub type DynRetrieval = dyn RetrievalClient;
/// Type-erased deploy client.
pub type DynDeploy = dyn DeployClient;

/// The session engine, instantiated over boxed collaborators.
pub type Sessions = SessionEngine<DynStore, DynModel, DynBus, SystemClock>;
/// The ticket engine, instantiated over boxed collaborators.
pub type Tickets = TicketEngine<DynStore, DynBus, SystemClock>;
/// The dispatch loop, instantiated over boxed collaborators.
pub type Dispatch = DispatchLoop<DynStore, DynBus, DynWorker, DynCritic, DynRepoHost, DynRetrieval, DynDeploy, SystemClock>;

/// Shared state every HTTP/WebSocket handler closes over.
#[derive(Clone)]
pub struct AppState {
    /// Direct store access for read-only listing routes the engines do not
    /// themselves expose (session/ticket/activity listing).
    pub store: Arc<DynStore>,
    /// Real-time bus, type-erased, as handed to the engines.
    pub bus: Arc<DynBus>,
    /// The same bus, concretely typed so the WebSocket handler can
    /// subscribe to rooms — `EventPublisher` alone does not expose
    /// subscription, only publishing.
    pub realtime: Arc<InProcessBus>,
    /// HITL dialogue engine.
    pub sessions: Arc<Sessions>,
    /// Ticket lifecycle engine.
    pub tickets: Arc<Tickets>,
    /// Dispatch/verification loop, for inbound worker/deploy completion
    /// routes; the loop's own `tick` runs on a background task, not here.
    pub dispatch: Arc<Dispatch>,
    /// Bearer-token signing key.
    pub signing_key: Arc<str>,
}
