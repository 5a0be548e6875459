// forge-ctl-core/src/lib.rs
// ============================================================================
// Module: Forge Control Plane Core Library
// Description: Public API surface for the control-plane core.
// Purpose: Expose core types, interfaces, and runtime engines.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The control-plane core turns a free-form project idea into an approved
//! specification and a dependency-ordered set of implementation tickets,
//! then drives those tickets through worker, critic, and deploy
//! collaborators to completion. It is backend-agnostic and integrates
//! through the explicit interfaces in [`interfaces`] rather than embedding
//! a particular store, model provider, or worker runtime.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::BusError;
pub use interfaces::CriticClient;
pub use interfaces::CriticError;
pub use interfaces::CriticVerdict;
pub use interfaces::DeployClient;
pub use interfaces::DeployError;
pub use interfaces::DialogueReply;
pub use interfaces::DialogueRequest;
pub use interfaces::EventPublisher;
pub use interfaces::FileChange;
pub use interfaces::ModelAdapter;
pub use interfaces::ModelAdapterError;
pub use interfaces::PersistenceStore;
pub use interfaces::RepoHostClient;
pub use interfaces::RepoHostError;
pub use interfaces::RetrievalClient;
pub use interfaces::RetrievalError;
pub use interfaces::RetrievedContext;
pub use interfaces::SessionFilter;
pub use interfaces::StoreError;
pub use interfaces::TicketCompletionCounts;
pub use interfaces::TicketDraft;
pub use interfaces::TicketFilter;
pub use interfaces::WorkUnit;
pub use interfaces::WorkerDispatcher;
pub use interfaces::WorkerError;

pub use runtime::CreateSessionRequest;
pub use runtime::DispatchLoop;
pub use runtime::ErrorKind;
pub use runtime::ForgeError;
pub use runtime::SessionEngine;
pub use runtime::TicketBatch;
pub use runtime::TicketEngine;
pub use runtime::dispatch_loop::TickReport;
pub use runtime::dispatch_loop::WorkerFailureClass;
pub use runtime::retry_backoff;
pub use runtime::session_engine::RespondResult;
pub use runtime::session_engine::StartBuildResult;
