// forge-ctl-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Persistence Store Library
// Description: Public API surface for the SQLite-backed PersistenceStore.
// Purpose: Expose the store type and its configuration.
// Dependencies: forge-ctl-core
// ============================================================================

//! ## Overview
//! A durable [`forge_ctl_core::PersistenceStore`] implementation over
//! `SQLite` in WAL mode. Every state transition writes its row and events
//! in one transaction; dependency cascades and lease reaping are likewise
//! single-transaction operations.

mod store;

pub use store::SqliteStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
