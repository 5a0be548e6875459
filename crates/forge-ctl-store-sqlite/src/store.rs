// forge-ctl-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Persistence Store
// Description: Durable PersistenceStore backed by SQLite WAL.
// Purpose: Persist sessions, tickets, dependencies, approvals, and events
//          with one write discipline: every state transition writes its
//          row, derived rows, and events in one transaction.
// Dependencies: forge-ctl-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Each aggregate (`Session`, `Ticket`) is stored as a canonical JSON
//! snapshot in a `doc` column plus a small set of extracted columns used
//! for the hot-path queries: ticket `(state, assignee, assignee_kind)`,
//! dependency `(depends_on)`,
//! ticket-events `(ticket, timestamp)`, session-events `(session,
//! created_at)`. The extracted columns exist for correctness, not as a
//! secondary source of truth — every read reconstructs the aggregate from
//! `doc`.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use forge_ctl_core::Approval;
use forge_ctl_core::ApprovalId;
use forge_ctl_core::ApprovalStatus;
use forge_ctl_core::AssigneeId;
use forge_ctl_core::Dependency;
use forge_ctl_core::Event;
use forge_ctl_core::EventId;
use forge_ctl_core::EventSubject;
use forge_ctl_core::Message;
use forge_ctl_core::PersistenceStore;
use forge_ctl_core::ProjectId;
use forge_ctl_core::Room;
use forge_ctl_core::Session;
use forge_ctl_core::SessionFilter;
use forge_ctl_core::SessionId;
use forge_ctl_core::StoreError;
use forge_ctl_core::TenantId;
use forge_ctl_core::Ticket;
use forge_ctl_core::TicketCompletionCounts;
use forge_ctl_core::TicketFilter;
use forge_ctl_core::TicketId;
use forge_ctl_core::TicketState;
use forge_ctl_core::Timestamp;
use forge_ctl_core::UserId;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const SCHEMA_VERSION: i64 = 1;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// Configuration for the `SQLite`-backed store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors, mapped to [`StoreError`] at the trait boundary.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Optimistic update failed.
    #[error("sqlite store conflict: {0}")]
    Conflict(String),
    /// The referenced record does not exist.
    #[error("sqlite store not found: {0}")]
    NotFound(String),
    /// A uniqueness, foreign-key, or DAG-cycle constraint was violated.
    #[error("sqlite store integrity violation: {0}")]
    Integrity(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) | SqliteStoreError::Db(message) => Self::Storage(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
            SqliteStoreError::NotFound(message) => Self::NotFound(message),
            SqliteStoreError::Integrity(message) => Self::Integrity(message),
        }
    }
}

fn format_timestamp(ts: Timestamp) -> Result<String, SqliteStoreError> {
    ts.as_offset().format(&Rfc3339).map_err(|err| SqliteStoreError::Db(err.to_string()))
}

fn parse_timestamp(raw: &str) -> Result<Timestamp, SqliteStoreError> {
    OffsetDateTime::parse(raw, &Rfc3339).map(Timestamp::from_offset).map_err(|err| SqliteStoreError::Db(err.to_string()))
}

fn priority_rank(ticket_json: &serde_json::Value) -> i64 {
    match ticket_json.get("priority").and_then(serde_json::Value::as_str) {
        Some("high") => 0,
        Some("low") => 2,
        _ => 1,
    }
}

// ============================================================================
// SECTION: Schema
// ============================================================================

fn initialize_schema(conn: &Connection) -> Result<(), SqliteStoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_meta (version INTEGER NOT NULL);

         CREATE TABLE IF NOT EXISTS sessions (
             id TEXT PRIMARY KEY,
             tenant_id TEXT NOT NULL,
             project_id TEXT,
             state TEXT NOT NULL,
             row_version INTEGER NOT NULL,
             created_at TEXT NOT NULL,
             doc TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_sessions_tenant_state ON sessions (tenant_id, state);
         CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions (project_id);

         CREATE TABLE IF NOT EXISTS messages (
             id TEXT PRIMARY KEY,
             session_id TEXT NOT NULL,
             created_at TEXT NOT NULL,
             doc TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_messages_session ON messages (session_id, created_at);

         CREATE TABLE IF NOT EXISTS approvals (
             id TEXT PRIMARY KEY,
             session_id TEXT NOT NULL,
             status TEXT NOT NULL,
             doc TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_approvals_session_status ON approvals (session_id, status);

         CREATE TABLE IF NOT EXISTS tickets (
             id TEXT PRIMARY KEY,
             project_id TEXT NOT NULL,
             state TEXT NOT NULL,
             assignee TEXT,
             assignee_kind TEXT,
             lease_expires TEXT,
             retry_after TEXT,
             priority_rank INTEGER NOT NULL,
             row_version INTEGER NOT NULL,
             created_at TEXT NOT NULL,
             doc TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_tickets_dispatch ON tickets (state, assignee_kind, lease_expires);
         CREATE INDEX IF NOT EXISTS idx_tickets_project ON tickets (project_id, state);

         CREATE TABLE IF NOT EXISTS dependencies (
             ticket_id TEXT NOT NULL,
             depends_on TEXT NOT NULL,
             PRIMARY KEY (ticket_id, depends_on)
         );
         CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on ON dependencies (depends_on);

         CREATE TABLE IF NOT EXISTS events (
             id TEXT PRIMARY KEY,
             subject_kind TEXT NOT NULL,
             subject_id TEXT NOT NULL,
             created_at TEXT NOT NULL,
             doc TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_events_subject ON events (subject_kind, subject_id, created_at);
        ",
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;

    let has_version: i64 = conn
        .query_row("SELECT COUNT(*) FROM schema_meta", [], |row| row.get(0))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    if has_version == 0 {
        conn.execute("INSERT INTO schema_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    }
    Ok(())
}

fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
        }
    }
    let conn = Connection::open(&config.path).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    conn.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms)).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    conn.pragma_update(None, "journal_mode", config.journal_mode.pragma_value()).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    conn.pragma_update(None, "foreign_keys", "on").map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(conn)
}

/// Opens a database file purely for test fixtures, skipping directory setup.
#[cfg(test)]
fn open_memory() -> Result<Connection, SqliteStoreError> {
    Connection::open_in_memory().map_err(|err| SqliteStoreError::Db(err.to_string()))
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed implementation of [`PersistenceStore`].
#[derive(Clone)]
pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (creating if absent) a `SQLite`-backed store at `config.path`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// its schema initialized.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        let conn = open_connection(config)?;
        initialize_schema(&conn)?;
        Ok(Self { connection: Arc::new(Mutex::new(conn)) })
    }

    /// Opens an in-memory store, for tests.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] on failure to initialize the schema.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let conn = open_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { connection: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, SqliteStoreError> + Send + 'static,
        T: Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        let joined = tokio::task::spawn_blocking(move || {
            let mut guard = connection.lock().map_err(|_| SqliteStoreError::Db("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await;
        match joined {
            Ok(result) => result.map_err(StoreError::from),
            Err(err) => Err(StoreError::Storage(format!("blocking task panicked: {err}"))),
        }
    }
}

// ============================================================================
// SECTION: Row Helpers
// ============================================================================

fn doc_of<T: serde::Serialize>(value: &T) -> Result<String, SqliteStoreError> {
    serde_json::to_string(value).map_err(|err| SqliteStoreError::Db(err.to_string()))
}

fn parse_doc<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, SqliteStoreError> {
    serde_json::from_str(raw).map_err(|err| SqliteStoreError::Db(err.to_string()))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(inner, _) if inner.code == ErrorCode::ConstraintViolation)
}

fn insert_events(tx: &rusqlite::Transaction<'_>, events: &[Event]) -> Result<(), SqliteStoreError> {
    for event in events {
        let (subject_kind, subject_id) = match &event.subject {
            EventSubject::Session(id) => ("session", id.to_string()),
            EventSubject::Ticket(id) => ("ticket", id.to_string()),
        };
        tx.execute(
            "INSERT INTO events (id, subject_kind, subject_id, created_at, doc) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![event.id.as_str(), subject_kind, subject_id, format_timestamp(event.created_at)?, doc_of(event)?],
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    }
    Ok(())
}

// ============================================================================
// SECTION: PersistenceStore
// ============================================================================

#[async_trait]
impl PersistenceStore for SqliteStore {
    async fn create_session(&self, session: Session) -> Result<Session, StoreError> {
        self.with_conn(move |conn| {
            let doc = doc_of(&session)?;
            let result = conn.execute(
                "INSERT INTO sessions (id, tenant_id, project_id, state, row_version, created_at, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    session.id.as_str(),
                    session.tenant_id.as_str(),
                    session.project_id.as_ref().map(forge_ctl_core::ProjectId::as_str),
                    serde_json::to_value(session.state).map_err(|err| SqliteStoreError::Db(err.to_string()))?.as_str().unwrap_or("unknown"),
                    session.row_version,
                    format_timestamp(session.created_at)?,
                    doc,
                ],
            );
            match result {
                Ok(_) => Ok(session),
                Err(err) if is_constraint_violation(&err) => Err(SqliteStoreError::Integrity(format!("session {} already exists", session.id))),
                Err(err) => Err(SqliteStoreError::Db(err.to_string())),
            }
        })
        .await
    }

    async fn get_session(&self, tenant: &TenantId, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let tenant = tenant.clone();
        let id = id.clone();
        self.with_conn(move |conn| {
            let doc: Option<String> = conn
                .query_row(
                    "SELECT doc FROM sessions WHERE id = ?1 AND tenant_id = ?2",
                    params![id.as_str(), tenant.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            doc.map(|raw| parse_doc(&raw)).transpose()
        })
        .await
    }

    async fn list_sessions(&self, tenant: &TenantId, filter: SessionFilter) -> Result<Vec<Session>, StoreError> {
        let tenant = tenant.clone();
        self.with_conn(move |conn| {
            let limit = filter.limit.unwrap_or(100);
            let state_filter = filter.state.map(|s| serde_json::to_value(s).map(|v| v.as_str().unwrap_or("unknown").to_string()));
            let state_filter = state_filter.transpose().map_err(|err: serde_json::Error| SqliteStoreError::Db(err.to_string()))?;
            let mut stmt = conn
                .prepare(
                    "SELECT doc FROM sessions WHERE tenant_id = ?1 AND (?2 IS NULL OR state = ?2)
                     ORDER BY created_at ASC LIMIT ?3",
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let rows = stmt
                .query_map(params![tenant.as_str(), state_filter, limit], |row| row.get::<_, String>(0))
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            rows.map(|row| {
                let raw = row.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                parse_doc(&raw)
            })
            .collect()
        })
        .await
    }

    async fn update_session(&self, updated: Session, expected_row_version: u64, events: Vec<Event>) -> Result<Session, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let mut session = updated;
            session.row_version = expected_row_version + 1;
            let doc = doc_of(&session)?;
            let state_str = serde_json::to_value(session.state).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let affected = tx
                .execute(
                    "UPDATE sessions SET tenant_id = ?1, project_id = ?2, state = ?3, row_version = ?4, doc = ?5
                     WHERE id = ?6 AND row_version = ?7",
                    params![
                        session.tenant_id.as_str(),
                        session.project_id.as_ref().map(forge_ctl_core::ProjectId::as_str),
                        state_str.as_str().unwrap_or("unknown"),
                        session.row_version,
                        doc,
                        session.id.as_str(),
                        expected_row_version,
                    ],
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            if affected == 0 {
                return Err(SqliteStoreError::Conflict(format!("session {} row version mismatch", session.id)));
            }
            insert_events(&tx, &events)?;
            tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            Ok(session)
        })
        .await
    }

    async fn append_message(&self, message: Message) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO messages (id, session_id, created_at, doc) VALUES (?1, ?2, ?3, ?4)",
                params![message.id.as_str(), message.session_id.as_str(), format_timestamp(message.created_at)?, doc_of(&message)?],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn list_messages(&self, _tenant: &TenantId, session: &SessionId) -> Result<Vec<Message>, StoreError> {
        let session = session.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT doc FROM messages WHERE session_id = ?1 ORDER BY created_at ASC")
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let rows = stmt.query_map(params![session.as_str()], |row| row.get::<_, String>(0)).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            rows.map(|row| parse_doc(&row.map_err(|err| SqliteStoreError::Db(err.to_string()))?)).collect()
        })
        .await
    }

    async fn create_approval(&self, approval: Approval) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let status = serde_json::to_value(approval.status).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            conn.execute(
                "INSERT INTO approvals (id, session_id, status, doc) VALUES (?1, ?2, ?3, ?4)",
                params![approval.id.as_str(), approval.session_id.as_str(), status.as_str().unwrap_or("pending"), doc_of(&approval)?],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn find_pending_approval(&self, session_id: &SessionId) -> Result<Option<Approval>, StoreError> {
        let session_id = session_id.clone();
        self.with_conn(move |conn| {
            let doc: Option<String> = conn
                .query_row(
                    "SELECT doc FROM approvals WHERE session_id = ?1 AND status = 'pending'
                     ORDER BY rowid DESC LIMIT 1",
                    params![session_id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            doc.map(|raw| parse_doc(&raw)).transpose()
        })
        .await
    }

    async fn resolve_approval(&self, id: &ApprovalId, resolver: &UserId, status: ApprovalStatus, now: Timestamp) -> Result<Approval, StoreError> {
        let id = id.clone();
        let resolver = resolver.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let raw: Option<String> =
                tx.query_row("SELECT doc FROM approvals WHERE id = ?1", params![id.as_str()], |row| row.get(0)).optional().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let Some(raw) = raw else {
                return Err(SqliteStoreError::NotFound(format!("approval {id}")));
            };
            let mut approval: Approval = parse_doc(&raw)?;
            if approval.status != ApprovalStatus::Pending {
                return Err(SqliteStoreError::Conflict(format!("approval {id} already resolved")));
            }
            approval.status = status;
            approval.resolver = Some(resolver);
            approval.resolved_at = Some(now);
            let status_str = serde_json::to_value(status).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute(
                "UPDATE approvals SET status = ?1, doc = ?2 WHERE id = ?3",
                params![status_str.as_str().unwrap_or("unknown"), doc_of(&approval)?, id.as_str()],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            Ok(approval)
        })
        .await
    }

    async fn insert_tickets(&self, tickets: Vec<Ticket>, dependencies: Vec<Dependency>) -> Result<Vec<Ticket>, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            for ticket in &tickets {
                let state = serde_json::to_value(ticket.state).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                let assignee_kind = ticket.assignee_kind.map(serde_json::to_value).transpose().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                let doc = doc_of(ticket)?;
                let rank = priority_rank(&serde_json::from_str::<serde_json::Value>(&doc).map_err(|err| SqliteStoreError::Db(err.to_string()))?);
                let result = tx.execute(
                    "INSERT INTO tickets (id, project_id, state, assignee, assignee_kind, lease_expires, retry_after, priority_rank, row_version, created_at, doc)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        ticket.id.as_str(),
                        ticket.project_id.as_str(),
                        state.as_str().unwrap_or("unknown"),
                        ticket.assignee.as_ref().map(AssigneeId::as_str),
                        assignee_kind.as_ref().and_then(serde_json::Value::as_str),
                        ticket.lease_expires.map(format_timestamp).transpose()?,
                        ticket.retry_after.map(format_timestamp).transpose()?,
                        rank,
                        ticket.row_version,
                        format_timestamp(ticket.created_at)?,
                        doc,
                    ],
                );
                match result {
                    Ok(_) => {}
                    Err(err) if is_constraint_violation(&err) => return Err(SqliteStoreError::Integrity(format!("ticket {} already exists", ticket.id))),
                    Err(err) => return Err(SqliteStoreError::Db(err.to_string())),
                }
            }
            for dep in &dependencies {
                let result = tx.execute(
                    "INSERT INTO dependencies (ticket_id, depends_on) VALUES (?1, ?2)",
                    params![dep.ticket_id.as_str(), dep.depends_on.as_str()],
                );
                match result {
                    Ok(_) => {}
                    Err(err) if is_constraint_violation(&err) => {
                        return Err(SqliteStoreError::Integrity(format!("dependency {} -> {} would violate a constraint", dep.ticket_id, dep.depends_on)));
                    }
                    Err(err) => return Err(SqliteStoreError::Db(err.to_string())),
                }
            }
            tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            Ok(tickets)
        })
        .await
    }

    async fn get_ticket(&self, id: &TicketId) -> Result<Option<Ticket>, StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let doc: Option<String> =
                conn.query_row("SELECT doc FROM tickets WHERE id = ?1", params![id.as_str()], |row| row.get(0)).optional().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            doc.map(|raw| parse_doc(&raw)).transpose()
        })
        .await
    }

    async fn list_tickets(&self, filter: TicketFilter) -> Result<Vec<Ticket>, StoreError> {
        self.with_conn(move |conn| {
            let state_filter = filter.state.map(serde_json::to_value).transpose().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let state_filter = state_filter.and_then(|v| v.as_str().map(ToString::to_string));
            let project_filter = filter.project_id.as_ref().map(forge_ctl_core::ProjectId::as_str).map(ToString::to_string);
            let mut stmt = conn
                .prepare(
                    "SELECT doc FROM tickets WHERE (?1 IS NULL OR state = ?1) AND (?2 IS NULL OR project_id = ?2)
                     ORDER BY created_at ASC",
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let rows = stmt.query_map(params![state_filter, project_filter], |row| row.get::<_, String>(0)).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            rows.map(|row| parse_doc(&row.map_err(|err| SqliteStoreError::Db(err.to_string()))?)).collect()
        })
        .await
    }

    async fn claim_next_ready(&self, assignee: &AssigneeId, lease_duration: time::Duration, now: Timestamp) -> Result<Option<Ticket>, StoreError> {
        let assignee = assignee.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let now_str = format_timestamp(now)?;
            let candidate: Option<(String, String)> = tx
                .query_row(
                    "SELECT id, doc FROM tickets
                     WHERE state = 'ready' AND assignee_kind = 'agent'
                       AND (lease_expires IS NULL OR lease_expires < ?1)
                       AND (retry_after IS NULL OR retry_after <= ?1)
                     ORDER BY priority_rank ASC, created_at ASC LIMIT 1",
                    params![now_str],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let Some((id, raw)) = candidate else {
                return Ok(None);
            };
            let mut ticket: Ticket = parse_doc(&raw)?;
            let expected_row_version = ticket.row_version;
            ticket.state = TicketState::Assigned;
            ticket.assignee = Some(assignee.clone());
            ticket.lease_expires = Some(now.plus(lease_duration));
            ticket.last_heartbeat = Some(now);
            ticket.row_version = expected_row_version + 1;
            ticket.updated_at = now;
            let doc = doc_of(&ticket)?;
            let affected = tx
                .execute(
                    "UPDATE tickets SET state = 'assigned', assignee = ?1, lease_expires = ?2, row_version = ?3, doc = ?4
                     WHERE id = ?5 AND row_version = ?6",
                    params![assignee.as_str(), format_timestamp(ticket.lease_expires.unwrap_or(now))?, ticket.row_version, doc, id, expected_row_version],
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            if affected == 0 {
                // Another worker won the race; treat as no candidate rather
                // than surfacing a conflict the caller did not cause.
                tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                return Ok(None);
            }
            let event = Event {
                id: EventId::new(uuid::Uuid::new_v4().to_string()),
                subject: EventSubject::Ticket(ticket.id.clone()),
                event_type: forge_ctl_core::EventType::LeaseAcquired,
                payload: serde_json::json!({"assignee": assignee.as_str()}),
                created_at: now,
            };
            insert_events(&tx, std::slice::from_ref(&event))?;
            tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            Ok(Some(ticket))
        })
        .await
    }

    async fn renew_heartbeat(&self, id: &TicketId, holder: &AssigneeId, lease_duration: time::Duration, now: Timestamp) -> Result<Timestamp, StoreError> {
        let id = id.clone();
        let holder = holder.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let raw: Option<String> =
                tx.query_row("SELECT doc FROM tickets WHERE id = ?1 AND assignee = ?2", params![id.as_str(), holder.as_str()], |row| row.get(0))
                    .optional()
                    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let Some(raw) = raw else {
                return Err(SqliteStoreError::Conflict(format!("ticket {id} is not held by {holder}")));
            };
            let mut ticket: Ticket = parse_doc(&raw)?;
            let new_expiry = now.plus(lease_duration);
            ticket.lease_expires = Some(new_expiry);
            ticket.last_heartbeat = Some(now);
            ticket.row_version += 1;
            ticket.updated_at = now;
            let doc = doc_of(&ticket)?;
            let affected = tx
                .execute(
                    "UPDATE tickets SET lease_expires = ?1, row_version = ?2, doc = ?3
                     WHERE id = ?4 AND assignee = ?5",
                    params![format_timestamp(new_expiry)?, ticket.row_version, doc, id.as_str(), holder.as_str()],
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            if affected == 0 {
                return Err(SqliteStoreError::Conflict(format!("ticket {id} is not held by {holder}")));
            }
            tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            Ok(new_expiry)
        })
        .await
    }

    async fn update_ticket(&self, updated: Ticket, expected_row_version: u64, events: Vec<Event>) -> Result<Ticket, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let mut ticket = updated;
            ticket.row_version = expected_row_version + 1;
            let state = serde_json::to_value(ticket.state).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let assignee_kind = ticket.assignee_kind.map(serde_json::to_value).transpose().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let doc = doc_of(&ticket)?;
            let rank = priority_rank(&serde_json::from_str::<serde_json::Value>(&doc).map_err(|err| SqliteStoreError::Db(err.to_string()))?);
            let affected = tx
                .execute(
                    "UPDATE tickets SET state = ?1, assignee = ?2, assignee_kind = ?3, lease_expires = ?4, retry_after = ?5,
                                         priority_rank = ?6, row_version = ?7, doc = ?8
                     WHERE id = ?9 AND row_version = ?10",
                    params![
                        state.as_str().unwrap_or("unknown"),
                        ticket.assignee.as_ref().map(AssigneeId::as_str),
                        assignee_kind.as_ref().and_then(serde_json::Value::as_str),
                        ticket.lease_expires.map(format_timestamp).transpose()?,
                        ticket.retry_after.map(format_timestamp).transpose()?,
                        rank,
                        ticket.row_version,
                        doc,
                        ticket.id.as_str(),
                        expected_row_version,
                    ],
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            if affected == 0 {
                return Err(SqliteStoreError::Conflict(format!("ticket {} row version mismatch", ticket.id)));
            }
            insert_events(&tx, &events)?;
            if ticket.state.is_terminal() {
                cascade_unblock(&tx, &ticket.id, ticket.updated_at)?;
            }
            tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            Ok(ticket)
        })
        .await
    }

    async fn reap_expired_leases(&self, now: Timestamp, backoff: fn(u32) -> time::Duration) -> Result<Vec<TicketId>, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let now_str = format_timestamp(now)?;
            let mut stmt = tx
                .prepare(
                    "SELECT id, doc FROM tickets
                     WHERE lease_expires IS NOT NULL AND lease_expires < ?1
                       AND state IN ('assigned', 'in_progress', 'verifying')",
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let candidates: Vec<(String, String)> = stmt
                .query_map(params![now_str], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?
                .collect::<rusqlite::Result<_>>()
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            drop(stmt);

            let mut reaped = Vec::with_capacity(candidates.len());
            for (id, raw) in candidates {
                let mut ticket: Ticket = parse_doc(&raw)?;
                ticket.retry_count += 1;
                ticket.retry_after = Some(now.plus(backoff(ticket.retry_count)));
                ticket.state = TicketState::Ready;
                ticket.assignee = None;
                ticket.lease_expires = None;
                ticket.updated_at = now;
                ticket.row_version += 1;
                let doc = doc_of(&ticket)?;
                tx.execute(
                    "UPDATE tickets SET state = 'ready', assignee = NULL, lease_expires = NULL,
                                         retry_after = ?1, row_version = row_version + 1, doc = ?2
                     WHERE id = ?3",
                    params![format_timestamp(ticket.retry_after.unwrap_or(now))?, doc, id],
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                let event = Event {
                    id: EventId::new(uuid::Uuid::new_v4().to_string()),
                    subject: EventSubject::Ticket(ticket.id.clone()),
                    event_type: forge_ctl_core::EventType::LeaseExpired,
                    payload: serde_json::json!({"retry_count": ticket.retry_count}),
                    created_at: now,
                };
                insert_events(&tx, std::slice::from_ref(&event))?;
                reaped.push(ticket.id);
            }
            tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            Ok(reaped)
        })
        .await
    }

    async fn open_tickets_remaining(&self, project: &ProjectId) -> Result<TicketCompletionCounts, StoreError> {
        let project = project.clone();
        self.with_conn(move |conn| {
            let non_terminal: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM tickets WHERE project_id = ?1 AND state NOT IN ('done', 'cancelled')",
                    params![project.as_str()],
                    |row| row.get(0),
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let done: i64 = conn
                .query_row("SELECT COUNT(*) FROM tickets WHERE project_id = ?1 AND state = 'done'", params![project.as_str()], |row| row.get(0))
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            Ok(TicketCompletionCounts {
                non_terminal: u64::try_from(non_terminal).unwrap_or(0),
                done: u64::try_from(done).unwrap_or(0),
            })
        })
        .await
    }

    async fn get_session_by_project(&self, project: &ProjectId) -> Result<Option<Session>, StoreError> {
        let project = project.clone();
        self.with_conn(move |conn| {
            let doc: Option<String> = conn
                .query_row("SELECT doc FROM sessions WHERE project_id = ?1 LIMIT 1", params![project.as_str()], |row| row.get(0))
                .optional()
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            doc.map(|raw| parse_doc(&raw)).transpose()
        })
        .await
    }

    async fn append_event(&self, event: Event) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            insert_events(&tx, std::slice::from_ref(&event))?;
            tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn list_events(&self, room: &Room, since: Option<Timestamp>) -> Result<Vec<Event>, StoreError> {
        let (subject_kind, subject_id) = match room {
            Room::Session(id) => ("session", id.to_string()),
            Room::Ticket(id) => ("ticket", id.to_string()),
        };
        self.with_conn(move |conn| {
            let since_str = since.map(format_timestamp).transpose()?;
            let mut stmt = conn
                .prepare(
                    "SELECT doc FROM events WHERE subject_kind = ?1 AND subject_id = ?2 AND (?3 IS NULL OR created_at > ?3)
                     ORDER BY created_at ASC",
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let rows = stmt.query_map(params![subject_kind, subject_id, since_str], |row| row.get::<_, String>(0)).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            rows.map(|row| parse_doc(&row.map_err(|err| SqliteStoreError::Db(err.to_string()))?)).collect()
        })
        .await
    }
}

/// Scans successors of `completed` (tickets whose `depends_on` lists it)
/// and transitions any whose every predecessor is now terminal to `ready`,
/// emitting a `ticket:unblocked` event for each. Runs inside the caller's
/// open transaction.
fn cascade_unblock(tx: &rusqlite::Transaction<'_>, completed: &TicketId, now: Timestamp) -> Result<(), SqliteStoreError> {
    let mut stmt = tx.prepare("SELECT ticket_id FROM dependencies WHERE depends_on = ?1").map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let successors: Vec<String> =
        stmt.query_map(params![completed.as_str()], |row| row.get(0)).map_err(|err| SqliteStoreError::Db(err.to_string()))?.collect::<rusqlite::Result<_>>().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    drop(stmt);

    for successor_id in successors {
        let predecessors: Vec<String> = {
            let mut stmt = tx.prepare("SELECT depends_on FROM dependencies WHERE ticket_id = ?1").map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            stmt.query_map(params![successor_id], |row| row.get(0)).map_err(|err| SqliteStoreError::Db(err.to_string()))?.collect::<rusqlite::Result<_>>().map_err(|err| SqliteStoreError::Db(err.to_string()))?
        };
        let mut all_terminal = true;
        for predecessor_id in &predecessors {
            let state: String = tx
                .query_row("SELECT state FROM tickets WHERE id = ?1", params![predecessor_id], |row| row.get(0))
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            if state != "done" && state != "cancelled" {
                all_terminal = false;
                break;
            }
        }
        if !all_terminal {
            continue;
        }
        let raw: String =
            tx.query_row("SELECT doc FROM tickets WHERE id = ?1", params![successor_id], |row| row.get(0)).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut ticket: Ticket = parse_doc(&raw)?;
        if ticket.state != TicketState::Blocked {
            continue;
        }
        ticket.state = TicketState::Ready;
        ticket.updated_at = now;
        ticket.row_version += 1;
        let doc = doc_of(&ticket)?;
        tx.execute(
            "UPDATE tickets SET state = 'ready', row_version = ?1, doc = ?2 WHERE id = ?3",
            params![ticket.row_version, doc, successor_id],
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let event = Event {
            id: EventId::new(uuid::Uuid::new_v4().to_string()),
            subject: EventSubject::Ticket(ticket.id.clone()),
            event_type: forge_ctl_core::EventType::TicketUnblocked,
            payload: serde_json::json!({"unblocked_by": completed.as_str()}),
            created_at: now,
        };
        insert_events(tx, std::slice::from_ref(&event))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_ctl_core::AssigneeKind;
    use forge_ctl_core::ProjectType;
    use forge_ctl_core::SessionState;
    use forge_ctl_core::SystemClock;
    use forge_ctl_core::TicketPriority;
    use forge_ctl_core::TicketScope;
    use forge_ctl_core::TraceId;

    fn sample_session(now: Timestamp) -> Session {
        Session {
            id: SessionId::new("s1"),
            tenant_id: TenantId::new("t1"),
            owner_id: UserId::new("u1"),
            project_type: ProjectType::NewApplication,
            project_name: "demo".to_string(),
            description: String::new(),
            state: SessionState::Input,
            clarification: forge_ctl_core::ClarificationContext::default(),
            spec_card: None,
            project_id: None,
            repo_analysis: None,
            row_version: 0,
            created_at: now,
            updated_at: now,
            approved_at: None,
            approved_by: None,
        }
    }

    fn sample_ticket(now: Timestamp) -> Ticket {
        Ticket {
            id: TicketId::new("tkt-1"),
            project_id: ProjectId::new("p1"),
            title: "scaffold".to_string(),
            description: String::new(),
            acceptance_criteria: vec![],
            state: TicketState::Ready,
            epic: None,
            scope: TicketScope::Small,
            file_hints: vec![],
            assignee: None,
            assignee_kind: Some(AssigneeKind::Agent),
            branch_name: None,
            pull_request_url: None,
            rejection_count: 0,
            retry_count: 0,
            retry_after: None,
            critic_feedback: None,
            files_involved: vec![],
            lease_expires: None,
            last_heartbeat: None,
            row_version: 0,
            created_at: now,
            updated_at: now,
            trace_id: TraceId::new("trace-1"),
            repository_url: None,
            priority: TicketPriority::Medium,
        }
    }

    #[tokio::test]
    async fn create_and_get_session_round_trips() {
        let store = SqliteStore::open_in_memory().expect("open");
        let now = SystemClock.now();
        let session = sample_session(now);
        store.create_session(session.clone()).await.expect("create");
        let fetched = store.get_session(&session.tenant_id, &session.id).await.expect("get").expect("present");
        assert_eq!(fetched.id, session.id);
    }

    #[tokio::test]
    async fn update_session_rejects_stale_row_version() {
        let store = SqliteStore::open_in_memory().expect("open");
        let now = SystemClock.now();
        let session = store.create_session(sample_session(now)).await.expect("create");
        let mut updated = session.clone();
        updated.state = SessionState::Clarifying;
        store.update_session(updated.clone(), session.row_version, vec![]).await.expect("first update");
        let result = store.update_session(updated, session.row_version, vec![]).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn claim_next_ready_assigns_exactly_one_ticket() {
        let store = SqliteStore::open_in_memory().expect("open");
        let now = SystemClock.now();
        store.insert_tickets(vec![sample_ticket(now)], vec![]).await.expect("insert");
        let assignee = AssigneeId::new("worker-1");
        let claimed = store.claim_next_ready(&assignee, time::Duration::minutes(30), now).await.expect("claim").expect("present");
        assert_eq!(claimed.state, TicketState::Assigned);
        let second = store.claim_next_ready(&assignee, time::Duration::minutes(30), now).await.expect("claim");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn update_ticket_to_done_unblocks_successor() {
        let store = SqliteStore::open_in_memory().expect("open");
        let now = SystemClock.now();
        let mut predecessor = sample_ticket(now);
        predecessor.id = TicketId::new("pred");
        let mut successor = sample_ticket(now);
        successor.id = TicketId::new("succ");
        successor.state = TicketState::Blocked;
        let dependency = Dependency { ticket_id: successor.id.clone(), depends_on: predecessor.id.clone() };
        store.insert_tickets(vec![predecessor.clone(), successor.clone()], vec![dependency]).await.expect("insert");

        let mut done = predecessor.clone();
        done.state = TicketState::Done;
        store.update_ticket(done, predecessor.row_version, vec![]).await.expect("update");

        let fetched = store.get_ticket(&successor.id).await.expect("get").expect("present");
        assert_eq!(fetched.state, TicketState::Ready);
    }
}
