// crates/consent-gate-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Consent Store
// Description: Durable ConsentStateStore and AuditSink backed by SQLite WAL.
// Purpose: Persist consent requests, permissions, sessions, payments, and the
//          append-only audit log with compare-and-set semantics.
// Dependencies: consent-gate-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Each record is stored as a canonical JSON body alongside denormalized
//! columns used for lookups and compare-and-set updates. The single-pending
//! invariant is enforced twice: an explicit check inside the insert
//! transaction and a partial unique index as the backstop for races. Loads
//! fail closed on rows that do not deserialize.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use consent_gate_core::AccessPermission;
use consent_gate_core::AccessSession;
use consent_gate_core::AuditEntry;
use consent_gate_core::AuditFilter;
use consent_gate_core::AuditSink;
use consent_gate_core::AuditSinkError;
use consent_gate_core::ConsentRequest;
use consent_gate_core::ConsentStateStore;
use consent_gate_core::ConsentStatus;
use consent_gate_core::PairKey;
use consent_gate_core::PaymentRef;
use consent_gate_core::PaymentStatus;
use consent_gate_core::PaymentTransaction;
use consent_gate_core::PermissionId;
use consent_gate_core::RequestId;
use consent_gate_core::SessionId;
use consent_gate_core::SessionState;
use consent_gate_core::StateStoreError;
use consent_gate_core::Timestamp;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum serialized record size accepted by the store.
pub const MAX_RECORD_BYTES: usize = 1024 * 1024;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
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

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` consent store.
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
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or malformed record body.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data or configuration.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// A pending request already exists for the pair.
    #[error("pending request already exists for pair {pair}")]
    DuplicatePending {
        /// Conflicting (provider, patient) pair.
        pair: PairKey,
    },
    /// A compare-and-set update found the record in a different state.
    #[error("stale state for {record}: expected {expected}, found {found}")]
    StaleState {
        /// Record identifier.
        record: String,
        /// State the caller expected.
        expected: String,
        /// State the store found.
        found: String,
    },
    /// The record is unknown.
    #[error("record not found: {0}")]
    NotFound(String),
}

impl From<SqliteStoreError> for StateStoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) | SqliteStoreError::VersionMismatch(message) => {
                Self::Corrupt(message)
            }
            SqliteStoreError::Invalid(message) => Self::Store(message),
            SqliteStoreError::DuplicatePending { pair } => Self::DuplicatePending { pair },
            SqliteStoreError::StaleState {
                record,
                expected,
                found,
            } => Self::StaleState {
                record,
                expected,
                found,
            },
            SqliteStoreError::NotFound(record) => Self::NotFound(record),
        }
    }
}

impl From<SqliteStoreError> for AuditSinkError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) | SqliteStoreError::Db(message) => {
                Self::Unavailable(message)
            }
            other => Self::Sink(other.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed consent state store and audit sink.
#[derive(Debug, Clone)]
pub struct SqliteConsentStore {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteConsentStore {
    /// Opens an `SQLite`-backed consent store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Deletes audit entries recorded strictly before `cutoff`.
    ///
    /// Retention is an operator decision; the engine never prunes.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the delete fails.
    pub fn prune_audit_before(&self, cutoff: Timestamp) -> Result<u64, SqliteStoreError> {
        let guard = self.lock()?;
        let deleted = guard
            .execute(
                "DELETE FROM audit_log WHERE at < ?1",
                params![cutoff.as_unix_millis()],
            )
            .map_err(db_err)?;
        drop(guard);
        Ok(u64::try_from(deleted).unwrap_or(u64::MAX))
    }

    /// Acquires the connection guard.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection
            .lock()
            .map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))
    }

    /// Loads one record body by a single-column key.
    fn load_body<T: DeserializeOwned>(
        &self,
        sql: &str,
        key: &str,
    ) -> Result<Option<T>, SqliteStoreError> {
        let guard = self.lock()?;
        let body: Option<Vec<u8>> = guard
            .query_row(sql, params![key], |row| row.get(0))
            .optional()
            .map_err(db_err)?;
        drop(guard);
        body.map(|bytes| decode_body(&bytes)).transpose()
    }

    /// Loads all record bodies matching a single-column key.
    fn load_bodies<T: DeserializeOwned>(
        &self,
        sql: &str,
        key: &str,
    ) -> Result<Vec<T>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement = guard.prepare(sql).map_err(db_err)?;
        let rows = statement
            .query_map(params![key], |row| row.get::<_, Vec<u8>>(0))
            .map_err(db_err)?;
        let mut records = Vec::new();
        for row in rows {
            let bytes = row.map_err(db_err)?;
            records.push(decode_body(&bytes)?);
        }
        Ok(records)
    }

    /// Applies a compare-and-set update and classifies a zero-row outcome.
    fn cas_update(
        &self,
        table: &str,
        id_column: &str,
        state_column: &str,
        id: &str,
        expected: &str,
        new_state: &str,
        body: &[u8],
    ) -> Result<(), SqliteStoreError> {
        let guard = self.lock()?;
        let updated = guard
            .execute(
                &format!(
                    "UPDATE {table} SET {state_column} = ?1, body = ?2, updated_at = ?3 WHERE \
                     {id_column} = ?4 AND {state_column} = ?5"
                ),
                params![new_state, body, unix_millis(), id, expected],
            )
            .map_err(db_err)?;
        if updated > 0 {
            return Ok(());
        }
        let found: Option<String> = guard
            .query_row(
                &format!("SELECT {state_column} FROM {table} WHERE {id_column} = ?1"),
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        drop(guard);
        match found {
            None => Err(SqliteStoreError::NotFound(format!("{table} {id}"))),
            Some(found) => Err(SqliteStoreError::StaleState {
                record: format!("{table} {id}"),
                expected: expected.to_string(),
                found,
            }),
        }
    }
}

// ============================================================================
// SECTION: ConsentStateStore Implementation
// ============================================================================

impl ConsentStateStore for SqliteConsentStore {
    fn insert_pending_request(&self, request: &ConsentRequest) -> Result<(), StateStoreError> {
        let body = encode_body(request)?;
        let mut guard = self.lock().map_err(StateStoreError::from)?;
        let tx = guard.transaction().map_err(|err| state_db_err(&err))?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM consent_requests WHERE provider_id = ?1 AND patient_id = ?2 AND \
                 status = 'pending'",
                params![request.provider_id.as_str(), request.patient_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| state_db_err(&err))?;
        if existing.is_some() {
            return Err(StateStoreError::DuplicatePending {
                pair: request.pair(),
            });
        }
        tx.execute(
            "INSERT INTO consent_requests (request_id, provider_id, patient_id, status, body, \
             updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                request.request_id.as_str(),
                request.provider_id.as_str(),
                request.patient_id.as_str(),
                request.status.as_str(),
                body,
                unix_millis()
            ],
        )
        .map_err(|err| map_pending_conflict(&err, request))?;
        tx.commit().map_err(|err| state_db_err(&err))?;
        drop(guard);
        Ok(())
    }

    fn request(&self, request_id: &RequestId) -> Result<Option<ConsentRequest>, StateStoreError> {
        self.load_body(
            "SELECT body FROM consent_requests WHERE request_id = ?1",
            request_id.as_str(),
        )
        .map_err(StateStoreError::from)
    }

    fn pending_request_for(
        &self,
        pair: &PairKey,
    ) -> Result<Option<ConsentRequest>, StateStoreError> {
        let guard = self.lock().map_err(StateStoreError::from)?;
        let body: Option<Vec<u8>> = guard
            .query_row(
                "SELECT body FROM consent_requests WHERE provider_id = ?1 AND patient_id = ?2 AND \
                 status = 'pending'",
                params![pair.provider_id.as_str(), pair.patient_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| state_db_err(&err))?;
        drop(guard);
        body.map(|bytes| decode_body(&bytes).map_err(StateStoreError::from))
            .transpose()
    }

    fn update_request(
        &self,
        expected: ConsentStatus,
        updated: &ConsentRequest,
    ) -> Result<(), StateStoreError> {
        let body = encode_body(updated)?;
        self.cas_update(
            "consent_requests",
            "request_id",
            "status",
            updated.request_id.as_str(),
            expected.as_str(),
            updated.status.as_str(),
            &body,
        )
        .map_err(StateStoreError::from)
    }

    fn requests_in_status(
        &self,
        status: ConsentStatus,
    ) -> Result<Vec<ConsentRequest>, StateStoreError> {
        self.load_bodies(
            "SELECT body FROM consent_requests WHERE status = ?1 ORDER BY request_id",
            status.as_str(),
        )
        .map_err(StateStoreError::from)
    }

    fn upsert_permission(&self, permission: &AccessPermission) -> Result<(), StateStoreError> {
        let body = encode_body(permission)?;
        let guard = self.lock().map_err(StateStoreError::from)?;
        guard
            .execute(
                "INSERT INTO permissions (permission_id, request_id, provider_id, patient_id, \
                 active, body, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(permission_id) DO UPDATE SET active = excluded.active, body = \
                 excluded.body, updated_at = excluded.updated_at",
                params![
                    permission.permission_id.as_str(),
                    permission.request_id.as_str(),
                    permission.provider_id.as_str(),
                    permission.patient_id.as_str(),
                    i64::from(permission.active),
                    body,
                    unix_millis()
                ],
            )
            .map_err(|err| state_db_err(&err))?;
        drop(guard);
        Ok(())
    }

    fn record_permission_access(
        &self,
        permission_id: &PermissionId,
    ) -> Result<AccessPermission, StateStoreError> {
        // The read-modify-write is serialized by the connection mutex; the
        // `active = 1` guard on the write backstops external writers.
        let guard = self.lock().map_err(StateStoreError::from)?;
        let body: Option<Vec<u8>> = guard
            .query_row(
                "SELECT body FROM permissions WHERE permission_id = ?1",
                params![permission_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| state_db_err(&err))?;
        let Some(bytes) = body else {
            return Err(StateStoreError::NotFound(format!(
                "permission {permission_id}"
            )));
        };
        let mut permission: AccessPermission =
            decode_body(&bytes).map_err(StateStoreError::from)?;
        if !permission.active {
            return Err(StateStoreError::StaleState {
                record: format!("permission {permission_id}"),
                expected: "active".to_string(),
                found: "inactive".to_string(),
            });
        }
        permission.record_access();
        let updated = encode_body(&permission)?;
        let affected = guard
            .execute(
                "UPDATE permissions SET body = ?1, updated_at = ?2 WHERE permission_id = ?3 AND \
                 active = 1",
                params![updated, unix_millis(), permission_id.as_str()],
            )
            .map_err(|err| state_db_err(&err))?;
        drop(guard);
        if affected == 0 {
            return Err(StateStoreError::StaleState {
                record: format!("permission {permission_id}"),
                expected: "active".to_string(),
                found: "inactive".to_string(),
            });
        }
        Ok(permission)
    }

    fn permission(
        &self,
        permission_id: &PermissionId,
    ) -> Result<Option<AccessPermission>, StateStoreError> {
        self.load_body(
            "SELECT body FROM permissions WHERE permission_id = ?1",
            permission_id.as_str(),
        )
        .map_err(StateStoreError::from)
    }

    fn permission_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<AccessPermission>, StateStoreError> {
        self.load_body(
            "SELECT body FROM permissions WHERE request_id = ?1",
            request_id.as_str(),
        )
        .map_err(StateStoreError::from)
    }

    fn active_permission_for(
        &self,
        pair: &PairKey,
    ) -> Result<Option<AccessPermission>, StateStoreError> {
        let guard = self.lock().map_err(StateStoreError::from)?;
        let body: Option<Vec<u8>> = guard
            .query_row(
                "SELECT body FROM permissions WHERE provider_id = ?1 AND patient_id = ?2 AND \
                 active = 1 ORDER BY updated_at DESC LIMIT 1",
                params![pair.provider_id.as_str(), pair.patient_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| state_db_err(&err))?;
        drop(guard);
        body.map(|bytes| decode_body(&bytes).map_err(StateStoreError::from))
            .transpose()
    }

    fn insert_session(&self, session: &AccessSession) -> Result<(), StateStoreError> {
        let body = encode_body(session)?;
        let guard = self.lock().map_err(StateStoreError::from)?;
        guard
            .execute(
                "INSERT INTO sessions (session_id, permission_id, state, body, updated_at) VALUES \
                 (?1, ?2, ?3, ?4, ?5)",
                params![
                    session.session_id.as_str(),
                    session.permission_id.as_str(),
                    session.state.as_str(),
                    body,
                    unix_millis()
                ],
            )
            .map_err(|err| state_db_err(&err))?;
        drop(guard);
        Ok(())
    }

    fn session(&self, session_id: &SessionId) -> Result<Option<AccessSession>, StateStoreError> {
        self.load_body(
            "SELECT body FROM sessions WHERE session_id = ?1",
            session_id.as_str(),
        )
        .map_err(StateStoreError::from)
    }

    fn open_sessions_for_permission(
        &self,
        permission_id: &PermissionId,
    ) -> Result<Vec<AccessSession>, StateStoreError> {
        self.load_bodies(
            "SELECT body FROM sessions WHERE permission_id = ?1 AND state IN ('pending_payment', \
             'active') ORDER BY session_id",
            permission_id.as_str(),
        )
        .map_err(StateStoreError::from)
    }

    fn sessions_in_state(
        &self,
        state: SessionState,
    ) -> Result<Vec<AccessSession>, StateStoreError> {
        self.load_bodies(
            "SELECT body FROM sessions WHERE state = ?1 ORDER BY session_id",
            state.as_str(),
        )
        .map_err(StateStoreError::from)
    }

    fn update_session(
        &self,
        expected: SessionState,
        updated: &AccessSession,
    ) -> Result<(), StateStoreError> {
        let body = encode_body(updated)?;
        self.cas_update(
            "sessions",
            "session_id",
            "state",
            updated.session_id.as_str(),
            expected.as_str(),
            updated.state.as_str(),
            &body,
        )
        .map_err(StateStoreError::from)
    }

    fn insert_payment(&self, payment: &PaymentTransaction) -> Result<(), StateStoreError> {
        let body = encode_body(payment)?;
        let guard = self.lock().map_err(StateStoreError::from)?;
        guard
            .execute(
                "INSERT INTO payments (payment_ref, session_id, status, body, updated_at) VALUES \
                 (?1, ?2, ?3, ?4, ?5)",
                params![
                    payment.payment_ref.as_str(),
                    payment.session_id.as_str(),
                    payment.status.as_str(),
                    body,
                    unix_millis()
                ],
            )
            .map_err(|err| state_db_err(&err))?;
        drop(guard);
        Ok(())
    }

    fn payment(
        &self,
        payment_ref: &PaymentRef,
    ) -> Result<Option<PaymentTransaction>, StateStoreError> {
        self.load_body(
            "SELECT body FROM payments WHERE payment_ref = ?1",
            payment_ref.as_str(),
        )
        .map_err(StateStoreError::from)
    }

    fn payment_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<PaymentTransaction>, StateStoreError> {
        self.load_body(
            "SELECT body FROM payments WHERE session_id = ?1",
            session_id.as_str(),
        )
        .map_err(StateStoreError::from)
    }

    fn update_payment(
        &self,
        expected: PaymentStatus,
        updated: &PaymentTransaction,
    ) -> Result<(), StateStoreError> {
        let body = encode_body(updated)?;
        self.cas_update(
            "payments",
            "payment_ref",
            "status",
            updated.payment_ref.as_str(),
            expected.as_str(),
            updated.status.as_str(),
            &body,
        )
        .map_err(StateStoreError::from)
    }

    fn readiness(&self) -> Result<(), StateStoreError> {
        let guard = self.lock().map_err(StateStoreError::from)?;
        guard
            .query_row("SELECT 1", params![], |row| row.get::<_, i64>(0))
            .map_err(|err| state_db_err(&err))?;
        drop(guard);
        Ok(())
    }
}

// ============================================================================
// SECTION: AuditSink Implementation
// ============================================================================

impl AuditSink for SqliteConsentStore {
    fn append(&self, entry: AuditEntry) -> Result<u64, AuditSinkError> {
        let body = serde_json::to_vec(&entry)
            .map_err(|err| AuditSinkError::Sink(err.to_string()))?;
        if body.len() > MAX_RECORD_BYTES {
            return Err(AuditSinkError::Sink(format!(
                "audit entry exceeds size limit: {} bytes",
                body.len()
            )));
        }
        let guard = self.lock().map_err(AuditSinkError::from)?;
        guard
            .execute(
                "INSERT INTO audit_log (at, kind, actor, target, success, body) VALUES (?1, ?2, \
                 ?3, ?4, ?5, ?6)",
                params![
                    entry.at.as_unix_millis(),
                    entry.kind.as_str(),
                    entry.actor,
                    entry.target,
                    i64::from(entry.success),
                    body
                ],
            )
            .map_err(|err| AuditSinkError::Sink(err.to_string()))?;
        let seq = guard.last_insert_rowid();
        drop(guard);
        u64::try_from(seq).map_err(|_| AuditSinkError::Sink("negative audit seq".to_string()))
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditSinkError> {
        let guard = self.lock().map_err(AuditSinkError::from)?;
        let mut statement = guard
            .prepare("SELECT seq, body FROM audit_log ORDER BY seq")
            .map_err(|err| AuditSinkError::Sink(err.to_string()))?;
        let rows = statement
            .query_map(params![], |row| {
                let seq: i64 = row.get(0)?;
                let body: Vec<u8> = row.get(1)?;
                Ok((seq, body))
            })
            .map_err(|err| AuditSinkError::Sink(err.to_string()))?;
        let mut entries = Vec::new();
        for row in rows {
            let (seq, body) = row.map_err(|err| AuditSinkError::Sink(err.to_string()))?;
            let mut entry: AuditEntry = serde_json::from_slice(&body)
                .map_err(|err| AuditSinkError::Sink(err.to_string()))?;
            entry.seq = u64::try_from(seq)
                .map_err(|_| AuditSinkError::Sink("negative audit seq".to_string()))?;
            if filter.matches(&entry) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Serializes a record body, enforcing the size limit.
fn encode_body<T: Serialize>(record: &T) -> Result<Vec<u8>, StateStoreError> {
    let body = serde_json::to_vec(record)
        .map_err(|err| StateStoreError::Store(err.to_string()))?;
    if body.len() > MAX_RECORD_BYTES {
        return Err(StateStoreError::Store(format!(
            "record exceeds size limit: {} bytes",
            body.len()
        )));
    }
    Ok(body)
}

/// Deserializes a record body, failing closed on malformed rows.
fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SqliteStoreError> {
    serde_json::from_slice(bytes).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}

/// Maps a rusqlite error into the store error type.
fn db_err(error: rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(error.to_string())
}

/// Maps a rusqlite error into the state-store error type.
fn state_db_err(error: &rusqlite::Error) -> StateStoreError {
    StateStoreError::Store(error.to_string())
}

/// Maps an insert failure onto the duplicate-pending conflict when the
/// partial unique index fired.
fn map_pending_conflict(error: &rusqlite::Error, request: &ConsentRequest) -> StateStoreError {
    if let rusqlite::Error::SqliteFailure(failure, _) = error {
        if failure.code == rusqlite::ErrorCode::ConstraintViolation {
            return StateStoreError::DuplicatePending {
                pair: request.pair(),
            };
        }
    }
    state_db_err(error)
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_err)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(db_err)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db_err)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_err)?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(db_err)?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(db_err)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_err)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_err)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_err)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS consent_requests (
                    request_id TEXT PRIMARY KEY,
                    provider_id TEXT NOT NULL,
                    patient_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    body BLOB NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE UNIQUE INDEX IF NOT EXISTS idx_consent_requests_single_pending
                    ON consent_requests (provider_id, patient_id)
                    WHERE status = 'pending';
                CREATE INDEX IF NOT EXISTS idx_consent_requests_status
                    ON consent_requests (status);
                CREATE TABLE IF NOT EXISTS permissions (
                    permission_id TEXT PRIMARY KEY,
                    request_id TEXT NOT NULL UNIQUE,
                    provider_id TEXT NOT NULL,
                    patient_id TEXT NOT NULL,
                    active INTEGER NOT NULL,
                    body BLOB NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_permissions_pair_active
                    ON permissions (provider_id, patient_id, active);
                CREATE TABLE IF NOT EXISTS sessions (
                    session_id TEXT PRIMARY KEY,
                    permission_id TEXT NOT NULL,
                    state TEXT NOT NULL,
                    body BLOB NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_sessions_permission_state
                    ON sessions (permission_id, state);
                CREATE INDEX IF NOT EXISTS idx_sessions_state
                    ON sessions (state);
                CREATE TABLE IF NOT EXISTS payments (
                    payment_ref TEXT PRIMARY KEY,
                    session_id TEXT NOT NULL UNIQUE,
                    status TEXT NOT NULL,
                    body BLOB NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS audit_log (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    at INTEGER NOT NULL,
                    kind TEXT NOT NULL,
                    actor TEXT NOT NULL,
                    target TEXT NOT NULL,
                    success INTEGER NOT NULL,
                    body BLOB NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_audit_log_actor ON audit_log (actor);
                CREATE INDEX IF NOT EXISTS idx_audit_log_target ON audit_log (target);",
            )
            .map_err(db_err)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(db_err)?;
    Ok(())
}

/// Returns the current unix epoch in milliseconds.
fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
