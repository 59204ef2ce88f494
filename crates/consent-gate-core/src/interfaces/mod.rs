// crates/consent-gate-core/src/interfaces/mod.rs
// ============================================================================
// Module: Consent Gate Interfaces
// Description: Backend-agnostic interfaces for anchoring, payment, files,
//              notification, audit, and state storage.
// Purpose: Define the contract surfaces used by the Consent Gate runtime.
// Dependencies: crate::core, serde, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how Consent Gate integrates with external collaborators
//! without embedding backend-specific details. Implementations must fail
//! closed on missing or invalid data. The anchoring and payment seams are the
//! only operations expected to block; everything else is fast local state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::AccessPermission;
use crate::core::AccessSession;
use crate::core::ActorRole;
use crate::core::AuditEntry;
use crate::core::AuditFilter;
use crate::core::ConsentRequest;
use crate::core::ConsentStatus;
use crate::core::DataCategory;
use crate::core::FileId;
use crate::core::PairKey;
use crate::core::PatientId;
use crate::core::PaymentRef;
use crate::core::PaymentStatus;
use crate::core::PaymentTransaction;
use crate::core::PermissionId;
use crate::core::ProviderId;
use crate::core::RequestId;
use crate::core::SessionId;
use crate::core::SessionState;
use crate::core::identifiers::AnchorRef;

// ============================================================================
// SECTION: Anchoring Service
// ============================================================================

/// Anchoring service errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum AnchorError {
    /// The anchoring backend is unreachable.
    #[error("anchoring service unavailable: {0}")]
    Unavailable(String),
    /// The anchoring backend rejected the event.
    #[error("anchoring rejected: {0}")]
    Rejected(String),
}

/// Records consent decisions in an externally verifiable, tamper-evident log.
///
/// Implementations must be idempotent per logical event: retrying a failed
/// call must not produce two anchors for one transition.
pub trait AnchorService: Send + Sync {
    /// Anchors the creation of a consent request.
    ///
    /// # Errors
    ///
    /// Returns [`AnchorError`] when anchoring fails.
    fn anchor_consent(&self, request: &ConsentRequest) -> Result<AnchorRef, AnchorError>;

    /// Anchors an approval decision.
    ///
    /// # Errors
    ///
    /// Returns [`AnchorError`] when anchoring fails.
    fn anchor_approval(&self, request_id: &RequestId) -> Result<AnchorRef, AnchorError>;

    /// Anchors a revocation with its reason.
    ///
    /// # Errors
    ///
    /// Returns [`AnchorError`] when anchoring fails.
    fn anchor_revocation(&self, request_id: &RequestId, reason: &str)
    -> Result<AnchorRef, AnchorError>;
}

// ============================================================================
// SECTION: Payment Service
// ============================================================================

/// Payment service errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum PaymentServiceError {
    /// The payment backend is unreachable.
    #[error("payment service unavailable: {0}")]
    Unavailable(String),
    /// The payment backend rejected the submission.
    #[error("payment rejected: {0}")]
    Rejected(String),
    /// The external reference is unknown to the backend.
    #[error("unknown payment reference: {0}")]
    UnknownReference(String),
}

/// Receipt returned by the payment collaborator.
///
/// # Invariants
/// - `external_ref` identifies the payment in the external ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    /// Status reported by the backend.
    pub status: PaymentStatus,
    /// External ledger reference.
    pub external_ref: String,
}

/// Submits and verifies payments against the external ledger.
pub trait PaymentService: Send + Sync {
    /// Submits a payment of `amount` micro-units from `payer` to `payee`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentServiceError`] when submission fails.
    fn submit_payment(
        &self,
        payer: &ProviderId,
        payee: &PatientId,
        amount: u64,
        reference: &PaymentRef,
    ) -> Result<PaymentReceipt, PaymentServiceError>;

    /// Verifies the status of a previously submitted payment.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentServiceError`] when verification fails.
    fn verify_payment(&self, external_ref: &str) -> Result<PaymentStatus, PaymentServiceError>;
}

// ============================================================================
// SECTION: File Resolver
// ============================================================================

/// File resolution errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum FileResolveError {
    /// The file is unknown.
    #[error("unknown file: {0}")]
    NotFound(String),
    /// The metadata store reported an error.
    #[error("file metadata error: {0}")]
    Metadata(String),
}

/// File metadata used for scope checks.
///
/// # Invariants
/// - `handle_ref` is an opaque storage handle, never decrypted bytes; access
///   does not imply decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Data-type category of the file.
    pub category: DataCategory,
    /// Opaque content handle in the storage network.
    pub handle_ref: String,
}

/// Resolves file identifiers to categories and storage handles.
///
/// Used only to check scope membership; the core never fetches bytes.
pub trait FileResolver: Send + Sync {
    /// Resolves a file identifier.
    ///
    /// # Errors
    ///
    /// Returns [`FileResolveError`] when resolution fails.
    fn resolve(&self, file_id: &FileId) -> Result<FileRecord, FileResolveError>;
}

// ============================================================================
// SECTION: Notification Sink
// ============================================================================

/// Notification delivery errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Delivery failed.
    #[error("notification delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Message delivered to a patient or provider.
///
/// # Invariants
/// - Content is plain text; rendering is a delivery concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Short subject line.
    pub subject: String,
    /// Message body.
    pub body: String,
}

/// Fire-and-forget notification delivery.
///
/// Delivery failures never roll back the state transition that triggered
/// them; the runtime records the degradation instead.
pub trait NotificationSink: Send + Sync {
    /// Delivers a notice to a recipient.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] when delivery fails.
    fn deliver(&self, recipient: &str, role: ActorRole, notice: &Notice) -> Result<(), NotifyError>;
}

// ============================================================================
// SECTION: Audit Sink
// ============================================================================

/// Audit sink errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum AuditSinkError {
    /// The sink is unavailable.
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
    /// The sink rejected the entry or query.
    #[error("audit sink error: {0}")]
    Sink(String),
}

/// Append-only audit log.
///
/// Append failures never fail the caller's primary operation; the runtime
/// surfaces them through metrics as a recorded-degradation condition.
pub trait AuditSink: Send + Sync {
    /// Appends an entry and returns its assigned sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`AuditSinkError`] when the append fails.
    fn append(&self, entry: AuditEntry) -> Result<u64, AuditSinkError>;

    /// Queries entries matching the filter, ordered by sequence.
    ///
    /// # Errors
    ///
    /// Returns [`AuditSinkError`] when the query fails.
    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditSinkError>;
}

// ============================================================================
// SECTION: State Store
// ============================================================================

/// State store errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - `DuplicatePending` and `StaleState` carry compare-and-set outcomes the
///   runtime maps onto its conflict taxonomy.
#[derive(Debug, Error)]
pub enum StateStoreError {
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
    /// Store I/O error.
    #[error("state store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("state store corruption: {0}")]
    Corrupt(String),
    /// Store reported an error.
    #[error("state store error: {0}")]
    Store(String),
}

/// Keyed, compare-and-set store for consent state.
///
/// The store is indexed by (provider, patient) pair for pending-request
/// lookups and enforces the single-pending invariant on insert. All status
/// updates compare against the expected source state so concurrent sweeps
/// and user-driven transitions cannot double-process a record.
pub trait ConsentStateStore: Send + Sync {
    /// Inserts a new pending request, enforcing the single-pending invariant.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::DuplicatePending`] when a pending request
    /// already exists for the pair, or another variant on storage failure.
    fn insert_pending_request(&self, request: &ConsentRequest) -> Result<(), StateStoreError>;

    /// Loads a request by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when loading fails.
    fn request(&self, request_id: &RequestId) -> Result<Option<ConsentRequest>, StateStoreError>;

    /// Loads the pending request for a pair, when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when loading fails.
    fn pending_request_for(&self, pair: &PairKey) -> Result<Option<ConsentRequest>, StateStoreError>;

    /// Replaces a request, comparing against the expected current status.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::StaleState`] when the stored status differs
    /// from `expected`, [`StateStoreError::NotFound`] for unknown requests,
    /// or another variant on storage failure.
    fn update_request(
        &self,
        expected: ConsentStatus,
        updated: &ConsentRequest,
    ) -> Result<(), StateStoreError>;

    /// Lists requests currently in `status`.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when listing fails.
    fn requests_in_status(&self, status: ConsentStatus)
    -> Result<Vec<ConsentRequest>, StateStoreError>;

    /// Inserts or refreshes the permission for its source request.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when the write fails.
    fn upsert_permission(&self, permission: &AccessPermission) -> Result<(), StateStoreError>;

    /// Atomically increments the access counter of an active permission and
    /// returns the updated record.
    ///
    /// The increment is guarded on the stored `active` flag at write time, so
    /// a concurrent revocation or deactivation is never overwritten by a
    /// stale snapshot and concurrent increments are never lost.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::NotFound`] for unknown permissions,
    /// [`StateStoreError::StaleState`] when the permission is no longer
    /// active, or another variant on storage failure.
    fn record_permission_access(
        &self,
        permission_id: &PermissionId,
    ) -> Result<AccessPermission, StateStoreError>;

    /// Loads a permission by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when loading fails.
    fn permission(
        &self,
        permission_id: &PermissionId,
    ) -> Result<Option<AccessPermission>, StateStoreError>;

    /// Loads the permission derived from a request, when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when loading fails.
    fn permission_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<AccessPermission>, StateStoreError>;

    /// Loads the active permission for a pair, when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when loading fails.
    fn active_permission_for(
        &self,
        pair: &PairKey,
    ) -> Result<Option<AccessPermission>, StateStoreError>;

    /// Inserts a new session.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when the write fails.
    fn insert_session(&self, session: &AccessSession) -> Result<(), StateStoreError>;

    /// Loads a session by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when loading fails.
    fn session(&self, session_id: &SessionId) -> Result<Option<AccessSession>, StateStoreError>;

    /// Lists open sessions bound to a permission.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when listing fails.
    fn open_sessions_for_permission(
        &self,
        permission_id: &PermissionId,
    ) -> Result<Vec<AccessSession>, StateStoreError>;

    /// Lists sessions currently in `state`.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when listing fails.
    fn sessions_in_state(&self, state: SessionState)
    -> Result<Vec<AccessSession>, StateStoreError>;

    /// Replaces a session, comparing against the expected current state.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::StaleState`] when the stored state differs
    /// from `expected`, [`StateStoreError::NotFound`] for unknown sessions,
    /// or another variant on storage failure.
    fn update_session(
        &self,
        expected: SessionState,
        updated: &AccessSession,
    ) -> Result<(), StateStoreError>;

    /// Inserts a new payment transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when the write fails.
    fn insert_payment(&self, payment: &PaymentTransaction) -> Result<(), StateStoreError>;

    /// Loads a payment by reference.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when loading fails.
    fn payment(&self, payment_ref: &PaymentRef)
    -> Result<Option<PaymentTransaction>, StateStoreError>;

    /// Loads the payment bound to a session, when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when loading fails.
    fn payment_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<PaymentTransaction>, StateStoreError>;

    /// Replaces a payment, comparing against the expected current status.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::StaleState`] when the stored status differs
    /// from `expected`, [`StateStoreError::NotFound`] for unknown payments,
    /// or another variant on storage failure.
    fn update_payment(
        &self,
        expected: PaymentStatus,
        updated: &PaymentTransaction,
    ) -> Result<(), StateStoreError>;

    /// Reports store readiness for liveness/readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when the store is unavailable.
    fn readiness(&self) -> Result<(), StateStoreError> {
        Ok(())
    }
}
