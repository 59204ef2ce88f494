// crates/consent-gate-core/src/core/audit.rs
// ============================================================================
// Module: Audit Model
// Description: Append-only audit entries and query filters.
// Purpose: Record every authorization-relevant event with a closed event set.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Every permission decision, session event, and file access produces one
//! audit entry, success or failure. Event kinds form a closed enumeration so
//! new event types cannot silently bypass audit recording. Entries are never
//! mutated; only explicit retention pruning removes old entries, outside the
//! hot path. Audit contents never feed authorization decisions.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Event Kinds
// ============================================================================

/// Closed set of auditable event kinds.
///
/// # Invariants
/// - Variants are stable for serialization; adding a kind is an explicit,
///   reviewed schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// A consent request was created.
    RequestCreated,
    /// A consent request was approved.
    RequestApproved,
    /// A consent request was denied.
    RequestDenied,
    /// A consent request expired.
    RequestExpired,
    /// An approved consent was revoked.
    RequestRevoked,
    /// An access permission was materialized.
    PermissionGranted,
    /// An access permission was deactivated.
    PermissionDeactivated,
    /// An access session started.
    SessionStarted,
    /// An access session ended normally or by abandonment.
    SessionEnded,
    /// An access session was force-closed by permission invalidation.
    SessionForceEnded,
    /// A file was viewed.
    FileViewed,
    /// A file handle was fetched for download.
    FileDownloaded,
    /// A file was edited.
    FileEdited,
    /// A payment obligation was created and submitted.
    PaymentSubmitted,
    /// A payment was confirmed.
    PaymentConfirmed,
    /// A payment failed.
    PaymentFailed,
}

impl AuditEventKind {
    /// Returns a stable label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequestCreated => "request_created",
            Self::RequestApproved => "request_approved",
            Self::RequestDenied => "request_denied",
            Self::RequestExpired => "request_expired",
            Self::RequestRevoked => "request_revoked",
            Self::PermissionGranted => "permission_granted",
            Self::PermissionDeactivated => "permission_deactivated",
            Self::SessionStarted => "session_started",
            Self::SessionEnded => "session_ended",
            Self::SessionForceEnded => "session_force_ended",
            Self::FileViewed => "file_viewed",
            Self::FileDownloaded => "file_downloaded",
            Self::FileEdited => "file_edited",
            Self::PaymentSubmitted => "payment_submitted",
            Self::PaymentConfirmed => "payment_confirmed",
            Self::PaymentFailed => "payment_failed",
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Actor Role
// ============================================================================

/// Role of the actor recorded on an audit entry.
///
/// # Invariants
/// - Variants are stable for serialization and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// The patient who owns the data.
    Patient,
    /// The provider requesting or exercising access.
    Provider,
    /// The system itself (sweeps, reconciliation).
    System,
}

impl ActorRole {
    /// Returns a stable label for the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Provider => "provider",
            Self::System => "system",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Target Kind
// ============================================================================

/// Kind of record an audit entry targets.
///
/// # Invariants
/// - Variants are stable for serialization and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Consent request record.
    Request,
    /// Access permission record.
    Permission,
    /// Access session record.
    Session,
    /// Stored file.
    File,
    /// Payment transaction record.
    Payment,
}

impl TargetKind {
    /// Returns a stable label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Permission => "permission",
            Self::Session => "session",
            Self::File => "file",
            Self::Payment => "payment",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Audit Entry
// ============================================================================

/// Immutable record of one authorization-relevant event.
///
/// # Invariants
/// - `seq` is assigned by the sink and monotonic within the log.
/// - Entries are append-only; normal operation never mutates or deletes them.
/// - `failure_reason` is `Some` iff `success` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic sequence assigned by the audit sink; zero until appended.
    pub seq: u64,
    /// Event time.
    pub at: Timestamp,
    /// Event kind.
    pub kind: AuditEventKind,
    /// Acting party identifier.
    pub actor: String,
    /// Acting party role.
    pub actor_role: ActorRole,
    /// Target record identifier.
    pub target: String,
    /// Target record kind.
    pub target_kind: TargetKind,
    /// Free-text detail for reporting.
    pub details: String,
    /// Whether the recorded operation succeeded.
    pub success: bool,
    /// Failure reason when the operation failed.
    pub failure_reason: Option<String>,
}

impl AuditEntry {
    /// Creates an entry for a successful operation.
    #[must_use]
    pub fn success(
        at: Timestamp,
        kind: AuditEventKind,
        actor: impl Into<String>,
        actor_role: ActorRole,
        target: impl Into<String>,
        target_kind: TargetKind,
        details: impl Into<String>,
    ) -> Self {
        Self {
            seq: 0,
            at,
            kind,
            actor: actor.into(),
            actor_role,
            target: target.into(),
            target_kind,
            details: details.into(),
            success: true,
            failure_reason: None,
        }
    }

    /// Creates an entry for a failed operation.
    #[must_use]
    pub fn failure(
        at: Timestamp,
        kind: AuditEventKind,
        actor: impl Into<String>,
        actor_role: ActorRole,
        target: impl Into<String>,
        target_kind: TargetKind,
        reason: impl Into<String>,
    ) -> Self {
        let reason = reason.into();
        Self {
            seq: 0,
            at,
            kind,
            actor: actor.into(),
            actor_role,
            target: target.into(),
            target_kind,
            details: String::new(),
            success: false,
            failure_reason: Some(reason),
        }
    }
}

// ============================================================================
// SECTION: Audit Filter
// ============================================================================

/// Filter for read-only audit queries.
///
/// # Invariants
/// - Unset fields match everything; set fields conjoin.
/// - Query results are for reporting only and never feed authorization.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    /// Match entries with this actor identifier.
    pub actor: Option<String>,
    /// Match entries with this target identifier.
    pub target: Option<String>,
    /// Match entries of this kind.
    pub kind: Option<AuditEventKind>,
    /// Match entries at or after this time.
    pub from: Option<Timestamp>,
    /// Match entries strictly before this time.
    pub until: Option<Timestamp>,
}

impl AuditFilter {
    /// Returns true when `entry` satisfies every set field.
    #[must_use]
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if self.actor.as_ref().is_some_and(|a| *a != entry.actor) {
            return false;
        }
        if self.target.as_ref().is_some_and(|t| *t != entry.target) {
            return false;
        }
        if self.kind.is_some_and(|k| k != entry.kind) {
            return false;
        }
        if self.from.is_some_and(|from| entry.at.is_before(from)) {
            return false;
        }
        if self.until.is_some_and(|until| !entry.at.is_before(until)) {
            return false;
        }
        true
    }
}
