// crates/consent-gate-core/src/runtime/error.rs
// ============================================================================
// Module: Engine Error Taxonomy
// Description: Typed failures returned by every public engine operation.
// Purpose: Map all failure modes onto a closed, discriminated taxonomy.
// Dependencies: crate::{core, interfaces}, thiserror
// ============================================================================

//! ## Overview
//! Every public operation returns a success value or one of these typed
//! failures; nothing throws an undifferentiated error. [`ErrorKind`] groups
//! the variants into the coarse classes callers branch on: validation and
//! conflict errors are rejected before any state mutation, expired/revoked
//! outcomes are normal rather than faults, and external-dependency failures
//! are distinct so the caller can retry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::ScopeError;
use crate::core::identifiers::PairKey;
use crate::core::identifiers::SessionId;
use crate::interfaces::AnchorError;
use crate::interfaces::AuditSinkError;
use crate::interfaces::FileResolveError;
use crate::interfaces::PaymentServiceError;
use crate::interfaces::StateStoreError;

// ============================================================================
// SECTION: Error Kind
// ============================================================================

/// Coarse error classification for callers and health reporting.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before mutation; resubmit corrected input.
    Validation,
    /// Rejected before mutation; choose a different action.
    Conflict,
    /// Stale caller state; refresh and retry.
    NotFound,
    /// Stale caller state; refresh and retry.
    WrongState,
    /// Target already terminal; a normal, expected outcome.
    Expired,
    /// External collaborator failed; retry is reasonable.
    External,
    /// Storage failed; fail closed.
    Store,
}

// ============================================================================
// SECTION: Engine Error
// ============================================================================

/// Typed failure returned by public engine operations.
///
/// # Invariants
/// - Variants are stable for programmatic handling and map onto
///   [`ErrorKind`] through [`EngineError::kind`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input failed validation before any state change.
    #[error("validation failed: {0}")]
    Validation(String),
    /// A pending request already exists for the pair.
    #[error("a pending request already exists for pair {pair}")]
    DuplicatePendingRequest {
        /// Conflicting (provider, patient) pair.
        pair: PairKey,
    },
    /// The approved scope widens the requested scope.
    #[error("approved scope widens the requested scope: {dimension}")]
    ScopeWidened {
        /// First widened dimension.
        dimension: &'static str,
    },
    /// The target record is unknown.
    #[error("not found: {record}")]
    NotFound {
        /// Record description.
        record: String,
    },
    /// The target record is not in the state the operation requires.
    #[error("wrong state for {record}: expected {expected}, found {actual}")]
    WrongState {
        /// Record description.
        record: String,
        /// State the operation requires.
        expected: String,
        /// State the record is actually in.
        actual: String,
    },
    /// The target is already expired or otherwise terminal by expiry.
    #[error("expired: {record}")]
    Expired {
        /// Record description.
        record: String,
    },
    /// No currently valid permission exists for the pair.
    #[error("no valid permission for pair {pair}")]
    NoValidPermission {
        /// The (provider, patient) pair.
        pair: PairKey,
    },
    /// The session is not active.
    #[error("session {session_id} is not active")]
    SessionNotActive {
        /// Session identifier.
        session_id: SessionId,
    },
    /// The session is blocked on an unconfirmed payment.
    #[error("session {session_id} requires payment confirmation")]
    PaymentRequired {
        /// Session identifier.
        session_id: SessionId,
    },
    /// The payment reference is unknown.
    #[error("payment not found: {reference}")]
    PaymentNotFound {
        /// The unknown reference.
        reference: String,
    },
    /// The access falls outside the permission's scope.
    #[error("out of scope: {reason}")]
    OutOfScope {
        /// Scope violation description.
        reason: String,
    },
    /// The anchoring collaborator failed.
    #[error(transparent)]
    Anchor(#[from] AnchorError),
    /// The payment collaborator failed.
    #[error(transparent)]
    Payment(#[from] PaymentServiceError),
    /// The file metadata collaborator failed.
    #[error(transparent)]
    FileResolve(FileResolveError),
    /// An audit query failed.
    #[error(transparent)]
    Audit(#[from] AuditSinkError),
    /// The state store failed.
    #[error(transparent)]
    Store(StateStoreError),
}

impl EngineError {
    /// Returns the coarse classification for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::DuplicatePendingRequest { .. } | Self::ScopeWidened { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } | Self::PaymentNotFound { .. } => ErrorKind::NotFound,
            Self::WrongState { .. }
            | Self::SessionNotActive { .. }
            | Self::PaymentRequired { .. }
            | Self::NoValidPermission { .. }
            | Self::OutOfScope { .. } => ErrorKind::WrongState,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::Anchor(_) | Self::Payment(_) | Self::FileResolve(_) | Self::Audit(_) => {
                ErrorKind::External
            }
            Self::Store(_) => ErrorKind::Store,
        }
    }
}

impl From<ScopeError> for EngineError {
    fn from(error: ScopeError) -> Self {
        match error {
            ScopeError::Widened(dimension) => Self::ScopeWidened { dimension },
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<StateStoreError> for EngineError {
    fn from(error: StateStoreError) -> Self {
        match error {
            StateStoreError::DuplicatePending { pair } => Self::DuplicatePendingRequest { pair },
            StateStoreError::NotFound(record) => Self::NotFound { record },
            StateStoreError::StaleState {
                record,
                expected,
                found,
            } => Self::WrongState {
                record,
                expected,
                actual: found,
            },
            other => Self::Store(other),
        }
    }
}

impl From<FileResolveError> for EngineError {
    fn from(error: FileResolveError) -> Self {
        match error {
            FileResolveError::NotFound(file) => Self::NotFound {
                record: format!("file {file}"),
            },
            other => Self::FileResolve(other),
        }
    }
}
