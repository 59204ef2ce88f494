// crates/consent-gate-core/src/core/session.rs
// ============================================================================
// Module: Access Session Model
// Description: Bounded usage windows over an access permission.
// Purpose: Provide the session state machine with compare-and-transition rules.
// Dependencies: crate::core::{consent, identifiers, time}, serde, thiserror
// ============================================================================

//! ## Overview
//! An access session is a bounded window in which one provider exercises one
//! permission. Sessions begin `pending_payment` or `active` depending on the
//! payment gate, and end explicitly, by abandonment, or by force when the
//! owning permission is invalidated. Transitions are compare-and-set from the
//! expected source state so concurrent sweeps cannot double-process.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::consent::AccessLevel;
use crate::core::identifiers::PatientId;
use crate::core::identifiers::PermissionId;
use crate::core::identifiers::ProviderId;
use crate::core::identifiers::SessionId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Access Type
// ============================================================================

/// Kind of file access performed within a session.
///
/// # Invariants
/// - Variants are stable for serialization and audit labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// Read a file in place.
    View,
    /// Fetch a file handle for download.
    Download,
    /// Modify a file.
    Edit,
}

impl AccessType {
    /// Returns the minimum access level required to perform this access.
    #[must_use]
    pub const fn required_level(self) -> AccessLevel {
        match self {
            Self::View | Self::Download => AccessLevel::View,
            Self::Edit => AccessLevel::Edit,
        }
    }

    /// Returns a stable label for the access type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Download => "download",
            Self::Edit => "edit",
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Session State
// ============================================================================

/// Access session lifecycle state.
///
/// # Invariants
/// - `ended` and `ended_by_revocation` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created but blocked on payment confirmation; no file access permitted.
    PendingPayment,
    /// Usable; file access is checked per call.
    Active,
    /// Closed normally or abandoned.
    Ended,
    /// Force-closed because the owning permission was revoked or expired.
    EndedByRevocation,
}

impl SessionState {
    /// Returns true for states that never transition again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::EndedByRevocation)
    }

    /// Returns a stable label for the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::EndedByRevocation => "ended_by_revocation",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Session Record
// ============================================================================

/// Session transition errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The session is not in the state the transition requires.
    #[error("session {session_id} is {actual}, expected {expected}")]
    WrongState {
        /// Session identifier.
        session_id: SessionId,
        /// State the transition requires.
        expected: SessionState,
        /// State the session is actually in.
        actual: SessionState,
    },
}

/// A bounded window of active use of one permission by one provider.
///
/// # Invariants
/// - Opened only against a currently valid permission; opening never extends
///   the permission's expiry.
/// - `ended_at` is `Some` iff the state is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessSession {
    /// Session identifier.
    pub session_id: SessionId,
    /// Permission this session is bound to.
    pub permission_id: PermissionId,
    /// Provider exercising the permission.
    pub provider_id: ProviderId,
    /// Patient whose data is in scope.
    pub patient_id: PatientId,
    /// Session start time.
    pub started_at: Timestamp,
    /// Session end time; `None` while open.
    pub ended_at: Option<Timestamp>,
    /// Lifecycle state.
    pub state: SessionState,
}

impl AccessSession {
    /// Creates a new session in the given initial state.
    #[must_use]
    pub const fn new(
        session_id: SessionId,
        permission_id: PermissionId,
        provider_id: ProviderId,
        patient_id: PatientId,
        started_at: Timestamp,
        state: SessionState,
    ) -> Self {
        Self {
            session_id,
            permission_id,
            provider_id,
            patient_id,
            started_at,
            ended_at: None,
            state,
        }
    }

    /// Returns true while the session can still transition.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Transitions `pending_payment` → `active` after payment confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::WrongState`] unless pending payment.
    pub fn activate(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::PendingPayment {
            return Err(SessionError::WrongState {
                session_id: self.session_id.clone(),
                expected: SessionState::PendingPayment,
                actual: self.state,
            });
        }
        self.state = SessionState::Active;
        Ok(())
    }

    /// Transitions any open state → `ended`. Ending an already-ended session
    /// is a no-op.
    pub fn end(&mut self, now: Timestamp) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::Ended;
        self.ended_at = Some(now);
    }

    /// Transitions any open state → `ended_by_revocation`. Idempotent on
    /// terminal states.
    pub fn force_end(&mut self, now: Timestamp) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::EndedByRevocation;
        self.ended_at = Some(now);
    }
}
