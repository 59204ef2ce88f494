// crates/consent-gate-core/src/runtime/sweep.rs
// ============================================================================
// Module: Expiry Sweep Helpers
// Description: Eligibility rules and reporting for the periodic expiry sweep.
// Purpose: Keep sweep predicates pure and the sweep itself idempotent.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! The sweep transitions overdue pending requests to expired, expires
//! approved requests whose permission lapsed (cascading permission
//! deactivation and session force-close), and ends pending-payment sessions
//! abandoned past the configured window. Eligibility checks here are pure;
//! the engine applies them with compare-and-set updates so a concurrent
//! sweep or user-driven transition processes each record at most once.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::AccessPermission;
use crate::core::AccessSession;
use crate::core::ConsentRequest;
use crate::core::SessionState;
use crate::core::Timestamp;

// ============================================================================
// SECTION: Eligibility
// ============================================================================

/// Returns true when a pending request is past its response deadline.
#[must_use]
pub fn pending_overdue(request: &ConsentRequest, now: Timestamp) -> bool {
    request.is_response_overdue(now)
}

/// Returns true when a permission's absolute expiry has passed.
#[must_use]
pub fn permission_lapsed(permission: &AccessPermission, now: Timestamp) -> bool {
    !now.is_before(permission.expires_at)
}

/// Returns true when a pending-payment session has sat unconfirmed for at
/// least `window_ms` milliseconds.
#[must_use]
pub fn payment_abandoned(session: &AccessSession, window_ms: i64, now: Timestamp) -> bool {
    session.state == SessionState::PendingPayment
        && now.millis_since(session.started_at) >= window_ms
}

// ============================================================================
// SECTION: Report
// ============================================================================

/// Outcome of one expiry sweep pass.
///
/// # Invariants
/// - Counters cover only records this pass transitioned; records already
///   claimed by a concurrent transition are not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SweepReport {
    /// Pending requests moved to expired.
    pub requests_expired: u64,
    /// Approved requests expired because their permission lapsed.
    pub grants_expired: u64,
    /// Permissions deactivated by the cascade.
    pub permissions_deactivated: u64,
    /// Open sessions force-closed by the cascade.
    pub sessions_force_closed: u64,
    /// Pending-payment sessions ended as abandoned.
    pub sessions_abandoned: u64,
}

impl SweepReport {
    /// Total records transitioned by the pass.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.requests_expired
            + self.grants_expired
            + self.permissions_deactivated
            + self.sessions_force_closed
            + self.sessions_abandoned
    }
}
