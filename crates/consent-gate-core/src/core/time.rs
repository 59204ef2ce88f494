// crates/consent-gate-core/src/core/time.rs
// ============================================================================
// Module: Consent Gate Time Model
// Description: Canonical timestamp representation for consent records and logs.
// Purpose: Provide deterministic, replayable time values across Consent Gate records.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Consent Gate uses explicit time values embedded in records and audit logs
//! to keep replay deterministic. The core engine never reads wall-clock time
//! directly; hosts supply timestamps through the runtime [`crate::runtime::Clock`]
//! seam or directly on trigger-style calls.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Milliseconds in one second.
pub const MILLIS_PER_SECOND: i64 = 1_000;
/// Milliseconds in one minute.
pub const MILLIS_PER_MINUTE: i64 = 60 * MILLIS_PER_SECOND;
/// Milliseconds in one hour.
pub const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
/// Milliseconds in one day.
pub const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Canonical timestamp used in Consent Gate records and audit logs.
///
/// # Invariants
/// - Values are unix epoch milliseconds explicitly provided by callers; the
///   core never reads wall-clock time.
/// - Arithmetic saturates; overflow never wraps.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns the timestamp advanced by `millis`, saturating on overflow.
    #[must_use]
    pub const fn plus_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Returns the timestamp advanced by whole days, saturating on overflow.
    #[must_use]
    pub const fn plus_days(self, days: u32) -> Self {
        Self(self.0.saturating_add((days as i64).saturating_mul(MILLIS_PER_DAY)))
    }

    /// Returns true when `self` is strictly before `other`.
    #[must_use]
    pub const fn is_before(self, other: Self) -> bool {
        self.0 < other.0
    }

    /// Returns the elapsed milliseconds since `earlier`, or zero when `earlier`
    /// is in the future.
    #[must_use]
    pub const fn millis_since(self, earlier: Self) -> i64 {
        let delta = self.0.saturating_sub(earlier.0);
        if delta < 0 { 0 } else { delta }
    }
}
