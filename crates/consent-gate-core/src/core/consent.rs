// crates/consent-gate-core/src/core/consent.rs
// ============================================================================
// Module: Consent Request Model
// Description: Consent scope, urgency, status lifecycle, and request records.
// Purpose: Provide the canonical consent state machine with narrowing rules.
// Dependencies: crate::core::{identifiers, time}, serde, thiserror
// ============================================================================

//! ## Overview
//! A consent request is one provider's ask for time-boxed, scoped access to
//! one patient's data. Requests move through a closed status lifecycle with
//! compare-and-transition helpers; terminal statuses never transition again.
//! Approval may narrow the requested scope but never widen it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::AnchorRef;
use crate::core::identifiers::PairKey;
use crate::core::identifiers::PartyAddress;
use crate::core::identifiers::PatientId;
use crate::core::identifiers::ProviderId;
use crate::core::identifiers::RequestId;
use crate::core::time::MILLIS_PER_DAY;
use crate::core::time::MILLIS_PER_HOUR;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Minimum requestable duration in days.
pub const MIN_DURATION_DAYS: u32 = 1;
/// Maximum requestable duration in days.
pub const MAX_DURATION_DAYS: u32 = 365;
/// Default response window for standard urgency (7 days).
pub const STANDARD_RESPONSE_WINDOW_MS: i64 = 7 * MILLIS_PER_DAY;
/// Default response window for urgent requests (24 hours).
pub const URGENT_RESPONSE_WINDOW_MS: i64 = 24 * MILLIS_PER_HOUR;
/// Default response window for emergency requests (2 hours).
pub const EMERGENCY_RESPONSE_WINDOW_MS: i64 = 2 * MILLIS_PER_HOUR;

// ============================================================================
// SECTION: Access Level
// ============================================================================

/// Access level granted or requested for patient data.
///
/// # Invariants
/// - Variants are stable for serialization and ordered by capability:
///   `view` < `edit` < `full`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    /// Read-only access.
    View,
    /// Read and modify access.
    Edit,
    /// Unrestricted access within the granted categories.
    Full,
}

impl AccessLevel {
    /// Returns a stable label for the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Edit => "edit",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Data Category
// ============================================================================

/// Data-type category subject to consent (for example `lab-results`).
///
/// # Invariants
/// - Non-empty after construction via [`DataCategory::parse`]; callers using
///   `new` own the non-empty guarantee.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataCategory(String);

impl DataCategory {
    /// Creates a category without validation.
    #[must_use]
    pub fn new(category: impl Into<String>) -> Self {
        Self(category.into())
    }

    /// Parses a category, rejecting empty or whitespace-only input.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::EmptyCategory`] when the input has no content.
    pub fn parse(category: impl Into<String>) -> Result<Self, ScopeError> {
        let category = category.into();
        if category.trim().is_empty() {
            return Err(ScopeError::EmptyCategory);
        }
        Ok(Self(category))
    }

    /// Returns the category as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for DataCategory {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Urgency
// ============================================================================

/// Urgency class of a consent request, driving the patient response deadline.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Routine request; patient has roughly a week to respond.
    Standard,
    /// Time-sensitive request; patient has roughly a day to respond.
    Urgent,
    /// Emergency request; patient has roughly two hours to respond and the
    /// request must carry a justification.
    Emergency,
}

impl Urgency {
    /// Returns the default response window in milliseconds for this urgency.
    #[must_use]
    pub const fn default_response_window_ms(self) -> i64 {
        match self {
            Self::Standard => STANDARD_RESPONSE_WINDOW_MS,
            Self::Urgent => URGENT_RESPONSE_WINDOW_MS,
            Self::Emergency => EMERGENCY_RESPONSE_WINDOW_MS,
        }
    }

    /// Returns a stable label for the urgency.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Urgent => "urgent",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Consent Scope
// ============================================================================

/// Scope errors raised during validation and narrowing checks.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    /// Duration is outside the allowed range.
    #[error("duration {days} days outside allowed range [{MIN_DURATION_DAYS}, {MAX_DURATION_DAYS}]")]
    DurationOutOfRange {
        /// Requested duration in days.
        days: u32,
    },
    /// Scope names no data categories.
    #[error("scope must name at least one data category")]
    NoCategories,
    /// A category is empty or whitespace-only.
    #[error("data category must not be empty")]
    EmptyCategory,
    /// Emergency urgency without a justification.
    #[error("emergency request requires a justification")]
    MissingJustification,
    /// Approved scope exceeds the requested scope.
    #[error("approved scope widens the requested scope: {0}")]
    Widened(&'static str),
}

/// Scope of a consent request or approval.
///
/// # Invariants
/// - `categories` is a set; duplicates cannot exist.
/// - A validated scope has `duration_days` in `[1, 365]` and at least one
///   category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentScope {
    /// Access level.
    pub access_level: AccessLevel,
    /// Allowed data-type categories.
    pub categories: BTreeSet<DataCategory>,
    /// Duration of access in days.
    pub duration_days: u32,
    /// Free-text purpose.
    pub purpose: String,
    /// Justification, mandatory for emergency urgency.
    pub justification: Option<String>,
}

impl ConsentScope {
    /// Validates this scope against the request invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError`] when the duration is out of range, no category
    /// is named, a category is empty, or an emergency justification is
    /// missing.
    pub fn validate(&self, urgency: Urgency) -> Result<(), ScopeError> {
        if self.duration_days < MIN_DURATION_DAYS || self.duration_days > MAX_DURATION_DAYS {
            return Err(ScopeError::DurationOutOfRange {
                days: self.duration_days,
            });
        }
        if self.categories.is_empty() {
            return Err(ScopeError::NoCategories);
        }
        if self.categories.iter().any(|c| c.as_str().trim().is_empty()) {
            return Err(ScopeError::EmptyCategory);
        }
        if urgency == Urgency::Emergency
            && self.justification.as_ref().is_none_or(|j| j.trim().is_empty())
        {
            return Err(ScopeError::MissingJustification);
        }
        Ok(())
    }

    /// Checks that `self` does not widen `requested`.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Widened`] naming the first widened dimension:
    /// access level, categories, or duration.
    pub fn check_narrows(&self, requested: &Self) -> Result<(), ScopeError> {
        if self.access_level > requested.access_level {
            return Err(ScopeError::Widened("access level"));
        }
        if !self.categories.is_subset(&requested.categories) {
            return Err(ScopeError::Widened("data categories"));
        }
        if self.duration_days > requested.duration_days {
            return Err(ScopeError::Widened("duration"));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Consent Status
// ============================================================================

/// Consent request lifecycle status.
///
/// # Invariants
/// - `denied`, `expired`, and `revoked` are terminal.
/// - `approved` is active but may still move to `expired` or `revoked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    /// Awaiting the patient's decision.
    Pending,
    /// Approved by the patient; a permission is (or will be) derived.
    Approved,
    /// Denied by the patient.
    Denied,
    /// Deadline or permission expiry passed without resolution.
    Expired,
    /// Approval withdrawn by the patient.
    Revoked,
}

impl ConsentStatus {
    /// Returns true for statuses that never transition again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Denied | Self::Expired | Self::Revoked)
    }

    /// Returns a stable label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Consent Request Record
// ============================================================================

/// Consent transition errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsentError {
    /// The request is not in the status the transition requires.
    #[error("request {request_id} is {actual}, expected {expected}")]
    WrongStatus {
        /// Request identifier.
        request_id: RequestId,
        /// Status the transition requires.
        expected: ConsentStatus,
        /// Status the request is actually in.
        actual: ConsentStatus,
    },
    /// The response deadline has passed.
    #[error("request {request_id} response deadline has passed")]
    DeadlinePassed {
        /// Request identifier.
        request_id: RequestId,
    },
    /// Scope validation or narrowing failed.
    #[error(transparent)]
    Scope(#[from] ScopeError),
}

/// A request from one provider to one patient for scoped access.
///
/// # Invariants
/// - At most one `pending` request exists per (provider, patient) pair;
///   enforced by the state store, not by this record.
/// - `anchor` is required once the request is `approved` or `revoked`; the
///   anchoring collaborator supplies it asynchronously.
/// - `approved_scope` is `Some` iff the request has been approved and never
///   widens `requested_scope`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRequest {
    /// Request identifier.
    pub request_id: RequestId,
    /// Requesting provider identifier.
    pub provider_id: ProviderId,
    /// Requesting provider's verifiable address.
    pub provider_address: PartyAddress,
    /// Target patient identifier.
    pub patient_id: PatientId,
    /// Target patient's verifiable address.
    pub patient_address: PartyAddress,
    /// Scope requested by the provider.
    pub requested_scope: ConsentScope,
    /// Scope granted by the patient; set on approval.
    pub approved_scope: Option<ConsentScope>,
    /// Urgency class.
    pub urgency: Urgency,
    /// Creation time.
    pub created_at: Timestamp,
    /// Deadline by which the patient must respond.
    pub respond_by: Timestamp,
    /// Time of the patient's decision, when one was made.
    pub decided_at: Option<Timestamp>,
    /// Lifecycle status.
    pub status: ConsentStatus,
    /// External anchor reference for the latest anchored transition.
    pub anchor: Option<AnchorRef>,
}

impl ConsentRequest {
    /// Returns the (provider, patient) pair key for this request.
    #[must_use]
    pub fn pair(&self) -> PairKey {
        PairKey::new(self.provider_id.clone(), self.patient_id.clone())
    }

    /// Returns true when the request is `pending` and past its deadline.
    #[must_use]
    pub fn is_response_overdue(&self, now: Timestamp) -> bool {
        self.status == ConsentStatus::Pending && !now.is_before(self.respond_by)
    }

    /// Transitions `pending` → `approved` with a narrowed scope.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::WrongStatus`] unless pending,
    /// [`ConsentError::DeadlinePassed`] when past the response deadline, or
    /// [`ConsentError::Scope`] when `approved_scope` widens the request.
    pub fn approve(&mut self, approved_scope: ConsentScope, now: Timestamp) -> Result<(), ConsentError> {
        self.require_status(ConsentStatus::Pending)?;
        if self.is_response_overdue(now) {
            return Err(ConsentError::DeadlinePassed {
                request_id: self.request_id.clone(),
            });
        }
        approved_scope.check_narrows(&self.requested_scope)?;
        self.approved_scope = Some(approved_scope);
        self.decided_at = Some(now);
        self.status = ConsentStatus::Approved;
        Ok(())
    }

    /// Transitions `pending` → `denied`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::WrongStatus`] unless pending, or
    /// [`ConsentError::DeadlinePassed`] when past the response deadline.
    pub fn deny(&mut self, now: Timestamp) -> Result<(), ConsentError> {
        self.require_status(ConsentStatus::Pending)?;
        if self.is_response_overdue(now) {
            return Err(ConsentError::DeadlinePassed {
                request_id: self.request_id.clone(),
            });
        }
        self.decided_at = Some(now);
        self.status = ConsentStatus::Denied;
        Ok(())
    }

    /// Transitions `approved` → `revoked`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::WrongStatus`] unless approved.
    pub fn revoke(&mut self, now: Timestamp) -> Result<(), ConsentError> {
        self.require_status(ConsentStatus::Approved)?;
        self.decided_at = Some(now);
        self.status = ConsentStatus::Revoked;
        Ok(())
    }

    /// Transitions `pending` or `approved` → `expired`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::WrongStatus`] when the request is already
    /// terminal; the sweep relies on this to never re-process records.
    pub fn expire(&mut self, now: Timestamp) -> Result<(), ConsentError> {
        match self.status {
            ConsentStatus::Pending | ConsentStatus::Approved => {
                self.decided_at = Some(now);
                self.status = ConsentStatus::Expired;
                Ok(())
            }
            actual => Err(ConsentError::WrongStatus {
                request_id: self.request_id.clone(),
                expected: ConsentStatus::Pending,
                actual,
            }),
        }
    }

    /// Checks the request is in `expected` status.
    fn require_status(&self, expected: ConsentStatus) -> Result<(), ConsentError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(ConsentError::WrongStatus {
                request_id: self.request_id.clone(),
                expected,
                actual: self.status,
            })
        }
    }
}
