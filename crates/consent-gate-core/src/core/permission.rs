// crates/consent-gate-core/src/core/permission.rs
// ============================================================================
// Module: Access Permission Model
// Description: Materialized grants derived from approved consent requests.
// Purpose: Provide the currently-effective permission with validity checks.
// Dependencies: crate::core::{consent, identifiers, time}, serde, thiserror
// ============================================================================

//! ## Overview
//! An access permission is the materialized form of an approved consent
//! request: the grant a session is opened against and every file access is
//! checked against. Materialization is deterministic and keyed by the source
//! request, so re-deriving refreshes the same logical permission instead of
//! duplicating it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::consent::AccessLevel;
use crate::core::consent::ConsentRequest;
use crate::core::consent::ConsentStatus;
use crate::core::consent::DataCategory;
use crate::core::identifiers::PairKey;
use crate::core::identifiers::PatientId;
use crate::core::identifiers::PermissionId;
use crate::core::identifiers::ProviderId;
use crate::core::identifiers::RequestId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Permission derivation errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionError {
    /// Materialization was attempted on a request that is not approved.
    #[error("request {request_id} is {status}, not approved")]
    InvalidSource {
        /// Source request identifier.
        request_id: RequestId,
        /// Actual status of the source request.
        status: ConsentStatus,
    },
    /// The source request carries no approved scope.
    #[error("request {request_id} is approved but has no approved scope")]
    MissingApprovedScope {
        /// Source request identifier.
        request_id: RequestId,
    },
}

// ============================================================================
// SECTION: Access Permission
// ============================================================================

/// The currently-effective grant derived from an approved consent request.
///
/// # Invariants
/// - Exactly one permission exists per approved request; the store keys
///   permissions by `request_id`.
/// - `expires_at` equals approval time plus the approved duration and is
///   never extended by sessions.
/// - A deactivated permission never becomes active again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPermission {
    /// Permission identifier.
    pub permission_id: PermissionId,
    /// Source consent request identifier.
    pub request_id: RequestId,
    /// Provider holding the grant.
    pub provider_id: ProviderId,
    /// Patient who granted access.
    pub patient_id: PatientId,
    /// Granted access level.
    pub access_level: AccessLevel,
    /// Granted data-type categories.
    pub categories: BTreeSet<DataCategory>,
    /// Time the grant took effect.
    pub granted_at: Timestamp,
    /// Absolute expiry of the grant.
    pub expires_at: Timestamp,
    /// Running count of file accesses performed under this grant.
    pub access_count: u64,
    /// Whether the grant is currently active.
    pub active: bool,
}

impl AccessPermission {
    /// Derives a permission from an approved consent request.
    ///
    /// Deterministic: the permission identifier is a pure function of the
    /// request identifier, so repeated materialization yields the same
    /// logical permission.
    ///
    /// # Errors
    ///
    /// Returns [`PermissionError::InvalidSource`] when the request is not
    /// approved, or [`PermissionError::MissingApprovedScope`] when the
    /// approved scope is absent.
    pub fn materialize(request: &ConsentRequest, now: Timestamp) -> Result<Self, PermissionError> {
        if request.status != ConsentStatus::Approved {
            return Err(PermissionError::InvalidSource {
                request_id: request.request_id.clone(),
                status: request.status,
            });
        }
        let scope = request
            .approved_scope
            .as_ref()
            .ok_or_else(|| PermissionError::MissingApprovedScope {
                request_id: request.request_id.clone(),
            })?;
        let granted_at = request.decided_at.unwrap_or(now);
        Ok(Self {
            permission_id: Self::id_for(&request.request_id),
            request_id: request.request_id.clone(),
            provider_id: request.provider_id.clone(),
            patient_id: request.patient_id.clone(),
            access_level: scope.access_level,
            categories: scope.categories.clone(),
            granted_at,
            expires_at: granted_at.plus_days(scope.duration_days),
            access_count: 0,
            active: true,
        })
    }

    /// Returns the canonical permission identifier for a source request.
    #[must_use]
    pub fn id_for(request_id: &RequestId) -> PermissionId {
        PermissionId::new(format!("perm-{request_id}"))
    }

    /// Returns the (provider, patient) pair key for this permission.
    #[must_use]
    pub fn pair(&self) -> PairKey {
        PairKey::new(self.provider_id.clone(), self.patient_id.clone())
    }

    /// Returns true when the grant is active and unexpired at `now`.
    #[must_use]
    pub fn is_valid(&self, now: Timestamp) -> bool {
        self.active && now.is_before(self.expires_at)
    }

    /// Records one file access under this grant.
    pub fn record_access(&mut self) {
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Deactivates the grant. Idempotent.
    pub fn deactivate(&mut self) {
        self.active = false;
    }
}
