// crates/consent-gate-core/src/core/payment.rs
// ============================================================================
// Module: Payment Model
// Description: Payment obligations, provider tiers, and quote schedule.
// Purpose: Tie usable access to confirmed payment with integer amounts.
// Dependencies: crate::core::{consent, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Payment obligations gate session activation: a session with a non-zero
//! quote stays inert until its transaction confirms. Amounts are integer
//! micro-units; quoting is a pure function of provider tier and access level.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::consent::AccessLevel;
use crate::core::identifiers::PatientId;
use crate::core::identifiers::PaymentRef;
use crate::core::identifiers::ProviderId;
use crate::core::identifiers::SessionId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Provider Tier
// ============================================================================

/// Provider payment tier.
///
/// # Invariants
/// - Variants are stable for serialization and quote lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTier {
    /// Pays the full per-access fee.
    Standard,
    /// Verified provider; pays a reduced fee.
    Verified,
    /// Staked provider; access is pre-paid.
    Staked,
}

impl ProviderTier {
    /// Returns a stable label for the tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Verified => "verified",
            Self::Staked => "staked",
        }
    }
}

impl fmt::Display for ProviderTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Quote Schedule
// ============================================================================

/// Default standard-tier fee per session in micro-units.
pub const DEFAULT_STANDARD_FEE: u64 = 5_000_000;
/// Default verified-tier fee per session in micro-units.
pub const DEFAULT_VERIFIED_FEE: u64 = 1_000_000;
/// Multiplier applied to the base fee for edit-capable access, in percent.
pub const EDIT_FEE_PERCENT: u64 = 150;

/// Pure fee table mapping provider tier and access level to an amount owed.
///
/// # Invariants
/// - Staked providers always quote zero.
/// - Amounts are micro-units; no floating point is involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSchedule {
    /// Base session fee for standard-tier providers.
    pub standard_fee: u64,
    /// Base session fee for verified-tier providers.
    pub verified_fee: u64,
    /// Percent multiplier applied when the permission allows edits.
    pub edit_fee_percent: u64,
}

impl Default for QuoteSchedule {
    fn default() -> Self {
        Self {
            standard_fee: DEFAULT_STANDARD_FEE,
            verified_fee: DEFAULT_VERIFIED_FEE,
            edit_fee_percent: EDIT_FEE_PERCENT,
        }
    }
}

impl QuoteSchedule {
    /// Quotes the amount owed for a session under the given tier and level.
    #[must_use]
    pub const fn quote(&self, tier: ProviderTier, level: AccessLevel) -> u64 {
        let base = match tier {
            ProviderTier::Staked => return 0,
            ProviderTier::Verified => self.verified_fee,
            ProviderTier::Standard => self.standard_fee,
        };
        match level {
            AccessLevel::View => base,
            AccessLevel::Edit | AccessLevel::Full => {
                base.saturating_mul(self.edit_fee_percent) / 100
            }
        }
    }
}

// ============================================================================
// SECTION: Payment Transaction
// ============================================================================

/// Payment obligation status.
///
/// # Invariants
/// - `confirmed` and `failed` are terminal; confirmation is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Awaiting confirmation from the payment collaborator.
    Pending,
    /// Confirmed; the bound session may activate.
    Confirmed,
    /// Failed; the bound session stays inert.
    Failed,
}

impl PaymentStatus {
    /// Returns a stable label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment obligation tied to one session.
///
/// # Invariants
/// - A session is not usable while its transaction is `pending` or `failed`.
/// - `external_ref` is set once the payment collaborator confirms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    /// Payment reference, unique per obligation.
    pub payment_ref: PaymentRef,
    /// Session this obligation gates.
    pub session_id: SessionId,
    /// Paying provider.
    pub payer: ProviderId,
    /// Paid patient.
    pub payee: PatientId,
    /// Amount owed in micro-units.
    pub amount: u64,
    /// Obligation status.
    pub status: PaymentStatus,
    /// External transaction reference once confirmed.
    pub external_ref: Option<String>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Resolution time for confirmed or failed obligations.
    pub resolved_at: Option<Timestamp>,
}
