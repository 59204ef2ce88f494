// crates/consent-gate-core/src/core/mod.rs
// ============================================================================
// Module: Consent Gate Core Types
// Description: Canonical consent, permission, session, payment, and audit types.
// Purpose: Provide stable, serializable types for Consent Gate records and logs.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Core types define the consent lifecycle, materialized permissions, access
//! sessions, payment obligations, and the audit schema. These types are the
//! canonical source of truth for any derived API surfaces.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod audit;
pub mod consent;
pub mod identifiers;
pub mod payment;
pub mod permission;
pub mod session;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::ActorRole;
pub use audit::AuditEntry;
pub use audit::AuditEventKind;
pub use audit::AuditFilter;
pub use audit::TargetKind;
pub use consent::AccessLevel;
pub use consent::ConsentError;
pub use consent::ConsentRequest;
pub use consent::ConsentScope;
pub use consent::ConsentStatus;
pub use consent::DataCategory;
pub use consent::MAX_DURATION_DAYS;
pub use consent::MIN_DURATION_DAYS;
pub use consent::ScopeError;
pub use consent::Urgency;
pub use identifiers::AnchorRef;
pub use identifiers::FileId;
pub use identifiers::PairKey;
pub use identifiers::PartyAddress;
pub use identifiers::PatientId;
pub use identifiers::PaymentRef;
pub use identifiers::PermissionId;
pub use identifiers::ProviderId;
pub use identifiers::RequestId;
pub use identifiers::SessionId;
pub use payment::PaymentStatus;
pub use payment::PaymentTransaction;
pub use payment::ProviderTier;
pub use payment::QuoteSchedule;
pub use permission::AccessPermission;
pub use permission::PermissionError;
pub use session::AccessSession;
pub use session::AccessType;
pub use session::SessionError;
pub use session::SessionState;
pub use time::MILLIS_PER_DAY;
pub use time::MILLIS_PER_HOUR;
pub use time::MILLIS_PER_MINUTE;
pub use time::MILLIS_PER_SECOND;
pub use time::Timestamp;
