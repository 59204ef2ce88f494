// crates/consent-gate-core/src/lib.rs
// ============================================================================
// Module: Consent Gate Core Library
// Description: Public API surface for the Consent Gate core.
// Purpose: Expose core types, interfaces, and runtime helpers.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Consent Gate core provides patient-controlled consent tracking and gated
//! file access for a health-data marketplace. It is backend-agnostic and
//! integrates through explicit interfaces: anchoring, payment, file
//! resolution, notification, audit, and state storage are all collaborator
//! seams behind traits.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::AnchorError;
pub use interfaces::AnchorService;
pub use interfaces::AuditSink;
pub use interfaces::AuditSinkError;
pub use interfaces::ConsentStateStore;
pub use interfaces::FileRecord;
pub use interfaces::FileResolveError;
pub use interfaces::FileResolver;
pub use interfaces::Notice;
pub use interfaces::NotificationSink;
pub use interfaces::NotifyError;
pub use interfaces::PaymentReceipt;
pub use interfaces::PaymentService;
pub use interfaces::PaymentServiceError;
pub use interfaces::StateStoreError;
pub use runtime::AnchorReport;
pub use runtime::ApprovalOutcome;
pub use runtime::Clock;
pub use runtime::ConsentEngine;
pub use runtime::CreateRequestInput;
pub use runtime::DegradationKind;
pub use runtime::EngineConfig;
pub use runtime::EngineError;
pub use runtime::EngineMetrics;
pub use runtime::ErrorKind;
pub use runtime::FileAccess;
pub use runtime::InMemoryAuditSink;
pub use runtime::InMemoryStateStore;
pub use runtime::NoopMetrics;
pub use runtime::PaymentOutcome;
pub use runtime::SessionStart;
pub use runtime::StartSessionInput;
pub use runtime::SweepReport;
pub use runtime::SystemClock;
