// crates/consent-gate-core/tests/expiry_sweep.rs
// ============================================================================
// Module: Expiry Sweep Tests
// Description: Integration tests for the idempotent expiry sweep.
// Purpose: Validate overdue-request expiry, the permission lapse cascade,
//          and abandoned-session cleanup.
// Dependencies: consent-gate-core
// ============================================================================

//! ## Overview
//! Drives the sweep at controlled instants and asserts each pass transitions
//! every eligible record exactly once.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]

use std::collections::BTreeSet;

use consent_gate_core::AccessLevel;
use consent_gate_core::ActorRole;
use consent_gate_core::AnchorError;
use consent_gate_core::AnchorRef;
use consent_gate_core::AnchorService;
use consent_gate_core::ConsentEngine;
use consent_gate_core::ConsentRequest;
use consent_gate_core::ConsentScope;
use consent_gate_core::ConsentStateStore;
use consent_gate_core::ConsentStatus;
use consent_gate_core::CreateRequestInput;
use consent_gate_core::DataCategory;
use consent_gate_core::EngineConfig;
use consent_gate_core::FileId;
use consent_gate_core::FileRecord;
use consent_gate_core::FileResolveError;
use consent_gate_core::FileResolver;
use consent_gate_core::InMemoryAuditSink;
use consent_gate_core::InMemoryStateStore;
use consent_gate_core::MILLIS_PER_DAY;
use consent_gate_core::Notice;
use consent_gate_core::NotificationSink;
use consent_gate_core::NotifyError;
use consent_gate_core::PartyAddress;
use consent_gate_core::PatientId;
use consent_gate_core::PaymentReceipt;
use consent_gate_core::PaymentRef;
use consent_gate_core::PaymentService;
use consent_gate_core::PaymentServiceError;
use consent_gate_core::PaymentStatus;
use consent_gate_core::ProviderId;
use consent_gate_core::ProviderTier;
use consent_gate_core::RequestId;
use consent_gate_core::SessionId;
use consent_gate_core::SessionState;
use consent_gate_core::StartSessionInput;
use consent_gate_core::Timestamp;
use consent_gate_core::Urgency;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Anchor stub that always succeeds.
struct OkAnchor;

impl AnchorService for OkAnchor {
    fn anchor_consent(&self, request: &ConsentRequest) -> Result<AnchorRef, AnchorError> {
        Ok(AnchorRef::new(format!("anchor-{}", request.request_id)))
    }

    fn anchor_approval(&self, request_id: &RequestId) -> Result<AnchorRef, AnchorError> {
        Ok(AnchorRef::new(format!("anchor-approval-{request_id}")))
    }

    fn anchor_revocation(
        &self,
        request_id: &RequestId,
        _reason: &str,
    ) -> Result<AnchorRef, AnchorError> {
        Ok(AnchorRef::new(format!("anchor-revocation-{request_id}")))
    }
}

/// Ledger stub that accepts submissions and reports them pending forever.
struct ForeverPending;

impl PaymentService for ForeverPending {
    fn submit_payment(
        &self,
        _payer: &ProviderId,
        _payee: &PatientId,
        _amount: u64,
        reference: &PaymentRef,
    ) -> Result<PaymentReceipt, PaymentServiceError> {
        Ok(PaymentReceipt {
            status: PaymentStatus::Pending,
            external_ref: format!("ext-{reference}"),
        })
    }

    fn verify_payment(&self, _external_ref: &str) -> Result<PaymentStatus, PaymentServiceError> {
        Ok(PaymentStatus::Pending)
    }
}

/// Resolver stub; sweeps never resolve files.
struct NoFiles;

impl FileResolver for NoFiles {
    fn resolve(&self, file_id: &FileId) -> Result<FileRecord, FileResolveError> {
        Err(FileResolveError::NotFound(file_id.to_string()))
    }
}

/// Notification stub that swallows all deliveries.
struct SilentNotifier;

impl NotificationSink for SilentNotifier {
    fn deliver(
        &self,
        _recipient: &str,
        _role: ActorRole,
        _notice: &Notice,
    ) -> Result<(), NotifyError> {
        Ok(())
    }
}

type TestEngine = ConsentEngine<
    OkAnchor,
    ForeverPending,
    NoFiles,
    SilentNotifier,
    InMemoryAuditSink,
    InMemoryStateStore,
>;

fn engine() -> (TestEngine, InMemoryStateStore) {
    let store = InMemoryStateStore::new();
    let engine = ConsentEngine::new(
        store.clone(),
        OkAnchor,
        ForeverPending,
        NoFiles,
        SilentNotifier,
        InMemoryAuditSink::new(),
        EngineConfig::default(),
    );
    (engine, store)
}

fn scope() -> ConsentScope {
    let mut categories = BTreeSet::new();
    categories.insert(DataCategory::new("lab_results"));
    ConsentScope {
        access_level: AccessLevel::View,
        categories,
        duration_days: 30,
        purpose: "follow-up".to_string(),
        justification: None,
    }
}

fn at(millis: i64) -> Timestamp {
    Timestamp::from_unix_millis(millis)
}

fn request_input(request_id: &str, provider: &str, patient: &str) -> CreateRequestInput {
    CreateRequestInput {
        request_id: RequestId::new(request_id),
        provider_id: ProviderId::new(provider),
        provider_address: PartyAddress::new(format!("G{provider}")),
        patient_id: PatientId::new(patient),
        patient_address: PartyAddress::new(format!("G{patient}")),
        scope: scope(),
        urgency: Urgency::Standard,
    }
}

// ============================================================================
// SECTION: Pending Request Expiry
// ============================================================================

#[test]
fn sweep_expires_overdue_pending_requests_only() {
    let (engine, store) = engine();
    engine
        .create_request(request_input("req-old", "prov-1", "pat-1"), at(0))
        .unwrap();
    engine
        .create_request(request_input("req-new", "prov-2", "pat-2"), at(6 * MILLIS_PER_DAY))
        .unwrap();

    let report = engine.sweep_expired(at(8 * MILLIS_PER_DAY)).unwrap();
    assert_eq!(report.requests_expired, 1);

    let old = store.request(&RequestId::new("req-old")).unwrap().unwrap();
    assert_eq!(old.status, ConsentStatus::Expired);
    let fresh = store.request(&RequestId::new("req-new")).unwrap().unwrap();
    assert_eq!(fresh.status, ConsentStatus::Pending);
}

#[test]
fn sweep_is_idempotent() {
    let (engine, _) = engine();
    engine
        .create_request(request_input("req-1", "prov-1", "pat-1"), at(0))
        .unwrap();
    let first = engine.sweep_expired(at(8 * MILLIS_PER_DAY)).unwrap();
    assert_eq!(first.requests_expired, 1);
    let second = engine.sweep_expired(at(8 * MILLIS_PER_DAY)).unwrap();
    assert_eq!(second.total(), 0);
}

// ============================================================================
// SECTION: Permission Lapse Cascade
// ============================================================================

#[test]
fn sweep_expires_lapsed_grants_with_full_cascade() {
    let (engine, store) = engine();
    engine
        .create_request(request_input("req-1", "prov-1", "pat-1"), at(0))
        .unwrap();
    engine
        .approve(
            &RequestId::new("req-1"),
            &PatientId::new("pat-1"),
            scope(),
            at(1_000),
        )
        .unwrap();
    engine
        .start_session(
            StartSessionInput {
                session_id: SessionId::new("sess-1"),
                provider_id: ProviderId::new("prov-1"),
                patient_id: PatientId::new("pat-1"),
                tier: ProviderTier::Staked,
            },
            at(2_000),
        )
        .unwrap();

    let report = engine.sweep_expired(at(31 * MILLIS_PER_DAY)).unwrap();
    assert_eq!(report.grants_expired, 1);
    assert_eq!(report.permissions_deactivated, 1);
    assert_eq!(report.sessions_force_closed, 1);

    let request = store.request(&RequestId::new("req-1")).unwrap().unwrap();
    assert_eq!(request.status, ConsentStatus::Expired);
    let permission = store
        .permission_for_request(&RequestId::new("req-1"))
        .unwrap()
        .unwrap();
    assert!(!permission.active);
    let session = store.session(&SessionId::new("sess-1")).unwrap().unwrap();
    assert_eq!(session.state, SessionState::EndedByRevocation);
}

#[test]
fn sweep_leaves_unexpired_grants_alone() {
    let (engine, store) = engine();
    engine
        .create_request(request_input("req-1", "prov-1", "pat-1"), at(0))
        .unwrap();
    engine
        .approve(
            &RequestId::new("req-1"),
            &PatientId::new("pat-1"),
            scope(),
            at(1_000),
        )
        .unwrap();
    let report = engine.sweep_expired(at(10 * MILLIS_PER_DAY)).unwrap();
    assert_eq!(report.total(), 0);
    let request = store.request(&RequestId::new("req-1")).unwrap().unwrap();
    assert_eq!(request.status, ConsentStatus::Approved);
}

// ============================================================================
// SECTION: Abandoned Sessions
// ============================================================================

#[test]
fn sweep_ends_abandoned_pending_payment_sessions() {
    let (engine, store) = engine();
    engine
        .create_request(request_input("req-1", "prov-1", "pat-1"), at(0))
        .unwrap();
    engine
        .approve(
            &RequestId::new("req-1"),
            &PatientId::new("pat-1"),
            scope(),
            at(1_000),
        )
        .unwrap();
    engine
        .start_session(
            StartSessionInput {
                session_id: SessionId::new("sess-1"),
                provider_id: ProviderId::new("prov-1"),
                patient_id: PatientId::new("pat-1"),
                tier: ProviderTier::Standard,
            },
            at(2_000),
        )
        .unwrap();

    let window = engine.config().payment_pending_window_ms;
    let early = engine.sweep_expired(at(2_000 + window - 1)).unwrap();
    assert_eq!(early.sessions_abandoned, 0);

    let late = engine.sweep_expired(at(2_000 + window + 1)).unwrap();
    assert_eq!(late.sessions_abandoned, 1);
    let session = store.session(&SessionId::new("sess-1")).unwrap().unwrap();
    assert_eq!(session.state, SessionState::Ended);
}
