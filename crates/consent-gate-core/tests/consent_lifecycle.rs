// crates/consent-gate-core/tests/consent_lifecycle.rs
// ============================================================================
// Module: Consent Lifecycle Tests
// Description: Integration tests for the consent request state machine.
// Purpose: Validate create/approve/deny/revoke/expire transitions and the
//          single-pending invariant through the engine.
// Dependencies: consent-gate-core
// ============================================================================

//! ## Overview
//! Drives the consent lifecycle end to end through the engine with in-memory
//! backends and stub collaborators.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]

use std::collections::BTreeSet;

use consent_gate_core::AccessLevel;
use consent_gate_core::AnchorError;
use consent_gate_core::AnchorRef;
use consent_gate_core::AnchorService;
use consent_gate_core::ConsentEngine;
use consent_gate_core::ConsentRequest;
use consent_gate_core::ConsentScope;
use consent_gate_core::ConsentStatus;
use consent_gate_core::CreateRequestInput;
use consent_gate_core::DataCategory;
use consent_gate_core::EngineConfig;
use consent_gate_core::EngineError;
use consent_gate_core::ErrorKind;
use consent_gate_core::FileId;
use consent_gate_core::FileRecord;
use consent_gate_core::FileResolveError;
use consent_gate_core::FileResolver;
use consent_gate_core::InMemoryAuditSink;
use consent_gate_core::InMemoryStateStore;
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
use consent_gate_core::RequestId;
use consent_gate_core::Timestamp;
use consent_gate_core::Urgency;
use consent_gate_core::ActorRole;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Anchor stub that always succeeds with a deterministic reference.
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

/// Payment stub; never reached by lifecycle tests.
struct NoPayments;

impl PaymentService for NoPayments {
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

/// Resolver stub; never reached by lifecycle tests.
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

type TestEngine =
    ConsentEngine<OkAnchor, NoPayments, NoFiles, SilentNotifier, InMemoryAuditSink, InMemoryStateStore>;

fn engine() -> (TestEngine, InMemoryStateStore) {
    let store = InMemoryStateStore::new();
    let engine = ConsentEngine::new(
        store.clone(),
        OkAnchor,
        NoPayments,
        NoFiles,
        SilentNotifier,
        InMemoryAuditSink::new(),
        EngineConfig::default(),
    );
    (engine, store)
}

fn scope(level: AccessLevel, days: u32) -> ConsentScope {
    let mut categories = BTreeSet::new();
    categories.insert(DataCategory::new("lab_results"));
    categories.insert(DataCategory::new("imaging"));
    ConsentScope {
        access_level: level,
        categories,
        duration_days: days,
        purpose: "treatment planning".to_string(),
        justification: None,
    }
}

fn request_input(request_id: &str, urgency: Urgency) -> CreateRequestInput {
    let mut requested = scope(AccessLevel::Edit, 90);
    if urgency == Urgency::Emergency {
        requested.justification = Some("post-accident trauma care".to_string());
    }
    CreateRequestInput {
        request_id: RequestId::new(request_id),
        provider_id: ProviderId::new("prov-1"),
        provider_address: PartyAddress::new("GPROV1"),
        patient_id: PatientId::new("pat-1"),
        patient_address: PartyAddress::new("GPAT1"),
        scope: requested,
        urgency,
    }
}

fn at(millis: i64) -> Timestamp {
    Timestamp::from_unix_millis(millis)
}

// ============================================================================
// SECTION: Creation
// ============================================================================

#[test]
fn create_request_starts_pending_with_urgency_deadline() {
    let (engine, _) = engine();
    let now = at(1_000);
    let request = engine
        .create_request(request_input("req-1", Urgency::Urgent), now)
        .unwrap();
    assert_eq!(request.status, ConsentStatus::Pending);
    assert_eq!(
        request.respond_by,
        now.plus_millis(Urgency::Urgent.default_response_window_ms())
    );
    assert!(request.anchor.is_none());
    assert_eq!(engine.pending_anchor_jobs(), 1);
}

#[test]
fn second_pending_request_for_pair_is_rejected() {
    let (engine, _) = engine();
    engine
        .create_request(request_input("req-1", Urgency::Standard), at(0))
        .unwrap();
    let error = engine
        .create_request(request_input("req-2", Urgency::Standard), at(1))
        .unwrap_err();
    assert!(matches!(error, EngineError::DuplicatePendingRequest { .. }));
    assert_eq!(error.kind(), ErrorKind::Conflict);
}

#[test]
fn pending_allowed_again_after_denial() {
    let (engine, _) = engine();
    engine
        .create_request(request_input("req-1", Urgency::Standard), at(0))
        .unwrap();
    engine
        .deny(
            &RequestId::new("req-1"),
            &PatientId::new("pat-1"),
            "not comfortable",
            at(10),
        )
        .unwrap();
    let second = engine
        .create_request(request_input("req-2", Urgency::Standard), at(20))
        .unwrap();
    assert_eq!(second.status, ConsentStatus::Pending);
}

#[test]
fn overdue_pending_request_expires_lazily_on_new_request() {
    let (engine, store) = engine();
    engine
        .create_request(request_input("req-1", Urgency::Emergency), at(0))
        .unwrap();
    let later = at(Urgency::Emergency.default_response_window_ms() + 1);
    let second = engine
        .create_request(request_input("req-2", Urgency::Standard), later)
        .unwrap();
    assert_eq!(second.status, ConsentStatus::Pending);
    let first = consent_gate_core::ConsentStateStore::request(&store, &RequestId::new("req-1"))
        .unwrap()
        .unwrap();
    assert_eq!(first.status, ConsentStatus::Expired);
}

#[test]
fn configured_duration_cap_rejects_longer_grants() {
    let store = InMemoryStateStore::new();
    let config = EngineConfig {
        max_duration_days: 30,
        ..EngineConfig::default()
    };
    let engine = ConsentEngine::new(
        store,
        OkAnchor,
        NoPayments,
        NoFiles,
        SilentNotifier,
        InMemoryAuditSink::new(),
        config,
    );
    let error = engine
        .create_request(request_input("req-1", Urgency::Standard), at(0))
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Validation);
}

#[test]
fn invalid_scope_is_rejected_before_any_state_exists() {
    let (engine, store) = engine();
    let mut input = request_input("req-1", Urgency::Standard);
    input.scope.duration_days = 0;
    let error = engine.create_request(input, at(0)).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Validation);
    assert!(
        consent_gate_core::ConsentStateStore::request(&store, &RequestId::new("req-1"))
            .unwrap()
            .is_none()
    );
}

#[test]
fn emergency_without_justification_is_rejected() {
    let (engine, _) = engine();
    let mut input = request_input("req-1", Urgency::Emergency);
    input.scope.justification = None;
    let error = engine.create_request(input, at(0)).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Validation);
}

// ============================================================================
// SECTION: Approval and Denial
// ============================================================================

#[test]
fn approval_materializes_permission_and_transitions_request() {
    let (engine, _) = engine();
    let now = at(5_000);
    engine
        .create_request(request_input("req-1", Urgency::Standard), now)
        .unwrap();
    let outcome = engine
        .approve(
            &RequestId::new("req-1"),
            &PatientId::new("pat-1"),
            scope(AccessLevel::Edit, 90),
            now.plus_millis(1_000),
        )
        .unwrap();
    assert_eq!(outcome.request.status, ConsentStatus::Approved);
    assert!(outcome.permission.active);
    assert_eq!(outcome.permission.access_level, AccessLevel::Edit);
    assert_eq!(
        outcome.permission.expires_at,
        now.plus_millis(1_000).plus_days(90)
    );
}

#[test]
fn approval_accepts_narrowed_scope() {
    let (engine, _) = engine();
    engine
        .create_request(request_input("req-1", Urgency::Standard), at(0))
        .unwrap();
    let mut narrowed = scope(AccessLevel::View, 30);
    narrowed.categories.remove(&DataCategory::new("imaging"));
    let outcome = engine
        .approve(
            &RequestId::new("req-1"),
            &PatientId::new("pat-1"),
            narrowed,
            at(100),
        )
        .unwrap();
    assert_eq!(outcome.permission.access_level, AccessLevel::View);
    assert_eq!(outcome.permission.categories.len(), 1);
}

#[test]
fn approval_rejects_widened_scope() {
    let (engine, store) = engine();
    engine
        .create_request(request_input("req-1", Urgency::Standard), at(0))
        .unwrap();
    let mut widened = scope(AccessLevel::Edit, 90);
    widened.categories.insert(DataCategory::new("genomics"));
    let error = engine
        .approve(
            &RequestId::new("req-1"),
            &PatientId::new("pat-1"),
            widened,
            at(100),
        )
        .unwrap_err();
    assert!(matches!(error, EngineError::ScopeWidened { .. }));
    let stored = consent_gate_core::ConsentStateStore::request(&store, &RequestId::new("req-1"))
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ConsentStatus::Pending);
}

#[test]
fn approval_by_wrong_patient_is_rejected() {
    let (engine, _) = engine();
    engine
        .create_request(request_input("req-1", Urgency::Standard), at(0))
        .unwrap();
    let error = engine
        .approve(
            &RequestId::new("req-1"),
            &PatientId::new("pat-2"),
            scope(AccessLevel::View, 30),
            at(100),
        )
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Validation);
}

#[test]
fn approval_after_deadline_expires_the_request() {
    let (engine, store) = engine();
    engine
        .create_request(request_input("req-1", Urgency::Emergency), at(0))
        .unwrap();
    let late = at(Urgency::Emergency.default_response_window_ms() + 1);
    let error = engine
        .approve(
            &RequestId::new("req-1"),
            &PatientId::new("pat-1"),
            scope(AccessLevel::View, 30),
            late,
        )
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Expired);
    let stored = consent_gate_core::ConsentStateStore::request(&store, &RequestId::new("req-1"))
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ConsentStatus::Expired);
}

#[test]
fn approving_a_denied_request_is_wrong_state() {
    let (engine, _) = engine();
    engine
        .create_request(request_input("req-1", Urgency::Standard), at(0))
        .unwrap();
    engine
        .deny(
            &RequestId::new("req-1"),
            &PatientId::new("pat-1"),
            "no",
            at(10),
        )
        .unwrap();
    let error = engine
        .approve(
            &RequestId::new("req-1"),
            &PatientId::new("pat-1"),
            scope(AccessLevel::View, 30),
            at(20),
        )
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::WrongState);
}

#[test]
fn unknown_request_is_not_found() {
    let (engine, _) = engine();
    let error = engine
        .deny(
            &RequestId::new("missing"),
            &PatientId::new("pat-1"),
            "no",
            at(0),
        )
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotFound);
}

// ============================================================================
// SECTION: Revocation
// ============================================================================

#[test]
fn revocation_deactivates_the_permission() {
    let (engine, store) = engine();
    engine
        .create_request(request_input("req-1", Urgency::Standard), at(0))
        .unwrap();
    let outcome = engine
        .approve(
            &RequestId::new("req-1"),
            &PatientId::new("pat-1"),
            scope(AccessLevel::Edit, 90),
            at(100),
        )
        .unwrap();
    let revoked = engine
        .revoke(
            &RequestId::new("req-1"),
            &PatientId::new("pat-1"),
            "changed my mind",
            at(200),
        )
        .unwrap();
    assert_eq!(revoked.status, ConsentStatus::Revoked);
    let permission = consent_gate_core::ConsentStateStore::permission(
        &store,
        &outcome.permission.permission_id,
    )
    .unwrap()
    .unwrap();
    assert!(!permission.active);
}

#[test]
fn revoking_a_pending_request_is_wrong_state() {
    let (engine, _) = engine();
    engine
        .create_request(request_input("req-1", Urgency::Standard), at(0))
        .unwrap();
    let error = engine
        .revoke(
            &RequestId::new("req-1"),
            &PatientId::new("pat-1"),
            "too soon",
            at(10),
        )
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::WrongState);
}

// ============================================================================
// SECTION: Anchoring
// ============================================================================

#[test]
fn reconcile_stamps_anchor_references_after_commit() {
    let (engine, store) = engine();
    engine
        .create_request(request_input("req-1", Urgency::Standard), at(0))
        .unwrap();
    let report = engine.reconcile_anchors().unwrap();
    assert_eq!(report.anchored, 1);
    assert_eq!(engine.pending_anchor_jobs(), 0);
    let stored = consent_gate_core::ConsentStateStore::request(&store, &RequestId::new("req-1"))
        .unwrap()
        .unwrap();
    assert_eq!(stored.anchor, Some(AnchorRef::new("anchor-req-1")));
}
