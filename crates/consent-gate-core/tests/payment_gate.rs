// crates/consent-gate-core/tests/payment_gate.rs
// ============================================================================
// Module: Payment Gate Tests
// Description: Integration tests for quoting, payment submission, and
//              confirmation-driven session activation.
// Purpose: Validate that paid sessions stay inert until the payment confirms
//          and that confirmation re-validates the permission.
// Dependencies: consent-gate-core
// ============================================================================

//! ## Overview
//! Drives the payment gate with a controllable ledger stub whose verification
//! answers are set per test.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use consent_gate_core::AccessLevel;
use consent_gate_core::AccessType;
use consent_gate_core::ActorRole;
use consent_gate_core::AnchorError;
use consent_gate_core::AnchorRef;
use consent_gate_core::AnchorService;
use consent_gate_core::AuditEventKind;
use consent_gate_core::AuditFilter;
use consent_gate_core::ConsentEngine;
use consent_gate_core::ConsentRequest;
use consent_gate_core::ConsentScope;
use consent_gate_core::ConsentStateStore;
use consent_gate_core::CreateRequestInput;
use consent_gate_core::DataCategory;
use consent_gate_core::EngineConfig;
use consent_gate_core::EngineError;
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
use consent_gate_core::QuoteSchedule;
use consent_gate_core::RequestId;
use consent_gate_core::SessionId;
use consent_gate_core::SessionState;
use consent_gate_core::StartSessionInput;
use consent_gate_core::Timestamp;
use consent_gate_core::Urgency;
use consent_gate_core::core::payment::DEFAULT_STANDARD_FEE;
use consent_gate_core::core::payment::DEFAULT_VERIFIED_FEE;
use consent_gate_core::core::payment::EDIT_FEE_PERCENT;

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

/// Ledger stub with scripted verification answers.
#[derive(Clone, Default)]
struct ScriptedLedger {
    /// External reference → scripted status.
    answers: Arc<Mutex<BTreeMap<String, PaymentStatus>>>,
    /// Submitted amounts by reference, for assertions.
    submitted: Arc<Mutex<BTreeMap<String, u64>>>,
    /// Confirm submissions immediately instead of leaving them pending.
    instant: Arc<Mutex<bool>>,
}

impl ScriptedLedger {
    fn confirm_on_submit(&self) {
        *self.instant.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    fn script(&self, external_ref: &str, status: PaymentStatus) {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(external_ref.to_string(), status);
    }

    fn submitted_amount(&self, external_ref: &str) -> Option<u64> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(external_ref)
            .copied()
    }
}

impl PaymentService for ScriptedLedger {
    fn submit_payment(
        &self,
        _payer: &ProviderId,
        _payee: &PatientId,
        amount: u64,
        reference: &PaymentRef,
    ) -> Result<PaymentReceipt, PaymentServiceError> {
        let external_ref = format!("ext-{reference}");
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(external_ref.clone(), amount);
        let status = if *self.instant.lock().unwrap_or_else(PoisonError::into_inner) {
            PaymentStatus::Confirmed
        } else {
            PaymentStatus::Pending
        };
        Ok(PaymentReceipt {
            status,
            external_ref,
        })
    }

    fn verify_payment(&self, external_ref: &str) -> Result<PaymentStatus, PaymentServiceError> {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(external_ref)
            .copied()
            .ok_or_else(|| PaymentServiceError::UnknownReference(external_ref.to_string()))
    }
}

/// Single-file catalog in the granted category.
struct LabCatalog;

impl FileResolver for LabCatalog {
    fn resolve(&self, file_id: &FileId) -> Result<FileRecord, FileResolveError> {
        if file_id.as_str() == "file-lab" {
            Ok(FileRecord {
                category: DataCategory::new("lab_results"),
                handle_ref: "cid-lab".to_string(),
            })
        } else {
            Err(FileResolveError::NotFound(file_id.to_string()))
        }
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
    ScriptedLedger,
    LabCatalog,
    SilentNotifier,
    InMemoryAuditSink,
    InMemoryStateStore,
>;

fn engine() -> (TestEngine, InMemoryStateStore, ScriptedLedger) {
    let store = InMemoryStateStore::new();
    let ledger = ScriptedLedger::default();
    let engine = ConsentEngine::new(
        store.clone(),
        OkAnchor,
        ledger.clone(),
        LabCatalog,
        SilentNotifier,
        InMemoryAuditSink::new(),
        EngineConfig::default(),
    );
    (engine, store, ledger)
}

fn scope(level: AccessLevel) -> ConsentScope {
    let mut categories = BTreeSet::new();
    categories.insert(DataCategory::new("lab_results"));
    ConsentScope {
        access_level: level,
        categories,
        duration_days: 30,
        purpose: "specialist referral".to_string(),
        justification: None,
    }
}

fn at(millis: i64) -> Timestamp {
    Timestamp::from_unix_millis(millis)
}

fn approved_consent(engine: &TestEngine, level: AccessLevel) -> Timestamp {
    engine
        .create_request(
            CreateRequestInput {
                request_id: RequestId::new("req-1"),
                provider_id: ProviderId::new("prov-1"),
                provider_address: PartyAddress::new("GPROV1"),
                patient_id: PatientId::new("pat-1"),
                patient_address: PartyAddress::new("GPAT1"),
                scope: scope(level),
                urgency: Urgency::Standard,
            },
            at(1_000),
        )
        .unwrap();
    let decided = at(2_000);
    engine
        .approve(
            &RequestId::new("req-1"),
            &PatientId::new("pat-1"),
            scope(level),
            decided,
        )
        .unwrap();
    decided
}

fn start_input(tier: ProviderTier) -> StartSessionInput {
    StartSessionInput {
        session_id: SessionId::new("sess-1"),
        provider_id: ProviderId::new("prov-1"),
        patient_id: PatientId::new("pat-1"),
        tier,
    }
}

// ============================================================================
// SECTION: Quoting
// ============================================================================

#[test]
fn quote_schedule_prices_tiers_and_levels() {
    let quotes = QuoteSchedule::default();
    assert_eq!(
        quotes.quote(ProviderTier::Standard, AccessLevel::View),
        DEFAULT_STANDARD_FEE
    );
    assert_eq!(
        quotes.quote(ProviderTier::Verified, AccessLevel::View),
        DEFAULT_VERIFIED_FEE
    );
    assert_eq!(quotes.quote(ProviderTier::Staked, AccessLevel::Full), 0);
    assert_eq!(
        quotes.quote(ProviderTier::Standard, AccessLevel::Edit),
        DEFAULT_STANDARD_FEE * EDIT_FEE_PERCENT / 100
    );
    assert_eq!(
        quotes.quote(ProviderTier::Verified, AccessLevel::Full),
        DEFAULT_VERIFIED_FEE * EDIT_FEE_PERCENT / 100
    );
}

#[test]
fn standard_tier_session_submits_the_quoted_amount() {
    let (engine, _, ledger) = engine();
    let granted = approved_consent(&engine, AccessLevel::Edit);
    let start = engine
        .start_session(start_input(ProviderTier::Standard), granted.plus_millis(10))
        .unwrap();
    let payment = start.payment.unwrap();
    assert_eq!(payment.amount, DEFAULT_STANDARD_FEE * EDIT_FEE_PERCENT / 100);
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(
        ledger.submitted_amount("ext-pay-sess-1"),
        Some(payment.amount)
    );
    assert_eq!(start.session.state, SessionState::PendingPayment);
}

// ============================================================================
// SECTION: Payment-Gated Activation
// ============================================================================

#[test]
fn pending_payment_session_cannot_access_files() {
    let (engine, _, _) = engine();
    let granted = approved_consent(&engine, AccessLevel::View);
    engine
        .start_session(start_input(ProviderTier::Verified), granted.plus_millis(10))
        .unwrap();
    let error = engine
        .access_file(
            &SessionId::new("sess-1"),
            &FileId::new("file-lab"),
            AccessType::View,
            granted.plus_millis(20),
        )
        .unwrap_err();
    assert!(matches!(error, EngineError::PaymentRequired { .. }));
}

#[test]
fn confirmed_payment_activates_the_session() {
    let (engine, _, ledger) = engine();
    let granted = approved_consent(&engine, AccessLevel::View);
    let start = engine
        .start_session(start_input(ProviderTier::Verified), granted.plus_millis(10))
        .unwrap();
    let payment = start.payment.unwrap();
    ledger.script("ext-pay-sess-1", PaymentStatus::Confirmed);
    let outcome = engine
        .confirm_payment(&payment.payment_ref, granted.plus_millis(20))
        .unwrap();
    assert_eq!(outcome.payment.status, PaymentStatus::Confirmed);
    assert_eq!(outcome.session.unwrap().state, SessionState::Active);
    let access = engine
        .access_file(
            &SessionId::new("sess-1"),
            &FileId::new("file-lab"),
            AccessType::View,
            granted.plus_millis(30),
        )
        .unwrap();
    assert_eq!(access.handle_ref, "cid-lab");
}

#[test]
fn instantly_confirmed_submission_audits_the_confirmation() {
    let (engine, _, ledger) = engine();
    let granted = approved_consent(&engine, AccessLevel::View);
    ledger.confirm_on_submit();
    let start = engine
        .start_session(start_input(ProviderTier::Verified), granted.plus_millis(10))
        .unwrap();
    assert_eq!(start.session.state, SessionState::Active);
    let payment = start.payment.unwrap();
    assert_eq!(payment.status, PaymentStatus::Confirmed);
    let confirmed = engine
        .audit_query(&AuditFilter {
            kind: Some(AuditEventKind::PaymentConfirmed),
            ..AuditFilter::default()
        })
        .unwrap();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].target, payment.payment_ref.to_string());
}

#[test]
fn unconfirmed_payment_leaves_the_session_pending() {
    let (engine, store, ledger) = engine();
    let granted = approved_consent(&engine, AccessLevel::View);
    let start = engine
        .start_session(start_input(ProviderTier::Verified), granted.plus_millis(10))
        .unwrap();
    ledger.script("ext-pay-sess-1", PaymentStatus::Pending);
    let outcome = engine
        .confirm_payment(&start.payment.unwrap().payment_ref, granted.plus_millis(20))
        .unwrap();
    assert_eq!(outcome.payment.status, PaymentStatus::Pending);
    assert!(outcome.session.is_none());
    let session = store.session(&SessionId::new("sess-1")).unwrap().unwrap();
    assert_eq!(session.state, SessionState::PendingPayment);
}

#[test]
fn failed_payment_is_recorded_without_activation() {
    let (engine, store, ledger) = engine();
    let granted = approved_consent(&engine, AccessLevel::View);
    let start = engine
        .start_session(start_input(ProviderTier::Verified), granted.plus_millis(10))
        .unwrap();
    ledger.script("ext-pay-sess-1", PaymentStatus::Failed);
    let outcome = engine
        .confirm_payment(&start.payment.unwrap().payment_ref, granted.plus_millis(20))
        .unwrap();
    assert_eq!(outcome.payment.status, PaymentStatus::Failed);
    assert!(outcome.session.is_none());
    let session = store.session(&SessionId::new("sess-1")).unwrap().unwrap();
    assert_eq!(session.state, SessionState::PendingPayment);
}

#[test]
fn confirmation_is_idempotent() {
    let (engine, _, ledger) = engine();
    let granted = approved_consent(&engine, AccessLevel::View);
    let start = engine
        .start_session(start_input(ProviderTier::Verified), granted.plus_millis(10))
        .unwrap();
    let reference = start.payment.unwrap().payment_ref;
    ledger.script("ext-pay-sess-1", PaymentStatus::Confirmed);
    engine
        .confirm_payment(&reference, granted.plus_millis(20))
        .unwrap();
    let again = engine
        .confirm_payment(&reference, granted.plus_millis(30))
        .unwrap();
    assert_eq!(again.payment.status, PaymentStatus::Confirmed);
    assert_eq!(again.session.unwrap().state, SessionState::Active);
}

#[test]
fn confirmation_revalidates_the_permission() {
    let (engine, store, ledger) = engine();
    let granted = approved_consent(&engine, AccessLevel::View);
    let start = engine
        .start_session(start_input(ProviderTier::Verified), granted.plus_millis(10))
        .unwrap();
    let reference = start.payment.unwrap().payment_ref;
    ledger.script("ext-pay-sess-1", PaymentStatus::Confirmed);
    let lapsed = granted.plus_millis(31 * MILLIS_PER_DAY);
    let error = engine.confirm_payment(&reference, lapsed).unwrap_err();
    assert!(matches!(error, EngineError::NoValidPermission { .. }));
    let session = store.session(&SessionId::new("sess-1")).unwrap().unwrap();
    assert_eq!(session.state, SessionState::EndedByRevocation);
}

#[test]
fn unknown_payment_reference_is_rejected() {
    let (engine, _, _) = engine();
    let error = engine
        .confirm_payment(&PaymentRef::new("pay-missing"), at(0))
        .unwrap_err();
    assert!(matches!(error, EngineError::PaymentNotFound { .. }));
}
