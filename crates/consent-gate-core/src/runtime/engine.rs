// crates/consent-gate-core/src/runtime/engine.rs
// ============================================================================
// Module: Consent Engine
// Description: Canonical execution path for consent, sessions, payment, and sweeps.
// Purpose: Enforce the consent state machine with per-pair serialization and
//          audit-everything semantics.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The consent engine is the single canonical execution path for Consent
//! Gate. All host surfaces must call into these methods to preserve the
//! lifecycle invariants and auditability. Operations on the same
//! (provider, patient) pair are serialized through [`PairLocks`]; unrelated
//! pairs proceed concurrently. State transitions commit before anchoring;
//! the anchor outbox reconciles externally afterwards.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::AccessPermission;
use crate::core::AccessSession;
use crate::core::AccessType;
use crate::core::ActorRole;
use crate::core::AuditEntry;
use crate::core::AuditEventKind;
use crate::core::AuditFilter;
use crate::core::ConsentError;
use crate::core::ConsentRequest;
use crate::core::ConsentScope;
use crate::core::ConsentStatus;
use crate::core::FileId;
use crate::core::MAX_DURATION_DAYS;
use crate::core::PairKey;
use crate::core::PartyAddress;
use crate::core::PatientId;
use crate::core::PaymentRef;
use crate::core::PaymentStatus;
use crate::core::PaymentTransaction;
use crate::core::PermissionError;
use crate::core::ProviderId;
use crate::core::ProviderTier;
use crate::core::QuoteSchedule;
use crate::core::RequestId;
use crate::core::SessionId;
use crate::core::SessionState;
use crate::core::TargetKind;
use crate::core::Timestamp;
use crate::core::Urgency;
use crate::interfaces::AnchorService;
use crate::interfaces::AuditSink;
use crate::interfaces::ConsentStateStore;
use crate::interfaces::FileResolver;
use crate::interfaces::Notice;
use crate::interfaces::NotificationSink;
use crate::interfaces::PaymentService;
use crate::interfaces::PaymentServiceError;
use crate::interfaces::StateStoreError;
use crate::runtime::anchor::AnchorEvent;
use crate::runtime::anchor::AnchorJob;
use crate::runtime::anchor::AnchorOutbox;
use crate::runtime::anchor::AnchorReport;
use crate::runtime::error::EngineError;
use crate::runtime::locks::PairLocks;
use crate::runtime::sweep::SweepReport;
use crate::runtime::sweep::payment_abandoned;
use crate::runtime::sweep::pending_overdue;
use crate::runtime::sweep::permission_lapsed;
use crate::runtime::telemetry::DegradationKind;
use crate::runtime::telemetry::EngineMetrics;
use crate::runtime::telemetry::NoopMetrics;

// ============================================================================
// SECTION: Engine Configuration
// ============================================================================

/// Default abandonment window for unconfirmed payments (15 minutes).
pub const DEFAULT_PAYMENT_PENDING_WINDOW_MS: i64 = 15 * 60 * 1_000;
/// Default anchor attempt budget (one call plus one retry).
pub const DEFAULT_ANCHOR_MAX_ATTEMPTS: u32 = 2;

/// Configuration for the consent engine.
///
/// # Invariants
/// - Windows are positive milliseconds; zero disables nothing, it merely
///   makes the condition immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Response window for standard urgency in milliseconds.
    pub standard_response_window_ms: i64,
    /// Response window for urgent requests in milliseconds.
    pub urgent_response_window_ms: i64,
    /// Response window for emergency requests in milliseconds.
    pub emergency_response_window_ms: i64,
    /// Window after which an unconfirmed pending-payment session is abandoned.
    pub payment_pending_window_ms: i64,
    /// Attempt budget per anchor job, including the first call.
    pub anchor_max_attempts: u32,
    /// Maximum grant duration accepted on new requests, in days.
    pub max_duration_days: u32,
    /// Fee schedule for the payment gate.
    pub quotes: QuoteSchedule,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            standard_response_window_ms: Urgency::Standard.default_response_window_ms(),
            urgent_response_window_ms: Urgency::Urgent.default_response_window_ms(),
            emergency_response_window_ms: Urgency::Emergency.default_response_window_ms(),
            payment_pending_window_ms: DEFAULT_PAYMENT_PENDING_WINDOW_MS,
            anchor_max_attempts: DEFAULT_ANCHOR_MAX_ATTEMPTS,
            max_duration_days: MAX_DURATION_DAYS,
            quotes: QuoteSchedule::default(),
        }
    }
}

impl EngineConfig {
    /// Returns the configured response window for an urgency class.
    #[must_use]
    pub const fn response_window_ms(&self, urgency: Urgency) -> i64 {
        match urgency {
            Urgency::Standard => self.standard_response_window_ms,
            Urgency::Urgent => self.urgent_response_window_ms,
            Urgency::Emergency => self.emergency_response_window_ms,
        }
    }
}

// ============================================================================
// SECTION: Operation Inputs and Outputs
// ============================================================================

/// Input for creating a consent request.
///
/// # Invariants
/// - `request_id` is allocated by the host and unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequestInput {
    /// Host-allocated request identifier.
    pub request_id: RequestId,
    /// Requesting provider.
    pub provider_id: ProviderId,
    /// Requesting provider's verifiable address.
    pub provider_address: PartyAddress,
    /// Target patient.
    pub patient_id: PatientId,
    /// Target patient's verifiable address.
    pub patient_address: PartyAddress,
    /// Requested scope.
    pub scope: ConsentScope,
    /// Urgency class.
    pub urgency: Urgency,
}

/// Input for starting an access session.
///
/// # Invariants
/// - `session_id` is allocated by the host and unique.
/// - `tier` is the provider's tier as read at session start; the quote is
///   fixed from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSessionInput {
    /// Host-allocated session identifier.
    pub session_id: SessionId,
    /// Provider opening the session.
    pub provider_id: ProviderId,
    /// Patient whose data is in scope.
    pub patient_id: PatientId,
    /// Provider tier at session start.
    pub tier: ProviderTier,
}

/// Result of an approval: the updated request and its derived permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    /// The approved request.
    pub request: ConsentRequest,
    /// The materialized permission.
    pub permission: AccessPermission,
}

/// Result of starting a session.
///
/// # Invariants
/// - `payment` is `Some` iff the quote was non-zero; the session is usable
///   only once that payment confirms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStart {
    /// The created session.
    pub session: AccessSession,
    /// The payment obligation gating the session, when one exists.
    pub payment: Option<PaymentTransaction>,
}

/// Result of a payment confirmation attempt.
///
/// # Invariants
/// - `session` is `Some` when the bound session was examined (confirmed
///   path); `None` when the payment stayed pending or failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOutcome {
    /// The payment record after the attempt.
    pub payment: PaymentTransaction,
    /// The bound session after the attempt, when activation was examined.
    pub session: Option<AccessSession>,
}

/// Result of a permitted file access.
///
/// # Invariants
/// - `handle_ref` is the opaque storage handle; decryption is the caller's
///   concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAccess {
    /// Opaque content handle in the storage network.
    pub handle_ref: String,
    /// Permission access counter after this access.
    pub access_count: u64,
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Consent engine enforcing the gated-access state machine.
pub struct ConsentEngine<A, P, F, N, U, S> {
    /// Anchoring collaborator.
    anchor: A,
    /// Payment collaborator.
    payments: P,
    /// File metadata collaborator.
    files: F,
    /// Notification collaborator.
    notifier: N,
    /// Audit sink.
    audit: U,
    /// Consent state store.
    store: S,
    /// Degradation metrics sink.
    metrics: Box<dyn EngineMetrics>,
    /// Pending anchor jobs.
    outbox: AnchorOutbox,
    /// Per-pair mutual exclusion.
    locks: PairLocks,
    /// Engine configuration.
    config: EngineConfig,
}

impl<A, P, F, N, U, S> ConsentEngine<A, P, F, N, U, S>
where
    A: AnchorService,
    P: PaymentService,
    F: FileResolver,
    N: NotificationSink,
    U: AuditSink,
    S: ConsentStateStore,
{
    /// Creates a new engine over the collaborator seams.
    #[must_use]
    pub fn new(store: S, anchor: A, payments: P, files: F, notifier: N, audit: U,
        config: EngineConfig) -> Self {
        Self {
            anchor,
            payments,
            files,
            notifier,
            audit,
            store,
            metrics: Box::new(NoopMetrics),
            outbox: AnchorOutbox::new(),
            locks: PairLocks::new(),
            config,
        }
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Box<dyn EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the number of anchor jobs awaiting reconciliation.
    #[must_use]
    pub fn pending_anchor_jobs(&self) -> usize {
        self.outbox.len()
    }

    // ------------------------------------------------------------------
    // Consent ledger operations
    // ------------------------------------------------------------------

    /// Creates a pending consent request for a (provider, patient) pair.
    ///
    /// Validation happens before any state mutation. The single-pending
    /// invariant is enforced under the pair lock and again by the store.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for invalid scope or addresses,
    /// [`EngineError::DuplicatePendingRequest`] when a pending request
    /// already exists for the pair, or a store variant on storage failure.
    pub fn create_request(
        &self,
        input: CreateRequestInput,
        now: Timestamp,
    ) -> Result<ConsentRequest, EngineError> {
        input.scope.validate(input.urgency)?;
        if input.scope.duration_days > self.config.max_duration_days {
            return Err(EngineError::Validation(format!(
                "duration {} days exceeds configured maximum {}",
                input.scope.duration_days, self.config.max_duration_days
            )));
        }
        if input.provider_address.is_empty() {
            return Err(EngineError::Validation(
                "provider address must not be empty".to_string(),
            ));
        }
        if input.patient_address.is_empty() {
            return Err(EngineError::Validation(
                "patient address must not be empty".to_string(),
            ));
        }

        let pair = PairKey::new(input.provider_id.clone(), input.patient_id.clone());
        let lock = self.locks.handle(&pair);
        let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        // An overdue pending request expires lazily here, so it never blocks
        // a fresh request until the sweep happens to run.
        if let Some(pending) = self.store.pending_request_for(&pair)? {
            if pending_overdue(&pending, now) {
                self.expire_overdue(&pending, now)?;
            }
        }

        let respond_by = now.plus_millis(self.config.response_window_ms(input.urgency));
        let request = ConsentRequest {
            request_id: input.request_id,
            provider_id: input.provider_id,
            provider_address: input.provider_address,
            patient_id: input.patient_id,
            patient_address: input.patient_address,
            requested_scope: input.scope,
            approved_scope: None,
            urgency: input.urgency,
            created_at: now,
            respond_by,
            decided_at: None,
            status: ConsentStatus::Pending,
            anchor: None,
        };
        self.store.insert_pending_request(&request)?;

        self.outbox.enqueue(AnchorJob {
            request_id: request.request_id.clone(),
            event: AnchorEvent::Created {
                request: Box::new(request.clone()),
            },
            attempts: 0,
        });
        self.notify(
            request.patient_id.as_str(),
            ActorRole::Patient,
            "New consent request",
            &format!(
                "Provider {} requests {} access: {}",
                request.provider_id,
                request.requested_scope.access_level,
                request.requested_scope.purpose
            ),
        );
        self.record(AuditEntry::success(
            now,
            AuditEventKind::RequestCreated,
            request.provider_id.as_str(),
            ActorRole::Provider,
            request.request_id.as_str(),
            TargetKind::Request,
            format!("urgency {}", request.urgency),
        ));
        Ok(request)
    }

    /// Approves a pending request with a (possibly narrowed) scope and
    /// materializes its permission.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for unknown requests,
    /// [`EngineError::Validation`] when the approver is not the target
    /// patient, [`EngineError::Expired`] when the response deadline passed
    /// (the request auto-expires first), [`EngineError::ScopeWidened`] when
    /// the approved scope exceeds the request, or [`EngineError::WrongState`]
    /// when the request is not pending.
    pub fn approve(
        &self,
        request_id: &RequestId,
        approver: &PatientId,
        approved_scope: ConsentScope,
        now: Timestamp,
    ) -> Result<ApprovalOutcome, EngineError> {
        let request = self.load_request(request_id)?;
        self.require_patient(&request, approver)?;

        let lock = self.locks.handle(&request.pair());
        let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let request = self.load_request(request_id)?;
        if request.is_response_overdue(now) {
            self.expire_overdue(&request, now)?;
            return Err(EngineError::Expired {
                record: format!("request {request_id}"),
            });
        }

        let mut updated = request;
        updated
            .approve(approved_scope, now)
            .map_err(map_consent_error)?;
        self.store.update_request(ConsentStatus::Pending, &updated)?;

        let permission =
            AccessPermission::materialize(&updated, now).map_err(map_permission_error)?;
        self.store.upsert_permission(&permission)?;
        self.record(AuditEntry::success(
            now,
            AuditEventKind::PermissionGranted,
            approver.as_str(),
            ActorRole::Patient,
            permission.permission_id.as_str(),
            TargetKind::Permission,
            format!("expires at {}", permission.expires_at.as_unix_millis()),
        ));

        self.outbox.enqueue(AnchorJob {
            request_id: updated.request_id.clone(),
            event: AnchorEvent::Approved,
            attempts: 0,
        });
        self.notify(
            updated.provider_id.as_str(),
            ActorRole::Provider,
            "Consent approved",
            &format!("Patient {} approved request {}", approver, updated.request_id),
        );
        self.record(AuditEntry::success(
            now,
            AuditEventKind::RequestApproved,
            approver.as_str(),
            ActorRole::Patient,
            updated.request_id.as_str(),
            TargetKind::Request,
            String::new(),
        ));
        Ok(ApprovalOutcome {
            request: updated,
            permission,
        })
    }

    /// Denies a pending request.
    ///
    /// # Errors
    ///
    /// Same preconditions as [`ConsentEngine::approve`], minus scope checks.
    pub fn deny(
        &self,
        request_id: &RequestId,
        approver: &PatientId,
        reason: &str,
        now: Timestamp,
    ) -> Result<ConsentRequest, EngineError> {
        let request = self.load_request(request_id)?;
        self.require_patient(&request, approver)?;

        let lock = self.locks.handle(&request.pair());
        let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let request = self.load_request(request_id)?;
        if request.is_response_overdue(now) {
            self.expire_overdue(&request, now)?;
            return Err(EngineError::Expired {
                record: format!("request {request_id}"),
            });
        }

        let mut updated = request;
        updated.deny(now).map_err(map_consent_error)?;
        self.store.update_request(ConsentStatus::Pending, &updated)?;

        self.notify(
            updated.provider_id.as_str(),
            ActorRole::Provider,
            "Consent denied",
            &format!("Request {} was denied: {reason}", updated.request_id),
        );
        self.record(AuditEntry::success(
            now,
            AuditEventKind::RequestDenied,
            approver.as_str(),
            ActorRole::Patient,
            updated.request_id.as_str(),
            TargetKind::Request,
            reason.to_string(),
        ));
        Ok(updated)
    }

    /// Revokes an approved request, deactivating its permission and force-
    /// closing any open session bound to it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::WrongState`] unless the request is approved,
    /// [`EngineError::Validation`] when the approver is not the target
    /// patient, or [`EngineError::NotFound`] for unknown requests.
    pub fn revoke(
        &self,
        request_id: &RequestId,
        approver: &PatientId,
        reason: &str,
        now: Timestamp,
    ) -> Result<ConsentRequest, EngineError> {
        let request = self.load_request(request_id)?;
        self.require_patient(&request, approver)?;

        let lock = self.locks.handle(&request.pair());
        let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut updated = self.load_request(request_id)?;
        updated.revoke(now).map_err(map_consent_error)?;
        self.store.update_request(ConsentStatus::Approved, &updated)?;

        if let Some(mut permission) = self.store.permission_for_request(request_id)? {
            permission.deactivate();
            self.store.upsert_permission(&permission)?;
            self.record(AuditEntry::success(
                now,
                AuditEventKind::PermissionDeactivated,
                approver.as_str(),
                ActorRole::Patient,
                permission.permission_id.as_str(),
                TargetKind::Permission,
                "revoked".to_string(),
            ));
            self.force_close_sessions(&permission, now)?;
        }

        self.outbox.enqueue(AnchorJob {
            request_id: updated.request_id.clone(),
            event: AnchorEvent::Revoked {
                reason: reason.to_string(),
            },
            attempts: 0,
        });
        self.notify(
            updated.provider_id.as_str(),
            ActorRole::Provider,
            "Consent revoked",
            &format!("Request {} was revoked: {reason}", updated.request_id),
        );
        self.record(AuditEntry::success(
            now,
            AuditEventKind::RequestRevoked,
            approver.as_str(),
            ActorRole::Patient,
            updated.request_id.as_str(),
            TargetKind::Request,
            reason.to_string(),
        ));
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Session operations
    // ------------------------------------------------------------------

    /// Starts an access session against the pair's valid permission.
    ///
    /// With a zero quote the session begins active; otherwise it begins
    /// pending payment with a submitted payment obligation, and stays inert
    /// until [`ConsentEngine::confirm_payment`] succeeds. Session start is
    /// audited in both paths.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoValidPermission`] when no valid permission
    /// exists for the pair, or [`EngineError::Payment`] when the payment
    /// submission fails (nothing is persisted in that case).
    pub fn start_session(
        &self,
        input: StartSessionInput,
        now: Timestamp,
    ) -> Result<SessionStart, EngineError> {
        let pair = PairKey::new(input.provider_id.clone(), input.patient_id.clone());
        let lock = self.locks.handle(&pair);
        let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let Some(permission) = self.store.active_permission_for(&pair)? else {
            return Err(EngineError::NoValidPermission { pair });
        };
        if !permission.is_valid(now) {
            self.lapse_permission(permission, now)?;
            return Err(EngineError::NoValidPermission { pair });
        }

        let quote = self.config.quotes.quote(input.tier, permission.access_level);
        if quote == 0 {
            let session = AccessSession::new(
                input.session_id,
                permission.permission_id.clone(),
                input.provider_id,
                input.patient_id,
                now,
                SessionState::Active,
            );
            self.store.insert_session(&session)?;
            self.record(AuditEntry::success(
                now,
                AuditEventKind::SessionStarted,
                session.provider_id.as_str(),
                ActorRole::Provider,
                session.session_id.as_str(),
                TargetKind::Session,
                "pre-paid".to_string(),
            ));
            return Ok(SessionStart {
                session,
                payment: None,
            });
        }

        let payment_ref = PaymentRef::new(format!("pay-{}", input.session_id));
        let receipt = self.payments.submit_payment(
            &input.provider_id,
            &input.patient_id,
            quote,
            &payment_ref,
        )?;
        let initial_state = if receipt.status == PaymentStatus::Confirmed {
            SessionState::Active
        } else {
            SessionState::PendingPayment
        };
        let session = AccessSession::new(
            input.session_id,
            permission.permission_id.clone(),
            input.provider_id.clone(),
            input.patient_id.clone(),
            now,
            initial_state,
        );
        self.store.insert_session(&session)?;
        let payment = PaymentTransaction {
            payment_ref,
            session_id: session.session_id.clone(),
            payer: input.provider_id,
            payee: input.patient_id,
            amount: quote,
            status: receipt.status,
            external_ref: Some(receipt.external_ref),
            created_at: now,
            resolved_at: (receipt.status != PaymentStatus::Pending).then_some(now),
        };
        self.store.insert_payment(&payment)?;
        self.record(AuditEntry::success(
            now,
            AuditEventKind::PaymentSubmitted,
            payment.payer.as_str(),
            ActorRole::Provider,
            payment.payment_ref.as_str(),
            TargetKind::Payment,
            format!("amount {}", payment.amount),
        ));
        if payment.status == PaymentStatus::Confirmed {
            self.record(AuditEntry::success(
                now,
                AuditEventKind::PaymentConfirmed,
                payment.payer.as_str(),
                ActorRole::Provider,
                payment.payment_ref.as_str(),
                TargetKind::Payment,
                payment.external_ref.clone().unwrap_or_default(),
            ));
        }
        self.record(AuditEntry::success(
            now,
            AuditEventKind::SessionStarted,
            session.provider_id.as_str(),
            ActorRole::Provider,
            session.session_id.as_str(),
            TargetKind::Session,
            session.state.as_str().to_string(),
        ));
        Ok(SessionStart {
            session,
            payment: Some(payment),
        })
    }

    /// Confirms (or re-checks) a payment and activates its bound session.
    ///
    /// Confirmation is idempotent: confirming an already-confirmed payment
    /// returns the existing record. Session activation re-validates the
    /// permission at confirmation time; a validity check performed before
    /// the payment confirmed is never reused.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PaymentNotFound`] for unknown references,
    /// [`EngineError::NoValidPermission`] when the permission lapsed before
    /// confirmation (the session is force-closed), or
    /// [`EngineError::SessionNotActive`] when the session was already closed.
    pub fn confirm_payment(
        &self,
        payment_ref: &PaymentRef,
        now: Timestamp,
    ) -> Result<PaymentOutcome, EngineError> {
        let Some(payment) = self.store.payment(payment_ref)? else {
            return Err(EngineError::PaymentNotFound {
                reference: payment_ref.to_string(),
            });
        };
        if payment.status == PaymentStatus::Confirmed {
            let session = self.store.session(&payment.session_id)?;
            return Ok(PaymentOutcome { payment, session });
        }

        let external_ref = payment.external_ref.clone().ok_or_else(|| {
            EngineError::Payment(PaymentServiceError::UnknownReference(
                payment_ref.to_string(),
            ))
        })?;
        let verified = self.payments.verify_payment(&external_ref)?;
        match verified {
            PaymentStatus::Pending => Ok(PaymentOutcome {
                payment,
                session: None,
            }),
            PaymentStatus::Failed => {
                let previous = payment.status;
                let mut updated = payment;
                updated.status = PaymentStatus::Failed;
                updated.resolved_at = Some(now);
                self.store.update_payment(previous, &updated)?;
                self.record(AuditEntry::failure(
                    now,
                    AuditEventKind::PaymentFailed,
                    updated.payer.as_str(),
                    ActorRole::Provider,
                    updated.payment_ref.as_str(),
                    TargetKind::Payment,
                    "payment failed".to_string(),
                ));
                Ok(PaymentOutcome {
                    payment: updated,
                    session: None,
                })
            }
            PaymentStatus::Confirmed => {
                let previous = payment.status;
                let mut updated = payment;
                updated.status = PaymentStatus::Confirmed;
                updated.resolved_at = Some(now);
                self.store.update_payment(previous, &updated)?;
                self.record(AuditEntry::success(
                    now,
                    AuditEventKind::PaymentConfirmed,
                    updated.payer.as_str(),
                    ActorRole::Provider,
                    updated.payment_ref.as_str(),
                    TargetKind::Payment,
                    external_ref,
                ));
                let session = self.activate_session(&updated.session_id, now)?;
                Ok(PaymentOutcome {
                    payment: updated,
                    session: Some(session),
                })
            }
        }
    }

    /// Checks one file access against the session and its permission, then
    /// records it.
    ///
    /// Validity is re-evaluated on every call against current permission
    /// state; there is no grace window after revocation or expiry. Every
    /// attempt, success or failure, produces exactly one audit entry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PaymentRequired`] while the session awaits
    /// payment, [`EngineError::SessionNotActive`] for closed or invalidated
    /// sessions, [`EngineError::OutOfScope`] for category or level
    /// violations, or [`EngineError::NotFound`] for unknown sessions/files.
    pub fn access_file(
        &self,
        session_id: &SessionId,
        file_id: &FileId,
        access_type: AccessType,
        now: Timestamp,
    ) -> Result<FileAccess, EngineError> {
        let kind = access_audit_kind(access_type);
        let Some(session) = self.store.session(session_id)? else {
            return Err(EngineError::NotFound {
                record: format!("session {session_id}"),
            });
        };

        match session.state {
            SessionState::PendingPayment => {
                self.record_access_failure(&session, file_id, kind, "payment required", now);
                return Err(EngineError::PaymentRequired {
                    session_id: session.session_id,
                });
            }
            SessionState::Ended | SessionState::EndedByRevocation => {
                self.record_access_failure(&session, file_id, kind, "session not active", now);
                return Err(EngineError::SessionNotActive {
                    session_id: session.session_id,
                });
            }
            SessionState::Active => {}
        }

        let Some(permission) = self.store.permission(&session.permission_id)? else {
            self.record_access_failure(&session, file_id, kind, "permission missing", now);
            return Err(EngineError::SessionNotActive {
                session_id: session.session_id,
            });
        };
        if !permission.is_valid(now) {
            self.lapse_permission(permission, now)?;
            self.record_access_failure(&session, file_id, kind, "permission invalid", now);
            return Err(EngineError::SessionNotActive {
                session_id: session.session_id,
            });
        }

        let record = match self.files.resolve(file_id) {
            Ok(record) => record,
            Err(error) => {
                self.record_access_failure(&session, file_id, kind, &error.to_string(), now);
                return Err(error.into());
            }
        };
        if !permission.categories.contains(&record.category) {
            let reason = format!("category {} not granted", record.category);
            self.record_access_failure(&session, file_id, kind, &reason, now);
            return Err(EngineError::OutOfScope { reason });
        }
        if access_type.required_level() > permission.access_level {
            let reason = format!(
                "{} access exceeds granted level {}",
                access_type, permission.access_level
            );
            self.record_access_failure(&session, file_id, kind, &reason, now);
            return Err(EngineError::OutOfScope { reason });
        }

        // A revocation can land between the validity check above and the
        // counter write; the guarded store increment refuses the stale
        // snapshot instead of resurrecting the permission.
        let permission = match self.store.record_permission_access(&permission.permission_id) {
            Ok(updated) => updated,
            Err(StateStoreError::StaleState { .. } | StateStoreError::NotFound(_)) => {
                self.record_access_failure(&session, file_id, kind, "permission invalid", now);
                return Err(EngineError::SessionNotActive {
                    session_id: session.session_id,
                });
            }
            Err(error) => return Err(error.into()),
        };
        self.record(AuditEntry::success(
            now,
            kind,
            session.provider_id.as_str(),
            ActorRole::Provider,
            file_id.as_str(),
            TargetKind::File,
            format!("{access_type} via session {}", session.session_id),
        ));
        Ok(FileAccess {
            handle_ref: record.handle_ref,
            access_count: permission.access_count,
        })
    }

    /// Ends a session. Ending an already-ended session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for unknown sessions or a store
    /// variant on storage failure.
    pub fn end_session(
        &self,
        session_id: &SessionId,
        now: Timestamp,
    ) -> Result<AccessSession, EngineError> {
        let Some(session) = self.store.session(session_id)? else {
            return Err(EngineError::NotFound {
                record: format!("session {session_id}"),
            });
        };
        if !session.is_open() {
            return Ok(session);
        }
        let previous = session.state;
        let mut updated = session;
        updated.end(now);
        self.store.update_session(previous, &updated)?;
        self.record(AuditEntry::success(
            now,
            AuditEventKind::SessionEnded,
            updated.provider_id.as_str(),
            ActorRole::Provider,
            updated.session_id.as_str(),
            TargetKind::Session,
            String::new(),
        ));
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Background operations
    // ------------------------------------------------------------------

    /// Runs one idempotent expiry sweep pass.
    ///
    /// Overdue pending requests expire; approved requests whose permission
    /// lapsed expire with the full cascade; abandoned pending-payment
    /// sessions end. Every transition is compare-and-set from the expected
    /// source state, so concurrent sweeps and user-driven transitions each
    /// process a record at most once.
    ///
    /// # Errors
    ///
    /// Returns a store variant on storage failure; stale-state races are
    /// skipped, not errors.
    pub fn sweep_expired(&self, now: Timestamp) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();

        for request in self.store.requests_in_status(ConsentStatus::Pending)? {
            if !pending_overdue(&request, now) {
                continue;
            }
            if self.try_expire(&request, ConsentStatus::Pending, now)? {
                report.requests_expired += 1;
            }
        }

        for request in self.store.requests_in_status(ConsentStatus::Approved)? {
            let Some(permission) = self.store.permission_for_request(&request.request_id)? else {
                continue;
            };
            if !permission_lapsed(&permission, now) {
                continue;
            }
            if self.try_expire(&request, ConsentStatus::Approved, now)? {
                report.grants_expired += 1;
            }
            if permission.active {
                let mut deactivated = permission;
                deactivated.deactivate();
                self.store.upsert_permission(&deactivated)?;
                report.permissions_deactivated += 1;
                self.record(AuditEntry::success(
                    now,
                    AuditEventKind::PermissionDeactivated,
                    "sweep",
                    ActorRole::System,
                    deactivated.permission_id.as_str(),
                    TargetKind::Permission,
                    "expired".to_string(),
                ));
                report.sessions_force_closed += self.force_close_sessions(&deactivated, now)?;
            }
        }

        for session in self.store.sessions_in_state(SessionState::PendingPayment)? {
            if !payment_abandoned(&session, self.config.payment_pending_window_ms, now) {
                continue;
            }
            let mut updated = session;
            updated.end(now);
            match self
                .store
                .update_session(SessionState::PendingPayment, &updated)
            {
                Ok(()) => {
                    report.sessions_abandoned += 1;
                    self.record(AuditEntry::success(
                        now,
                        AuditEventKind::SessionEnded,
                        "sweep",
                        ActorRole::System,
                        updated.session_id.as_str(),
                        TargetKind::Session,
                        "abandoned".to_string(),
                    ));
                }
                Err(StateStoreError::StaleState { .. }) => {}
                Err(error) => return Err(error.into()),
            }
        }

        Ok(report)
    }

    /// Drains the anchor outbox, performing external anchoring calls and
    /// stamping references onto records.
    ///
    /// Each job gets at most the configured attempt budget; an exhausted job
    /// leaves its record unanchored and is surfaced through metrics.
    ///
    /// # Errors
    ///
    /// Returns a store variant on storage failure; anchoring failures retry
    /// or exhaust without failing the pass.
    pub fn reconcile_anchors(&self) -> Result<AnchorReport, EngineError> {
        let mut report = AnchorReport::default();
        let mut batch = Vec::new();
        while let Some(job) = self.outbox.dequeue() {
            batch.push(job);
        }

        for mut job in batch {
            let result = match &job.event {
                AnchorEvent::Created { request } => self.anchor.anchor_consent(request),
                AnchorEvent::Approved => self.anchor.anchor_approval(&job.request_id),
                AnchorEvent::Revoked { reason } => {
                    self.anchor.anchor_revocation(&job.request_id, reason)
                }
            };
            match result {
                Ok(anchor_ref) => {
                    if let Some(mut request) = self.store.request(&job.request_id)? {
                        request.anchor = Some(anchor_ref);
                        match self.store.update_request(request.status, &request) {
                            Ok(()) | Err(StateStoreError::StaleState { .. }) => {}
                            Err(error) => return Err(error.into()),
                        }
                    }
                    report.anchored += 1;
                }
                Err(error) => {
                    job.attempts += 1;
                    if job.attempts < self.config.anchor_max_attempts {
                        self.metrics
                            .record_degradation(DegradationKind::AnchorRetry, &error.to_string());
                        report.retried += 1;
                        self.outbox.enqueue(job);
                    } else {
                        self.metrics.record_degradation(
                            DegradationKind::AnchorExhausted,
                            &error.to_string(),
                        );
                        report.exhausted += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    /// Queries the audit log. Read-only; results never feed authorization.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Audit`] when the sink query fails.
    pub fn audit_query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, EngineError> {
        Ok(self.audit.query(filter)?)
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    /// Loads a request or fails with `NotFound`.
    fn load_request(&self, request_id: &RequestId) -> Result<ConsentRequest, EngineError> {
        self.store
            .request(request_id)?
            .ok_or_else(|| EngineError::NotFound {
                record: format!("request {request_id}"),
            })
    }

    /// Checks that the acting patient is the request target.
    fn require_patient(
        &self,
        request: &ConsentRequest,
        approver: &PatientId,
    ) -> Result<(), EngineError> {
        if request.patient_id == *approver {
            Ok(())
        } else {
            Err(EngineError::Validation(format!(
                "patient {approver} is not the target of request {}",
                request.request_id
            )))
        }
    }

    /// Lazily expires an overdue pending request under the pair lock.
    fn expire_overdue(&self, request: &ConsentRequest, now: Timestamp) -> Result<(), EngineError> {
        self.try_expire(request, ConsentStatus::Pending, now)?;
        Ok(())
    }

    /// Expires a request with compare-and-set; returns false on a lost race.
    fn try_expire(
        &self,
        request: &ConsentRequest,
        expected: ConsentStatus,
        now: Timestamp,
    ) -> Result<bool, EngineError> {
        let mut updated = request.clone();
        if updated.expire(now).is_err() {
            return Ok(false);
        }
        match self.store.update_request(expected, &updated) {
            Ok(()) => {
                self.record(AuditEntry::success(
                    now,
                    AuditEventKind::RequestExpired,
                    "sweep",
                    ActorRole::System,
                    updated.request_id.as_str(),
                    TargetKind::Request,
                    String::new(),
                ));
                Ok(true)
            }
            Err(StateStoreError::StaleState { .. }) => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    /// Deactivates a lapsed permission and force-closes its open sessions.
    fn lapse_permission(
        &self,
        mut permission: AccessPermission,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        if permission.active {
            permission.deactivate();
            self.store.upsert_permission(&permission)?;
            self.record(AuditEntry::success(
                now,
                AuditEventKind::PermissionDeactivated,
                "engine",
                ActorRole::System,
                permission.permission_id.as_str(),
                TargetKind::Permission,
                "expired".to_string(),
            ));
        }
        self.force_close_sessions(&permission, now)?;
        Ok(())
    }

    /// Force-closes all open sessions bound to a permission; returns the
    /// number closed.
    fn force_close_sessions(
        &self,
        permission: &AccessPermission,
        now: Timestamp,
    ) -> Result<u64, EngineError> {
        let mut closed = 0;
        for session in self
            .store
            .open_sessions_for_permission(&permission.permission_id)?
        {
            let previous = session.state;
            let mut updated = session;
            updated.force_end(now);
            match self.store.update_session(previous, &updated) {
                Ok(()) => {
                    closed += 1;
                    self.record(AuditEntry::success(
                        now,
                        AuditEventKind::SessionForceEnded,
                        "engine",
                        ActorRole::System,
                        updated.session_id.as_str(),
                        TargetKind::Session,
                        "permission invalidated".to_string(),
                    ));
                }
                Err(StateStoreError::StaleState { .. }) => {}
                Err(error) => return Err(error.into()),
            }
        }
        Ok(closed)
    }

    /// Activates a pending-payment session after confirmation, re-validating
    /// the permission at confirmation time.
    fn activate_session(
        &self,
        session_id: &SessionId,
        now: Timestamp,
    ) -> Result<AccessSession, EngineError> {
        let Some(session) = self.store.session(session_id)? else {
            return Err(EngineError::NotFound {
                record: format!("session {session_id}"),
            });
        };
        let Some(permission) = self.store.permission(&session.permission_id)? else {
            return Err(EngineError::SessionNotActive {
                session_id: session.session_id,
            });
        };
        if !permission.is_valid(now) {
            self.lapse_permission(permission, now)?;
            return Err(EngineError::NoValidPermission {
                pair: session_pair(&session),
            });
        }
        match session.state {
            SessionState::Active => Ok(session),
            SessionState::PendingPayment => {
                let mut updated = session;
                updated
                    .activate()
                    .map_err(|_| EngineError::SessionNotActive {
                        session_id: updated.session_id.clone(),
                    })?;
                self.store
                    .update_session(SessionState::PendingPayment, &updated)?;
                Ok(updated)
            }
            SessionState::Ended | SessionState::EndedByRevocation => {
                Err(EngineError::SessionNotActive {
                    session_id: session.session_id,
                })
            }
        }
    }

    /// Records a failed file access with its reason.
    fn record_access_failure(
        &self,
        session: &AccessSession,
        file_id: &FileId,
        kind: AuditEventKind,
        reason: &str,
        now: Timestamp,
    ) {
        self.record(AuditEntry::failure(
            now,
            kind,
            session.provider_id.as_str(),
            ActorRole::Provider,
            file_id.as_str(),
            TargetKind::File,
            reason.to_string(),
        ));
    }

    /// Appends an audit entry, degrading to metrics when the sink fails.
    fn record(&self, entry: AuditEntry) {
        if let Err(error) = self.audit.append(entry) {
            self.metrics
                .record_degradation(DegradationKind::AuditSink, &error.to_string());
        }
    }

    /// Delivers a notification, degrading to metrics when delivery fails.
    fn notify(&self, recipient: &str, role: ActorRole, subject: &str, body: &str) {
        let notice = Notice {
            subject: subject.to_string(),
            body: body.to_string(),
        };
        if let Err(error) = self.notifier.deliver(recipient, role, &notice) {
            self.metrics
                .record_degradation(DegradationKind::Notification, &error.to_string());
        }
    }
}

// ============================================================================
// SECTION: Free Helpers
// ============================================================================

/// Maps a consent transition error onto the engine taxonomy.
fn map_consent_error(error: ConsentError) -> EngineError {
    match error {
        ConsentError::WrongStatus {
            request_id,
            expected,
            actual,
        } => {
            if actual == ConsentStatus::Expired {
                EngineError::Expired {
                    record: format!("request {request_id}"),
                }
            } else {
                EngineError::WrongState {
                    record: format!("request {request_id}"),
                    expected: expected.as_str().to_string(),
                    actual: actual.as_str().to_string(),
                }
            }
        }
        ConsentError::DeadlinePassed { request_id } => EngineError::Expired {
            record: format!("request {request_id}"),
        },
        ConsentError::Scope(scope) => scope.into(),
    }
}

/// Maps a permission derivation error onto the engine taxonomy.
fn map_permission_error(error: PermissionError) -> EngineError {
    match error {
        PermissionError::InvalidSource { request_id, status } => EngineError::WrongState {
            record: format!("request {request_id}"),
            expected: ConsentStatus::Approved.as_str().to_string(),
            actual: status.as_str().to_string(),
        },
        PermissionError::MissingApprovedScope { request_id } => EngineError::WrongState {
            record: format!("request {request_id}"),
            expected: "approved with scope".to_string(),
            actual: "approved without scope".to_string(),
        },
    }
}

/// Returns the audit kind recorded for an access type.
const fn access_audit_kind(access_type: AccessType) -> AuditEventKind {
    match access_type {
        AccessType::View => AuditEventKind::FileViewed,
        AccessType::Download => AuditEventKind::FileDownloaded,
        AccessType::Edit => AuditEventKind::FileEdited,
    }
}

/// Returns the (provider, patient) pair of a session.
fn session_pair(session: &AccessSession) -> PairKey {
    PairKey::new(session.provider_id.clone(), session.patient_id.clone())
}
