// crates/consent-gate-core/src/runtime/store.rs
// ============================================================================
// Module: In-Memory Stores
// Description: In-memory state store and audit sink for tests and demos.
// Purpose: Provide deterministic reference implementations without external deps.
// Dependencies: crate::{core, interfaces}, std
// ============================================================================

//! ## Overview
//! This module provides in-memory implementations of [`ConsentStateStore`]
//! and [`AuditSink`] for tests and local demos. They honor the same
//! compare-and-set contracts as the durable store but are not intended for
//! production use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::core::AccessPermission;
use crate::core::AccessSession;
use crate::core::AuditEntry;
use crate::core::AuditFilter;
use crate::core::ConsentRequest;
use crate::core::ConsentStatus;
use crate::core::PairKey;
use crate::core::PaymentRef;
use crate::core::PaymentStatus;
use crate::core::PaymentTransaction;
use crate::core::PermissionId;
use crate::core::RequestId;
use crate::core::SessionId;
use crate::core::SessionState;
use crate::interfaces::AuditSink;
use crate::interfaces::AuditSinkError;
use crate::interfaces::ConsentStateStore;
use crate::interfaces::StateStoreError;

// ============================================================================
// SECTION: In-Memory State Store
// ============================================================================

/// Mutable record tables behind the store mutex.
#[derive(Debug, Default)]
struct StoreInner {
    /// Requests keyed by request identifier.
    requests: BTreeMap<RequestId, ConsentRequest>,
    /// Permissions keyed by permission identifier.
    permissions: BTreeMap<PermissionId, AccessPermission>,
    /// Sessions keyed by session identifier.
    sessions: BTreeMap<SessionId, AccessSession>,
    /// Payments keyed by payment reference.
    payments: BTreeMap<PaymentRef, PaymentTransaction>,
}

/// In-memory consent state store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStateStore {
    /// Record tables protected by a mutex.
    inner: Arc<Mutex<StoreInner>>,
}

impl InMemoryStateStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
        }
    }

    /// Locks the inner tables, failing closed on a poisoned mutex.
    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>, StateStoreError> {
        self.inner
            .lock()
            .map_err(|_| StateStoreError::Store("state store mutex poisoned".to_string()))
    }
}

impl ConsentStateStore for InMemoryStateStore {
    fn insert_pending_request(&self, request: &ConsentRequest) -> Result<(), StateStoreError> {
        let mut inner = self.lock()?;
        let pair = request.pair();
        let duplicate = inner
            .requests
            .values()
            .any(|r| r.status == ConsentStatus::Pending && r.pair() == pair);
        if duplicate {
            return Err(StateStoreError::DuplicatePending { pair });
        }
        inner
            .requests
            .insert(request.request_id.clone(), request.clone());
        Ok(())
    }

    fn request(&self, request_id: &RequestId) -> Result<Option<ConsentRequest>, StateStoreError> {
        Ok(self.lock()?.requests.get(request_id).cloned())
    }

    fn pending_request_for(
        &self,
        pair: &PairKey,
    ) -> Result<Option<ConsentRequest>, StateStoreError> {
        Ok(self
            .lock()?
            .requests
            .values()
            .find(|r| r.status == ConsentStatus::Pending && r.pair() == *pair)
            .cloned())
    }

    fn update_request(
        &self,
        expected: ConsentStatus,
        updated: &ConsentRequest,
    ) -> Result<(), StateStoreError> {
        let mut inner = self.lock()?;
        let current = inner
            .requests
            .get(&updated.request_id)
            .ok_or_else(|| StateStoreError::NotFound(format!("request {}", updated.request_id)))?;
        if current.status != expected {
            return Err(StateStoreError::StaleState {
                record: format!("request {}", updated.request_id),
                expected: expected.as_str().to_string(),
                found: current.status.as_str().to_string(),
            });
        }
        inner
            .requests
            .insert(updated.request_id.clone(), updated.clone());
        Ok(())
    }

    fn requests_in_status(
        &self,
        status: ConsentStatus,
    ) -> Result<Vec<ConsentRequest>, StateStoreError> {
        Ok(self
            .lock()?
            .requests
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    fn upsert_permission(&self, permission: &AccessPermission) -> Result<(), StateStoreError> {
        self.lock()?
            .permissions
            .insert(permission.permission_id.clone(), permission.clone());
        Ok(())
    }

    fn record_permission_access(
        &self,
        permission_id: &PermissionId,
    ) -> Result<AccessPermission, StateStoreError> {
        let mut inner = self.lock()?;
        let Some(permission) = inner.permissions.get_mut(permission_id) else {
            return Err(StateStoreError::NotFound(format!(
                "permission {permission_id}"
            )));
        };
        if !permission.active {
            return Err(StateStoreError::StaleState {
                record: format!("permission {permission_id}"),
                expected: "active".to_string(),
                found: "inactive".to_string(),
            });
        }
        permission.record_access();
        Ok(permission.clone())
    }

    fn permission(
        &self,
        permission_id: &PermissionId,
    ) -> Result<Option<AccessPermission>, StateStoreError> {
        Ok(self.lock()?.permissions.get(permission_id).cloned())
    }

    fn permission_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<AccessPermission>, StateStoreError> {
        Ok(self
            .lock()?
            .permissions
            .values()
            .find(|p| p.request_id == *request_id)
            .cloned())
    }

    fn active_permission_for(
        &self,
        pair: &PairKey,
    ) -> Result<Option<AccessPermission>, StateStoreError> {
        Ok(self
            .lock()?
            .permissions
            .values()
            .find(|p| p.active && p.pair() == *pair)
            .cloned())
    }

    fn insert_session(&self, session: &AccessSession) -> Result<(), StateStoreError> {
        self.lock()?
            .sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    fn session(&self, session_id: &SessionId) -> Result<Option<AccessSession>, StateStoreError> {
        Ok(self.lock()?.sessions.get(session_id).cloned())
    }

    fn open_sessions_for_permission(
        &self,
        permission_id: &PermissionId,
    ) -> Result<Vec<AccessSession>, StateStoreError> {
        Ok(self
            .lock()?
            .sessions
            .values()
            .filter(|s| s.is_open() && s.permission_id == *permission_id)
            .cloned()
            .collect())
    }

    fn sessions_in_state(
        &self,
        state: SessionState,
    ) -> Result<Vec<AccessSession>, StateStoreError> {
        Ok(self
            .lock()?
            .sessions
            .values()
            .filter(|s| s.state == state)
            .cloned()
            .collect())
    }

    fn update_session(
        &self,
        expected: SessionState,
        updated: &AccessSession,
    ) -> Result<(), StateStoreError> {
        let mut inner = self.lock()?;
        let current = inner
            .sessions
            .get(&updated.session_id)
            .ok_or_else(|| StateStoreError::NotFound(format!("session {}", updated.session_id)))?;
        if current.state != expected {
            return Err(StateStoreError::StaleState {
                record: format!("session {}", updated.session_id),
                expected: expected.as_str().to_string(),
                found: current.state.as_str().to_string(),
            });
        }
        inner
            .sessions
            .insert(updated.session_id.clone(), updated.clone());
        Ok(())
    }

    fn insert_payment(&self, payment: &PaymentTransaction) -> Result<(), StateStoreError> {
        self.lock()?
            .payments
            .insert(payment.payment_ref.clone(), payment.clone());
        Ok(())
    }

    fn payment(
        &self,
        payment_ref: &PaymentRef,
    ) -> Result<Option<PaymentTransaction>, StateStoreError> {
        Ok(self.lock()?.payments.get(payment_ref).cloned())
    }

    fn payment_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<PaymentTransaction>, StateStoreError> {
        Ok(self
            .lock()?
            .payments
            .values()
            .find(|p| p.session_id == *session_id)
            .cloned())
    }

    fn update_payment(
        &self,
        expected: PaymentStatus,
        updated: &PaymentTransaction,
    ) -> Result<(), StateStoreError> {
        let mut inner = self.lock()?;
        let current = inner
            .payments
            .get(&updated.payment_ref)
            .ok_or_else(|| StateStoreError::NotFound(format!("payment {}", updated.payment_ref)))?;
        if current.status != expected {
            return Err(StateStoreError::StaleState {
                record: format!("payment {}", updated.payment_ref),
                expected: expected.as_str().to_string(),
                found: current.status.as_str().to_string(),
            });
        }
        inner
            .payments
            .insert(updated.payment_ref.clone(), updated.clone());
        Ok(())
    }
}

// ============================================================================
// SECTION: In-Memory Audit Sink
// ============================================================================

/// In-memory append-only audit sink for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAuditSink {
    /// Appended entries in sequence order.
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl InMemoryAuditSink {
    /// Creates a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns a snapshot of all appended entries.
    ///
    /// # Errors
    ///
    /// Returns [`AuditSinkError`] when the sink mutex is poisoned.
    pub fn entries(&self) -> Result<Vec<AuditEntry>, AuditSinkError> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| AuditSinkError::Sink("audit sink mutex poisoned".to_string()))?
            .clone())
    }
}

impl AuditSink for InMemoryAuditSink {
    fn append(&self, mut entry: AuditEntry) -> Result<u64, AuditSinkError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AuditSinkError::Sink("audit sink mutex poisoned".to_string()))?;
        let seq = u64::try_from(entries.len()).unwrap_or(u64::MAX).saturating_add(1);
        entry.seq = seq;
        entries.push(entry);
        Ok(seq)
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AuditSinkError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| AuditSinkError::Sink("audit sink mutex poisoned".to_string()))?;
        Ok(entries.iter().filter(|e| filter.matches(e)).cloned().collect())
    }
}
