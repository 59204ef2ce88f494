// crates/consent-gate-core/src/runtime/locks.rs
// ============================================================================
// Module: Pair Lock Registry
// Description: Keyed mutual exclusion per (provider, patient) pair.
// Purpose: Serialize same-pair transitions without a global lock.
// Dependencies: crate::core::identifiers, std
// ============================================================================

//! ## Overview
//! The single-pending and single-active-permission invariants require that
//! create, approve, materialize, and session-start operations on the same
//! (provider, patient) pair never race. The unit of mutual exclusion is the
//! pair, not the whole ledger; unrelated pairs proceed concurrently.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use crate::core::identifiers::PairKey;

// ============================================================================
// SECTION: Pair Locks
// ============================================================================

/// Registry of per-pair mutexes.
///
/// # Invariants
/// - One mutex exists per pair ever locked; entries are small and never
///   removed, matching the bounded population of provider/patient pairs.
#[derive(Debug, Default)]
pub struct PairLocks {
    /// Pair-keyed mutex handles guarded by a registry mutex.
    handles: Mutex<BTreeMap<PairKey, Arc<Mutex<()>>>>,
}

impl PairLocks {
    /// Creates an empty lock registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the mutex handle for a pair, creating it on first use.
    ///
    /// Callers lock the returned handle for the duration of the same-pair
    /// critical section. A poisoned registry or pair mutex is recovered, not
    /// propagated: the protected state lives in the store, which fails closed
    /// on its own.
    #[must_use]
    pub fn handle(&self, pair: &PairKey) -> Arc<Mutex<()>> {
        let mut registry = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(registry.entry(pair.clone()).or_default())
    }
}
