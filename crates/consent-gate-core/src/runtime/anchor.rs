// crates/consent-gate-core/src/runtime/anchor.rs
// ============================================================================
// Module: Anchor Outbox
// Description: Deferred anchoring of consent transitions with bounded retry.
// Purpose: Keep state transitions authoritative and anchoring asynchronous.
// Dependencies: crate::core, std
// ============================================================================

//! ## Overview
//! State transitions commit locally and enqueue an anchor job; a periodic
//! reconciliation pass performs the external anchoring call and stamps the
//! resulting reference onto the record. A slow or failed anchor call can
//! therefore never block a caller or leave local state ambiguous. Jobs retry
//! within a bounded budget; an exhausted job leaves the record unanchored,
//! which is visible as `anchor: None` and a degradation metric.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::PoisonError;

use serde::Deserialize;
use serde::Serialize;

use crate::core::ConsentRequest;
use crate::core::identifiers::RequestId;

// ============================================================================
// SECTION: Anchor Jobs
// ============================================================================

/// Anchorable consent event.
///
/// # Invariants
/// - Variants are stable for serialization; one job exists per logical
///   transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnchorEvent {
    /// Anchor the creation of a request.
    Created {
        /// Snapshot of the created request.
        request: Box<ConsentRequest>,
    },
    /// Anchor an approval.
    Approved,
    /// Anchor a revocation with its reason.
    Revoked {
        /// Revocation reason.
        reason: String,
    },
}

/// One pending anchoring obligation.
///
/// # Invariants
/// - `attempts` counts completed (failed) anchor calls for this job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorJob {
    /// Request the anchor belongs to.
    pub request_id: RequestId,
    /// Event to anchor.
    pub event: AnchorEvent,
    /// Failed attempts so far.
    pub attempts: u32,
}

// ============================================================================
// SECTION: Outbox
// ============================================================================

/// In-process queue of pending anchor jobs.
///
/// # Invariants
/// - Jobs are drained in FIFO order; a retried job re-enters at the back.
#[derive(Debug, Default)]
pub struct AnchorOutbox {
    /// Pending jobs guarded by a mutex.
    jobs: Mutex<VecDeque<AnchorJob>>,
}

impl AnchorOutbox {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
        }
    }

    /// Enqueues a job at the back of the queue.
    pub fn enqueue(&self, job: AnchorJob) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(job);
    }

    /// Removes and returns the front job, when one exists.
    #[must_use]
    pub fn dequeue(&self) -> Option<AnchorJob> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Returns the number of pending jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when no jobs are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// SECTION: Reconciliation Report
// ============================================================================

/// Outcome of one anchor reconciliation pass.
///
/// # Invariants
/// - Counters cover only the jobs drained by that pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnchorReport {
    /// Jobs anchored and stamped onto their records.
    pub anchored: u64,
    /// Jobs re-enqueued for another attempt.
    pub retried: u64,
    /// Jobs dropped after exhausting the retry budget.
    pub exhausted: u64,
}
