// crates/consent-gate-core/src/runtime/mod.rs
// ============================================================================
// Module: Runtime
// Description: Engine, stores, locks, outbox, sweep, and telemetry.
// Purpose: Execute the consent state machine over the collaborator seams.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime components for Consent Gate. The engine is the only execution
//! path; the rest of this module supplies its supporting machinery. The
//! engine itself never reads the wall clock: hosts pass `now` explicitly,
//! typically via [`SystemClock`].

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod anchor;
pub mod engine;
pub mod error;
pub mod locks;
pub mod store;
pub mod sweep;
pub mod telemetry;

// ============================================================================
// SECTION: Re-exports
// ============================================================================

pub use anchor::AnchorEvent;
pub use anchor::AnchorJob;
pub use anchor::AnchorOutbox;
pub use anchor::AnchorReport;
pub use engine::ApprovalOutcome;
pub use engine::ConsentEngine;
pub use engine::CreateRequestInput;
pub use engine::DEFAULT_ANCHOR_MAX_ATTEMPTS;
pub use engine::DEFAULT_PAYMENT_PENDING_WINDOW_MS;
pub use engine::EngineConfig;
pub use engine::FileAccess;
pub use engine::PaymentOutcome;
pub use engine::SessionStart;
pub use engine::StartSessionInput;
pub use error::EngineError;
pub use error::ErrorKind;
pub use locks::PairLocks;
pub use store::InMemoryAuditSink;
pub use store::InMemoryStateStore;
pub use sweep::SweepReport;
pub use telemetry::DegradationKind;
pub use telemetry::EngineMetrics;
pub use telemetry::NoopMetrics;

// ============================================================================
// SECTION: Clock
// ============================================================================

use crate::core::Timestamp;

/// Wall-clock seam for hosts.
///
/// # Invariants
/// - The engine never calls this itself; hosts sample it and pass `now`
///   into operations so behavior stays deterministic under test.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis());
        Timestamp::from_unix_millis(i64::try_from(millis).unwrap_or(i64::MAX))
    }
}
