// crates/consent-gate-core/src/runtime/telemetry.rs
// ============================================================================
// Module: Runtime Telemetry
// Description: Observability hooks for engine degradations and sweeps.
// Purpose: Surface recorded-degradation conditions without hard dependencies.
// Dependencies: std
// ============================================================================

//! ## Overview
//! This module exposes a thin metrics interface for degradation counters. It
//! is intentionally dependency-light so downstream deployments can plug in
//! Prometheus or OpenTelemetry without redesign. Audit-sink append failures
//! never fail the caller's primary operation, so this interface is the only
//! place silent audit loss becomes detectable.

// ============================================================================
// SECTION: Degradation Kinds
// ============================================================================

/// Degradation condition classification.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradationKind {
    /// The audit sink rejected an append; the entry was lost.
    AuditSink,
    /// A notification failed to deliver; the transition stands regardless.
    Notification,
    /// An anchor call failed and will be retried.
    AnchorRetry,
    /// An anchor job exhausted its retry budget; the record stays unanchored.
    AnchorExhausted,
}

impl DegradationKind {
    /// Returns a stable label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuditSink => "audit_sink",
            Self::Notification => "notification",
            Self::AnchorRetry => "anchor_retry",
            Self::AnchorExhausted => "anchor_exhausted",
        }
    }
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Metrics sink for engine degradations.
pub trait EngineMetrics: Send + Sync {
    /// Records a degradation event with a short detail string.
    fn record_degradation(&self, kind: DegradationKind, detail: &str);
}

/// No-op metrics sink.
///
/// # Invariants
/// - Metrics are intentionally discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl EngineMetrics for NoopMetrics {
    fn record_degradation(&self, _kind: DegradationKind, _detail: &str) {}
}
