// crates/consent-gate-config/src/lib.rs
// ============================================================================
// Module: Consent Gate Config Library
// Description: Canonical config model and validation for Consent Gate.
// Purpose: Single source of truth for consent-gate.toml semantics.
// Dependencies: consent-gate-core, consent-gate-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `consent-gate-config` defines the canonical configuration model for
//! Consent Gate. Loading is strict and fail-closed: oversized files, invalid
//! UTF-8, unknown values, and out-of-range knobs are all rejected before any
//! engine is constructed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::AuditConfig;
pub use config::ConfigError;
pub use config::ConsentConfig;
pub use config::ConsentGateConfig;
pub use config::PaymentConfig;
pub use config::StoreBackend;
pub use config::StoreConfig;
pub use config::SweepConfig;
