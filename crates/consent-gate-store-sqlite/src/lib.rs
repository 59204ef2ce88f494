// crates/consent-gate-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Consent State Store
// Description: Durable ConsentStateStore and AuditSink backends using SQLite.
// Purpose: Provide production-grade persistence for Consent Gate state.
// Dependencies: consent-gate-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides SQLite-backed implementations of the Consent Gate
//! state store and audit sink. Records are stored as canonical JSON bodies
//! with denormalized columns for lookups, compare-and-set updates, and the
//! single-pending index. Storage inputs are untrusted; loads fail closed on
//! malformed rows.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::MAX_RECORD_BYTES;
pub use store::SqliteConsentStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
