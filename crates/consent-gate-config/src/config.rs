// crates/consent-gate-config/src/config.rs
// ============================================================================
// Module: Consent Gate Configuration
// Description: Configuration loading and validation for Consent Gate.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: consent-gate-core, consent-gate-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Missing or invalid configuration fails closed: no default engine is
//! constructed from a file that parsed but did not validate. Every knob maps
//! onto an [`EngineConfig`] field or a store setting; defaults match the
//! engine's own defaults so an empty file is a valid configuration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use consent_gate_core::EngineConfig;
use consent_gate_core::MAX_DURATION_DAYS;
use consent_gate_core::MIN_DURATION_DAYS;
use consent_gate_core::QuoteSchedule;
use consent_gate_core::Urgency;
use consent_gate_core::runtime::DEFAULT_ANCHOR_MAX_ATTEMPTS;
use consent_gate_core::runtime::DEFAULT_PAYMENT_PENDING_WINDOW_MS;
use consent_gate_store_sqlite::SqliteStoreConfig;
use consent_gate_store_sqlite::SqliteStoreMode;
use consent_gate_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "consent-gate.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "CONSENT_GATE_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum allowed response window (one year).
pub(crate) const MAX_RESPONSE_WINDOW_MS: i64 = 366 * 24 * 60 * 60 * 1_000;
/// Maximum allowed payment pending window (one day).
pub(crate) const MAX_PAYMENT_PENDING_WINDOW_MS: i64 = 24 * 60 * 60 * 1_000;
/// Maximum allowed anchor attempt budget.
pub(crate) const MAX_ANCHOR_ATTEMPTS: u32 = 10;
/// Maximum allowed edit fee multiplier in percent.
pub(crate) const MAX_EDIT_FEE_PERCENT: u64 = 1_000;
/// Minimum allowed sweep interval in milliseconds.
pub(crate) const MIN_SWEEP_INTERVAL_MS: u64 = 1_000;
/// Maximum allowed sweep interval in milliseconds.
pub(crate) const MAX_SWEEP_INTERVAL_MS: u64 = 24 * 60 * 60 * 1_000;
/// Default sweep interval in milliseconds (one minute).
pub(crate) const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;
/// Maximum allowed audit retention in days.
pub(crate) const MAX_AUDIT_RETENTION_DAYS: u32 = 3_650;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Consent Gate configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsentGateConfig {
    /// Consent request configuration.
    #[serde(default)]
    pub consent: ConsentConfig,
    /// Payment gate configuration.
    #[serde(default)]
    pub payment: PaymentConfig,
    /// Expiry sweep configuration.
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Audit retention configuration.
    #[serde(default)]
    pub audit: AuditConfig,
    /// State store configuration.
    #[serde(default)]
    pub store: StoreConfig,
}

impl ConsentGateConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.consent.validate()?;
        self.payment.validate()?;
        self.sweep.validate()?;
        self.audit.validate()?;
        self.store.validate()?;
        Ok(())
    }

    /// Converts the validated configuration into engine settings.
    #[must_use]
    pub const fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            standard_response_window_ms: self.consent.standard_window_ms,
            urgent_response_window_ms: self.consent.urgent_window_ms,
            emergency_response_window_ms: self.consent.emergency_window_ms,
            payment_pending_window_ms: self.payment.pending_window_ms,
            anchor_max_attempts: self.sweep.anchor_max_attempts,
            max_duration_days: self.consent.max_duration_days,
            quotes: QuoteSchedule {
                standard_fee: self.payment.standard_fee,
                verified_fee: self.payment.verified_fee,
                edit_fee_percent: self.payment.edit_fee_percent,
            },
        }
    }
}

/// Consent request configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsentConfig {
    /// Response window for standard urgency in milliseconds.
    #[serde(default = "default_standard_window_ms")]
    pub standard_window_ms: i64,
    /// Response window for urgent requests in milliseconds.
    #[serde(default = "default_urgent_window_ms")]
    pub urgent_window_ms: i64,
    /// Response window for emergency requests in milliseconds.
    #[serde(default = "default_emergency_window_ms")]
    pub emergency_window_ms: i64,
    /// Maximum requestable access duration in days.
    #[serde(default = "default_max_duration_days")]
    pub max_duration_days: u32,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            standard_window_ms: default_standard_window_ms(),
            urgent_window_ms: default_urgent_window_ms(),
            emergency_window_ms: default_emergency_window_ms(),
            max_duration_days: default_max_duration_days(),
        }
    }
}

impl ConsentConfig {
    /// Validates consent window configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("consent.standard_window_ms", self.standard_window_ms),
            ("consent.urgent_window_ms", self.urgent_window_ms),
            ("consent.emergency_window_ms", self.emergency_window_ms),
        ] {
            if value <= 0 {
                return Err(ConfigError::Invalid(format!("{field} must be positive")));
            }
            if value > MAX_RESPONSE_WINDOW_MS {
                return Err(ConfigError::Invalid(format!("{field} exceeds one year")));
            }
        }
        if self.max_duration_days < MIN_DURATION_DAYS || self.max_duration_days > MAX_DURATION_DAYS
        {
            return Err(ConfigError::Invalid(format!(
                "consent.max_duration_days must be within [{MIN_DURATION_DAYS}, \
                 {MAX_DURATION_DAYS}]"
            )));
        }
        Ok(())
    }
}

/// Payment gate configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Window after which an unconfirmed pending-payment session is abandoned.
    #[serde(default = "default_pending_window_ms")]
    pub pending_window_ms: i64,
    /// Base session fee for standard-tier providers in micro-units.
    #[serde(default = "default_standard_fee")]
    pub standard_fee: u64,
    /// Base session fee for verified-tier providers in micro-units.
    #[serde(default = "default_verified_fee")]
    pub verified_fee: u64,
    /// Percent multiplier applied when the permission allows edits.
    #[serde(default = "default_edit_fee_percent")]
    pub edit_fee_percent: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            pending_window_ms: default_pending_window_ms(),
            standard_fee: default_standard_fee(),
            verified_fee: default_verified_fee(),
            edit_fee_percent: default_edit_fee_percent(),
        }
    }
}

impl PaymentConfig {
    /// Validates payment gate configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.pending_window_ms <= 0 {
            return Err(ConfigError::Invalid(
                "payment.pending_window_ms must be positive".to_string(),
            ));
        }
        if self.pending_window_ms > MAX_PAYMENT_PENDING_WINDOW_MS {
            return Err(ConfigError::Invalid(
                "payment.pending_window_ms exceeds one day".to_string(),
            ));
        }
        if self.verified_fee > self.standard_fee {
            return Err(ConfigError::Invalid(
                "payment.verified_fee must not exceed payment.standard_fee".to_string(),
            ));
        }
        if self.edit_fee_percent < 100 || self.edit_fee_percent > MAX_EDIT_FEE_PERCENT {
            return Err(ConfigError::Invalid(format!(
                "payment.edit_fee_percent must be within [100, {MAX_EDIT_FEE_PERCENT}]"
            )));
        }
        Ok(())
    }
}

/// Expiry sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Interval between sweep passes in milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub interval_ms: u64,
    /// Attempt budget per anchor job, including the first call.
    #[serde(default = "default_anchor_max_attempts")]
    pub anchor_max_attempts: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sweep_interval_ms(),
            anchor_max_attempts: default_anchor_max_attempts(),
        }
    }
}

impl SweepConfig {
    /// Validates sweep configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms < MIN_SWEEP_INTERVAL_MS || self.interval_ms > MAX_SWEEP_INTERVAL_MS {
            return Err(ConfigError::Invalid(format!(
                "sweep.interval_ms must be within [{MIN_SWEEP_INTERVAL_MS}, \
                 {MAX_SWEEP_INTERVAL_MS}]"
            )));
        }
        if self.anchor_max_attempts == 0 || self.anchor_max_attempts > MAX_ANCHOR_ATTEMPTS {
            return Err(ConfigError::Invalid(format!(
                "sweep.anchor_max_attempts must be within [1, {MAX_ANCHOR_ATTEMPTS}]"
            )));
        }
        Ok(())
    }
}

/// Audit retention configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditConfig {
    /// Optional retention horizon in days; unset keeps entries forever.
    #[serde(default)]
    pub retention_days: Option<u32>,
}

impl AuditConfig {
    /// Validates audit retention configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.retention_days {
            Some(0) => Err(ConfigError::Invalid(
                "audit.retention_days must be greater than zero".to_string(),
            )),
            Some(days) if days > MAX_AUDIT_RETENTION_DAYS => Err(ConfigError::Invalid(format!(
                "audit.retention_days exceeds {MAX_AUDIT_RETENTION_DAYS}"
            ))),
            _ => Ok(()),
        }
    }
}

/// State store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Use the in-memory store.
    #[default]
    Memory,
    /// Use the `SQLite`-backed durable store.
    Sqlite,
}

/// State store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Store backend type.
    #[serde(rename = "type", default)]
    pub backend: StoreBackend,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_store_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: None,
            busy_timeout_ms: default_store_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

impl StoreConfig {
    /// Validates state store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            StoreBackend::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid(
                        "memory store must not set path".to_string(),
                    ));
                }
                Ok(())
            }
            StoreBackend::Sqlite => {
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("sqlite store requires path".to_string())
                })?;
                validate_path_string("store.path", &path.to_string_lossy())
            }
        }
    }

    /// Converts the sqlite backend settings into a store configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the backend is not sqlite or the path is
    /// missing.
    pub fn to_sqlite_config(&self) -> Result<SqliteStoreConfig, ConfigError> {
        if self.backend != StoreBackend::Sqlite {
            return Err(ConfigError::Invalid(
                "store backend is not sqlite".to_string(),
            ));
        }
        let path = self
            .path
            .clone()
            .ok_or_else(|| ConfigError::Invalid("sqlite store requires path".to_string()))?;
        Ok(SqliteStoreConfig {
            path,
            busy_timeout_ms: self.busy_timeout_ms,
            journal_mode: self.journal_mode,
            sync_mode: self.sync_mode,
        })
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    let path = Path::new(trimmed);
    for component in path.components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Default response window for standard urgency.
fn default_standard_window_ms() -> i64 {
    Urgency::Standard.default_response_window_ms()
}

/// Default response window for urgent requests.
fn default_urgent_window_ms() -> i64 {
    Urgency::Urgent.default_response_window_ms()
}

/// Default response window for emergency requests.
fn default_emergency_window_ms() -> i64 {
    Urgency::Emergency.default_response_window_ms()
}

/// Default maximum requestable duration in days.
const fn default_max_duration_days() -> u32 {
    MAX_DURATION_DAYS
}

/// Default payment abandonment window.
const fn default_pending_window_ms() -> i64 {
    DEFAULT_PAYMENT_PENDING_WINDOW_MS
}

/// Default standard-tier session fee.
fn default_standard_fee() -> u64 {
    QuoteSchedule::default().standard_fee
}

/// Default verified-tier session fee.
fn default_verified_fee() -> u64 {
    QuoteSchedule::default().verified_fee
}

/// Default edit fee multiplier in percent.
fn default_edit_fee_percent() -> u64 {
    QuoteSchedule::default().edit_fee_percent
}

/// Default sweep interval.
const fn default_sweep_interval_ms() -> u64 {
    DEFAULT_SWEEP_INTERVAL_MS
}

/// Default anchor attempt budget.
const fn default_anchor_max_attempts() -> u32 {
    DEFAULT_ANCHOR_MAX_ATTEMPTS
}

/// Default store busy timeout.
const fn default_store_busy_timeout_ms() -> u64 {
    5_000
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]

    use super::*;

    #[test]
    fn empty_config_is_valid_and_matches_engine_defaults() {
        let config: ConsentGateConfig = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.to_engine_config(), EngineConfig::default());
    }

    #[test]
    fn window_override_flows_into_engine_config() {
        let config: ConsentGateConfig = toml::from_str(
            "[consent]\nurgent_window_ms = 3600000\n\n[payment]\nstandard_fee = 7000000\n",
        )
        .unwrap();
        config.validate().unwrap();
        let engine = config.to_engine_config();
        assert_eq!(engine.urgent_response_window_ms, 3_600_000);
        assert_eq!(engine.quotes.standard_fee, 7_000_000);
    }

    #[test]
    fn duration_cap_flows_into_engine_config() {
        let config: ConsentGateConfig =
            toml::from_str("[consent]\nmax_duration_days = 90\n").unwrap();
        config.validate().unwrap();
        assert_eq!(config.to_engine_config().max_duration_days, 90);
    }

    #[test]
    fn zero_window_is_rejected() {
        let config: ConsentGateConfig =
            toml::from_str("[consent]\nstandard_window_ms = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn verified_fee_above_standard_is_rejected() {
        let config: ConsentGateConfig =
            toml::from_str("[payment]\nstandard_fee = 100\nverified_fee = 200\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn edit_fee_below_full_price_is_rejected() {
        let config: ConsentGateConfig =
            toml::from_str("[payment]\nedit_fee_percent = 99\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn sqlite_backend_requires_path() {
        let config: ConsentGateConfig = toml::from_str("[store]\ntype = \"sqlite\"\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn memory_backend_rejects_path() {
        let config: ConsentGateConfig =
            toml::from_str("[store]\ntype = \"memory\"\npath = \"data/consent.db\"\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn sqlite_backend_converts_to_store_config() {
        let config: ConsentGateConfig = toml::from_str(
            "[store]\ntype = \"sqlite\"\npath = \"data/consent.db\"\nbusy_timeout_ms = 250\n",
        )
        .unwrap();
        config.validate().unwrap();
        let store = config.store.to_sqlite_config().unwrap();
        assert_eq!(store.path, PathBuf::from("data/consent.db"));
        assert_eq!(store.busy_timeout_ms, 250);
    }

    #[test]
    fn memory_backend_refuses_sqlite_conversion() {
        let config = ConsentGateConfig::default();
        assert!(config.store.to_sqlite_config().is_err());
    }

    #[test]
    fn zero_retention_is_rejected() {
        let config: ConsentGateConfig = toml::from_str("[audit]\nretention_days = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn anchor_attempts_out_of_range_is_rejected() {
        let config: ConsentGateConfig =
            toml::from_str("[sweep]\nanchor_max_attempts = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn duration_cap_out_of_range_is_rejected() {
        let config: ConsentGateConfig =
            toml::from_str("[consent]\nmax_duration_days = 400\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
