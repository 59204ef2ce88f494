//! Config load validation tests for consent-gate-config.
// crates/consent-gate-config/tests/load_validation.rs
// =============================================================================
// Module: Config Load Validation Tests
// Description: Validate config loading guards (path, size, encoding).
// Purpose: Ensure config input handling is strict and fail-closed.
// =============================================================================

use std::io::Write;
use std::path::Path;

use consent_gate_config::ConfigError;
use consent_gate_config::ConsentGateConfig;
use tempfile::NamedTempFile;

type TestResult = Result<(), String>;

fn assert_invalid(result: Result<ConsentGateConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config load".to_string()),
    }
}

#[test]
fn load_rejects_path_too_long() -> TestResult {
    let long_path = "a".repeat(5_000);
    let path = Path::new(&long_path);
    assert_invalid(ConsentGateConfig::load(Some(path)), "config path exceeds max length")?;
    Ok(())
}

#[test]
fn load_rejects_path_component_too_long() -> TestResult {
    let long_component = "a".repeat(300);
    let path = Path::new(&long_component);
    assert_invalid(ConsentGateConfig::load(Some(path)), "config path component too long")?;
    Ok(())
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    let payload = vec![b'a'; 1_048_577];
    file.write_all(&payload).map_err(|err| err.to_string())?;
    assert_invalid(ConsentGateConfig::load(Some(file.path())), "config file exceeds size limit")?;
    Ok(())
}

#[test]
fn load_rejects_non_utf8_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(&[0xFF, 0xFE, 0xFF]).map_err(|err| err.to_string())?;
    assert_invalid(ConsentGateConfig::load(Some(file.path())), "config file must be utf-8")?;
    Ok(())
}

#[test]
fn load_rejects_malformed_toml() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(b"[consent\nstandard_window_ms = 1")
        .map_err(|err| err.to_string())?;
    match ConsentGateConfig::load(Some(file.path())) {
        Err(ConfigError::Parse(_)) => Ok(()),
        Err(other) => Err(format!("expected parse error, got {other}")),
        Ok(_) => Err("expected parse error".to_string()),
    }
}

#[test]
fn load_rejects_invalid_values_after_parse() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(b"[sweep]\ninterval_ms = 1\n")
        .map_err(|err| err.to_string())?;
    assert_invalid(ConsentGateConfig::load(Some(file.path())), "sweep.interval_ms")?;
    Ok(())
}

#[test]
fn load_accepts_valid_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(
        b"[consent]\nurgent_window_ms = 3600000\n\n[store]\ntype = \"sqlite\"\npath = \
          \"data/consent.db\"\n",
    )
    .map_err(|err| err.to_string())?;
    let config = ConsentGateConfig::load(Some(file.path())).map_err(|err| err.to_string())?;
    let engine = config.to_engine_config();
    if engine.urgent_response_window_ms == 3_600_000 {
        Ok(())
    } else {
        Err("window override did not apply".to_string())
    }
}

#[test]
fn load_reports_missing_file_as_io_error() -> TestResult {
    let path = Path::new("does-not-exist/consent-gate.toml");
    match ConsentGateConfig::load(Some(path)) {
        Err(ConfigError::Io(_)) => Ok(()),
        Err(other) => Err(format!("expected io error, got {other}")),
        Ok(_) => Err("expected io error".to_string()),
    }
}
