//! Logging setup.
//!
//! `info` by default, `debug` when diagnostics are requested. `RUST_LOG`
//! still wins over both.

use log::LevelFilter;

pub const DIAGNOSTICS_ENV_VAR: &str = "DROPWATCH_DIAGNOSTICS";

pub fn default_level(diagnostics: bool) -> LevelFilter {
    if diagnostics {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Whether the diagnostics variable asks for verbose output.
pub fn diagnostics_requested(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

/// Initialize the logging system. Call this once at startup.
pub fn init_logging() {
    let diagnostics = diagnostics_requested(std::env::var(DIAGNOSTICS_ENV_VAR).ok().as_deref());

    env_logger::Builder::new()
        .filter_level(default_level(diagnostics))
        .parse_default_env()
        .format_timestamp_millis()
        .format_module_path(false)
        .init();

    log::debug!("[DiagnosticLogger] Logging initialized (diagnostics: {})", diagnostics);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_flag_parsing() {
        assert!(diagnostics_requested(Some("1")));
        assert!(diagnostics_requested(Some(" TRUE ")));
        assert!(!diagnostics_requested(Some("0")));
        assert!(!diagnostics_requested(None));
        assert_eq!(default_level(true), LevelFilter::Debug);
        assert_eq!(default_level(false), LevelFilter::Info);
    }
}
