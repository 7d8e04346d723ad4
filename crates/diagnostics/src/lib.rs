// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Structured logging shared by the filetable crates.
//!
//! Logging is off unless `FILETABLE_LOG` names a level:
//! - `FILETABLE_LOG=off` (default) - no logs
//! - `FILETABLE_LOG=error` / `warn` - failures only
//! - `FILETABLE_LOG=info` - conversions, refreshes, ledger writes
//! - `FILETABLE_LOG=debug` - cache hits, pruning decisions, fingerprints

use std::sync::Once;

// Re-export emit so the macros resolve from any crate
pub use emit;

/// Environment variable consulted by [`init_diagnostics`].
pub const LOG_ENV: &str = "FILETABLE_LOG";

static INIT: Once = Once::new();

/// Map a level name to an emit level. `None` means logging is off.
pub fn parse_level(name: &str) -> Result<Option<emit::Level>, String> {
    match name.trim().to_ascii_lowercase().as_str() {
        "" | "off" => Ok(None),
        "error" => Ok(Some(emit::Level::Error)),
        "warn" => Ok(Some(emit::Level::Warn)),
        "info" => Ok(Some(emit::Level::Info)),
        "debug" => Ok(Some(emit::Level::Debug)),
        other => Err(format!("unknown log level '{other}'")),
    }
}

/// Initialize diagnostics from the `FILETABLE_LOG` environment variable.
///
/// Safe to call more than once; only the first call has an effect.
pub fn init_diagnostics() {
    let level = std::env::var(LOG_ENV).unwrap_or_else(|_| "off".to_string());
    init_with_level(&level);
}

/// Initialize diagnostics with an explicit level name (CLI override).
pub fn init_with_level(level: &str) {
    INIT.call_once(|| {
        let min = match parse_level(level) {
            Ok(Some(min)) => min,
            Ok(None) => return,
            Err(msg) => {
                // Bootstrap warning, the emitter is not running yet
                eprintln!("Warning: {msg} in {LOG_ENV}, using 'info'");
                emit::Level::Info
            }
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(min))
            .init();

        // The runtime lives for the rest of the process
        std::mem::forget(rt);
    });
}

/// Log basic operations (conversions, refreshes, ledger writes).
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Log detailed diagnostics (cache hits, pruning, fingerprints).
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Log recoverable problems (deferred refresh failures, skipped files).
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Log failures that stop an operation.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

pub use init_diagnostics as init;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_safe_to_call_multiple_times() {
        init_diagnostics();
        init_diagnostics();
        init_with_level("debug");
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("off"), Ok(None));
        assert_eq!(parse_level(""), Ok(None));
        assert_eq!(parse_level("DEBUG"), Ok(Some(emit::Level::Debug)));
        assert_eq!(parse_level(" warn "), Ok(Some(emit::Level::Warn)));
        assert!(parse_level("verbose").is_err());
    }

    #[test]
    fn test_macros_compile() {
        info!("Test message");
        debug!("Debug message with {value}", value: 42);
        warn!("Warning message");
        error!("Error message");
    }
}
