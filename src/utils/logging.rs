//! Logging helpers for the tracker.
//!
//! Modules that want chatty diagnostics gate them behind a module-level
//! `ENABLE_LOGS` flag and use the exported macros:
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_debug, log_info};
//!
//! log_info!("session {} started", session_id);
//! ```
//!
//! Plain `log::` calls are still fine for messages that must never be muted
//! (delivery drops, storage failures).

/// Logs at info level when the calling module's `ENABLE_LOGS` is set.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        if ENABLE_LOGS {
            log::info!(target: "pagetrack", $($arg)*);
        }
    }};
}

/// Logs at warn level when the calling module's `ENABLE_LOGS` is set.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        if ENABLE_LOGS {
            log::warn!(target: "pagetrack", $($arg)*);
        }
    }};
}

/// Logs at error level when the calling module's `ENABLE_LOGS` is set.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        if ENABLE_LOGS {
            log::error!(target: "pagetrack", $($arg)*);
        }
    }};
}

/// Logs at debug level when the calling module's `ENABLE_LOGS` is set.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        if ENABLE_LOGS {
            log::debug!(target: "pagetrack", $($arg)*);
        }
    }};
}

/// Installs `env_logger`, honouring `RUST_LOG` and defaulting to `info`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}
