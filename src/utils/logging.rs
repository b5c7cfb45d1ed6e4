//! Logger setup plus `log` wrappers that respect a per-module switch.
//!
//! A module opts in by defining the flag the macros read:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_info, log_warn, log_error};
//!
//! log_info!("Selected meter {}", meter_id);
//! ```

use log::LevelFilter;

/// Installs `env_logger` at `default_level`; `RUST_LOG` still wins when set.
/// Calling it twice is harmless.
pub fn init(default_level: &str) {
    let level = default_level
        .trim()
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::Info);

    let installed = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();

    if installed.is_ok() {
        log::debug!("Logging initialised at {level}");
    }
}

/// `log::info!` gated on the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// `log::warn!` gated on the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// `log::error!` gated on the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
