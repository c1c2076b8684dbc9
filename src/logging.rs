//! Logging macros
//!
//! One set of macros for every build:
//! - `defmt` feature: forwarded to `defmt`
//! - Host unit tests: printed with `println!`
//! - Otherwise: compiled out
//!
//! Operator-facing text (boot report, task ready lines) does not go through
//! these macros; it is written to the debug console instead.

/// Log informational message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::info!($($arg)*);

        #[cfg(all(not(feature = "defmt"), test))]
        println!("[INFO] {}", format!($($arg)*));
    }};
}

/// Log warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($arg)*);

        #[cfg(all(not(feature = "defmt"), test))]
        println!("[WARN] {}", format!($($arg)*));
    }};
}

/// Log error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::error!($($arg)*);

        #[cfg(all(not(feature = "defmt"), test))]
        println!("[ERROR] {}", format!($($arg)*));
    }};
}

/// Log debug message (only with the `debug` feature)
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        #[cfg(all(feature = "defmt", feature = "debug"))]
        ::defmt::debug!($($arg)*);

        #[cfg(all(not(feature = "defmt"), feature = "debug", test))]
        println!("[DEBUG] {}", format!($($arg)*));
    }};
}
