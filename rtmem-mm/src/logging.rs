//! Unified logging support for rtmem-mm
//!
//! This module provides a logging interface that compiles away when the
//! `log` feature is disabled, without requiring #[cfg] attributes at every
//! call site. Arguments are still type-checked through `format_args!` so that
//! values only used in log lines do not trigger unused warnings.

/// Trace-level logging
#[macro_export]
macro_rules! mm_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        log::trace!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = format_args!($($arg)*); }
    }};
}

/// Debug-level logging
#[macro_export]
macro_rules! mm_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        log::debug!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = format_args!($($arg)*); }
    }};
}

/// Info-level logging
#[macro_export]
macro_rules! mm_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        log::info!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = format_args!($($arg)*); }
    }};
}

/// Warn-level logging
#[macro_export]
macro_rules! mm_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        log::warn!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = format_args!($($arg)*); }
    }};
}

/// Error-level logging
#[macro_export]
macro_rules! mm_error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        log::error!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = format_args!($($arg)*); }
    }};
}
