//! Crate-internal logging macros.
//!
//! `log_event!(level, ...)` forwards to `tracing` when the `tracing` feature is
//! on, otherwise to `log` when `logging` is on. With neither, the arguments are
//! still passed through `format_args!` so call sites keep type-checking.

macro_rules! log_event {
    ($level:ident, $($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        { tracing::$level!($($arg)*); }

        #[cfg(all(not(feature = "tracing"), feature = "logging"))]
        { log::$level!($($arg)*); }

        #[cfg(not(any(feature = "tracing", feature = "logging")))]
        { let _ = format_args!($($arg)*); }
    }};
}

#[allow(unused_macros)]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::observability::log_event!(debug, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::observability::log_event!(info, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::observability::log_event!(warn, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::observability::log_event!(error, $($arg)*) };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_event;
pub(crate) use log_info;
pub(crate) use log_warn;
