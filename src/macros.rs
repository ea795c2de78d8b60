// src/macros.rs

//
// Logging macros
//
// logging feature enabled  → tracing, under the `queue_rpc` target
// logging feature disabled → errors go to stderr, everything else is
//                            type-checked and discarded
//

#![allow(unused_macros)]

// --------------------
// ERROR
// --------------------

macro_rules! log_error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "logging")]
        tracing::error!(target: "queue_rpc", $($arg)*);

        #[cfg(not(feature = "logging"))]
        eprintln!("queue_rpc: {}", format_args!($($arg)*));
    }};
}

// --------------------
// WARN
// --------------------

macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "logging")]
        tracing::warn!(target: "queue_rpc", $($arg)*);

        #[cfg(not(feature = "logging"))]
        let _ = format_args!($($arg)*);
    }};
}

// --------------------
// INFO
// --------------------

macro_rules! log_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "logging")]
        tracing::info!(target: "queue_rpc", $($arg)*);

        #[cfg(not(feature = "logging"))]
        let _ = format_args!($($arg)*);
    }};
}

// --------------------
// DEBUG
// --------------------

macro_rules! log_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "logging")]
        tracing::debug!(target: "queue_rpc", $($arg)*);

        #[cfg(not(feature = "logging"))]
        let _ = format_args!($($arg)*);
    }};
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
