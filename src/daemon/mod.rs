//! Daemon subsystem: job registry and workers, main loop, signal handling.

#[cfg(feature = "daemon")]
pub mod loop_main;
pub mod scheduler;
#[cfg(feature = "daemon")]
pub mod signals;
