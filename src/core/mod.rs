//! Core types: errors, configuration, time.

pub mod clock;
pub mod config;
pub mod errors;
