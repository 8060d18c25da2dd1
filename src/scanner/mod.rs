//! Directory scanning and age-based retention.

pub mod listing;
pub mod retention;
