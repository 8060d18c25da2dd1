//! Platform collaborators: filesystem access.

pub mod fs;
