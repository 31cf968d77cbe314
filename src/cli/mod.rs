//! CLI command implementations.

pub mod clean;
pub mod debug;
pub mod gates;
pub mod hook;
pub mod list;
