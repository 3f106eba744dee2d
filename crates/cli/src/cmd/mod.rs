//! CLI command implementations

pub mod config;
pub mod fingerprint;
pub mod names;
pub mod stat;
pub mod watch;
