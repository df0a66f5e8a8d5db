//! CLI command implementations

pub mod deprovision;
pub mod provision;
pub mod status;
