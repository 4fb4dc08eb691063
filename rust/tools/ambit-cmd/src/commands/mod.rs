//! Command implementations for ambit-cmd

pub mod check_config;
pub mod simulate;
