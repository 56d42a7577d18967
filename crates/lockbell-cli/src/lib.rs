//! Lockbell CLI - settings, logging, and demo commands for the `lockbell` binary

pub mod commands;
pub mod logging;
pub mod settings;
pub mod shutdown;

pub use settings::{Cli, Command, Settings};
