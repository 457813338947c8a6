//! Usage tracker CLI library.
//!
//! This crate provides the CLI interface, the environment probe and the
//! tracker loop that drives the usage ledger.

mod cli;
pub mod commands;
mod config;
pub mod probe;
pub mod tracker;

pub use cli::{Cli, Commands};
pub use config::Config;
