//! CLI subcommand implementations.

pub mod mute;
pub mod probe;
pub mod status;
pub mod watch;
