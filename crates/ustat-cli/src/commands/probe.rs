//! Probe command for inspecting what the environment probe reports.

use std::io::Write;

use anyhow::{Context, Result};
use ustat_core::EnvironmentSnapshot;

use crate::{Config, probe};

/// Runs one probe against the configured workspace and prints it as JSON.
pub fn run<W: Write>(writer: &mut W, config: &Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let snapshot = runtime.block_on(probe::probe_environment(config.workspace.as_deref()));

    write_snapshot(writer, &snapshot)
}

fn write_snapshot<W: Write>(writer: &mut W, snapshot: &EnvironmentSnapshot) -> Result<()> {
    let json =
        serde_json::to_string_pretty(snapshot).context("failed to serialize environment")?;
    writeln!(writer, "{json}")?;
    Ok(())
}
