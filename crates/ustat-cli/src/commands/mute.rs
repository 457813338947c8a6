//! Mute command for opting out of "not a git repository" notices.

use anyhow::{Result, bail};
use ustat_core::{StatsStore, UsageLedger};

use crate::Config;

/// Persists the opt-out.
///
/// A running `ustat watch` overwrites the file on its next save; editors
/// should send a `repository_warning_dismissed` event to it instead.
pub fn run(config: &Config) -> Result<()> {
    let mut ledger = UsageLedger::initialize(StatsStore::new(&config.stats_path));
    ledger.dismiss_repository_warning();

    if !ledger.reconcile_and_persist() {
        bail!("failed to save {}", config.stats_path.display());
    }

    println!("Git repository notices muted.");
    println!("Saved to: {}", config.stats_path.display());
    Ok(())
}
