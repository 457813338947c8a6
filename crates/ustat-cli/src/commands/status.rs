//! Status command for showing stored usage totals.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::{Context, Result};
use ustat_core::format::{format_duration, format_unix_seconds};
use ustat_core::{LedgerView, StatsStore, UsageLedger};

use crate::Config;

pub fn run<W: Write>(writer: &mut W, config: &Config, json: bool) -> Result<()> {
    let ledger = UsageLedger::initialize(StatsStore::new(&config.stats_path));

    if json {
        let json = serde_json::to_string_pretty(ledger.totals())
            .context("failed to serialize usage totals")?;
        writeln!(writer, "{json}")?;
        return Ok(());
    }

    let location = config.stats_path.display().to_string();
    write!(writer, "{}", render(&ledger.view(), &location))?;
    Ok(())
}

/// Renders the grouped report shown by `ustat status`.
pub fn render(view: &LedgerView, location: &str) -> String {
    let usage = view.lifetime();
    let totals = &view.totals;

    let branches = if totals.list_of_git_branches.is_empty() {
        "-".to_string()
    } else {
        totals.list_of_git_branches.join(", ")
    };
    let last_commit = format_unix_seconds(totals.most_recent_git_commit_time).map_or_else(
        || "-".to_string(),
        |time| format!("{} ({time})", totals.most_recent_git_commit_message),
    );

    let mut out = String::new();
    let _ = writeln!(out, "Usage statistics ({location})");
    section(&mut out, "Activity", &[
        ("Keystrokes", usage.keystrokes.to_string()),
        ("Files opened", usage.files_opened.to_string()),
        ("Selected text", usage.selected_text_length.to_string()),
    ]);
    section(&mut out, "Time", &[
        ("Focused", format_duration(usage.seconds_focused)),
        ("Unfocused", format_duration(usage.seconds_unfocused)),
        ("Active", format_duration(usage.seconds_active)),
    ]);
    section(&mut out, "Git", &[
        ("Branch", totals.current_git_branch.clone()),
        ("Branches", branches),
        ("Commits", totals.total_git_commits.to_string()),
        ("Last commit", last_commit),
    ]);

    let mut environment = vec![
        ("Operating system", totals.operating_system.clone()),
        ("Shell", totals.current_shell.clone()),
        ("User", totals.current_user.clone()),
    ];
    if !view.running_applications.is_empty() {
        environment.push((
            "Applications",
            format!("{} running", view.running_applications.len()),
        ));
    }
    section(&mut out, "Environment", &environment);

    out
}

fn section(out: &mut String, title: &str, rows: &[(&str, String)]) {
    let _ = writeln!(out, "{title}");
    for (label, value) in rows {
        let _ = writeln!(out, "  {label:<18}{value}");
    }
}

/// One-line summary printed by `ustat watch --live`.
pub fn summary_line(view: &LedgerView) -> String {
    let usage = view.lifetime();
    format!(
        "keystrokes {} | files {} | selected {} | focused {} | active {}",
        usage.keystrokes,
        usage.files_opened,
        usage.selected_text_length,
        format_duration(usage.seconds_focused),
        format_duration(usage.seconds_active),
    )
}
