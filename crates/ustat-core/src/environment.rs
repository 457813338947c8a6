//! Point-in-time facts about the workspace and machine.
//!
//! Probes shell out to `git` and OS tools; the parsers for their output live
//! here so they can be tested without a repository or a particular OS.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ledger::{DEFAULT_BRANCH, UNKNOWN};

/// Branch reported when the workspace isn't inside a git work tree.
pub const NOT_A_REPOSITORY: &str = "Not a Git repository";

static PRETTY_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^PRETTY_NAME=(.*)$").unwrap());

/// Result of one environment probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub operating_system: String,
    pub current_shell: String,
    pub current_user: String,
    /// Whether the workspace is inside a git work tree.
    pub in_repository: bool,
    pub current_git_branch: String,
    pub list_of_git_branches: Vec<String>,
    pub total_git_commits: u64,
    /// Unix seconds, `0` when unknown.
    pub most_recent_git_commit_time: i64,
    pub most_recent_git_commit_message: String,
    pub running_applications: Vec<String>,
}

impl Default for EnvironmentSnapshot {
    fn default() -> Self {
        Self {
            operating_system: UNKNOWN.to_string(),
            current_shell: UNKNOWN.to_string(),
            current_user: UNKNOWN.to_string(),
            in_repository: false,
            current_git_branch: DEFAULT_BRANCH.to_string(),
            list_of_git_branches: Vec::new(),
            total_git_commits: 0,
            most_recent_git_commit_time: 0,
            most_recent_git_commit_message: String::new(),
            running_applications: Vec::new(),
        }
    }
}

/// Extracts `PRETTY_NAME` from `/etc/os-release` content, unquoted.
pub fn parse_os_release(content: &str) -> Option<String> {
    let caps = PRETTY_NAME_RE.captures(content)?;
    let value = caps[1].trim().trim_matches('"').trim_matches('\'');
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Human-readable OS description.
///
/// `os` is a `std::env::consts::OS` value; `detail` is the distribution
/// name or version if one could be determined.
pub fn describe_os(os: &str, detail: Option<&str>) -> String {
    match (os, detail) {
        ("windows", Some(version)) => format!("Microsoft Windows, Version: {version}"),
        ("windows", None) => "Microsoft Windows".to_string(),
        ("macos", Some(version)) => format!("Apple macOS, Version: {version}"),
        ("macos", None) => "Apple macOS".to_string(),
        ("linux", Some(distro)) => format!("Linux, Distribution: {distro}"),
        ("linux", None) => "Linux".to_string(),
        (other, _) => format!("Unsupported operating system: {other}"),
    }
}

/// Parses `git rev-list --count HEAD` output.
pub fn parse_commit_count(output: &str) -> Option<u64> {
    output.trim().parse().ok()
}

/// Parses `git branch --format=%(refname:short)` output.
pub fn parse_branch_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Parses `git log -1 --format=%ct%n%s` output into (unix seconds, subject).
pub fn parse_last_commit(output: &str) -> Option<(i64, String)> {
    let mut lines = output.lines();
    let timestamp = lines.next()?.trim().parse().ok()?;
    let message = lines.next().unwrap_or_default().trim().to_string();
    Some((timestamp, message))
}

/// Sorts and de-duplicates process names, dropping empty ones.
pub fn normalize_applications<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut names: Vec<String> = names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    names.sort_by(|a, b| {
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b))
    });
    names.dedup();
    names
}
