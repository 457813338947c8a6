//! Environment probe: git state, OS identity and running applications.
//!
//! Every external command is best effort. Failures are logged at `debug`
//! and replaced with sentinel values so a broken `git` or an unusual OS
//! never stops tracking.

use std::ffi::OsStr;
use std::path::Path;

use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use tokio::process::Command;
use ustat_core::environment::{
    NOT_A_REPOSITORY, describe_os, normalize_applications, parse_branch_list, parse_commit_count,
    parse_last_commit, parse_os_release,
};
use ustat_core::{EnvironmentSnapshot, UNKNOWN};

/// Git facts for the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GitFacts {
    in_repository: bool,
    branch: String,
    branches: Vec<String>,
    commits: u64,
    last_commit: Option<(i64, String)>,
}

impl GitFacts {
    fn outside_repository() -> Self {
        Self {
            in_repository: false,
            branch: NOT_A_REPOSITORY.to_string(),
            branches: Vec::new(),
            commits: 0,
            last_commit: None,
        }
    }
}

/// Runs every probe concurrently and assembles a snapshot.
pub async fn probe_environment(workspace: Option<&Path>) -> EnvironmentSnapshot {
    let (git, operating_system, running_applications) =
        tokio::join!(probe_git(workspace), probe_os(), running_applications());

    let (commit_time, commit_message) = git.last_commit.unwrap_or_default();

    EnvironmentSnapshot {
        operating_system,
        current_shell: env_or_unknown(&["SHELL", "ComSpec"]),
        current_user: env_or_unknown(&["USER", "USERNAME"]),
        in_repository: git.in_repository,
        current_git_branch: git.branch,
        list_of_git_branches: git.branches,
        total_git_commits: git.commits,
        most_recent_git_commit_time: commit_time,
        most_recent_git_commit_message: commit_message,
        running_applications,
    }
}

async fn probe_git(workspace: Option<&Path>) -> GitFacts {
    let inside = run("git", &["rev-parse", "--is-inside-work-tree"], workspace)
        .await
        .is_some_and(|out| out.trim() == "true");
    if !inside {
        tracing::debug!(?workspace, "workspace is not a git repository");
        return GitFacts::outside_repository();
    }

    let (branch, count, branches, last) = tokio::join!(
        run("git", &["rev-parse", "--abbrev-ref", "HEAD"], workspace),
        run("git", &["rev-list", "--count", "HEAD"], workspace),
        run("git", &["branch", "--format=%(refname:short)"], workspace),
        run("git", &["log", "-1", "--format=%ct%n%s"], workspace),
    );

    GitFacts {
        in_repository: true,
        branch: branch
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string()),
        branches: branches.as_deref().map(parse_branch_list).unwrap_or_default(),
        commits: count.as_deref().and_then(parse_commit_count).unwrap_or(0),
        last_commit: last.as_deref().and_then(parse_last_commit),
    }
}

async fn probe_os() -> String {
    let os = std::env::consts::OS;
    let detail = match os {
        "linux" => tokio::fs::read_to_string("/etc/os-release")
            .await
            .ok()
            .and_then(|content| parse_os_release(&content)),
        "macos" => run("sw_vers", &["-productVersion"], None)
            .await
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        "windows" => System::os_version(),
        _ => None,
    };
    describe_os(os, detail.as_deref())
}

async fn running_applications() -> Vec<String> {
    let listing = tokio::task::spawn_blocking(|| {
        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new()),
        );
        let names = system.processes().values().map(|process| {
            let name: &OsStr = process.name().as_ref();
            name.to_string_lossy().into_owned()
        });
        normalize_applications(names)
    })
    .await;

    listing.unwrap_or_else(|e| {
        tracing::debug!(error = %e, "process listing failed");
        Vec::new()
    })
}

/// Runs a command and returns its stdout if it exits successfully.
async fn run(program: &str, args: &[&str], dir: Option<&Path>) -> Option<String> {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }

    match command.output().await {
        Ok(output) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(output) => {
            tracing::debug!(
                program,
                ?args,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "probe command failed"
            );
            None
        }
        Err(e) => {
            tracing::debug!(program, ?args, error = %e, "failed to run probe command");
            None
        }
    }
}

fn env_or_unknown(names: &[&str]) -> String {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| UNKNOWN.to_string())
}
