//! Session and lifetime usage counters.
//!
//! The ledger owns two records: [`Totals`], the lifetime values last read
//! from or written to the [`StatsStore`], and a session of [`UsageCounters`]
//! accumulated since the last reconciliation. At any instant the stored
//! totals plus the session equal the true lifetime value.
//!
//! Reconciliation folds the session into the totals and resets the session
//! in one step, then writes the totals. A failed write leaves the in-memory
//! totals correct so the next reconciliation can still persist them.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::environment::EnvironmentSnapshot;
use crate::store::StatsStore;
use crate::warning::RepositoryWarningGate;

/// Branch reported before any probe has run.
pub const DEFAULT_BRANCH: &str = "None";

/// Placeholder for snapshot strings no probe has filled in.
pub const UNKNOWN: &str = "Unknown";

/// Counters that accumulate during a session and fold into the totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageCounters {
    #[serde(rename = "totalKeyStrokes")]
    pub keystrokes: u64,
    #[serde(rename = "totalFilesOpened")]
    pub files_opened: u64,
    #[serde(rename = "totalNumberOfSelectedText")]
    pub selected_text_length: u64,
    #[serde(rename = "totalSecondsWhilstWindowIsFocused")]
    pub seconds_focused: u64,
    #[serde(rename = "totalSecondsOutsideVSCode")]
    pub seconds_unfocused: u64,
    /// Always `seconds_focused + seconds_unfocused`.
    #[serde(rename = "totalSecondsWhilstVSCodeIsActive")]
    pub seconds_active: u64,
}

impl UsageCounters {
    /// Adds every counter of `other` into `self`.
    pub const fn absorb(&mut self, other: &Self) {
        self.keystrokes = self.keystrokes.saturating_add(other.keystrokes);
        self.files_opened = self.files_opened.saturating_add(other.files_opened);
        self.selected_text_length = self
            .selected_text_length
            .saturating_add(other.selected_text_length);
        self.seconds_focused = self.seconds_focused.saturating_add(other.seconds_focused);
        self.seconds_unfocused = self
            .seconds_unfocused
            .saturating_add(other.seconds_unfocused);
        self.recompute_active();
    }

    /// Returns the sum of two sets of counters.
    #[must_use]
    pub const fn combined(mut self, other: &Self) -> Self {
        self.absorb(other);
        self
    }

    /// Refreshes the derived active-seconds cache.
    pub const fn recompute_active(&mut self) {
        self.seconds_active = self.seconds_focused.saturating_add(self.seconds_unfocused);
    }

    /// Returns `true` if nothing has been counted.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Lifetime usage totals, persisted as a single JSON document.
///
/// Missing keys keep their defaults and unknown keys are ignored, so files
/// written by older or newer versions still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Totals {
    pub operating_system: String,
    pub current_shell: String,
    pub current_user: String,
    pub current_git_branch: String,
    pub list_of_git_branches: Vec<String>,
    /// Commit count reported by the latest probe. Overwritten, not summed.
    pub total_git_commits: u64,
    /// Unix milliseconds of the last "not a repository" notice.
    pub last_git_warning_time: i64,
    /// Unix seconds of the most recent commit.
    pub most_recent_git_commit_time: i64,
    pub most_recent_git_commit_message: String,
    /// Cleared for good once the user opts out of repository notices.
    pub show_git_warning: bool,
    #[serde(flatten)]
    pub usage: UsageCounters,
}

impl Default for Totals {
    fn default() -> Self {
        Self {
            operating_system: UNKNOWN.to_string(),
            current_shell: UNKNOWN.to_string(),
            current_user: UNKNOWN.to_string(),
            current_git_branch: DEFAULT_BRANCH.to_string(),
            list_of_git_branches: Vec::new(),
            total_git_commits: 0,
            last_git_warning_time: 0,
            most_recent_git_commit_time: 0,
            most_recent_git_commit_message: String::new(),
            show_git_warning: true,
            usage: UsageCounters::default(),
        }
    }
}

/// Read-only copy of the ledger handed to presentation code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerView {
    pub totals: Totals,
    pub session: UsageCounters,
    /// Names of running applications from the latest probe. Not persisted.
    pub running_applications: Vec<String>,
}

impl LedgerView {
    /// Stored totals plus the unreconciled session.
    pub const fn lifetime(&self) -> UsageCounters {
        self.totals.usage.combined(&self.session)
    }
}

/// Owns the usage totals, the current session and the backing store.
///
/// All mutation goes through `&mut self`, so a single owner applies events
/// in program order. Every mutating call publishes a fresh [`LedgerView`]
/// to subscribers.
pub struct UsageLedger {
    store: StatsStore,
    totals: Totals,
    session: UsageCounters,
    running_applications: Vec<String>,
    changes: watch::Sender<LedgerView>,
}

impl UsageLedger {
    /// Loads totals from `store`, falling back to defaults.
    ///
    /// A missing, unreadable or unparseable file is treated as "no prior
    /// data". This never fails so it can't keep the host from starting.
    pub fn initialize(store: StatsStore) -> Self {
        let totals = match store.load() {
            Ok(Some(totals)) => {
                tracing::debug!(path = %store.path().display(), "loaded usage totals");
                totals
            }
            Ok(None) => {
                tracing::debug!(path = %store.path().display(), "no stored usage totals");
                Totals::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load usage totals, starting from zero");
                Totals::default()
            }
        };

        let view = LedgerView {
            totals: totals.clone(),
            ..LedgerView::default()
        };
        let (changes, _) = watch::channel(view);

        Self {
            store,
            totals,
            session: UsageCounters::default(),
            running_applications: Vec::new(),
            changes,
        }
    }

    pub const fn totals(&self) -> &Totals {
        &self.totals
    }

    pub const fn session(&self) -> &UsageCounters {
        &self.session
    }

    pub const fn store(&self) -> &StatsStore {
        &self.store
    }

    /// Returns a snapshot of the current values.
    pub fn view(&self) -> LedgerView {
        LedgerView {
            totals: self.totals.clone(),
            session: self.session,
            running_applications: self.running_applications.clone(),
        }
    }

    /// Subscribes to change notifications.
    ///
    /// The receiver sees a new [`LedgerView`] after every mutating call.
    pub fn subscribe(&self) -> watch::Receiver<LedgerView> {
        self.changes.subscribe()
    }

    pub fn record_keystroke_delta(&mut self, count: u64) {
        self.session.keystrokes = self.session.keystrokes.saturating_add(count);
        self.notify();
    }

    /// Counts one opened document. Callers filter out duplicate opens.
    pub fn record_file_opened(&mut self) {
        self.session.files_opened = self.session.files_opened.saturating_add(1);
        self.notify();
    }

    /// Counts only growth of the selected length; shrinking adds nothing.
    pub fn record_selection_delta(&mut self, new_length: u64, previous_length: u64) {
        let growth = new_length.saturating_sub(previous_length);
        self.session.selected_text_length = self.session.selected_text_length.saturating_add(growth);
        self.notify();
    }

    /// Accounts for one elapsed second.
    pub fn tick(&mut self, is_window_focused: bool) {
        if is_window_focused {
            self.session.seconds_focused = self.session.seconds_focused.saturating_add(1);
        } else {
            self.session.seconds_unfocused = self.session.seconds_unfocused.saturating_add(1);
        }
        self.session.recompute_active();
        self.notify();
    }

    /// Overwrites the point-in-time fields. The latest probe wins.
    pub fn apply_environment_snapshot(&mut self, snapshot: EnvironmentSnapshot) {
        let totals = &mut self.totals;
        totals.operating_system = snapshot.operating_system;
        totals.current_shell = snapshot.current_shell;
        totals.current_user = snapshot.current_user;
        totals.current_git_branch = snapshot.current_git_branch;
        totals.list_of_git_branches = snapshot.list_of_git_branches;
        totals.total_git_commits = snapshot.total_git_commits;
        totals.most_recent_git_commit_time = snapshot.most_recent_git_commit_time;
        totals.most_recent_git_commit_message = snapshot.most_recent_git_commit_message;
        self.running_applications = snapshot.running_applications;
        self.notify();
    }

    /// Opts out of repository notices. Sticky across restarts once saved.
    pub fn dismiss_repository_warning(&mut self) {
        self.totals.show_git_warning = false;
        self.notify();
    }

    /// Returns `true` if a "not a repository" notice should be shown now,
    /// recording the notice time when it should.
    pub fn should_warn_about_repository(
        &mut self,
        gate: &RepositoryWarningGate,
        now_ms: i64,
    ) -> bool {
        let warn = gate.check(&mut self.totals, now_ms);
        if warn {
            self.notify();
        }
        warn
    }

    /// Folds the session into the totals, resets the session and writes
    /// the totals to the store.
    ///
    /// Safe to call repeatedly: an empty session contributes nothing. Write
    /// failures are logged and swallowed; returns whether the write
    /// succeeded.
    pub fn reconcile_and_persist(&mut self) -> bool {
        let session = std::mem::take(&mut self.session);
        self.totals.usage.absorb(&session);

        let persisted = match self.store.save(&self.totals) {
            Ok(()) => {
                tracing::debug!(
                    path = %self.store.path().display(),
                    keystrokes = session.keystrokes,
                    seconds_active = session.seconds_active,
                    "persisted usage totals"
                );
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to persist usage totals");
                false
            }
        };

        self.notify();
        persisted
    }

    fn notify(&self) {
        self.changes.send_replace(self.view());
    }
}
