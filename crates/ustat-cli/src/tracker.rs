//! The single owner of the usage ledger.
//!
//! [`Tracker::run`] multiplexes inbound activity events, the per-second
//! tick, debounced selection evaluation, background probes and autosaves on
//! one task, so every ledger mutation happens in program order.
//!
//! Shutdown (cancellation or the end of the event stream) stops the tick,
//! drops pending debounce and probe work, and reconciles exactly once.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use ustat_core::activity::{keystroke_delta, selected_length};
use ustat_core::{ActivityEvent, EnvironmentSnapshot, RepositoryWarningGate, UsageLedger};

use crate::Config;
use crate::probe;

/// Every tick adds one second to the ledger.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Timing and probe settings for a tracker.
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// [`TICK_PERIOD`] outside of tests.
    pub tick_interval: Duration,
    pub selection_debounce: Duration,
    /// `None` disables environment probes.
    pub probe_interval: Option<Duration>,
    /// `None` persists only on shutdown.
    pub autosave_interval: Option<Duration>,
    pub warning_gate: RepositoryWarningGate,
    pub workspace: Option<PathBuf>,
}

impl TrackerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_interval: TICK_PERIOD,
            selection_debounce: config.selection_debounce(),
            probe_interval: config.probe_interval(),
            autosave_interval: config.autosave_interval(),
            warning_gate: RepositoryWarningGate::new(config.git_warning_cooldown_ms),
            workspace: config.workspace.clone(),
        }
    }
}

/// Results sent back to the tracker by its own background tasks.
#[derive(Debug)]
enum Message {
    SelectionSettled { generation: u64, length: u64 },
    Environment(EnvironmentSnapshot),
}

/// Drives a [`UsageLedger`] from activity events and timers.
pub struct Tracker {
    ledger: UsageLedger,
    settings: TrackerSettings,
    focused: bool,
    /// Selected length at the end of the last completed debounce window.
    settled_selection: u64,
    selection_generation: u64,
    pending_selection: Option<JoinHandle<()>>,
    probe_task: Option<JoinHandle<()>>,
    outbox: mpsc::UnboundedSender<Message>,
    inbox: mpsc::UnboundedReceiver<Message>,
}

impl Tracker {
    pub fn new(ledger: UsageLedger, settings: TrackerSettings) -> Self {
        let (outbox, inbox) = mpsc::unbounded_channel();
        Self {
            ledger,
            settings,
            focused: true,
            settled_selection: 0,
            selection_generation: 0,
            pending_selection: None,
            probe_task: None,
            outbox,
            inbox,
        }
    }

    /// Runs until `shutdown` is cancelled or `events` is closed, then
    /// persists and hands the ledger back.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ActivityEvent>,
        shutdown: CancellationToken,
    ) -> UsageLedger {
        let tick = self.settings.tick_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Probes fire immediately, autosaves one period in.
        let mut probes = self.settings.probe_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let mut autosave = self.settings.autosave_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::debug!("shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        tracing::debug!("activity stream closed");
                        break;
                    }
                },
                _ = ticker.tick() => self.ledger.tick(self.focused),
                Some(message) = self.inbox.recv() => self.handle(message),
                () = next_tick(&mut probes) => self.spawn_probe(),
                () = next_tick(&mut autosave) => {
                    self.ledger.reconcile_and_persist();
                }
            }
        }

        self.shutdown()
    }

    fn dispatch(&mut self, event: ActivityEvent) {
        match event {
            ActivityEvent::TextChanged { changes, .. } => {
                self.ledger.record_keystroke_delta(keystroke_delta(&changes));
            }
            ActivityEvent::DocumentOpened { path } => {
                if is_shadow_document(&path) {
                    tracing::debug!(%path, "ignoring version-control shadow document");
                } else {
                    self.ledger.record_file_opened();
                }
            }
            ActivityEvent::DocumentClosed { path } => {
                tracing::trace!(%path, "document closed");
            }
            ActivityEvent::SelectionChanged { selections } => {
                self.schedule_selection(selected_length(&selections));
            }
            ActivityEvent::WindowFocusChanged { focused } => {
                tracing::debug!(focused, "window focus changed");
                self.focused = focused;
            }
            ActivityEvent::RepositoryWarningDismissed => {
                tracing::info!("repository notices dismissed");
                self.ledger.dismiss_repository_warning();
            }
        }
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::SelectionSettled { generation, length } => {
                // A task aborted after it already sent is stale.
                if generation != self.selection_generation {
                    return;
                }
                self.pending_selection = None;
                self.ledger
                    .record_selection_delta(length, self.settled_selection);
                self.settled_selection = length;
            }
            Message::Environment(snapshot) => {
                let in_repository = snapshot.in_repository;
                self.ledger.apply_environment_snapshot(snapshot);

                let now_ms = Utc::now().timestamp_millis();
                if !in_repository
                    && self
                        .ledger
                        .should_warn_about_repository(&self.settings.warning_gate, now_ms)
                {
                    tracing::warn!("workspace is not a git repository");
                    eprintln!(
                        "ustat: workspace is not a git repository, git statistics are unavailable \
                         (run 'ustat mute-git-warning' to stop this notice)"
                    );
                }
            }
        }
    }

    /// Restarts the debounce window for a new selection length.
    fn schedule_selection(&mut self, length: u64) {
        if let Some(task) = self.pending_selection.take() {
            task.abort();
        }

        self.selection_generation = self.selection_generation.wrapping_add(1);
        let generation = self.selection_generation;
        let delay = self.settings.selection_debounce;
        let outbox = self.outbox.clone();
        self.pending_selection = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = outbox.send(Message::SelectionSettled { generation, length });
        }));
    }

    fn spawn_probe(&mut self) {
        if self
            .probe_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            tracing::debug!("previous probe still running, skipping");
            return;
        }

        let workspace = self.settings.workspace.clone();
        let outbox = self.outbox.clone();
        self.probe_task = Some(tokio::spawn(async move {
            let snapshot = probe::probe_environment(workspace.as_deref()).await;
            let _ = outbox.send(Message::Environment(snapshot));
        }));
    }

    fn shutdown(mut self) -> UsageLedger {
        if let Some(task) = self.pending_selection.take() {
            task.abort();
        }
        if let Some(task) = self.probe_task.take() {
            task.abort();
        }

        if self.ledger.reconcile_and_persist() {
            tracing::info!(
                path = %self.ledger.store().path().display(),
                "usage totals saved"
            );
        }
        self.ledger
    }
}

/// Waits for the next tick, or forever if the interval is disabled.
async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Whether `path` is a version-control companion of another document,
/// opened by the editor alongside the real file.
pub fn is_shadow_document(path: &str) -> bool {
    if path.starts_with("git:") {
        return true;
    }
    path.strip_suffix(".git").is_some_and(|original| {
        !original.is_empty() && !original.ends_with('/') && !original.ends_with('\\')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use tokio::time::sleep;
    use ustat_core::{ContentChange, SelectionRange, StatsStore};

    fn settings() -> TrackerSettings {
        TrackerSettings {
            tick_interval: TICK_PERIOD,
            selection_debounce: Duration::from_millis(200),
            probe_interval: None,
            autosave_interval: None,
            warning_gate: RepositoryWarningGate::default(),
            workspace: None,
        }
    }

    fn text_changed(changes: usize) -> ActivityEvent {
        ActivityEvent::TextChanged {
            path: "/repo/src/main.rs".to_string(),
            changes: vec![ContentChange::default(); changes],
        }
    }

    fn selection(length: u64) -> ActivityEvent {
        ActivityEvent::SelectionChanged {
            selections: vec![SelectionRange {
                anchor: 0,
                active: length,
            }],
        }
    }

    fn opened(path: &str) -> ActivityEvent {
        ActivityEvent::DocumentOpened {
            path: path.to_string(),
        }
    }

    #[test]
    fn shadow_documents() {
        assert!(is_shadow_document("git:/repo/src/main.rs"));
        assert!(is_shadow_document("/repo/src/main.rs.git"));
        assert!(!is_shadow_document("/repo/src/main.rs"));
        assert!(!is_shadow_document("/repo/.git"));
        assert!(!is_shadow_document(".git"));
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_follow_focus_and_shutdown_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatsStore::new(dir.path().join("stats.json"));
        let tracker = Tracker::new(UsageLedger::initialize(store.clone()), settings());
        let (tx, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(tracker.run(rx, shutdown.clone()));

        tx.send(text_changed(5)).await.unwrap();
        tx.send(opened("/repo/src/main.rs")).await.unwrap();
        sleep(Duration::from_millis(3_500)).await;
        tx.send(ActivityEvent::WindowFocusChanged { focused: false })
            .await
            .unwrap();
        sleep(Duration::from_secs(2)).await;
        shutdown.cancel();

        let ledger = handle.await.unwrap();
        assert!(ledger.session().is_empty());

        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.usage.keystrokes, 5);
        assert_eq!(stored.usage.files_opened, 1);
        assert_eq!(stored.usage.seconds_focused, 3);
        assert_eq!(stored.usage.seconds_unfocused, 2);
        assert_eq!(stored.usage.seconds_active, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_tracker_counts_one_second_per_second() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "tick_interval_ms = 0\nprobe_interval_secs = 0\nautosave_interval_secs = 0"
        )
        .unwrap();
        file.flush().unwrap();
        let config = Config::load_from(Some(file.path())).unwrap();
        let tracker_settings = TrackerSettings::from_config(&config);
        assert_eq!(tracker_settings.tick_interval, TICK_PERIOD);

        let dir = tempfile::tempdir().unwrap();
        let ledger = UsageLedger::initialize(StatsStore::new(dir.path().join("stats.json")));
        let (_tx, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Tracker::new(ledger, tracker_settings).run(rx, shutdown.clone()));

        sleep(Duration::from_millis(3_500)).await;
        shutdown.cancel();

        let ledger = handle.await.unwrap();
        assert_eq!(ledger.totals().usage.seconds_focused, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_ticks_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatsStore::new(dir.path().join("stats.json"));
        let ledger = UsageLedger::initialize(store.clone());
        let view = ledger.subscribe();
        let (_tx, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Tracker::new(ledger, settings()).run(rx, shutdown.clone()));

        sleep(Duration::from_millis(2_500)).await;
        shutdown.cancel();
        let ledger = handle.await.unwrap();
        sleep(Duration::from_secs(10)).await;

        assert_eq!(ledger.totals().usage.seconds_active, 2);
        assert_eq!(view.borrow().lifetime().seconds_active, 2);
        assert_eq!(store.load().unwrap().unwrap().usage.seconds_active, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_selections_collapse_into_one_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker_settings = settings();
        tracker_settings.tick_interval = Duration::from_secs(3_600);
        let ledger = UsageLedger::initialize(StatsStore::new(dir.path().join("stats.json")));
        let mut view = ledger.subscribe();
        let (tx, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Tracker::new(ledger, tracker_settings).run(rx, shutdown.clone()));

        for length in [10, 50, 130] {
            tx.send(selection(length)).await.unwrap();
            sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(view.borrow().session.selected_text_length, 0);
        assert!(!view.has_changed().unwrap());

        sleep(Duration::from_millis(300)).await;
        assert_eq!(view.borrow_and_update().session.selected_text_length, 130);

        // Shrinking adds nothing, growth from the settled length does.
        tx.send(selection(80)).await.unwrap();
        sleep(Duration::from_millis(300)).await;
        assert_eq!(view.borrow().session.selected_text_length, 130);

        tx.send(selection(100)).await.unwrap();
        sleep(Duration::from_millis(300)).await;
        assert_eq!(view.borrow().session.selected_text_length, 150);

        shutdown.cancel();
        let ledger = handle.await.unwrap();
        assert_eq!(ledger.totals().usage.selected_text_length, 150);
    }

    #[tokio::test(start_paused = true)]
    async fn unsettled_selection_is_dropped_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = UsageLedger::initialize(StatsStore::new(dir.path().join("stats.json")));
        let (tx, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Tracker::new(ledger, settings()).run(rx, shutdown.clone()));

        tx.send(selection(40)).await.unwrap();
        sleep(Duration::from_millis(100)).await;
        shutdown.cancel();

        let ledger = handle.await.unwrap();
        assert_eq!(ledger.totals().usage.selected_text_length, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_skips_shadow_opens() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = UsageLedger::initialize(StatsStore::new(dir.path().join("stats.json")));
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(Tracker::new(ledger, settings()).run(rx, CancellationToken::new()));

        tx.send(opened("/repo/src/lib.rs")).await.unwrap();
        tx.send(opened("/repo/src/lib.rs.git")).await.unwrap();
        tx.send(opened("git:/repo/src/lib.rs")).await.unwrap();
        tx.send(ActivityEvent::DocumentClosed {
            path: "/repo/src/lib.rs".to_string(),
        })
        .await
        .unwrap();
        drop(tx);

        let ledger = handle.await.unwrap();
        assert_eq!(ledger.totals().usage.files_opened, 1);
        assert_eq!(ledger.totals().usage.seconds_active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn autosave_persists_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatsStore::new(dir.path().join("stats.json"));
        let mut tracker_settings = settings();
        tracker_settings.tick_interval = Duration::from_secs(3_600);
        tracker_settings.autosave_interval = Some(Duration::from_secs(10));
        let ledger = UsageLedger::initialize(store.clone());
        let (tx, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Tracker::new(ledger, tracker_settings).run(rx, shutdown.clone()));

        tx.send(text_changed(3)).await.unwrap();
        sleep(Duration::from_secs(11)).await;
        assert_eq!(store.load().unwrap().unwrap().usage.keystrokes, 3);

        tx.send(text_changed(2)).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(store.load().unwrap().unwrap().usage.keystrokes, 5);
    }

    #[test]
    fn repository_notice_is_rate_limited_and_dismissable() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = UsageLedger::initialize(StatsStore::new(dir.path().join("stats.json")));
        let mut tracker = Tracker::new(ledger, settings());
        let outside = EnvironmentSnapshot {
            current_git_branch: "Not a Git repository".to_string(),
            ..EnvironmentSnapshot::default()
        };

        tracker.handle(Message::Environment(outside.clone()));
        let first_notice = tracker.ledger.totals().last_git_warning_time;
        assert!(first_notice > 0);
        assert_eq!(
            tracker.ledger.totals().current_git_branch,
            "Not a Git repository"
        );

        tracker.handle(Message::Environment(outside.clone()));
        assert_eq!(tracker.ledger.totals().last_git_warning_time, first_notice);

        tracker.dispatch(ActivityEvent::RepositoryWarningDismissed);
        assert!(!tracker.ledger.totals().show_git_warning);
    }

    #[test]
    fn stale_selection_results_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = UsageLedger::initialize(StatsStore::new(dir.path().join("stats.json")));
        let mut tracker = Tracker::new(ledger, settings());
        tracker.selection_generation = 2;

        tracker.handle(Message::SelectionSettled {
            generation: 1,
            length: 500,
        });
        assert_eq!(tracker.ledger.session().selected_text_length, 0);

        tracker.handle(Message::SelectionSettled {
            generation: 2,
            length: 20,
        });
        assert_eq!(tracker.ledger.session().selected_text_length, 20);
    }
}
