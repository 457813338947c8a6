//! JSON file storage for usage totals.
//!
//! The whole [`Totals`] record is written as one pretty-printed JSON
//! document and overwritten on every save. There is no append log and no
//! versioning; readers merge whatever keys are present over the defaults.
//! A key whose value has the wrong type (older writers stored `null` for a
//! failed count) keeps its default instead of discarding the whole file.
//!
//! Saves go to a sibling temporary file that is then renamed over the
//! target, under an exclusive lock on a sibling `.lock` file, so concurrent
//! `ustat` processes never interleave writes.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use fs2::FileExt;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::ledger::Totals;

/// File name the editor extension has always used, relative to `$HOME`.
pub const DEFAULT_FILE_NAME: &str = ".vscodeUsageStats.json";

/// Attempts at taking the lock before a save gives up.
const LOCK_ATTEMPTS: u32 = 20;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(25);

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stats file exists but could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The stats file is not a JSON object.
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// Totals could not be encoded.
    #[error("failed to serialize usage totals: {0}")]
    Serialize(#[source] serde_json::Error),
    /// The lock file could not be created or locked.
    #[error("failed to lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The stats file or its directory could not be written.
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Location of the persisted totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsStore {
    path: PathBuf,
}

impl StatsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored totals.
    ///
    /// Returns `None` if the file doesn't exist.
    /// Returns an error if the file exists but is unreadable or not a JSON
    /// object. Individual keys that don't fit [`Totals`] are skipped.
    pub fn load(&self) -> Result<Option<Totals>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let parse_error = |source: serde_json::Error| StoreError::Parse {
            path: self.path.clone(),
            source,
        };
        let document: Map<String, Value> = serde_json::from_str(&content).map_err(parse_error)?;

        let fields: Map<String, Value> = document
            .into_iter()
            .filter(|(key, value)| {
                let single = Map::from_iter([(key.clone(), value.clone())]);
                let fits = serde_json::from_value::<Totals>(Value::Object(single)).is_ok();
                if !fits {
                    tracing::warn!(key = %key, %value, "ignoring stored value of unexpected type");
                }
                fits
            })
            .collect();

        serde_json::from_value(Value::Object(fields))
            .map(Some)
            .map_err(parse_error)
    }

    /// Overwrites the stored totals.
    pub fn save(&self, totals: &Totals) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(totals).map_err(StoreError::Serialize)?;

        let lock_path = self.sibling("lock");
        let lock_file = File::create(&lock_path).map_err(|source| StoreError::Lock {
            path: lock_path.clone(),
            source,
        })?;
        lock_with_retry(&lock_file).map_err(|source| StoreError::Lock {
            path: lock_path,
            source,
        })?;

        let tmp_path = self.sibling("tmp");
        fs::write(&tmp_path, json).map_err(|source| StoreError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;

        // Lock released when `lock_file` drops.
        Ok(())
    }

    /// `stats.json` -> `stats.json.<suffix>`
    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }
}

/// Takes the exclusive lock, giving up after a bounded wait so a stuck
/// holder can't stall the caller.
fn lock_with_retry(lock_file: &File) -> io::Result<()> {
    let contended = fs2::lock_contended_error().raw_os_error();
    let mut attempt = 1;
    loop {
        match lock_file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(e) if attempt < LOCK_ATTEMPTS && e.raw_os_error() == contended => {
                thread::sleep(LOCK_RETRY_DELAY);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatsStore::new(dir.path().join("stats.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn load_corrupt_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(&path, "totalKeyStrokes: 12").unwrap();

        let err = StatsStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn load_merges_present_keys_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(
            &path,
            r#"{
                "currentGitBranch": "main",
                "totalKeyStrokes": 1200,
                "totalSeconds": 99,
                "someFutureField": {"nested": true}
            }"#,
        )
        .unwrap();

        let totals = StatsStore::new(&path).load().unwrap().unwrap();

        assert_eq!(totals.current_git_branch, "main");
        assert_eq!(totals.usage.keystrokes, 1200);
        assert_eq!(totals.usage.files_opened, 0);
        assert_eq!(totals.operating_system, "Unknown");
        assert!(totals.show_git_warning);
    }

    #[test]
    fn load_keeps_defaults_for_mistyped_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(
            &path,
            r#"{"totalKeyStrokes":500,"totalGitCommits":null,"currentShell":42,"showGitWarning":false}"#,
        )
        .unwrap();

        let totals = StatsStore::new(&path).load().unwrap().unwrap();

        assert_eq!(totals.usage.keystrokes, 500);
        assert_eq!(totals.total_git_commits, 0);
        assert_eq!(totals.current_shell, "Unknown");
        assert!(!totals.show_git_warning);
    }

    #[test]
    fn load_non_object_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        let err = StatsStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn save_gives_up_when_lock_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let holder = File::create(dir.path().join("stats.json.lock")).unwrap();
        holder.lock_exclusive().unwrap();

        let err = StatsStore::new(&path).save(&Totals::default()).unwrap_err();
        assert!(matches!(err, StoreError::Lock { .. }));
        assert!(!path.exists());

        holder.unlock().unwrap();
        StatsStore::new(&path).save(&Totals::default()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatsStore::new(dir.path().join("nested").join("stats.json"));
        let mut totals = Totals::default();
        totals.usage.keystrokes = 17;
        totals.list_of_git_branches = vec!["main".to_string()];
        totals.show_git_warning = false;

        store.save(&totals).unwrap();

        assert_eq!(store.load().unwrap(), Some(totals));
        assert!(!dir.path().join("nested").join("stats.json.tmp").exists());
    }

    #[test]
    fn save_overwrites_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(&path, r#"{"legacyCounter": 5}"#).unwrap();

        StatsStore::new(&path).save(&Totals::default()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(!content.contains("legacyCounter"));
    }

    #[test]
    fn save_into_unwritable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();

        let err = StatsStore::new(blocker.join("stats.json"))
            .save(&Totals::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
    }

    #[test]
    fn persisted_layout_uses_extension_keys() {
        let mut totals = Totals::default();
        totals.usage.keystrokes = 5;
        totals.usage.files_opened = 1;
        totals.usage.seconds_focused = 3;
        totals.usage.seconds_unfocused = 2;
        totals.usage.seconds_active = 5;

        let json = serde_json::to_string_pretty(&totals).unwrap();
        assert_snapshot!(json, @r#"
        {
          "operatingSystem": "Unknown",
          "currentShell": "Unknown",
          "currentUser": "Unknown",
          "currentGitBranch": "None",
          "listOfGitBranches": [],
          "totalGitCommits": 0,
          "lastGitWarningTime": 0,
          "mostRecentGitCommitTime": 0,
          "mostRecentGitCommitMessage": "",
          "showGitWarning": true,
          "totalKeyStrokes": 5,
          "totalFilesOpened": 1,
          "totalNumberOfSelectedText": 0,
          "totalSecondsWhilstWindowIsFocused": 3,
          "totalSecondsOutsideVSCode": 2,
          "totalSecondsWhilstVSCodeIsActive": 5
        }
        "#);
    }
}
