//! Activity events streamed in from the editor side.
//!
//! Events arrive as JSON lines, internally tagged with `type`:
//!
//! ```json
//! {"type":"text_changed","path":"/src/main.rs","changes":[{"range_length":0,"text_length":1}]}
//! {"type":"document_opened","path":"/src/main.rs"}
//! {"type":"selection_changed","selections":[{"anchor":10,"active":42}]}
//! {"type":"window_focus_changed","focused":false}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors decoding an inbound event line.
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("invalid activity event: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One edit inside a text change notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentChange {
    /// Characters replaced by the edit.
    pub range_length: u64,
    /// Characters inserted by the edit.
    pub text_length: u64,
}

/// A selection as character offsets. `anchor` may be after `active`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRange {
    pub anchor: u64,
    pub active: u64,
}

impl SelectionRange {
    pub const fn len(&self) -> u64 {
        self.anchor.abs_diff(self.active)
    }

    pub const fn is_empty(&self) -> bool {
        self.anchor == self.active
    }
}

/// A raw activity signal from the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityEvent {
    /// A document's text changed.
    TextChanged {
        #[serde(default)]
        path: String,
        #[serde(default)]
        changes: Vec<ContentChange>,
    },
    /// A document was opened.
    DocumentOpened { path: String },
    /// A document was closed.
    DocumentClosed { path: String },
    /// The selections in the active editor changed.
    SelectionChanged {
        #[serde(default)]
        selections: Vec<SelectionRange>,
    },
    /// The editor window gained or lost focus.
    WindowFocusChanged { focused: bool },
    /// The user chose to stop seeing "not a repository" notices.
    RepositoryWarningDismissed,
}

impl ActivityEvent {
    /// Parses one JSON line.
    pub fn parse_line(line: &str) -> Result<Self, ActivityError> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// Keystrokes represented by a text change: one per content change.
pub fn keystroke_delta(changes: &[ContentChange]) -> u64 {
    u64::try_from(changes.len()).unwrap_or(u64::MAX)
}

/// Total selected characters across all selections.
pub fn selected_length(selections: &[SelectionRange]) -> u64 {
    selections
        .iter()
        .fold(0, |total: u64, range| total.saturating_add(range.len()))
}
