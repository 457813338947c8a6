//! Rate limiting for the "not a git repository" notice.

use crate::ledger::Totals;

/// Minimum gap between two notices.
pub const DEFAULT_COOLDOWN_MS: i64 = 30_000;

/// Decides whether a repository notice may be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryWarningGate {
    cooldown_ms: i64,
}

impl Default for RepositoryWarningGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_MS)
    }
}

impl RepositoryWarningGate {
    pub const fn new(cooldown_ms: i64) -> Self {
        Self { cooldown_ms }
    }

    /// Returns `true` if a notice is due, stamping `totals` with `now_ms`.
    ///
    /// Never fires once the user has opted out.
    pub const fn check(&self, totals: &mut Totals, now_ms: i64) -> bool {
        if !totals.show_git_warning {
            return false;
        }
        if now_ms.saturating_sub(totals.last_git_warning_time) < self.cooldown_ms {
            return false;
        }
        totals.last_git_warning_time = now_ms;
        true
    }
}
