//! Run-loop state machine and status snapshots
//!
//! [`SyncState`] is a closed enum whose legal moves are listed in
//! [`SyncState::can_transition_to`]. [`SyncStatus`] is the value a
//! manager publishes after every transition and every per-file update;
//! readers only ever see whole snapshots of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::ConfigId;

// ============================================================================
// SyncState
// ============================================================================

/// State of one configuration's run loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    /// Between passes, or not started yet
    #[default]
    Idle,
    /// Queued on the source-path coordinator
    WaitingForSourceLock,
    /// Enumerating candidates in the source tree
    Scanning,
    /// Settling and copying candidates
    Copying,
    /// Applying the retention policy to the replica
    Cleaning,
    /// The last pass failed; the loop retries on the next interval
    Error,
    /// Stopped on request
    Stopped,
}

impl SyncState {
    /// Returns the canonical upper-case name of the state
    pub fn name(&self) -> &'static str {
        match self {
            SyncState::Idle => "IDLE",
            SyncState::WaitingForSourceLock => "WAITING_FOR_SOURCE_LOCK",
            SyncState::Scanning => "SCANNING",
            SyncState::Copying => "COPYING",
            SyncState::Cleaning => "CLEANING",
            SyncState::Error => "ERROR",
            SyncState::Stopped => "STOPPED",
        }
    }

    /// Transition table of the run loop
    ///
    /// `Copying → Copying` is legal: the state is re-entered for every
    /// candidate of a pass.
    pub fn can_transition_to(&self, target: SyncState) -> bool {
        use SyncState::*;

        matches!(
            (self, target),
            (Idle, WaitingForSourceLock)
                | (Idle, Stopped)
                | (WaitingForSourceLock, Scanning)
                | (WaitingForSourceLock, Error)
                | (WaitingForSourceLock, Stopped)
                | (Scanning, Copying)
                | (Scanning, Cleaning)
                | (Scanning, Error)
                | (Scanning, Stopped)
                | (Copying, Copying)
                | (Copying, Cleaning)
                | (Copying, Error)
                | (Copying, Stopped)
                | (Cleaning, Idle)
                | (Cleaning, Error)
                | (Cleaning, Stopped)
                | (Error, WaitingForSourceLock)
                | (Error, Stopped)
                | (Stopped, Idle)
        )
    }

    /// True while the manager holds, or waits for, the source lock
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SyncState::WaitingForSourceLock
                | SyncState::Scanning
                | SyncState::Copying
                | SyncState::Cleaning
        )
    }

    /// True for the states that read from the source tree
    pub fn is_reading_source(&self) -> bool {
        matches!(self, SyncState::Scanning | SyncState::Copying)
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// SyncStatus
// ============================================================================

/// Snapshot of a manager's progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Current run-loop state
    pub state: SyncState,
    /// Free-text detail for display
    pub details: String,
    /// Source-relative path of the file being processed
    pub current_file: Option<String>,
    /// Progress through the current pass, 0-100 inclusive
    pub progress_percent: u8,
    /// When this snapshot was produced
    pub updated_at: DateTime<Utc>,
    /// End of the last pass that completed without error
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Files copied in the current pass
    pub files_copied: u32,
    /// Files already in sync in the current pass
    pub files_skipped: u32,
    /// Files skipped because they were still changing
    pub files_unstable: u32,
    /// Per-file failures in the current pass
    pub errors: u32,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStatus {
    /// A fresh `IDLE` status with zero progress
    pub fn new() -> Self {
        Self {
            state: SyncState::Idle,
            details: "Not started".to_string(),
            current_file: None,
            progress_percent: 0,
            updated_at: Utc::now(),
            last_sync_time: None,
            files_copied: 0,
            files_skipped: 0,
            files_unstable: 0,
            errors: 0,
        }
    }

    /// Moves to `target`, rejecting moves the transition table forbids
    pub fn transition(
        &mut self,
        target: SyncState,
        details: impl Into<String>,
    ) -> Result<(), DomainError> {
        if !self.state.can_transition_to(target) {
            return Err(DomainError::InvalidState {
                from: self.state.name().to_string(),
                to: target.name().to_string(),
            });
        }
        self.state = target;
        self.details = details.into();
        self.touch();
        Ok(())
    }

    /// Resets progress and counters at the start of a pass
    pub fn begin_pass(&mut self) {
        self.progress_percent = 0;
        self.current_file = None;
        self.files_copied = 0;
        self.files_skipped = 0;
        self.files_unstable = 0;
        self.errors = 0;
        self.touch();
    }

    /// Marks `path` as the file being processed
    pub fn set_current_file(&mut self, path: impl Into<String>) {
        self.current_file = Some(path.into());
        self.touch();
    }

    /// Records that `processed` of `total` candidates are done
    ///
    /// Progress never moves backwards within a pass.
    pub fn set_progress(&mut self, processed: usize, total: usize) {
        let percent = progress_percent(processed, total);
        self.progress_percent = self.progress_percent.max(percent);
        self.touch();
    }

    /// Marks the pass as finished: full progress, no current file
    pub fn complete_pass(&mut self, at: DateTime<Utc>) {
        self.progress_percent = 100;
        self.current_file = None;
        self.last_sync_time = Some(at);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// `processed / total * 100`, clamped to 0-100; an empty pass counts as 0
pub fn progress_percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let processed = processed.min(total) as u128;
    (processed * 100 / total as u128) as u8
}

// ============================================================================
// StatusEvent / SystemStatus
// ============================================================================

/// Outbound notification emitted after transitions and per-file updates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Configuration the status belongs to
    pub config_id: ConfigId,
    /// Whether the manager's loop is running
    pub running: bool,
    /// Full snapshot at the time of the event
    pub status: SyncStatus,
}

/// Aggregate state over every registered configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemState {
    /// At least one manager is running
    Online,
    /// Managers are registered but none is running
    Idle,
    /// Nothing registered
    Ready,
}

/// Summary of the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Aggregate state
    pub state: SystemState,
    /// Number of running managers
    pub active_count: usize,
    /// Number of registered managers
    pub total_configs: usize,
    /// When the summary was computed
    pub checked_at: DateTime<Utc>,
}

impl SystemStatus {
    /// Derives the summary from the active/total counts
    pub fn from_counts(active_count: usize, total_configs: usize) -> Self {
        let state = if active_count > 0 {
            SystemState::Online
        } else if total_configs > 0 {
            SystemState::Idle
        } else {
            SystemState::Ready
        };
        Self {
            state,
            active_count,
            total_configs,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_pass_path_is_legal() {
        let mut status = SyncStatus::new();
        for target in [
            SyncState::WaitingForSourceLock,
            SyncState::Scanning,
            SyncState::Copying,
            SyncState::Copying,
            SyncState::Cleaning,
            SyncState::Idle,
        ] {
            status.transition(target, "step").unwrap();
        }
        assert_eq!(status.state, SyncState::Idle);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut status = SyncStatus::new();
        let err = status.transition(SyncState::Copying, "skip ahead").unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidState {
                from: "IDLE".into(),
                to: "COPYING".into()
            }
        );
        assert_eq!(status.state, SyncState::Idle);
    }

    #[test]
    fn test_error_is_not_terminal() {
        assert!(SyncState::Error.can_transition_to(SyncState::WaitingForSourceLock));
        assert!(SyncState::Error.can_transition_to(SyncState::Stopped));
        assert!(!SyncState::Stopped.can_transition_to(SyncState::Scanning));
        assert!(SyncState::Stopped.can_transition_to(SyncState::Idle));
    }

    #[test]
    fn test_every_state_can_stop_except_stopped() {
        use SyncState::*;
        for state in [Idle, WaitingForSourceLock, Scanning, Copying, Cleaning, Error] {
            assert!(state.can_transition_to(Stopped), "{state} cannot stop");
        }
        assert!(!Stopped.can_transition_to(Stopped));
    }

    #[test]
    fn test_progress_is_monotonic_and_resets() {
        let mut status = SyncStatus::new();
        status.set_progress(1, 4);
        assert_eq!(status.progress_percent, 25);
        status.set_progress(0, 4);
        assert_eq!(status.progress_percent, 25);
        status.set_progress(4, 4);
        assert_eq!(status.progress_percent, 100);

        status.begin_pass();
        assert_eq!(status.progress_percent, 0);
        assert!(status.current_file.is_none());
    }

    #[test]
    fn test_progress_percent_bounds() {
        assert_eq!(progress_percent(0, 0), 0);
        assert_eq!(progress_percent(5, 3), 100);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(usize::MAX, usize::MAX), 100);
    }

    #[test]
    fn test_state_serializes_upper_snake() {
        let json = serde_json::to_string(&SyncState::WaitingForSourceLock).unwrap();
        assert_eq!(json, "\"WAITING_FOR_SOURCE_LOCK\"");
        assert_eq!(SyncState::Cleaning.to_string(), "CLEANING");
    }

    #[test]
    fn test_system_status_from_counts() {
        assert_eq!(SystemStatus::from_counts(2, 3).state, SystemState::Online);
        assert_eq!(SystemStatus::from_counts(0, 3).state, SystemState::Idle);
        assert_eq!(SystemStatus::from_counts(0, 0).state, SystemState::Ready);
    }

    proptest! {
        #[test]
        fn prop_progress_stays_in_range_and_never_drops(
            total in 0usize..500,
            steps in prop::collection::vec(0usize..600, 1..50),
        ) {
            let mut status = SyncStatus::new();
            status.begin_pass();
            let mut previous = status.progress_percent;
            prop_assert_eq!(previous, 0);

            for processed in steps {
                status.set_progress(processed, total);
                prop_assert!(status.progress_percent <= 100);
                prop_assert!(status.progress_percent >= previous);
                previous = status.progress_percent;
            }
        }
    }
}
