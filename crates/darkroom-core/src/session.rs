//! Per-request processing sessions.

use crate::error::ComputeError;
use crate::ids::SessionId;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of a single stage. Failures are values, not control flow.
pub type StageOutcome = std::result::Result<Bytes, ComputeError>;

/// How a finished session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// Every requested stage produced output.
    Succeeded,
    /// At least one stage produced output and at least one failed.
    PartiallySucceeded,
    /// No stage produced output.
    Failed,
}

impl TerminalState {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TerminalState::Succeeded | TerminalState::PartiallySucceeded
        )
    }

    /// Derive the terminal state from per-stage success flags.
    pub fn from_outcomes<I: IntoIterator<Item = bool>>(outcomes: I) -> Self {
        let (mut ok, mut failed) = (0usize, 0usize);
        for success in outcomes {
            if success {
                ok += 1;
            } else {
                failed += 1;
            }
        }
        match (ok, failed) {
            (0, _) => TerminalState::Failed,
            (_, 0) => TerminalState::Succeeded,
            _ => TerminalState::PartiallySucceeded,
        }
    }
}

/// Recorded result of one stage in a session.
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub stage: String,
    pub outcome: StageOutcome,
    pub cache_hit: bool,
    pub elapsed_ms: u64,
}

impl StageRecord {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Transient state for one `process` call. Never persisted.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub results: Vec<StageRecord>,
    pub current_stage: Option<String>,
    pub terminal_state: Option<TerminalState>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            created_at: Utc::now(),
            results: Vec::new(),
            current_stage: None,
            terminal_state: None,
        }
    }

    pub fn begin_stage(&mut self, stage: impl Into<String>) {
        self.current_stage = Some(stage.into());
    }

    pub fn record(&mut self, record: StageRecord) {
        self.current_stage = None;
        self.results.push(record);
    }

    /// Close the session and compute its terminal state.
    pub fn finish(&mut self) -> TerminalState {
        let state = TerminalState::from_outcomes(self.results.iter().map(StageRecord::is_success));
        self.current_stage = None;
        self.terminal_state = Some(state);
        state
    }

    pub fn result(&self, stage: &str) -> Option<&StageRecord> {
        self.results.iter().find(|r| r.stage == stage)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(stage: &str, ok: bool) -> StageRecord {
        StageRecord {
            stage: stage.to_string(),
            outcome: if ok {
                Ok(Bytes::from_static(b"png"))
            } else {
                Err(ComputeError::failed(stage, "boom"))
            },
            cache_hit: false,
            elapsed_ms: 1,
        }
    }

    #[test]
    fn test_terminal_state() {
        assert_eq!(
            TerminalState::from_outcomes([true, true]),
            TerminalState::Succeeded
        );
        assert_eq!(
            TerminalState::from_outcomes([true, false, true]),
            TerminalState::PartiallySucceeded
        );
        assert_eq!(
            TerminalState::from_outcomes([false, false]),
            TerminalState::Failed
        );
        assert_eq!(TerminalState::from_outcomes([]), TerminalState::Failed);
    }

    #[test]
    fn test_session_lifecycle() {
        let mut session = Session::new();
        session.begin_stage("bg-removal");
        assert_eq!(session.current_stage.as_deref(), Some("bg-removal"));
        session.record(record("bg-removal", true));
        session.record(record("effect:dither", false));
        assert!(session.current_stage.is_none());

        let state = session.finish();
        assert_eq!(state, TerminalState::PartiallySucceeded);
        assert!(state.is_success());
        assert!(session.result("effect:dither").unwrap().outcome.is_err());
    }
}
