//! Progress events delivered to per-session sinks.

use crate::error::ComputeErrorKind;
use crate::ids::SessionId;
use crate::session::TerminalState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened, beyond the percent and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressDetail {
    StageStarted,
    StageProgress,
    StageCompleted {
        cache_hit: bool,
        elapsed_ms: u64,
    },
    StageFailed {
        kind: ComputeErrorKind,
        error: String,
        elapsed_ms: u64,
    },
    SessionCompleted {
        state: TerminalState,
        cache_hits: u32,
        stages: u32,
    },
}

/// One progress update for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub session_id: SessionId,
    /// Position in the session's event order, starting at 0.
    pub sequence: u64,
    pub stage: String,
    pub percent: u8,
    pub message: String,
    pub detail: ProgressDetail,
    pub emitted_at: DateTime<Utc>,
}

impl ProgressEvent {
    /// Subject for publishing on a message bus.
    pub fn subject(&self) -> String {
        let kind = match &self.detail {
            ProgressDetail::StageStarted => "started",
            ProgressDetail::StageProgress => "progress",
            ProgressDetail::StageCompleted { .. } => "completed",
            ProgressDetail::StageFailed { .. } => "failed",
            ProgressDetail::SessionCompleted { .. } => {
                return format!("session.{}.completed", self.session_id);
            }
        };
        format!("session.{}.stage.{}.{}", self.session_id, self.stage, kind)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.detail, ProgressDetail::SessionCompleted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(detail: ProgressDetail) -> ProgressEvent {
        ProgressEvent {
            session_id: SessionId::new(),
            sequence: 0,
            stage: "bg-removal".to_string(),
            percent: 0,
            message: String::new(),
            detail,
            emitted_at: Utc::now(),
        }
    }

    #[test]
    fn test_subjects() {
        let started = event(ProgressDetail::StageStarted);
        assert!(started.subject().ends_with(".stage.bg-removal.started"));

        let done = event(ProgressDetail::SessionCompleted {
            state: TerminalState::Succeeded,
            cache_hits: 1,
            stages: 2,
        });
        assert!(done.subject().ends_with(".completed"));
        assert!(done.is_terminal());
    }

    #[test]
    fn test_detail_serialization() {
        let json = serde_json::to_value(ProgressDetail::StageCompleted {
            cache_hit: true,
            elapsed_ms: 12,
        })
        .unwrap();
        assert_eq!(json["type"], "stage_completed");
        assert_eq!(json["cache_hit"], true);
    }
}
