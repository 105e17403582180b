use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::models::{Candidate, CandidateStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub status: SessionStatus,
    pub candidate: Option<Candidate>,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_secs: u64,
    /// Monotonic start of the running window; `elapsed_secs` is derived from it.
    #[serde(skip)]
    pub running_anchor: Option<Instant>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn candidate_id(&self) -> Option<&str> {
        self.candidate.as_ref().map(|c| c.candidate_id.as_str())
    }

    pub fn current_elapsed_secs(&self) -> u64 {
        match (self.status, self.running_anchor) {
            (SessionStatus::Running, Some(anchor)) => anchor.elapsed().as_secs(),
            _ => self.elapsed_secs,
        }
    }

    pub fn sync_elapsed_from_anchor(&mut self) {
        self.elapsed_secs = self.current_elapsed_secs();
    }

    pub fn begin(&mut self, mut candidate: Candidate, started_at: DateTime<Utc>, now: Instant) {
        candidate.status = CandidateStatus::Active;
        *self = Self {
            status: SessionStatus::Running,
            candidate: Some(candidate),
            started_at: Some(started_at),
            elapsed_secs: 0,
            running_anchor: Some(now),
        };
    }

    /// Freeze the elapsed time and mark the candidate completed.
    pub fn stop(&mut self) {
        self.sync_elapsed_from_anchor();
        self.status = SessionStatus::Stopped;
        self.running_anchor = None;
        if let Some(candidate) = self.candidate.as_mut() {
            candidate.status = CandidateStatus::Completed;
        }
    }
}
