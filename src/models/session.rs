//! Session-level data: the candidate being proctored and the running stats.

use serde::{Deserialize, Serialize};

const BASE_SCORE: i64 = 100;
const FOCUS_LOST_PENALTY: i64 = 2;
const SUSPICIOUS_EVENT_PENALTY: i64 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CandidateStatus {
    Active,
    Completed,
    Paused,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Active => "active",
            CandidateStatus::Completed => "completed",
            CandidateStatus::Paused => "paused",
        }
    }
}

/// Owned by the caller; the engine only uses `candidate_id` as a logging key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub candidate_id: String,
    pub name: String,
    pub email: String,
    pub status: CandidateStatus,
}

impl Candidate {
    pub fn new(candidate_id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            name: name.into(),
            email: email.into(),
            status: CandidateStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub focus_lost_count: u64,
    pub suspicious_events_count: u64,
    pub integrity_score: u8,
    /// Seconds since session start, driven by the wall-clock ticker.
    pub total_duration: u64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            focus_lost_count: 0,
            suspicious_events_count: 0,
            integrity_score: BASE_SCORE as u8,
            total_duration: 0,
        }
    }
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the score from the absolute counters. Never adjusted by deltas.
    pub fn recompute_score(&mut self) {
        self.integrity_score = integrity_score(self.focus_lost_count, self.suspicious_events_count);
    }
}

/// `max(0, 100 - 2 * focus_lost - 5 * suspicious)`.
pub fn integrity_score(focus_lost_count: u64, suspicious_events_count: u64) -> u8 {
    let focus_penalty = i64::try_from(focus_lost_count)
        .unwrap_or(i64::MAX)
        .saturating_mul(FOCUS_LOST_PENALTY);
    let suspicious_penalty = i64::try_from(suspicious_events_count)
        .unwrap_or(i64::MAX)
        .saturating_mul(SUSPICIOUS_EVENT_PENALTY);

    BASE_SCORE
        .saturating_sub(focus_penalty)
        .saturating_sub(suspicious_penalty)
        .clamp(0, BASE_SCORE) as u8
}
