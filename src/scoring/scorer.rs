use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::models::{Alert, AlertSeverity, AlertType, FrameObservation, SessionStats};
use crate::settings::ProctorSettings;

use super::alerts::AlertBuffer;

const FOCUS_LOST_MESSAGE: &str = "Focus lost - please look at the screen";
const EYE_CLOSURE_MESSAGE: &str = "Eye closure detected - please stay alert";
const AUDIO_NOISE_MESSAGE: &str = "Background noise detected";

/// How unfocused observations feed `focus_lost_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FocusCountPolicy {
    /// Count once per loss episode, on the transition from focused to unfocused.
    #[default]
    EdgeTriggered,
    /// Count every unfocused observation.
    LevelTriggered,
}

/// Conditions that qualified on this tick, for the reporting collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickTriggers {
    pub focus_lost: bool,
    pub face_lost: bool,
}

#[derive(Debug, Clone)]
pub struct ScoreUpdate {
    pub stats: SessionStats,
    /// The single alert raised this tick, if any.
    pub alert: Option<Alert>,
    /// Buffer contents after this tick, newest first.
    pub alerts: Vec<Alert>,
    pub triggers: TickTriggers,
}

/// Folds observations into session counters, the integrity score, and alerts.
pub struct SessionScorer {
    stats: SessionStats,
    policy: FocusCountPolicy,
    alerts: AlertBuffer,
    next_alert_id: u64,
    was_focused: bool,
    face_was_detected: bool,
}

impl SessionScorer {
    pub fn new(policy: FocusCountPolicy, alert_capacity: usize, alert_display_window: Duration) -> Self {
        Self {
            stats: SessionStats::new(),
            policy,
            alerts: AlertBuffer::new(alert_capacity, alert_display_window),
            next_alert_id: 1,
            was_focused: true,
            face_was_detected: true,
        }
    }

    pub fn from_settings(settings: &ProctorSettings) -> Self {
        Self::new(
            settings.focus_count_policy,
            settings.alert_capacity,
            settings.alert_display_window(),
        )
    }

    pub fn on_observation(&mut self, obs: &FrameObservation, now: Instant) -> ScoreUpdate {
        let focus_lost = match self.policy {
            FocusCountPolicy::EdgeTriggered => !obs.is_focused && self.was_focused,
            FocusCountPolicy::LevelTriggered => !obs.is_focused,
        };
        let face_lost = match self.policy {
            FocusCountPolicy::EdgeTriggered => !obs.face_detected && self.face_was_detected,
            FocusCountPolicy::LevelTriggered => !obs.face_detected,
        };
        self.was_focused = obs.is_focused;
        self.face_was_detected = obs.face_detected;

        if focus_lost {
            self.stats.focus_lost_count = self.stats.focus_lost_count.saturating_add(1);
        }
        if obs.has_suspicious_objects() {
            self.stats.suspicious_events_count = self
                .stats
                .suspicious_events_count
                .saturating_add(obs.suspicious_objects.len() as u64);
        }
        self.stats.recompute_score();

        let alert = if focus_lost {
            Some(self.raise(AlertType::Focus, AlertSeverity::Medium, FOCUS_LOST_MESSAGE.into(), now))
        } else if obs.has_suspicious_objects() {
            let message = format!("Suspicious object detected: {}", obs.suspicious_summary());
            Some(self.raise(AlertType::Suspicious, AlertSeverity::High, message, now))
        } else if obs.eye_closure {
            Some(self.raise(AlertType::Warning, AlertSeverity::Medium, EYE_CLOSURE_MESSAGE.into(), now))
        } else if obs.audio_noise {
            Some(self.raise(AlertType::Warning, AlertSeverity::Low, AUDIO_NOISE_MESSAGE.into(), now))
        } else {
            None
        };

        self.alerts.prune_expired(now);
        ScoreUpdate {
            stats: self.stats.clone(),
            alert,
            alerts: self.alerts.snapshot(),
            triggers: TickTriggers {
                focus_lost,
                face_lost,
            },
        }
    }

    /// Push an informational alert (session lifecycle notices).
    pub fn notify(&mut self, message: impl Into<String>, now: Instant) -> Alert {
        self.raise(AlertType::Info, AlertSeverity::Low, message.into(), now)
    }

    pub fn dismiss(&mut self, alert_id: u64) -> bool {
        self.alerts.dismiss(alert_id)
    }

    pub fn prune_expired(&mut self, now: Instant) -> bool {
        self.alerts.prune_expired(now)
    }

    pub fn set_total_duration(&mut self, seconds: u64) {
        self.stats.total_duration = seconds;
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.snapshot()
    }

    fn raise(&mut self, alert_type: AlertType, severity: AlertSeverity, message: String, now: Instant) -> Alert {
        let alert = Alert {
            id: self.next_alert_id,
            alert_type,
            severity,
            message,
            timestamp: Utc::now(),
        };
        self.next_alert_id += 1;
        self.alerts.push(alert.clone(), now);
        alert
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoundingBox, DetectedObject, ObjectCategory};

    fn scorer(policy: FocusCountPolicy) -> SessionScorer {
        SessionScorer::new(policy, 10, Duration::from_secs(5))
    }

    fn calm() -> FrameObservation {
        FrameObservation {
            timestamp: Utc::now(),
            face_count: 1,
            face_detected: true,
            suspicious_objects: Vec::new(),
            is_focused: true,
            eye_closure: false,
            audio_noise: false,
        }
    }

    fn object(category: ObjectCategory) -> DetectedObject {
        DetectedObject {
            category,
            confidence: 0.9,
            bounding_box: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        }
    }

    #[test]
    fn calm_observation_changes_nothing() {
        let mut scorer = scorer(FocusCountPolicy::EdgeTriggered);
        let update = scorer.on_observation(&calm(), Instant::now());
        assert_eq!(update.stats, SessionStats::new());
        assert!(update.alert.is_none());
        assert!(update.alerts.is_empty());
    }

    #[test]
    fn edge_policy_counts_each_loss_episode_once() {
        let mut scorer = scorer(FocusCountPolicy::EdgeTriggered);
        let now = Instant::now();
        let unfocused = FrameObservation {
            is_focused: false,
            ..calm()
        };

        let first = scorer.on_observation(&unfocused, now);
        assert_eq!(first.stats.focus_lost_count, 1);
        assert_eq!(first.stats.integrity_score, 98);
        let alert = first.alert.unwrap();
        assert_eq!(alert.alert_type, AlertType::Focus);
        assert_eq!(alert.severity, AlertSeverity::Medium);
        assert!(first.triggers.focus_lost);

        for _ in 0..20 {
            let update = scorer.on_observation(&unfocused, now);
            assert_eq!(update.stats.focus_lost_count, 1);
            assert!(update.alert.is_none());
        }

        scorer.on_observation(&calm(), now);
        let second_episode = scorer.on_observation(&unfocused, now);
        assert_eq!(second_episode.stats.focus_lost_count, 2);
        assert_eq!(second_episode.stats.integrity_score, 96);
    }

    #[test]
    fn level_policy_counts_every_unfocused_tick() {
        let mut scorer = scorer(FocusCountPolicy::LevelTriggered);
        let now = Instant::now();
        let unfocused = FrameObservation {
            is_focused: false,
            ..calm()
        };

        for tick in 1..=60u64 {
            let update = scorer.on_observation(&unfocused, now);
            assert_eq!(update.stats.focus_lost_count, tick);
            assert_eq!(update.alert.unwrap().alert_type, AlertType::Focus);
        }
        assert_eq!(scorer.stats().integrity_score, 0);
    }

    #[test]
    fn suspicious_objects_count_per_object_and_win_over_continuing_focus_loss() {
        let mut scorer = scorer(FocusCountPolicy::EdgeTriggered);
        let now = Instant::now();
        let unfocused = FrameObservation {
            is_focused: false,
            ..calm()
        };
        let before = scorer.on_observation(&unfocused, now).stats;
        assert_eq!(before.integrity_score, 98);

        let tick = FrameObservation {
            is_focused: false,
            suspicious_objects: vec![object(ObjectCategory::Phone), object(ObjectCategory::Book)],
            ..calm()
        };
        let update = scorer.on_observation(&tick, now);

        assert_eq!(update.stats.suspicious_events_count, before.suspicious_events_count + 2);
        assert_eq!(update.stats.integrity_score, before.integrity_score - 10);
        let alert = update.alert.unwrap();
        assert_eq!(alert.alert_type, AlertType::Suspicious);
        assert_eq!(alert.severity, AlertSeverity::High);
        assert_eq!(alert.message, "Suspicious object detected: phone, book");
        assert_eq!(update.alerts.len(), 2);
    }

    #[test]
    fn new_focus_loss_outranks_suspicious_objects() {
        let mut scorer = scorer(FocusCountPolicy::EdgeTriggered);
        let tick = FrameObservation {
            is_focused: false,
            suspicious_objects: vec![object(ObjectCategory::Phone)],
            ..calm()
        };
        let update = scorer.on_observation(&tick, Instant::now());

        assert_eq!(update.stats.focus_lost_count, 1);
        assert_eq!(update.stats.suspicious_events_count, 1);
        assert_eq!(update.stats.integrity_score, 93);
        assert_eq!(update.alert.unwrap().alert_type, AlertType::Focus);
        assert_eq!(update.alerts.len(), 1);
    }

    #[test]
    fn eye_closure_outranks_audio_noise() {
        let mut scorer = scorer(FocusCountPolicy::EdgeTriggered);
        let now = Instant::now();

        let both = FrameObservation {
            eye_closure: true,
            audio_noise: true,
            ..calm()
        };
        let alert = scorer.on_observation(&both, now).alert.unwrap();
        assert_eq!(alert.alert_type, AlertType::Warning);
        assert_eq!(alert.severity, AlertSeverity::Medium);
        assert_eq!(alert.message, EYE_CLOSURE_MESSAGE);

        let audio = FrameObservation {
            audio_noise: true,
            ..calm()
        };
        let alert = scorer.on_observation(&audio, now).alert.unwrap();
        assert_eq!(alert.severity, AlertSeverity::Low);
        assert_eq!(alert.message, AUDIO_NOISE_MESSAGE);
        assert_eq!(scorer.stats().integrity_score, 100);
    }

    #[test]
    fn alert_ids_are_monotonic_and_buffer_is_bounded() {
        let mut scorer = scorer(FocusCountPolicy::EdgeTriggered);
        let now = Instant::now();
        let noisy = FrameObservation {
            audio_noise: true,
            ..calm()
        };

        let mut last_id = 0;
        for _ in 0..25 {
            let update = scorer.on_observation(&noisy, now);
            let id = update.alert.unwrap().id;
            assert!(id > last_id);
            last_id = id;
            assert!(update.alerts.len() <= 10);
        }
        assert_eq!(scorer.alerts()[0].id, last_id);
    }

    #[test]
    fn face_loss_is_reported_on_transition() {
        let mut scorer = scorer(FocusCountPolicy::EdgeTriggered);
        let now = Instant::now();
        let missing = FrameObservation {
            face_count: 0,
            face_detected: false,
            ..calm()
        };

        assert!(scorer.on_observation(&missing, now).triggers.face_lost);
        assert!(!scorer.on_observation(&missing, now).triggers.face_lost);
        scorer.on_observation(&calm(), now);
        assert!(scorer.on_observation(&missing, now).triggers.face_lost);
    }

    #[test]
    fn notices_dismissal_and_expiry() {
        let mut scorer = scorer(FocusCountPolicy::EdgeTriggered);
        let t0 = Instant::now();
        let notice = scorer.notify("Monitoring started", t0);
        assert_eq!(notice.alert_type, AlertType::Info);
        assert_eq!(notice.severity, AlertSeverity::Low);

        let second = scorer.notify("Stats synced", t0 + Duration::from_secs(2));
        assert!(scorer.dismiss(second.id));
        assert_eq!(scorer.alerts().len(), 1);

        assert!(scorer.prune_expired(t0 + Duration::from_secs(6)));
        assert!(scorer.alerts().is_empty());
    }

    #[test]
    fn observation_snapshot_omits_expired_alerts() {
        let mut scorer = scorer(FocusCountPolicy::EdgeTriggered);
        let t0 = Instant::now();
        scorer.notify("Monitoring started", t0);

        let update = scorer.on_observation(&calm(), t0 + Duration::from_secs(2));
        assert_eq!(update.alerts.len(), 1);

        let update = scorer.on_observation(&calm(), t0 + Duration::from_secs(6));
        assert!(update.alerts.is_empty());
        assert!(scorer.alerts().is_empty());
    }

    #[test]
    fn duration_is_set_independently_of_observations() {
        let mut scorer = scorer(FocusCountPolicy::EdgeTriggered);
        scorer.set_total_duration(42);
        let update = scorer.on_observation(&calm(), Instant::now());
        assert_eq!(update.stats.total_duration, 42);
        assert_eq!(update.stats.integrity_score, 100);
    }
}
