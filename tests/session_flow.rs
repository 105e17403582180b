use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use image::RgbaImage;
use tokio::time::Instant;

use proctor_watch_lib::detection::{
    ClassifierAdapter, FocusSignals, FocusState, FocusTracker, Frame, FrameSource, NoAuxiliarySignals,
    ObservationClassifier, RawDetection,
};
use proctor_watch_lib::models::{AlertSeverity, AlertType, Candidate, FrameObservation};
use proctor_watch_lib::reporting::{EventJournal, EventType};
use proctor_watch_lib::scoring::{FocusCountPolicy, SessionScorer};
use proctor_watch_lib::session::SessionController;
use proctor_watch_lib::ProctorSettings;

fn observation(state: FocusState, face_count: u32) -> FrameObservation {
    FrameObservation {
        timestamp: Utc::now(),
        face_count,
        face_detected: state.face_detected,
        suspicious_objects: Vec::new(),
        is_focused: state.is_focused,
        eye_closure: false,
        audio_noise: false,
    }
}

#[test]
fn sustained_absence_costs_one_focus_loss() {
    let mut tracker = FocusTracker::new(Duration::from_secs(5), Duration::from_secs(10));
    let mut scorer = SessionScorer::new(FocusCountPolicy::EdgeTriggered, 10, Duration::from_secs(5));
    let absent = FocusSignals {
        face_detected: false,
        has_suspicious_object: false,
    };
    let t0 = Instant::now();

    for offset_ms in [0, 2_000, 4_000] {
        let now = t0 + Duration::from_millis(offset_ms);
        let state = tracker.update(absent, now);
        assert!(state.is_focused);
        assert!(state.face_detected);
        let update = scorer.on_observation(&observation(state, 0), now);
        assert!(update.alert.is_none());
        assert_eq!(update.stats.focus_lost_count, 0);
    }

    let now = t0 + Duration::from_millis(5_100);
    let state = tracker.update(absent, now);
    assert!(!state.is_focused);
    assert!(state.face_detected);

    let update = scorer.on_observation(&observation(state, 0), now);
    assert_eq!(update.stats.focus_lost_count, 1);
    assert_eq!(update.stats.integrity_score, 98);
    let alert = update.alert.expect("focus alert");
    assert_eq!(alert.alert_type, AlertType::Focus);
    assert_eq!(alert.severity, AlertSeverity::Medium);
    assert_eq!(update.alerts.len(), 1);
}

#[test]
fn two_prohibited_objects_in_one_frame() {
    let classified = ObservationClassifier::new().classify(
        &[
            RawDetection::new("person", 0.93, [100.0, 50.0, 200.0, 400.0]),
            RawDetection::new("cell phone", 0.81, [10.0, 300.0, 40.0, 70.0]),
            RawDetection::new("book", 0.66, [400.0, 320.0, 120.0, 90.0]),
        ],
        (640, 480),
    );
    assert_eq!(classified.face_count, 1);

    let mut tracker = FocusTracker::new(Duration::from_secs(5), Duration::from_secs(10));
    let now = Instant::now();
    let state = tracker.update(
        FocusSignals {
            face_detected: true,
            has_suspicious_object: true,
        },
        now,
    );

    let obs = FrameObservation {
        suspicious_objects: classified.suspicious_objects,
        ..observation(state, classified.face_count)
    };
    let mut scorer = SessionScorer::new(FocusCountPolicy::EdgeTriggered, 10, Duration::from_secs(5));
    let update = scorer.on_observation(&obs, now);

    assert_eq!(update.stats.suspicious_events_count, 2);
    assert_eq!(update.stats.integrity_score, 90);
    let alert = update.alert.expect("suspicious alert");
    assert_eq!(alert.alert_type, AlertType::Suspicious);
    assert_eq!(alert.severity, AlertSeverity::High);
    assert_eq!(alert.message, "Suspicious object detected: phone, book");
}

struct BlankFrames(u64);

impl FrameSource for BlankFrames {
    fn next_frame(&mut self) -> Option<Frame> {
        self.0 += 1;
        Some(Frame::new(self.0, RgbaImage::new(16, 16)))
    }
}

/// Candidate present for the first few frames, then walks away for good.
struct WalksAway {
    calls: u32,
    present_for: u32,
}

impl ClassifierAdapter for WalksAway {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        if self.calls <= self.present_for {
            Ok(vec![RawDetection::new("person", 0.9, [2.0, 2.0, 10.0, 12.0])])
        } else {
            Ok(Vec::new())
        }
    }
}

#[tokio::test]
async fn walking_away_is_journaled_once_per_episode() {
    let dir = tempfile::tempdir().unwrap();
    let journal = EventJournal::new(dir.path().join("journal.sqlite3")).unwrap();

    let settings = ProctorSettings {
        detection_interval_ms: 10,
        focus_lost_threshold_ms: 40,
        no_face_threshold_ms: 80,
        ..ProctorSettings::default()
    };
    let controller = SessionController::new(
        WalksAway {
            calls: 0,
            present_for: 3,
        },
        settings,
        Arc::new(journal.clone()),
    );

    controller
        .start(
            Candidate::new("cand-walk", "Alan", "alan@example.com"),
            Box::new(BlankFrames(0)),
            Box::new(NoAuxiliarySignals),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    let stats = controller.end().await.unwrap();

    assert_eq!(stats.focus_lost_count, 1);
    assert_eq!(stats.suspicious_events_count, 0);
    assert_eq!(stats.integrity_score, 98);

    // Journal writes are spawned by the sink; wait for them to land.
    let mut counts = Vec::new();
    for _ in 0..50 {
        counts = journal.event_counts("cand-walk").await.unwrap();
        let ended = journal
            .stats_for_candidate("cand-walk")
            .await
            .unwrap()
            .map(|s| s.ended)
            .unwrap_or(false);
        if counts.len() == 2 && ended {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(counts.contains(&(EventType::FocusLost, 1)));
    assert!(counts.contains(&(EventType::NoFaceDetected, 1)));

    let stored = journal.stats_for_candidate("cand-walk").await.unwrap().unwrap();
    assert!(stored.ended);
    assert_eq!(stored.stats.focus_lost_count, 1);
}

/// Candidate leaves after a few frames; while away, every other model call fails.
struct FlakyWhileAway {
    calls: u32,
    present_for: u32,
}

impl ClassifierAdapter for FlakyWhileAway {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        if self.calls <= self.present_for {
            return Ok(vec![RawDetection::new("person", 0.9, [2.0, 2.0, 10.0, 12.0])]);
        }
        if self.calls % 2 == 0 {
            return Err(anyhow!("inference backend hiccup"));
        }
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn failed_ticks_do_not_restart_the_absence_timer() {
    // Successful absent ticks land ~20 ms apart, under the 40 ms threshold.
    // Focus can only be lost if failed ticks leave the running timer alone.
    let settings = ProctorSettings {
        detection_interval_ms: 10,
        focus_lost_threshold_ms: 40,
        no_face_threshold_ms: 10_000,
        ..ProctorSettings::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let journal = EventJournal::new(dir.path().join("journal.sqlite3")).unwrap();
    let controller = SessionController::new(
        FlakyWhileAway {
            calls: 0,
            present_for: 3,
        },
        settings,
        Arc::new(journal),
    );

    controller
        .start(
            Candidate::new("cand-flaky", "Edsger", "edsger@example.com"),
            Box::new(BlankFrames(0)),
            Box::new(NoAuxiliarySignals),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let stats = controller.end().await.unwrap();

    assert_eq!(stats.focus_lost_count, 1);
    assert_eq!(stats.integrity_score, 98);
}
