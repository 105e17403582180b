use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
    time::{self, Instant},
};

use crate::detection::{AuxiliaryProbe, ClassifierAdapter, DetectionLoop, FrameSource, ObservationCallback};
use crate::models::{Alert, Candidate, FrameObservation, SessionStats};
use crate::reporting::{events_for_tick, EventSink};
use crate::scoring::SessionScorer;
use crate::settings::ProctorSettings;

use super::state::SessionState;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const MONITORING_STARTED_MESSAGE: &str = "Monitoring started";
const STATS_SYNCED_MESSAGE: &str = "Session stats synced";

/// Pushed to every presentation subscriber.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum SessionEvent {
    Observation(FrameObservation),
    /// Current alert list, newest first.
    Alerts(Vec<Alert>),
    Stats(SessionStats),
    StateChanged(SessionState),
}

/// Runs one proctored session at a time: detection, scoring, reporting and
/// the wall-clock duration ticker.
#[derive(Clone)]
pub struct SessionController {
    state: Arc<Mutex<SessionState>>,
    scorer: Arc<Mutex<SessionScorer>>,
    detection: Arc<Mutex<DetectionLoop>>,
    sink: Arc<dyn EventSink>,
    events: broadcast::Sender<SessionEvent>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    consumer: Arc<Mutex<Option<JoinHandle<()>>>>,
    settings: ProctorSettings,
    tick_interval: Duration,
}

impl SessionController {
    pub fn new(classifier: impl ClassifierAdapter, settings: ProctorSettings, sink: Arc<dyn EventSink>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(SessionState::new())),
            scorer: Arc::new(Mutex::new(SessionScorer::from_settings(&settings))),
            detection: Arc::new(Mutex::new(DetectionLoop::new(classifier, &settings))),
            sink,
            events,
            ticker: Arc::new(Mutex::new(None)),
            consumer: Arc::new(Mutex::new(None)),
            settings,
            tick_interval: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        let mut guard = self.state.lock().await;
        guard.sync_elapsed_from_anchor();
        guard.clone()
    }

    /// Start monitoring `candidate`. Fails without side effects when the
    /// model cannot be initialized or a session is already running.
    pub async fn start(
        &self,
        candidate: Candidate,
        source: Box<dyn FrameSource>,
        probe: Box<dyn AuxiliaryProbe>,
    ) -> Result<SessionState> {
        {
            let state = self.state.lock().await;
            if state.is_running() {
                return Err(anyhow!("session already active"));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel::<FrameObservation>();
        let callback: ObservationCallback = Arc::new(move |obs: FrameObservation| {
            // Receiver only goes away once the session is torn down.
            let _ = tx.send(obs);
        });

        self.detection.lock().await.start(source, probe, callback).await?;

        let candidate_id = candidate.candidate_id.clone();
        *self.scorer.lock().await = SessionScorer::from_settings(&self.settings);
        self.state.lock().await.begin(candidate, Utc::now(), Instant::now());

        self.spawn_consumer(candidate_id.clone(), rx).await;
        self.spawn_ticker(candidate_id.clone()).await;

        let alerts = {
            let mut scorer = self.scorer.lock().await;
            scorer.notify(MONITORING_STARTED_MESSAGE, Instant::now());
            scorer.alerts()
        };
        let _ = self.events.send(SessionEvent::Alerts(alerts));

        log_info!("Monitoring started for candidate {}", candidate_id);

        let state = self.state().await;
        let _ = self.events.send(SessionEvent::StateChanged(state.clone()));
        Ok(state)
    }

    /// Stop detection, settle the final stats, and tell the sink the
    /// candidate is done.
    pub async fn end(&self) -> Result<SessionStats> {
        let candidate_id = {
            let state = self.state.lock().await;
            if !state.is_running() {
                return Err(anyhow!("no active session to end"));
            }
            state
                .candidate_id()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("missing candidate"))?
        };

        self.detection.lock().await.stop().await?;
        // Drain whatever the loop delivered before it stopped.
        if let Some(handle) = self.consumer.lock().await.take() {
            if let Err(err) = handle.await {
                log_error!("Observation consumer failed: {}", err);
            }
        }
        self.cancel_ticker().await;

        let final_state = {
            let mut state = self.state.lock().await;
            state.stop();
            state.clone()
        };

        let stats = {
            let mut scorer = self.scorer.lock().await;
            scorer.set_total_duration(final_state.elapsed_secs);
            scorer.stats()
        };

        self.sink.end_session(&candidate_id, &stats);

        let _ = self.events.send(SessionEvent::Stats(stats.clone()));
        let _ = self.events.send(SessionEvent::StateChanged(final_state));

        log_info!(
            "Session ended for candidate {} with integrity score {}",
            candidate_id,
            stats.integrity_score
        );

        Ok(stats)
    }

    pub async fn dismiss_alert(&self, alert_id: u64) -> bool {
        let alerts = {
            let mut scorer = self.scorer.lock().await;
            if !scorer.dismiss(alert_id) {
                return false;
            }
            scorer.alerts()
        };
        let _ = self.events.send(SessionEvent::Alerts(alerts));
        true
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.scorer.lock().await.alerts()
    }

    pub async fn stats_snapshot(&self) -> SessionStats {
        let elapsed = self.state.lock().await.current_elapsed_secs();
        let mut scorer = self.scorer.lock().await;
        scorer.set_total_duration(elapsed);
        scorer.stats()
    }

    /// Push the current stats to the sink and return them.
    pub async fn sync_report(&self) -> Result<SessionStats> {
        let candidate_id = self
            .state
            .lock()
            .await
            .candidate_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no candidate to report on"))?;

        let stats = self.stats_snapshot().await;
        self.sink.sync_stats(&candidate_id, &stats);

        let alerts = {
            let mut scorer = self.scorer.lock().await;
            scorer.notify(STATS_SYNCED_MESSAGE, Instant::now());
            scorer.alerts()
        };
        let _ = self.events.send(SessionEvent::Alerts(alerts));

        Ok(stats)
    }

    async fn spawn_consumer(&self, candidate_id: String, mut rx: mpsc::UnboundedReceiver<FrameObservation>) {
        let scorer = self.scorer.clone();
        let sink = self.sink.clone();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            while let Some(obs) = rx.recv().await {
                let update = scorer.lock().await.on_observation(&obs, Instant::now());

                sink.submit(events_for_tick(&candidate_id, &obs, update.triggers));

                let _ = events.send(SessionEvent::Observation(obs));
                let _ = events.send(SessionEvent::Stats(update.stats));
                if let Some(alert) = update.alert {
                    log_debug!("alert #{}: {}", alert.id, alert.message);
                    let _ = events.send(SessionEvent::Alerts(update.alerts));
                }
            }
        });

        let mut guard = self.consumer.lock().await;
        if let Some(previous) = guard.replace(handle) {
            previous.abort();
        }
    }

    async fn spawn_ticker(&self, candidate_id: String) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let state = self.state.clone();
        let scorer = self.scorer.clone();
        let sink = self.sink.clone();
        let events = self.events.clone();
        let tick_interval = self.tick_interval;
        let heartbeat_every = self.settings.heartbeat_every_ticks().max(1);

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            let mut ticks: u32 = 0;
            loop {
                interval.tick().await;

                let elapsed = {
                    let guard = state.lock().await;
                    if !guard.is_running() {
                        break;
                    }
                    guard.current_elapsed_secs()
                };

                let (pruned_alerts, stats) = {
                    let mut guard = scorer.lock().await;
                    guard.set_total_duration(elapsed);
                    let pruned = guard.prune_expired(Instant::now());
                    (pruned.then(|| guard.alerts()), guard.stats())
                };

                if let Some(alerts) = pruned_alerts {
                    let _ = events.send(SessionEvent::Alerts(alerts));
                }

                ticks = ticks.wrapping_add(1);
                if ticks % heartbeat_every == 0 {
                    sink.sync_stats(&candidate_id, &stats);
                    let _ = events.send(SessionEvent::Stats(stats));
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }
}
