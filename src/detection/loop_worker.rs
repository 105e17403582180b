use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::FrameObservation;

use super::classifier::{ClassifierAdapter, ObservationClassifier, RawDetection};
use super::error::DetectionError;
use super::focus::{FocusSignals, FocusTracker, HoldTimer};
use super::frame::{AuxiliaryProbe, FrameSource};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub type SharedClassifier = Arc<Mutex<Box<dyn ClassifierAdapter>>>;
pub type ObservationCallback = Arc<dyn Fn(FrameObservation) + Send + Sync>;

type InferenceJob = JoinHandle<anyhow::Result<Vec<RawDetection>>>;

/// Serializes observation delivery against `stop()`.
///
/// Each loop run owns a generation number. Delivery happens under the lock and
/// only while the generation is still current, so once `advance()` returns no
/// callback from an older run is executing or can start.
#[derive(Clone, Default)]
pub(crate) struct DeliveryGate {
    current: Arc<Mutex<u64>>,
}

impl DeliveryGate {
    pub(crate) fn advance(&self) -> u64 {
        let mut guard = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = guard.wrapping_add(1);
        *guard
    }

    pub(crate) fn deliver(&self, generation: u64, deliver: impl FnOnce()) -> bool {
        let guard = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard != generation {
            return false;
        }
        deliver();
        true
    }
}

pub(crate) struct LoopContext {
    pub classifier: SharedClassifier,
    pub source: Box<dyn FrameSource>,
    pub probe: Box<dyn AuxiliaryProbe>,
    pub observation_classifier: ObservationClassifier,
    pub tracker: FocusTracker,
    pub eye_closure: HoldTimer,
    pub on_observation: ObservationCallback,
    pub interval: Duration,
    pub inference_timeout: Duration,
    pub gate: DeliveryGate,
    pub generation: u64,
    /// Classifier call abandoned by a timeout that is still running.
    pub stalled: Option<InferenceJob>,
}

pub(crate) async fn detection_loop(mut ctx: LoopContext, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(ctx.interval);
    // A tick that comes due while inference is still running is dropped, not queued.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    log_info!(
        "detection loop started (generation {}, interval {:?})",
        ctx.generation,
        ctx.interval
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                break;
            }
            _ = ticker.tick() => {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => None,
                    result = perform_detection(&mut ctx) => Some(result),
                };

                let Some(result) = outcome else {
                    break;
                };

                match result {
                    Ok(Some(observation)) => {
                        let callback = Arc::clone(&ctx.on_observation);
                        let delivered = ctx.gate.deliver(ctx.generation, move || callback(observation));
                        if !delivered {
                            log_debug!("discarding observation from stale generation {}", ctx.generation);
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => log_warn!("detection tick failed: {err}"),
                }
            }
        }
    }

    log_info!("detection loop shutting down (generation {})", ctx.generation);
}

/// One sampling tick. `Ok(None)` means there was no frame to look at.
///
/// On error the focus tracker is left untouched: a failed inference neither
/// flips focus nor resets running hold timers.
async fn perform_detection(ctx: &mut LoopContext) -> Result<Option<FrameObservation>, DetectionError> {
    if let Some(job) = ctx.stalled.take() {
        if !job.is_finished() {
            log_debug!("previous inference still running; skipping tick");
            ctx.stalled = Some(job);
            return Ok(None);
        }
        // Its frame is stale; the result is dropped.
    }

    let Some(frame) = ctx.source.next_frame() else {
        log_debug!("no frame available this tick");
        return Ok(None);
    };

    let now = Instant::now();
    let inference_start = std::time::Instant::now();

    let mut job: InferenceJob = tokio::task::spawn_blocking({
        let classifier = Arc::clone(&ctx.classifier);
        let frame = frame.clone();
        move || {
            let mut model = classifier
                .lock()
                .map_err(|_| anyhow!("classifier mutex poisoned"))?;
            model.detect(&frame)
        }
    });

    let raw = match tokio::time::timeout(ctx.inference_timeout, &mut job).await {
        Ok(Ok(Ok(raw))) => raw,
        Ok(Ok(Err(err))) => return Err(DetectionError::Inference(format!("{err:#}"))),
        Ok(Err(join_err)) => {
            return Err(DetectionError::Inference(format!(
                "classifier worker join failed: {join_err}"
            )))
        }
        Err(_) => {
            ctx.stalled = Some(job);
            return Err(DetectionError::Timeout(ctx.inference_timeout));
        }
    };

    log_debug!(
        "frame {} classified: {} detections in {}ms",
        frame.id,
        raw.len(),
        inference_start.elapsed().as_millis()
    );

    let classified = ctx
        .observation_classifier
        .classify(&raw, (frame.width(), frame.height()));

    let focus = ctx.tracker.update(
        FocusSignals {
            face_detected: classified.face_count > 0,
            has_suspicious_object: !classified.suspicious_objects.is_empty(),
        },
        now,
    );

    let aux = ctx.probe.sample();
    let eye_closure = ctx.eye_closure.observe(aux.eyes_closed, now);

    Ok(Some(FrameObservation {
        timestamp: frame.captured_at,
        face_count: classified.face_count,
        face_detected: focus.face_detected,
        suspicious_objects: classified.suspicious_objects,
        is_focused: focus.is_focused,
        eye_closure,
        audio_noise: aux.audio_noise,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_rejects_stale_generations() {
        let gate = DeliveryGate::default();
        let first = gate.advance();
        let mut calls = 0;
        assert!(gate.deliver(first, || calls += 1));

        let second = gate.advance();
        assert!(!gate.deliver(first, || calls += 1));
        assert!(gate.deliver(second, || calls += 1));
        assert_eq!(calls, 2);
    }
}
