use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::settings::ProctorSettings;

use super::classifier::{ClassifierAdapter, ObservationClassifier};
use super::error::DetectionError;
use super::focus::{FocusTracker, HoldTimer};
use super::frame::{AuxiliaryProbe, FrameSource};
use super::loop_worker::{detection_loop, DeliveryGate, LoopContext, ObservationCallback, SharedClassifier};

#[derive(Debug, Clone)]
struct LoopTimings {
    interval: Duration,
    inference_timeout: Duration,
    focus_lost_threshold: Duration,
    no_face_threshold: Duration,
    eye_closure_threshold: Duration,
}

impl From<&ProctorSettings> for LoopTimings {
    fn from(settings: &ProctorSettings) -> Self {
        Self {
            interval: settings.detection_interval(),
            inference_timeout: settings.inference_timeout(),
            focus_lost_threshold: settings.focus_lost_threshold(),
            no_face_threshold: settings.no_face_threshold(),
            eye_closure_threshold: settings.eye_closure_threshold(),
        }
    }
}

/// The detection engine: owns the classifier and the sampling task.
///
/// Constructed explicitly per session; there is no shared global instance.
pub struct DetectionLoop {
    classifier: SharedClassifier,
    timings: LoopTimings,
    initialized: bool,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    gate: DeliveryGate,
}

impl DetectionLoop {
    pub fn new(classifier: impl ClassifierAdapter, settings: &ProctorSettings) -> Self {
        let classifier: Box<dyn ClassifierAdapter> = Box::new(classifier);
        Self {
            classifier: Arc::new(Mutex::new(classifier)),
            timings: LoopTimings::from(settings),
            initialized: false,
            handle: None,
            cancel_token: None,
            gate: DeliveryGate::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Initialize the model on first use, then begin sampling `source` at the
    /// configured cadence. Each tick's observation is handed to `on_observation`.
    pub async fn start(
        &mut self,
        source: Box<dyn FrameSource>,
        probe: Box<dyn AuxiliaryProbe>,
        on_observation: ObservationCallback,
    ) -> Result<(), DetectionError> {
        if self.handle.is_some() {
            return Err(DetectionError::AlreadyRunning);
        }

        if !self.initialized {
            let classifier = Arc::clone(&self.classifier);
            tokio::task::spawn_blocking(move || {
                let mut model = classifier
                    .lock()
                    .map_err(|_| anyhow!("classifier mutex poisoned"))?;
                model.initialize()
            })
            .await
            .map_err(|err| DetectionError::ModelUnavailable(format!("initialization worker failed: {err}")))?
            .map_err(|err| DetectionError::ModelUnavailable(format!("{err:#}")))?;

            self.initialized = true;
            info!("Detection model initialized");
        }

        let cancel_token = CancellationToken::new();
        let generation = self.gate.advance();

        let ctx = LoopContext {
            classifier: Arc::clone(&self.classifier),
            source,
            probe,
            observation_classifier: ObservationClassifier::new(),
            tracker: FocusTracker::new(self.timings.focus_lost_threshold, self.timings.no_face_threshold),
            eye_closure: HoldTimer::new(self.timings.eye_closure_threshold),
            on_observation,
            interval: self.timings.interval,
            inference_timeout: self.timings.inference_timeout,
            gate: self.gate.clone(),
            generation,
            stalled: None,
        };

        let handle = tokio::spawn(detection_loop(ctx, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Halt sampling. Safe to call repeatedly. No observation is delivered
    /// after this returns; a classifier call still in flight finishes on the
    /// blocking pool and its result is dropped.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.gate.advance();

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("detection loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.gate.advance();
    }
}
