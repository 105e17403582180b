//! Inputs pulled by the detection loop on every tick.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbaImage;

/// One captured webcam frame. Cloning shares the pixel buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: u64,
    pub captured_at: DateTime<Utc>,
    pub image: Arc<RgbaImage>,
}

impl Frame {
    pub fn new(id: u64, image: RgbaImage) -> Self {
        Self {
            id,
            captured_at: Utc::now(),
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Where frames come from (webcam grabber, video file, test fixture).
pub trait FrameSource: Send + 'static {
    /// `None` when no frame is ready yet; the tick is skipped.
    fn next_frame(&mut self) -> Option<Frame>;
}

/// Auxiliary signals sampled alongside each frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuxiliaryReading {
    /// Raw per-tick eye state; debounced by the loop before it is reported.
    pub eyes_closed: bool,
    pub audio_noise: bool,
}

pub trait AuxiliaryProbe: Send + 'static {
    fn sample(&mut self) -> AuxiliaryReading;
}

/// Probe for setups without eye tracking or microphone analysis.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuxiliarySignals;

impl AuxiliaryProbe for NoAuxiliarySignals {
    fn sample(&mut self) -> AuxiliaryReading {
        AuxiliaryReading::default()
    }
}
