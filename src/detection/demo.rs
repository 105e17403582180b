//! Simulated collaborators for running a session without a camera or model.
//!
//! The random classifier mimics the kinds of frames a real session produces:
//! mostly a single person, occasionally nobody, a second person, or a phone.

use anyhow::Result;
use image::{Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::classifier::{ClassifierAdapter, RawDetection};
use super::frame::{AuxiliaryProbe, AuxiliaryReading, Frame, FrameSource};

const DEMO_FRAME_WIDTH: u32 = 640;
const DEMO_FRAME_HEIGHT: u32 = 480;

pub struct DemoClassifier {
    rng: StdRng,
    absent_probability: f64,
    second_person_probability: f64,
    phone_probability: f64,
    book_probability: f64,
}

impl DemoClassifier {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: seeded(seed),
            absent_probability: 0.02,
            second_person_probability: 0.01,
            phone_probability: 0.01,
            book_probability: 0.005,
        }
    }
}

impl ClassifierAdapter for DemoClassifier {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let (w, h) = (frame.width() as f32, frame.height() as f32);
        let mut detections = Vec::new();

        if !self.rng.gen_bool(self.absent_probability) {
            let confidence = self.rng.gen_range(0.75..0.99);
            detections.push(RawDetection::new("person", confidence, [w * 0.3, h * 0.2, w * 0.4, h * 0.7]));
        }

        if self.rng.gen_bool(self.second_person_probability) {
            let confidence = self.rng.gen_range(0.5..0.9);
            detections.push(RawDetection::new("person", confidence, [w * 0.7, h * 0.3, w * 0.25, h * 0.6]));
        }

        if self.rng.gen_bool(self.phone_probability) {
            let confidence = self.rng.gen_range(0.5..0.95);
            detections.push(RawDetection::new("cell phone", confidence, [100.0, 100.0, 50.0, 80.0]));
        }

        if self.rng.gen_bool(self.book_probability) {
            let confidence = self.rng.gen_range(0.4..0.9);
            detections.push(RawDetection::new("book", confidence, [w * 0.05, h * 0.6, w * 0.2, h * 0.3]));
        }

        Ok(detections)
    }
}

/// Flat grey frames at webcam resolution.
pub struct SyntheticFrameSource {
    next_id: u64,
    template: RgbaImage,
}

impl SyntheticFrameSource {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            template: RgbaImage::from_pixel(DEMO_FRAME_WIDTH, DEMO_FRAME_HEIGHT, Rgba([96, 96, 96, 255])),
        }
    }
}

impl Default for SyntheticFrameSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for SyntheticFrameSource {
    fn next_frame(&mut self) -> Option<Frame> {
        self.next_id += 1;
        Some(Frame::new(self.next_id, self.template.clone()))
    }
}

pub struct RandomAuxiliaryProbe {
    rng: StdRng,
    eyes_closed: bool,
}

impl RandomAuxiliaryProbe {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: seeded(seed.map(|s| s.wrapping_add(1))),
            eyes_closed: false,
        }
    }
}

impl AuxiliaryProbe for RandomAuxiliaryProbe {
    fn sample(&mut self) -> AuxiliaryReading {
        // Eye state is sticky so closures last long enough to cross the hold timer.
        if self.eyes_closed {
            self.eyes_closed = !self.rng.gen_bool(0.05);
        } else {
            self.eyes_closed = self.rng.gen_bool(0.002);
        }

        AuxiliaryReading {
            eyes_closed: self.eyes_closed,
            audio_noise: self.rng.gen_bool(0.003),
        }
    }
}

fn seeded(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
