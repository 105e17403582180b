//! Per-tick observation produced by the detection loop.
//!
//! A `FrameObservation` is the only shape that leaves the detection engine:
//! raw classifier output is validated and mapped into these types at the
//! classifier boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box from the classifier's `[x, y, w, h]` array.
    pub fn from_xywh(bbox: [f32; 4]) -> Self {
        Self::new(bbox[0], bbox[1], bbox[2], bbox[3])
    }

    /// Box covering an entire frame of the given pixel size.
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }
}

/// Prohibited-item categories, plus the synthetic `Face` entry used to flag
/// more than one person in frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectCategory {
    Phone,
    Book,
    Laptop,
    Monitor,
    Keyboard,
    Mouse,
    Remote,
    Face,
}

impl ObjectCategory {
    /// Map a classifier label onto a prohibited-item category.
    ///
    /// `person` is deliberately absent: people are counted, not flagged.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "cell phone" | "phone" | "mobile phone" => Some(ObjectCategory::Phone),
            "book" | "notebook" | "paper" => Some(ObjectCategory::Book),
            "laptop" | "laptop computer" | "tablet" => Some(ObjectCategory::Laptop),
            "tv" | "monitor" => Some(ObjectCategory::Monitor),
            "keyboard" => Some(ObjectCategory::Keyboard),
            "mouse" => Some(ObjectCategory::Mouse),
            "remote" => Some(ObjectCategory::Remote),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectCategory::Phone => "phone",
            ObjectCategory::Book => "book",
            ObjectCategory::Laptop => "laptop",
            ObjectCategory::Monitor => "monitor",
            ObjectCategory::Keyboard => "keyboard",
            ObjectCategory::Mouse => "mouse",
            ObjectCategory::Remote => "remote",
            ObjectCategory::Face => "face",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedObject {
    pub category: ObjectCategory,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameObservation {
    pub timestamp: DateTime<Utc>,
    pub face_count: u32,
    /// Debounced: false only after the face has been absent past the no-face threshold.
    pub face_detected: bool,
    pub suspicious_objects: Vec<DetectedObject>,
    /// Debounced: false only after sustained inattention.
    pub is_focused: bool,
    pub eye_closure: bool,
    pub audio_noise: bool,
}

impl FrameObservation {
    pub fn has_suspicious_objects(&self) -> bool {
        !self.suspicious_objects.is_empty()
    }

    /// Comma separated category names, in detection order.
    pub fn suspicious_summary(&self) -> String {
        self.suspicious_objects
            .iter()
            .map(|obj| obj.category.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
