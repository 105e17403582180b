//! Classifier boundary: the opaque model adapter and the mapping of its raw
//! output into the proctoring vocabulary.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::{BoundingBox, DetectedObject, ObjectCategory};

use super::frame::Frame;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

const PERSON_LABEL: &str = "person";
const MULTI_FACE_CONFIDENCE: f32 = 1.0;

/// One detection as reported by the model: `box` is `[x, y, w, h]` in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
}

impl RawDetection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    fn is_well_formed(&self) -> bool {
        self.confidence.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
            && self.bbox.iter().all(|v| v.is_finite())
    }
}

/// Object/pose model wrapper. Implementations may be slow and are not
/// assumed reentrant; the detection loop serializes every call.
pub trait ClassifierAdapter: Send + 'static {
    /// Load weights, warm up backends. Failure means the model is unavailable.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;
}

/// Face and object fields of an observation; focus fields are filled in by
/// the focus tracker afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifiedFrame {
    pub face_count: u32,
    pub suspicious_objects: Vec<DetectedObject>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ObservationClassifier;

impl ObservationClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Keep prohibited items, count people, and flag a crowded frame with a
    /// single full-frame `face` entry.
    pub fn classify(&self, detections: &[RawDetection], frame_size: (u32, u32)) -> ClassifiedFrame {
        let mut face_count: u32 = 0;
        let mut suspicious_objects = Vec::new();

        for detection in detections {
            if !detection.is_well_formed() {
                log_warn!(
                    "dropping malformed detection '{}' (confidence={}, box={:?})",
                    detection.label,
                    detection.confidence,
                    detection.bbox
                );
                continue;
            }

            if detection.label.trim().eq_ignore_ascii_case(PERSON_LABEL) {
                face_count = face_count.saturating_add(1);
                continue;
            }

            if let Some(category) = ObjectCategory::from_label(&detection.label) {
                suspicious_objects.push(DetectedObject {
                    category,
                    confidence: detection.confidence,
                    bounding_box: BoundingBox::from_xywh(detection.bbox),
                });
            }
        }

        if face_count > 1 {
            suspicious_objects.push(DetectedObject {
                category: ObjectCategory::Face,
                confidence: MULTI_FACE_CONFIDENCE,
                bounding_box: BoundingBox::full_frame(frame_size.0, frame_size.1),
            });
        }

        ClassifiedFrame {
            face_count,
            suspicious_objects,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str, confidence: f32) -> RawDetection {
        RawDetection::new(label, confidence, [10.0, 20.0, 30.0, 40.0])
    }

    #[test]
    fn two_people_and_a_phone_yield_one_face_flag_and_the_phone() {
        let classified = ObservationClassifier::new().classify(
            &[det("person", 0.9), det("person", 0.8), det("cell phone", 0.7)],
            (640, 480),
        );

        assert_eq!(classified.face_count, 2);
        assert_eq!(classified.suspicious_objects.len(), 2);
        assert_eq!(classified.suspicious_objects[0].category, ObjectCategory::Phone);
        assert_eq!(classified.suspicious_objects[0].confidence, 0.7);

        let face = &classified.suspicious_objects[1];
        assert_eq!(face.category, ObjectCategory::Face);
        assert_eq!(face.confidence, 1.0);
        assert_eq!(face.bounding_box, BoundingBox::full_frame(640, 480));
    }

    #[test]
    fn crowd_is_flagged_exactly_once() {
        let classified = ObservationClassifier::new().classify(
            &[det("person", 0.9), det("person", 0.9), det("person", 0.9), det("person", 0.9)],
            (320, 240),
        );

        assert_eq!(classified.face_count, 4);
        let faces = classified
            .suspicious_objects
            .iter()
            .filter(|o| o.category == ObjectCategory::Face)
            .count();
        assert_eq!(faces, 1);
    }

    #[test]
    fn single_person_is_not_suspicious() {
        let classified = ObservationClassifier::new().classify(&[det("person", 0.95)], (640, 480));
        assert_eq!(classified.face_count, 1);
        assert!(classified.suspicious_objects.is_empty());
    }

    #[test]
    fn unrelated_labels_are_ignored_and_confidence_passes_through() {
        let classified = ObservationClassifier::new().classify(
            &[det("cup", 0.99), det("book", 0.31), det("keyboard", 0.42)],
            (640, 480),
        );

        assert_eq!(classified.face_count, 0);
        let confidences: Vec<f32> = classified.suspicious_objects.iter().map(|o| o.confidence).collect();
        assert_eq!(confidences, vec![0.31, 0.42]);
        assert_eq!(
            classified.suspicious_objects[0].bounding_box,
            BoundingBox::new(10.0, 20.0, 30.0, 40.0)
        );
    }

    #[test]
    fn malformed_detections_are_dropped() {
        let classified = ObservationClassifier::new().classify(
            &[
                det("cell phone", f32::NAN),
                det("person", 1.5),
                RawDetection::new("book", 0.5, [0.0, f32::INFINITY, 1.0, 1.0]),
            ],
            (640, 480),
        );

        assert_eq!(classified, ClassifiedFrame::default());
    }

    #[test]
    fn raw_detection_uses_box_key_on_the_wire() {
        let parsed: RawDetection =
            serde_json::from_str(r#"{"label":"cell phone","confidence":0.5,"box":[1,2,3,4]}"#).unwrap();
        assert_eq!(parsed.bbox, [1.0, 2.0, 3.0, 4.0]);
    }
}
