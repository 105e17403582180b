//! Event records sent to the reporting backend, one per qualifying condition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{AlertSeverity, BoundingBox, FrameObservation, ObjectCategory};
use crate::scoring::TickTriggers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FocusLost,
    NoFaceDetected,
    PhoneDetected,
    BookDetected,
    MultipleFacesDetected,
    DeviceDetected,
    EyeClosureDetected,
    AudioNoiseDetected,
}

impl EventType {
    pub fn for_category(category: ObjectCategory) -> Self {
        match category {
            ObjectCategory::Phone => EventType::PhoneDetected,
            ObjectCategory::Book => EventType::BookDetected,
            ObjectCategory::Face => EventType::MultipleFacesDetected,
            ObjectCategory::Laptop
            | ObjectCategory::Monitor
            | ObjectCategory::Keyboard
            | ObjectCategory::Mouse
            | ObjectCategory::Remote => EventType::DeviceDetected,
        }
    }

    pub fn severity(&self) -> AlertSeverity {
        match self {
            EventType::PhoneDetected | EventType::MultipleFacesDetected => AlertSeverity::Critical,
            EventType::BookDetected | EventType::NoFaceDetected => AlertSeverity::High,
            EventType::DeviceDetected | EventType::FocusLost | EventType::EyeClosureDetected => {
                AlertSeverity::Medium
            }
            EventType::AudioNoiseDetected => AlertSeverity::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::FocusLost => "focus_lost",
            EventType::NoFaceDetected => "no_face_detected",
            EventType::PhoneDetected => "phone_detected",
            EventType::BookDetected => "book_detected",
            EventType::MultipleFacesDetected => "multiple_faces_detected",
            EventType::DeviceDetected => "device_detected",
            EventType::EyeClosureDetected => "eye_closure_detected",
            EventType::AudioNoiseDetected => "audio_noise_detected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<ObjectCategory>,
    pub observation: FrameObservation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProctorEvent {
    pub candidate_id: String,
    pub event_type: EventType,
    pub severity: AlertSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    pub metadata: EventMetadata,
}

impl ProctorEvent {
    fn simple(candidate_id: &str, event_type: EventType, obs: &FrameObservation) -> Self {
        Self {
            candidate_id: candidate_id.to_string(),
            event_type,
            severity: event_type.severity(),
            confidence: None,
            bounding_box: None,
            metadata: EventMetadata {
                timestamp: obs.timestamp,
                object_type: None,
                observation: obs.clone(),
            },
        }
    }
}

/// Build the event records for one tick.
///
/// Focus and face events follow the scorer's triggers so the backend sees the
/// same episodes the score was charged for; objects, eye closure and audio
/// are reported on every tick they are present.
pub fn events_for_tick(candidate_id: &str, obs: &FrameObservation, triggers: TickTriggers) -> Vec<ProctorEvent> {
    let mut events = Vec::new();

    if triggers.focus_lost {
        events.push(ProctorEvent::simple(candidate_id, EventType::FocusLost, obs));
    }

    if triggers.face_lost {
        events.push(ProctorEvent::simple(candidate_id, EventType::NoFaceDetected, obs));
    }

    for object in &obs.suspicious_objects {
        let event_type = EventType::for_category(object.category);
        events.push(ProctorEvent {
            candidate_id: candidate_id.to_string(),
            event_type,
            severity: event_type.severity(),
            confidence: Some(object.confidence),
            bounding_box: Some(object.bounding_box),
            metadata: EventMetadata {
                timestamp: obs.timestamp,
                object_type: Some(object.category),
                observation: obs.clone(),
            },
        });
    }

    if obs.eye_closure {
        events.push(ProctorEvent::simple(candidate_id, EventType::EyeClosureDetected, obs));
    }

    if obs.audio_noise {
        events.push(ProctorEvent::simple(candidate_id, EventType::AudioNoiseDetected, obs));
    }

    events
}
