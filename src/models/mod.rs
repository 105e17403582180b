pub mod alert;
pub mod observation;
pub mod session;

pub use alert::{Alert, AlertSeverity, AlertType};
pub use observation::{BoundingBox, DetectedObject, FrameObservation, ObjectCategory};
pub use session::{integrity_score, Candidate, CandidateStatus, SessionStats};
