pub mod classifier;
pub mod controller;
pub mod demo;
pub mod error;
pub mod focus;
pub mod frame;
mod loop_worker;

pub use classifier::{ClassifiedFrame, ClassifierAdapter, ObservationClassifier, RawDetection};
pub use controller::DetectionLoop;
pub use error::DetectionError;
pub use focus::{FocusSignals, FocusState, FocusTracker, HoldTimer};
pub use frame::{AuxiliaryProbe, AuxiliaryReading, Frame, FrameSource, NoAuxiliarySignals};
pub use loop_worker::ObservationCallback;
