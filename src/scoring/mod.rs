pub mod alerts;
pub mod scorer;

pub use alerts::AlertBuffer;
pub use scorer::{FocusCountPolicy, ScoreUpdate, SessionScorer, TickTriggers};
