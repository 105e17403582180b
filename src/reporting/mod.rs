pub mod events;
pub mod http;
pub mod journal;
pub mod sink;

pub use events::{events_for_tick, EventMetadata, EventType, ProctorEvent};
pub use http::HttpReporter;
pub use journal::{EventJournal, JournalEntry, StoredStats};
pub use sink::{EventSink, FanoutSink};
