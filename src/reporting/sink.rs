use std::sync::Arc;

use crate::models::SessionStats;

use super::events::ProctorEvent;

/// Fire-and-forget delivery of proctoring records.
///
/// Implementations must not block the caller and must swallow (and log)
/// their own failures; detection never waits on reporting.
pub trait EventSink: Send + Sync {
    fn submit(&self, events: Vec<ProctorEvent>);

    /// Push the current stats upstream (report download, periodic sync).
    fn sync_stats(&self, candidate_id: &str, stats: &SessionStats);

    fn end_session(&self, candidate_id: &str, stats: &SessionStats) {
        self.sync_stats(candidate_id, stats);
    }
}

/// Delivers every record to each inner sink.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn submit(&self, events: Vec<ProctorEvent>) {
        if events.is_empty() {
            return;
        }
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.submit(events.clone());
            }
            last.submit(events);
        }
    }

    fn sync_stats(&self, candidate_id: &str, stats: &SessionStats) {
        for sink in &self.sinks {
            sink.sync_stats(candidate_id, stats);
        }
    }

    fn end_session(&self, candidate_id: &str, stats: &SessionStats) {
        for sink in &self.sinks {
            sink.end_session(candidate_id, stats);
        }
    }
}
