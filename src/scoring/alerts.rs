use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::models::Alert;

#[derive(Debug, Clone)]
struct BufferedAlert {
    alert: Alert,
    expires_at: Instant,
}

/// Most-recent-first ring of alerts with a per-alert display window.
#[derive(Debug, Clone)]
pub struct AlertBuffer {
    capacity: usize,
    display_window: Duration,
    entries: VecDeque<BufferedAlert>,
}

impl AlertBuffer {
    pub fn new(capacity: usize, display_window: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            display_window,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Insert at the front, evicting the oldest entries beyond capacity.
    pub fn push(&mut self, alert: Alert, now: Instant) {
        self.entries.push_front(BufferedAlert {
            alert,
            expires_at: now + self.display_window,
        });
        self.entries.truncate(self.capacity);
    }

    pub fn dismiss(&mut self, alert_id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.alert.id != alert_id);
        self.entries.len() != before
    }

    /// Drop alerts whose display window has elapsed. Returns true if any were removed.
    pub fn prune_expired(&mut self, now: Instant) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.expires_at > now);
        self.entries.len() != before
    }

    /// Current alerts, newest first.
    pub fn snapshot(&self) -> Vec<Alert> {
        self.entries.iter().map(|entry| entry.alert.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
