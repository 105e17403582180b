use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::models::SessionStats;

use super::events::ProctorEvent;
use super::sink::EventSink;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Client for the proctoring backend's REST API.
#[derive(Clone)]
pub struct HttpReporter {
    client: reqwest::Client,
    base_url: String,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl HttpReporter {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            pending: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn post_event(&self, event: &ProctorEvent) -> Result<()> {
        let url = format!("{}/logs", self.base_url);
        self.client
            .post(&url)
            .json(event)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?
            .error_for_status()
            .map_err(|err| anyhow!("POST {url} rejected: {err}"))?;
        Ok(())
    }

    pub async fn put_stats(&self, candidate_id: &str, stats: &SessionStats) -> Result<()> {
        let url = format!("{}/candidates/{}", self.base_url, candidate_id);
        self.client
            .put(&url)
            .json(stats)
            .send()
            .await
            .with_context(|| format!("PUT {url} failed"))?
            .error_for_status()
            .map_err(|err| anyhow!("PUT {url} rejected: {err}"))?;
        Ok(())
    }

    pub async fn post_end(&self, candidate_id: &str) -> Result<()> {
        let url = format!("{}/candidates/{}/end", self.base_url, candidate_id);
        self.client
            .post(&url)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?
            .error_for_status()
            .map_err(|err| anyhow!("POST {url} rejected: {err}"))?;
        Ok(())
    }

    /// Aggregated event counts the backend keeps for a candidate.
    pub async fn fetch_log_stats(&self, candidate_id: &str) -> Result<serde_json::Value> {
        self.get_json(format!("{}/logs/stats/{}", self.base_url, candidate_id))
            .await
    }

    /// The backend's proctoring report for a candidate, JSON flavour.
    pub async fn fetch_report(&self, candidate_id: &str) -> Result<serde_json::Value> {
        self.get_json(format!("{}/reports/{}?format=json", self.base_url, candidate_id))
            .await
    }

    /// Wait for every delivery spawned so far. Call before the runtime shuts down.
    pub async fn flush(&self) {
        let handles = match self.pending.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if let Err(err) = handle.await {
                log_warn!("report delivery task failed: {err}");
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        self.client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?
            .error_for_status()
            .map_err(|err| anyhow!("GET {url} rejected: {err}"))?
            .json()
            .await
            .with_context(|| format!("GET {url} returned malformed JSON"))
    }

    fn spawn<F>(&self, what: &'static str, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        match Handle::try_current() {
            Ok(handle) => {
                let join = handle.spawn(task);
                let mut pending = match self.pending.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                pending.retain(|h| !h.is_finished());
                pending.push(join);
            }
            Err(_) => log_warn!("no async runtime; dropping {what}"),
        }
    }
}

impl EventSink for HttpReporter {
    fn submit(&self, events: Vec<ProctorEvent>) {
        if events.is_empty() {
            return;
        }
        let reporter = self.clone();
        self.spawn("event delivery", async move {
            for event in &events {
                match reporter.post_event(event).await {
                    Ok(()) => log_debug!("delivered {} for {}", event.event_type.as_str(), event.candidate_id),
                    Err(err) => log_warn!("failed to send log event: {err:#}"),
                }
            }
        });
    }

    fn sync_stats(&self, candidate_id: &str, stats: &SessionStats) {
        let reporter = self.clone();
        let candidate_id = candidate_id.to_string();
        let stats = stats.clone();
        self.spawn("stats sync", async move {
            if let Err(err) = reporter.put_stats(&candidate_id, &stats).await {
                log_warn!("failed to sync candidate stats: {err:#}");
            }
        });
    }

    fn end_session(&self, candidate_id: &str, stats: &SessionStats) {
        let reporter = self.clone();
        let candidate_id = candidate_id.to_string();
        let stats = stats.clone();
        self.spawn("session end", async move {
            if let Err(err) = reporter.put_stats(&candidate_id, &stats).await {
                log_warn!("failed to sync final candidate stats: {err:#}");
            }
            if let Err(err) = reporter.post_end(&candidate_id).await {
                log_warn!("failed to end interview: {err:#}");
            }
        });
    }
}
