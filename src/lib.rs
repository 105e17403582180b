pub mod cli;
pub mod detection;
pub mod models;
pub mod reporting;
pub mod scoring;
pub mod session;
pub mod settings;
mod utils;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use serde::Serialize;
use uuid::Uuid;

use cli::CliArgs;
use detection::demo::{DemoClassifier, RandomAuxiliaryProbe, SyntheticFrameSource};
use models::{Candidate, SessionStats};
use reporting::{EventJournal, EventSink, EventType, FanoutSink, HttpReporter};
use session::{SessionController, SessionEvent};
use settings::SettingsStore;

pub use detection::{ClassifierAdapter, DetectionError, DetectionLoop, FrameSource};
pub use scoring::{FocusCountPolicy, SessionScorer};
pub use settings::ProctorSettings;

const DEFAULT_JOURNAL_PATH: &str = "proctor-journal.sqlite3";

/// What the demo binary prints when the session ends.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub candidate: Candidate,
    pub stats: SessionStats,
    pub event_counts: Vec<(EventType, u64)>,
    pub journal: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSummary {
    pub log_stats: Option<serde_json::Value>,
    pub report: Option<serde_json::Value>,
}

/// Run one simulated session end to end: demo classifier, synthetic frames,
/// journal (and optionally HTTP) reporting.
pub async fn run(args: CliArgs) -> Result<RunSummary> {
    let store = SettingsStore::new(args.settings.clone())?;
    let settings = apply_cli_settings(&store, &args)?.with_env_overrides();

    let journal_path = args
        .journal
        .clone()
        .or_else(|| settings.journal_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_JOURNAL_PATH));
    let journal = EventJournal::new(journal_path.clone())?;

    let mut sink = FanoutSink::new().with(Arc::new(journal.clone()));
    let reporter = if args.report_http {
        let reporter = HttpReporter::new(settings.api_base_url.clone())?;
        log::info!("Reporting to {}", reporter.base_url());
        sink = sink.with(Arc::new(reporter.clone()));
        Some(reporter)
    } else {
        None
    };
    let sink: Arc<dyn EventSink> = Arc::new(sink);

    let candidate = Candidate::new(
        args.candidate_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        args.candidate_name.clone(),
        args.candidate_email.clone(),
    );
    let candidate_id = candidate.candidate_id.clone();

    let controller = SessionController::new(DemoClassifier::new(args.seed), settings, sink);
    let alert_logger = tokio::spawn(log_new_alerts(controller.subscribe()));

    controller
        .start(
            candidate,
            Box::new(SyntheticFrameSource::new()),
            Box::new(RandomAuxiliaryProbe::new(args.seed)),
        )
        .await
        .context("failed to start proctoring session")?;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            log::info!("Interrupted; ending session early");
        }
    }

    let stats = controller.end().await?;
    alert_logger.abort();

    // Sink writes are fire-and-forget; make the final row durable before exit.
    journal.upsert_stats(&candidate_id, &stats, true).await?;
    let event_counts = journal.event_counts(&candidate_id).await?;

    let mut backend = None;
    if let Some(reporter) = reporter {
        reporter.flush().await;
        backend = Some(fetch_backend_summary(&reporter, &candidate_id).await);
    }

    let state = controller.state().await;
    let candidate = state
        .candidate
        .context("ended session lost its candidate")?;

    Ok(RunSummary {
        candidate,
        stats,
        event_counts,
        journal: journal.path().to_path_buf(),
        backend,
    })
}

/// File settings with command line overrides, written back with `--save-settings`.
fn apply_cli_settings(store: &SettingsStore, args: &CliArgs) -> Result<ProctorSettings> {
    let mut settings = store.settings();
    if let Some(policy) = args.focus_policy {
        settings.focus_count_policy = policy.into();
    }
    if args.save_settings {
        store.update(settings.clone())?;
        log::info!("Saved settings to {}", args.settings.display());
    }
    Ok(settings)
}

/// Backend view of the finished session; fields are null when unreachable.
async fn fetch_backend_summary(reporter: &HttpReporter, candidate_id: &str) -> BackendSummary {
    let log_stats = reporter
        .fetch_log_stats(candidate_id)
        .await
        .map_err(|err| log::warn!("failed to fetch log stats: {err:#}"))
        .ok();
    let report = reporter
        .fetch_report(candidate_id)
        .await
        .map_err(|err| log::warn!("failed to fetch report: {err:#}"))
        .ok();
    BackendSummary { log_stats, report }
}

async fn log_new_alerts(mut rx: tokio::sync::broadcast::Receiver<SessionEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    let mut last_seen = 0u64;
    loop {
        match rx.recv().await {
            Ok(SessionEvent::Alerts(alerts)) => {
                for alert in alerts.iter().rev().filter(|a| a.id > last_seen) {
                    log::info!("[{}] {}", alert.severity.as_str(), alert.message);
                }
                if let Some(newest) = alerts.first() {
                    last_seen = last_seen.max(newest.id);
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => log::warn!("alert log skipped {skipped} events"),
            Err(RecvError::Closed) => break,
        }
    }
}
