//! Local SQLite journal of proctoring events and per-candidate stats.
//!
//! All statements run on one dedicated thread that owns the connection;
//! async callers hand it closures and await the reply.

use std::{
    convert::TryFrom,
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{runtime::Handle, sync::oneshot};

mod migrations;

use migrations::run_migrations;

use crate::models::{AlertSeverity, BoundingBox, SessionStats};

use super::events::{EventType, ProctorEvent};
use super::sink::EventSink;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct JournalInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for JournalInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to journal thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join journal thread: {join_err:?}");
            }
        }
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

/// Enum columns are stored as their serde string form.
fn parse_tag<T: DeserializeOwned>(value: String, field: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value))
        .with_context(|| format!("unknown {field} value"))
}

/// One stored event row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: i64,
    pub candidate_id: String,
    pub event_type: EventType,
    pub severity: AlertSeverity,
    pub confidence: Option<f32>,
    pub bounding_box: Option<BoundingBox>,
    pub occurred_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredStats {
    pub candidate_id: String,
    pub stats: SessionStats,
    pub ended: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct EventJournal {
    inner: Arc<JournalInner>,
    db_path: Arc<PathBuf>,
}

impl EventJournal {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create journal directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("proctor-journal".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite journal")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run journal migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Journal initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Journal thread shutting down");
            })
            .with_context(|| "failed to spawn journal worker thread")?;

        ready_rx
            .recv()
            .context("journal worker exited before signaling readiness")??;

        info!("Event journal initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(JournalInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Journal caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to journal thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("journal thread terminated unexpectedly"))?
    }

    pub async fn insert_events(&self, events: Vec<ProctorEvent>) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        self.execute(move |conn| {
            let tx = conn.transaction().context("failed to open event transaction")?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO events (candidate_id, event_type, severity, confidence, bounding_box, occurred_at, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;

                for event in &events {
                    let bounding_box = event
                        .bounding_box
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?;
                    stmt.execute(params![
                        event.candidate_id,
                        event.event_type.as_str(),
                        event.severity.as_str(),
                        event.confidence.map(f64::from),
                        bounding_box,
                        event.metadata.timestamp.to_rfc3339(),
                        serde_json::to_string(&event.metadata)?,
                    ])
                    .with_context(|| "failed to insert event")?;
                }
            }
            tx.commit().context("failed to commit events")?;
            Ok(events.len())
        })
        .await
    }

    pub async fn upsert_stats(&self, candidate_id: &str, stats: &SessionStats, ended: bool) -> Result<()> {
        let candidate_id = candidate_id.to_string();
        let stats = stats.clone();
        let updated_at = Utc::now();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO session_stats (candidate_id, focus_lost_count, suspicious_events_count, integrity_score, total_duration, ended, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(candidate_id) DO UPDATE SET
                     focus_lost_count = excluded.focus_lost_count,
                     suspicious_events_count = excluded.suspicious_events_count,
                     integrity_score = excluded.integrity_score,
                     total_duration = excluded.total_duration,
                     ended = MAX(session_stats.ended, excluded.ended),
                     updated_at = excluded.updated_at",
                params![
                    candidate_id,
                    to_i64(stats.focus_lost_count)?,
                    to_i64(stats.suspicious_events_count)?,
                    stats.integrity_score as i64,
                    to_i64(stats.total_duration)?,
                    ended as i64,
                    updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to upsert session stats")?;
            Ok(())
        })
        .await
    }

    pub async fn events_for_candidate(&self, candidate_id: &str) -> Result<Vec<JournalEntry>> {
        let candidate_id = candidate_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, candidate_id, event_type, severity, confidence, bounding_box, occurred_at, metadata
                 FROM events
                 WHERE candidate_id = ?1
                 ORDER BY occurred_at ASC, id ASC",
            )?;

            let mut rows = stmt.query(params![candidate_id])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(JournalEntry {
                    id: row.get(0)?,
                    candidate_id: row.get(1)?,
                    event_type: parse_tag(row.get(2)?, "event_type")?,
                    severity: parse_tag(row.get(3)?, "severity")?,
                    confidence: row.get::<_, Option<f64>>(4)?.map(|c| c as f32),
                    bounding_box: row
                        .get::<_, Option<String>>(5)?
                        .map(|raw| serde_json::from_str(&raw))
                        .transpose()
                        .context("invalid bounding_box column")?,
                    occurred_at: parse_datetime(&row.get::<_, String>(6)?)?,
                    metadata: serde_json::from_str(&row.get::<_, String>(7)?)
                        .context("invalid metadata column")?,
                });
            }

            Ok(entries)
        })
        .await
    }

    /// Per-type event counts for a candidate, most frequent first.
    pub async fn event_counts(&self, candidate_id: &str) -> Result<Vec<(EventType, u64)>> {
        let candidate_id = candidate_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT event_type, COUNT(*) AS n
                 FROM events
                 WHERE candidate_id = ?1
                 GROUP BY event_type
                 ORDER BY n DESC, event_type ASC",
            )?;

            let mut rows = stmt.query(params![candidate_id])?;
            let mut counts = Vec::new();
            while let Some(row) = rows.next()? {
                let event_type: EventType = parse_tag(row.get(0)?, "event_type")?;
                counts.push((event_type, to_u64(row.get(1)?, "count")?));
            }
            Ok(counts)
        })
        .await
    }

    pub async fn stats_for_candidate(&self, candidate_id: &str) -> Result<Option<StoredStats>> {
        let candidate_id = candidate_id.to_string();
        self.execute(move |conn| {
            let row = conn
                .query_row(
                    "SELECT focus_lost_count, suspicious_events_count, integrity_score, total_duration, ended, updated_at
                     FROM session_stats
                     WHERE candidate_id = ?1",
                    params![candidate_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                            row.get::<_, String>(5)?,
                        ))
                    },
                )
                .optional()?;

            let Some((focus, suspicious, score, duration, ended, updated_at)) = row else {
                return Ok(None);
            };

            Ok(Some(StoredStats {
                candidate_id,
                stats: SessionStats {
                    focus_lost_count: to_u64(focus, "focus_lost_count")?,
                    suspicious_events_count: to_u64(suspicious, "suspicious_events_count")?,
                    integrity_score: u8::try_from(score)
                        .map_err(|_| anyhow!("integrity_score out of range: {score}"))?,
                    total_duration: to_u64(duration, "total_duration")?,
                },
                ended: ended != 0,
                updated_at: parse_datetime(&updated_at)?,
            }))
        })
        .await
    }

    fn spawn_write<F>(&self, what: &'static str, write: F)
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = write.await {
                        warn!("journal {what} failed: {err:#}");
                    }
                });
            }
            Err(_) => warn!("no async runtime; dropping journal {what}"),
        }
    }
}

impl EventSink for EventJournal {
    fn submit(&self, events: Vec<ProctorEvent>) {
        if events.is_empty() {
            return;
        }
        let journal = self.clone();
        self.spawn_write("event insert", async move {
            journal.insert_events(events).await.map(|_| ())
        });
    }

    fn sync_stats(&self, candidate_id: &str, stats: &SessionStats) {
        let journal = self.clone();
        let candidate_id = candidate_id.to_string();
        let stats = stats.clone();
        self.spawn_write("stats sync", async move {
            journal.upsert_stats(&candidate_id, &stats, false).await
        });
    }

    fn end_session(&self, candidate_id: &str, stats: &SessionStats) {
        let journal = self.clone();
        let candidate_id = candidate_id.to_string();
        let stats = stats.clone();
        self.spawn_write("session end", async move {
            journal.upsert_stats(&candidate_id, &stats, true).await
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DetectedObject, FrameObservation, ObjectCategory};
    use crate::reporting::events::events_for_tick;
    use crate::scoring::TickTriggers;

    fn observation() -> FrameObservation {
        FrameObservation {
            timestamp: Utc::now(),
            face_count: 1,
            face_detected: true,
            suspicious_objects: vec![DetectedObject {
                category: ObjectCategory::Phone,
                confidence: 0.75,
                bounding_box: BoundingBox::new(100.0, 100.0, 50.0, 80.0),
            }],
            is_focused: false,
            eye_closure: false,
            audio_noise: true,
        }
    }

    #[tokio::test]
    async fn stores_and_reads_back_events() {
        let dir = tempfile::tempdir().unwrap();
        let journal = EventJournal::new(dir.path().join("journal.sqlite3")).unwrap();

        let triggers = TickTriggers {
            focus_lost: true,
            face_lost: false,
        };
        let events = events_for_tick("cand-1", &observation(), triggers);
        assert_eq!(journal.insert_events(events).await.unwrap(), 3);
        journal
            .insert_events(events_for_tick("cand-2", &observation(), TickTriggers::default()))
            .await
            .unwrap();

        let stored = journal.events_for_candidate("cand-1").await.unwrap();
        let kinds: Vec<EventType> = stored.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![EventType::FocusLost, EventType::PhoneDetected, EventType::AudioNoiseDetected]
        );

        let phone = &stored[1];
        assert_eq!(phone.severity, AlertSeverity::Critical);
        assert_eq!(phone.confidence, Some(0.75));
        assert_eq!(phone.bounding_box, Some(BoundingBox::new(100.0, 100.0, 50.0, 80.0)));
        assert_eq!(phone.metadata["objectType"], "phone");

        let counts = journal.event_counts("cand-2").await.unwrap();
        assert_eq!(counts.len(), 2);
        assert!(counts.iter().all(|(_, n)| *n == 1));
    }

    #[tokio::test]
    async fn stats_upsert_keeps_latest_and_sticky_end_flag() {
        let dir = tempfile::tempdir().unwrap();
        let journal = EventJournal::new(dir.path().join("nested/journal.sqlite3")).unwrap();
        assert!(journal.stats_for_candidate("cand-1").await.unwrap().is_none());

        let mut stats = SessionStats::new();
        stats.focus_lost_count = 2;
        stats.suspicious_events_count = 1;
        stats.total_duration = 30;
        stats.recompute_score();
        journal.upsert_stats("cand-1", &stats, true).await.unwrap();

        stats.total_duration = 31;
        journal.upsert_stats("cand-1", &stats, false).await.unwrap();

        let stored = journal.stats_for_candidate("cand-1").await.unwrap().unwrap();
        assert_eq!(stored.stats.integrity_score, 91);
        assert_eq!(stored.stats.total_duration, 31);
        assert!(stored.ended);
    }

    #[tokio::test]
    async fn reopening_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.sqlite3");
        {
            let journal = EventJournal::new(path.clone()).unwrap();
            journal
                .insert_events(events_for_tick("cand-1", &observation(), TickTriggers::default()))
                .await
                .unwrap();
        }

        let journal = EventJournal::new(path).unwrap();
        assert_eq!(journal.events_for_candidate("cand-1").await.unwrap().len(), 2);
    }
}
