use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use crate::scoring::FocusCountPolicy;

const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";

/// Tunables for one proctoring deployment. Stored as camelCase JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProctorSettings {
    pub detection_interval_ms: u64,
    pub inference_timeout_ms: u64,
    pub focus_lost_threshold_ms: u64,
    pub no_face_threshold_ms: u64,
    pub eye_closure_threshold_ms: u64,
    pub alert_display_ms: u64,
    pub alert_capacity: usize,
    pub focus_count_policy: FocusCountPolicy,
    pub api_base_url: String,
    pub journal_path: Option<PathBuf>,
    /// Emit a stats heartbeat on every duration tick instead of every tenth.
    pub debug: bool,
}

impl Default for ProctorSettings {
    fn default() -> Self {
        Self {
            detection_interval_ms: 100,
            inference_timeout_ms: 2_000,
            focus_lost_threshold_ms: 5_000,
            no_face_threshold_ms: 10_000,
            eye_closure_threshold_ms: 3_000,
            alert_display_ms: 5_000,
            alert_capacity: 10,
            focus_count_policy: FocusCountPolicy::EdgeTriggered,
            api_base_url: DEFAULT_API_BASE_URL.into(),
            journal_path: None,
            debug: false,
        }
    }
}

impl ProctorSettings {
    /// Apply `PROCTOR_API_URL` / `PROCTOR_DEBUG` on top of the stored values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("PROCTOR_API_URL") {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().trim_end_matches('/').to_string();
            }
        }

        if let Ok(value) = std::env::var("PROCTOR_DEBUG") {
            self.debug = value == "1" || value.eq_ignore_ascii_case("true");
        }

        self
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms.max(1))
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }

    pub fn focus_lost_threshold(&self) -> Duration {
        Duration::from_millis(self.focus_lost_threshold_ms)
    }

    pub fn no_face_threshold(&self) -> Duration {
        Duration::from_millis(self.no_face_threshold_ms)
    }

    pub fn eye_closure_threshold(&self) -> Duration {
        Duration::from_millis(self.eye_closure_threshold_ms)
    }

    pub fn alert_display_window(&self) -> Duration {
        Duration::from_millis(self.alert_display_ms)
    }

    pub fn heartbeat_every_ticks(&self) -> u32 {
        if self.debug {
            1
        } else {
            10
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ProctorSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("Ignoring unreadable settings at {}: {err}", path.display());
                ProctorSettings::default()
            })
        } else {
            ProctorSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn settings(&self) -> ProctorSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: ProctorSettings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &ProctorSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
