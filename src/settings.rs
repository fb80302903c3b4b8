use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::{
    connection::ReconnectPolicy,
    feed::DEFAULT_MAX_POINTS,
    session::{ControllerOptions, DEFAULT_ACK_TIMEOUT},
};

pub const ENV_URL: &str = "INSPECT_LIVE_URL";
pub const ENV_MODEL_ID: &str = "INSPECT_LIVE_MODEL_ID";
pub const ENV_DEBUG: &str = "INSPECT_LIVE_DEBUG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    pub backend_url: String,
    pub selected_model_id: Option<i64>,
    pub max_retries: u32,
    pub reconnect_delay_ms: u64,
    pub error_delay_multiplier: u32,
    pub ack_timeout_ms: u64,
    pub feed_max_points: usize,
    /// Exported model/timing tables used to annotate readings.
    pub models_path: Option<PathBuf>,
    #[serde(skip)]
    pub debug: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            backend_url: "ws://localhost:8000/ws/inspection".into(),
            selected_model_id: None,
            max_retries: policy.max_retries,
            reconnect_delay_ms: policy.base_delay.as_millis() as u64,
            error_delay_multiplier: policy.error_multiplier,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT.as_millis() as u64,
            feed_max_points: DEFAULT_MAX_POINTS,
            models_path: None,
            debug: false,
        }
    }
}

impl ClientSettings {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.reconnect_delay_ms),
            error_multiplier: self.error_delay_multiplier.max(1),
        }
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            feed_max_points: self.feed_max_points,
        }
    }

    /// Applies overrides from the process environment.
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    /// Applies overrides from `lookup`. Values that do not parse are
    /// ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_URL).filter(|url| !url.trim().is_empty()) {
            self.backend_url = url.trim().to_string();
        }
        if let Some(model_id) = lookup(ENV_MODEL_ID).and_then(|raw| raw.trim().parse().ok()) {
            self.selected_model_id = Some(model_id);
        }
        if let Some(debug) = lookup(ENV_DEBUG) {
            self.debug = matches!(debug.trim(), "1" | "true" | "yes" | "on");
        }
        self
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ClientSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            ClientSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn get(&self) -> ClientSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: ClientSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    pub fn select_model(&self, model_id: Option<i64>) -> Result<()> {
        let mut guard = self.write();
        guard.selected_model_id = model_id;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: ClientSettings = serde_json::from_str(&contents)?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &ClientSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, ClientSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, ClientSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
