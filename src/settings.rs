use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};

pub const VISION_URL_ENV: &str = "METER_INSPECT_VISION_URL";
pub const DATABASE_ENV: &str = "METER_INSPECT_DB";
pub const LOG_LEVEL_ENV: &str = "METER_INSPECT_LOG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct VisionSettings {
    pub base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".into(),
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub vision: VisionSettings,
    pub database_path: PathBuf,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vision: VisionSettings::default(),
            database_path: PathBuf::from("meter-inspect.sqlite3"),
            log_level: "info".into(),
        }
    }
}

impl Settings {
    /// Applies `METER_INSPECT_*` overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(VISION_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.vision.base_url = url.trim().to_string();
        }
        if let Some(path) = lookup(DATABASE_ENV).filter(|v| !v.trim().is_empty()) {
            self.database_path = PathBuf::from(path.trim());
        }
        if let Some(level) = lookup(LOG_LEVEL_ENV).filter(|v| !v.trim().is_empty()) {
            self.log_level = level.trim().to_string();
        }
    }
}

/// Settings loaded from a JSON file; a missing file means defaults.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse settings in {}", path.display()))?
        } else {
            Settings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> Settings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// In-memory adjustment (env vars, CLI flags); not written back.
    pub fn override_with(&self, apply: impl FnOnce(&mut Settings)) {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut *guard);
    }

    /// Writes the current settings to the settings file.
    pub fn save(&self, overwrite: bool) -> Result<()> {
        if self.path.exists() && !overwrite {
            bail!(
                "{} already exists (pass --force to overwrite)",
                self.path.display()
            );
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let serialized = serde_json::to_string_pretty(&self.settings())?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
