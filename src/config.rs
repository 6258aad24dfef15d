//! Application configuration: a YAML file overlaid with environment
//! variables. A missing file means defaults; a malformed file is a startup
//! error, because running with a half-read config could point the ledger at
//! the wrong place.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use browser_port::SessionConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const HEADLESS_VAR: &str = "AUTOAPPLY_HEADLESS";
pub const CHROME_VAR: &str = "AUTOAPPLY_CHROME";
pub const DATA_DIR_VAR: &str = "AUTOAPPLY_DATA_DIR";
pub const WS_URL_VAR: &str = "AUTOAPPLY_WS_URL";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Browser launch/attach settings
    pub browser: BrowserSettings,

    /// Where the session vault and the application ledger live
    pub storage: StorageSettings,

    /// Platform profile override
    pub profile: ProfileSettings,

    /// Batch run defaults
    pub run: RunSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Run the browser without a visible window
    pub headless: bool,

    /// Chrome/Chromium binary; autodetected when unset
    pub executable: Option<PathBuf>,

    /// Browser profile directory; a local throwaway default when unset
    pub user_data_dir: Option<PathBuf>,

    /// Attach to a running browser over CDP instead of launching one
    pub websocket_url: Option<String>,

    /// Per-CDP-command response deadline
    pub command_deadline_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            user_data_dir: None,
            websocket_url: None,
            command_deadline_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Base directory for both stores when the explicit paths are unset
    pub data_dir: Option<PathBuf>,

    /// Session token store
    pub vault_path: Option<PathBuf>,

    /// Application ledger store
    pub ledger_path: Option<PathBuf>,
}

impl StorageSettings {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn vault_path(&self) -> PathBuf {
        self.vault_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("session.json"))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("ledger.json"))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSettings {
    /// YAML file retargeting another platform; built-in profile when unset
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Stop a batch after this many confirmed applications
    pub cap: Option<usize>,

    /// Lower bound of the pause between postings
    pub pacing_min_ms: u64,

    /// Upper bound of the pause between postings
    pub pacing_max_ms: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            cap: None,
            pacing_min_ms: 1_200,
            pacing_max_ms: 3_500,
        }
    }
}

impl AppConfig {
    /// Read the config file (explicit path or the platform default
    /// location), then let environment variables win over file values.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => default_config_path(),
        };

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("could not read config file {}", path.display()))?;
            let parsed: AppConfig = serde_yaml::from_str(&raw)
                .with_context(|| format!("could not parse config file {}", path.display()))?;
            info!(path = %path.display(), "loaded configuration");
            parsed
        } else {
            warn!(path = %path.display(), "config file not found; using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(raw) = env::var(HEADLESS_VAR) {
            self.browser.headless = parse_boolish(&raw);
        }
        if let Ok(raw) = env::var(CHROME_VAR) {
            if !raw.trim().is_empty() {
                self.browser.executable = Some(PathBuf::from(raw.trim()));
            }
        }
        if let Ok(raw) = env::var(WS_URL_VAR) {
            if !raw.trim().is_empty() {
                self.browser.websocket_url = Some(raw.trim().to_string());
            }
        }
        if let Ok(raw) = env::var(DATA_DIR_VAR) {
            if !raw.trim().is_empty() {
                self.storage.data_dir = Some(PathBuf::from(raw.trim()));
            }
        }
    }

    /// Translate the browser section into the port's launch settings,
    /// keeping the port's executable autodetection when nothing is set.
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            executable: self
                .browser
                .executable
                .clone()
                .unwrap_or(defaults.executable),
            user_data_dir: self
                .browser
                .user_data_dir
                .clone()
                .unwrap_or(defaults.user_data_dir),
            headless: self.browser.headless,
            command_deadline_ms: self.browser.command_deadline_ms,
            websocket_url: self.browser.websocket_url.clone(),
        }
    }

    /// The selector profile: loaded from YAML when configured, built-in
    /// otherwise.
    pub fn platform_profile(&self) -> Result<apply_engine::PlatformProfile> {
        match &self.profile.path {
            Some(path) => apply_engine::PlatformProfile::from_yaml_file(path)
                .with_context(|| format!("could not load platform profile {}", path.display())),
            None => Ok(apply_engine::PlatformProfile::default()),
        }
    }
}

// "0", "false", "no", "off" disable; anything else enables.
fn parse_boolish(raw: &str) -> bool {
    let lower = raw.trim().to_ascii_lowercase();
    !matches!(lower.as_str(), "0" | "false" | "no" | "off")
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("autoapply")
        .join("config.yaml")
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("autoapply")
}
