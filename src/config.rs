use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::network::{ReconnectPolicy, TransportSettings};

pub const DEFAULT_CONFIG_PATH: &str = "config/circlo.json";

pub const ENV_API_URL: &str = "CIRCLO_API_URL";
pub const ENV_WS_URL: &str = "CIRCLO_WS_URL";
pub const ENV_DATA_DIR: &str = "CIRCLO_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub ws_url: String,
    pub data_dir: PathBuf,
    pub request_timeout_ms: u64,
    /// 0 = tắt heart-beat.
    pub heartbeat_ms: u64,
    pub handshake_timeout_ms: u64,
    pub default_radius_km: f64,
    pub history_page_size: u32,
    pub reconnect: ReconnectPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8082/api/v1".to_string(),
            ws_url: "ws://localhost:8082/ws/websocket".to_string(),
            data_dir: PathBuf::from("data"),
            request_timeout_ms: 10_000,
            heartbeat_ms: 4_000,
            handshake_timeout_ms: 10_000,
            default_radius_km: 5.0,
            history_page_size: 50,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Ghi đè bằng biến môi trường `CIRCLO_*`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = non_empty(ENV_API_URL) {
            log::debug!("{ENV_API_URL} overrides api_base_url");
            self.api_base_url = url;
        }
        if let Some(url) = non_empty(ENV_WS_URL) {
            log::debug!("{ENV_WS_URL} overrides ws_url");
            self.ws_url = url;
        }
        if let Some(dir) = non_empty(ENV_DATA_DIR) {
            log::debug!("{ENV_DATA_DIR} overrides data_dir");
            self.data_dir = PathBuf::from(dir);
        }
    }

    pub fn session_db_path(&self) -> PathBuf {
        self.data_dir.join("session.db")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            ws_url: self.ws_url.clone(),
            heartbeat_ms: self.heartbeat_ms,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            reconnect: self.reconnect,
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

pub fn load_effective(path: &str) -> AppConfig {
    let mut config = load_config(path);
    config.apply_env_overrides(|key| std::env::var(key).ok());
    config
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}
