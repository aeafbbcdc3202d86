use crate::core::bluetooth::ConnectionSettings;
use crate::core::bluetooth::constants::{
    BATTERY_READ_SETTLE_DELAY_MS, DEFAULT_SCAN_DURATION_MS, RECONNECT_DELAYS_MS,
    SERVICE_DISCOVERY_TIMEOUT_MS,
};
use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

pub const CONFIG_FILE_NAME: &str = "hrm_config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// How long a scan listens for advertisements (ms).
    pub scan_timeout_ms: u64,

    /// Name prefix applied to scan results when the caller passes none.
    pub name_prefix: Option<String>,

    /// Ceiling on service discovery during connect (ms).
    pub discovery_timeout_ms: u64,

    /// Settle delay between enabling notifications and reading the battery (ms).
    /// The battery read must not overlap the CCCD write.
    pub battery_settle_delay_ms: u64,

    /// Delay before each automatic reconnection attempt (ms).
    /// The number of entries is the number of attempts.
    pub reconnect_delays_ms: Vec<u64>,

    /// Whether connect reads the battery level unless told otherwise.
    pub enable_battery: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            scan_timeout_ms: DEFAULT_SCAN_DURATION_MS,
            name_prefix: None,
            discovery_timeout_ms: SERVICE_DISCOVERY_TIMEOUT_MS,
            battery_settle_delay_ms: BATTERY_READ_SETTLE_DELAY_MS,
            reconnect_delays_ms: RECONNECT_DELAYS_MS.to_vec(),
            enable_battery: false,
        }
    }
}

impl ProviderConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            discovery_timeout: Duration::from_millis(self.discovery_timeout_ms),
            battery_settle_delay: Duration::from_millis(self.battery_settle_delay_ms),
            reconnect_delays: self
                .reconnect_delays_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        }
    }

    /// Loads the config from `config_dir`, falling back to defaults when the file is missing.
    pub async fn load_config(config_dir: &Path) -> Result<Self> {
        let file_path = config_dir.join(CONFIG_FILE_NAME);
        let file_path_str = file_path.to_string_lossy().into_owned();

        if !file_path.exists() {
            warn!(
                "Config file not found at {:?}, using default.",
                file_path_str
            );
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(&file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path_str);
        Ok(config)
    }

    /// Saves the current config into `config_dir`, creating the directory if needed.
    pub async fn save_config(&self, config_dir: &Path) -> Result<()> {
        if !fs::try_exists(config_dir).await.unwrap_or(false) {
            if let Err(e) = fs::create_dir_all(config_dir).await {
                error!("Failed to create config directory {:?}: {}", config_dir, e);
                return Err(e.into());
            }
            info!("Created config directory {:?}", config_dir);
        }

        let file_path = config_dir.join(CONFIG_FILE_NAME);
        let file_path_str = file_path.to_string_lossy().into_owned();

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize provider config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(&file_path, config_json).await?;

        info!("Provider config saved to {:?}.", file_path_str);
        Ok(())
    }
}
