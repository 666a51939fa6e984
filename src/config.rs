use lora_crypto::AesKey;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub device: Option<DeviceConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Fallback key material for commands run without explicit keys
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceConfig {
    pub app_key: Option<AesKey>,
    pub nwk_s_key: Option<AesKey>,
    pub app_s_key: Option<AesKey>,
    /// Hex DevAddr, e.g. "26011BDA"
    pub dev_addr: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        Ok(config)
    }

    pub fn device(&self) -> DeviceConfig {
        self.device.clone().unwrap_or_default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: None,
            logging: LoggingConfig::default(),
        }
    }
}
