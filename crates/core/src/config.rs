use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::constants::{
    DEFAULT_ATTACHMENT_CHUNK_SIZE, DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_MAX_PACKET_SIZE,
    PLATFORM_ID,
};

/// Client identity and protocol limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stable ID for this installation, sent during authentication
    pub installation_id: String,
    /// Human-readable client name shown by the server
    pub client_name: String,
    pub platform_id: String,
    /// Upper bound for one outbound packet
    pub max_packet_size: usize,
    /// File chunk size for uploads and download requests
    pub attachment_chunk_size: usize,
    /// 0 disables the handshake timeout
    pub handshake_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            installation_id: uuid::Uuid::new_v4().to_string(),
            client_name: default_client_name(),
            platform_id: PLATFORM_ID.to_string(),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            attachment_chunk_size: DEFAULT_ATTACHMENT_CHUNK_SIZE,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
        }
    }
}

fn default_client_name() -> String {
    format!("Bridgelink ({} {})", std::env::consts::OS, std::env::consts::ARCH)
}

impl Config {
    /// Default location: `<config dir>/bridgelink/config.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bridgelink")
            .join("config.json")
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_ms > 0).then(|| Duration::from_millis(self.handshake_timeout_ms))
    }

    pub fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &PathBuf) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load the config at `path`, creating it with defaults on first run so
    /// the installation ID stays stable across launches
    pub fn load_or_create(path: &PathBuf) -> anyhow::Result<Self> {
        if path.exists() {
            return Self::load_from_file(path);
        }
        let config = Self::default();
        config.save_to_file(path)?;
        Ok(config)
    }
}
