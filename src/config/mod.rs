use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub flush: FlushConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub counting_path: String,
    pub max_key_len: usize,
    /// Reject a missing `name` with 400 instead of answering 200 with a prompt.
    pub strict_validation: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            counting_path: "/count".to_string(),
            max_key_len: 256,
            strict_validation: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub write_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://typhoon.db".to_string(),
            max_connections: 8,
            write_timeout_ms: 1000,
        }
    }
}

impl StoreConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FlushConfig {
    pub interval_ms: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self { interval_ms: 5000 }
    }
}

impl FlushConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::from_file`], but a missing file yields the defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !self.server.counting_path.starts_with('/') {
            anyhow::bail!(
                "server.counting_path must start with '/', got {:?}",
                self.server.counting_path
            );
        }
        if self.server.max_key_len == 0 {
            anyhow::bail!("server.max_key_len must be positive");
        }
        if self.flush.interval_ms == 0 {
            anyhow::bail!("flush.interval_ms must be positive");
        }
        if self.store.max_connections == 0 {
            anyhow::bail!("store.max_connections must be positive");
        }
        Ok(())
    }
}
