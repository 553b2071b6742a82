use std::path::Path;
use std::time::Duration;

use rsq_client::{ClientError, ConsumerConfig, ProducerConfig, Result};
use serde::Deserialize;

/// Environment variable consulted when no Redis URL is configured
pub const REDIS_URL_ENV: &str = "RSQ_REDIS_URL";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub redis_url: String,
    pub stream: String,
    pub group: String,
    pub producer: ProducerSettings,
    pub consumer: ConsumerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProducerSettings {
    /// Maximum stream length (0 = unbounded)
    pub max_len: u64,
    /// Approximate (`MAXLEN ~`) trimming
    pub approx: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Consumer name within the group
    pub name: String,
    /// Maximum wait for new entries per read, in milliseconds
    pub block_ms: u64,
    /// Idle time after which pending entries may be claimed, in milliseconds
    pub min_idle_ms: u64,
    /// Entries per read in batch mode
    pub batch_size: usize,
    /// Interval between batch reads, in milliseconds
    pub tick_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".into(),
            stream: "rsq".into(),
            group: "rsq".into(),
            producer: ProducerSettings::default(),
            consumer: ConsumerSettings::default(),
        }
    }
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            max_len: 1000,
            approx: true,
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            name: "rsq-cli".into(),
            block_ms: 2000,
            min_idle_ms: 30_000,
            batch_size: 100,
            tick_ms: 1000,
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext {
            "toml" => toml::from_str(&content)
                .map_err(|e| ClientError::Config(format!("TOML parse error: {}", e))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| ClientError::Config(format!("JSON parse error: {}", e))),
            _ => Err(ClientError::Config(format!(
                "Unknown config file extension: {}",
                ext
            ))),
        }
    }

    /// Load settings from `path` if given, otherwise defaults with the Redis
    /// URL taken from the environment when set.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let mut settings = Self::default();
                if let Ok(url) = std::env::var(REDIS_URL_ENV) {
                    settings.redis_url = url;
                }
                settings
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream.is_empty() {
            return Err(ClientError::Config("stream name must not be empty".into()));
        }
        if self.group.is_empty() {
            return Err(ClientError::Config("group name must not be empty".into()));
        }
        if self.consumer.name.is_empty() {
            return Err(ClientError::Config("consumer name must not be empty".into()));
        }
        if self.consumer.batch_size == 0 {
            return Err(ClientError::Config("batch_size must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig::new()
            .with_max_len(self.producer.max_len)
            .with_approx(self.producer.approx)
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::new(&self.stream, &self.group, &self.consumer.name)
            .with_block(Duration::from_millis(self.consumer.block_ms))
            .with_min_idle(Duration::from_millis(self.consumer.min_idle_ms))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.consumer.tick_ms.max(1))
    }
}
