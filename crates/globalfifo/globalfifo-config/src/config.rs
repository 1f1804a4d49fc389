use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GlobalFifoConfig {
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default)]
    pub workload: WorkloadConfig,
}

/// Traffic generated by the demo service.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkloadConfig {
    #[serde(default = "defaults::producers")]
    pub producers: usize,
    #[serde(default = "defaults::total_bytes")]
    pub total_bytes: usize,
    #[serde(default = "defaults::chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub non_blocking: bool,
    pub read_timeout_ms: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

mod defaults {
    pub fn capacity() -> usize {
        globalfifo_channel::DEFAULT_CAPACITY
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn producers() -> usize {
        1
    }

    pub fn total_bytes() -> usize {
        1 << 16
    }

    pub fn chunk_size() -> usize {
        64
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            producers: defaults::producers(),
            total_bytes: defaults::total_bytes(),
            chunk_size: defaults::chunk_size(),
            non_blocking: false,
            read_timeout_ms: None,
        }
    }
}

impl WorkloadConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for GlobalFifoConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::capacity(),
            log_level: defaults::log_level(),
            workload: WorkloadConfig::default(),
        }
    }
}

impl GlobalFifoConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&toml_to_str)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: GlobalFifoConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the channel or the demo workload cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("capacity must be positive"));
        }
        if self.workload.producers == 0 {
            return Err(ConfigError::Invalid("workload.producers must be positive"));
        }
        if self.workload.chunk_size == 0 {
            return Err(ConfigError::Invalid("workload.chunk_size must be positive"));
        }
        Ok(())
    }
}
