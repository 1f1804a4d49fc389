mod config;

pub use config::{ConfigError, GlobalFifoConfig, WorkloadConfig};
