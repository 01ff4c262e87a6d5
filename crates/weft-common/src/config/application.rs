use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::config::loader::deserialize_non_zero;
use crate::error::{CommonError, CommonResult};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    pub scheduler: SchedulerConfig,
    pub optimizer: OptimizerConfig,
}

impl AppConfig {
    pub fn load() -> CommonResult<Self> {
        Figment::from(Toml::string(DEFAULT_CONFIG))
            .admerge(Env::prefixed("WEFT__").map(|p| p.as_str().replace("__", ".").into()))
            .extract()
            .map_err(|e| CommonError::InvalidArgument(e.to_string()))
    }

    /// Load the embedded defaults only, ignoring the environment.
    pub fn default_config() -> CommonResult<Self> {
        Figment::from(Toml::string(DEFAULT_CONFIG))
            .extract()
            .map_err(|e| CommonError::InvalidArgument(e.to_string()))
    }

    pub fn to_json(&self) -> CommonResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub dependency_tracing: bool,
    pub reduce_chunk_size: usize,
    pub max_attempts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub default_execution_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub enabled: bool,
    pub initial_sleep_secs: u64,
    pub interval_secs: u64,
    pub default_creation_time_secs: u64,
    pub min_creation_time_secs: u64,
    pub blocked_check_interval_secs: u64,
    pub blocked_max_retries: usize,
    pub initial_workers: usize,
    #[serde(deserialize_with = "deserialize_non_zero")]
    pub min_workers: Option<usize>,
    #[serde(deserialize_with = "deserialize_non_zero")]
    pub max_workers: Option<usize>,
    pub provider_retry_strategy: RetryStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Fixed(FixedRetryStrategy),
    ExponentialBackoff(ExponentialBackoffRetryStrategy),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedRetryStrategy {
    pub max_count: usize,
    pub delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExponentialBackoffRetryStrategy {
    pub max_count: usize,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub factor: u32,
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default_config().unwrap();
        assert!(!config.runtime.dependency_tracing);
        assert_eq!(config.runtime.reduce_chunk_size, 2);
        assert_eq!(config.runtime.max_attempts, 3);
        assert_eq!(config.scheduler.default_execution_time_ms, 100);
        assert_eq!(config.optimizer.interval_secs, 2);
        assert_eq!(config.optimizer.blocked_max_retries, 3);
        assert_eq!(config.optimizer.min_workers, None);
        assert_eq!(config.optimizer.max_workers, None);
        assert!(matches!(
            config.optimizer.provider_retry_strategy,
            RetryStrategy::Fixed(FixedRetryStrategy { max_count: 3, .. })
        ));
    }

    #[test]
    fn test_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("WEFT__OPTIMIZER__MAX_WORKERS", "8");
            jail.set_env("WEFT__RUNTIME__REDUCE_CHUNK_SIZE", "4");
            let config = AppConfig::load().unwrap();
            assert_eq!(config.optimizer.max_workers, Some(8));
            assert_eq!(config.runtime.reduce_chunk_size, 4);
            Ok(())
        });
    }

    #[test]
    fn test_config_to_json() {
        let config = AppConfig::default_config().unwrap();
        let json = config.to_json().unwrap();
        assert!(json.contains("\"reduce_chunk_size\": 2"));
    }
}
