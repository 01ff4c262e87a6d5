use std::sync::Arc;
use std::time::Duration;

use weft_common::config::AppConfig;
use weft_server::RetryStrategy;

use crate::cloud::CloudProvider;
use crate::runtime::Runtime;

#[readonly::make]
pub struct OptimizerOptions {
    pub enabled: bool,
    pub initial_sleep: Duration,
    pub interval: Duration,
    pub default_creation_time: Duration,
    pub min_creation_time: Duration,
    pub blocked_check_interval: Duration,
    pub blocked_max_retries: usize,
    pub initial_workers: usize,
    pub min_workers: Option<usize>,
    pub max_workers: Option<usize>,
    pub provider_retry_strategy: RetryStrategy,
    pub runtime: Runtime,
    pub provider: Arc<dyn CloudProvider>,
}

impl OptimizerOptions {
    pub fn new(config: &AppConfig, runtime: Runtime, provider: Arc<dyn CloudProvider>) -> Self {
        let optimizer = &config.optimizer;
        Self {
            enabled: optimizer.enabled,
            initial_sleep: Duration::from_secs(optimizer.initial_sleep_secs),
            interval: Duration::from_secs(optimizer.interval_secs),
            default_creation_time: Duration::from_secs(optimizer.default_creation_time_secs),
            min_creation_time: Duration::from_secs(optimizer.min_creation_time_secs),
            blocked_check_interval: Duration::from_secs(optimizer.blocked_check_interval_secs),
            blocked_max_retries: optimizer.blocked_max_retries,
            initial_workers: optimizer.initial_workers,
            min_workers: optimizer.min_workers,
            max_workers: optimizer.max_workers,
            provider_retry_strategy: (&optimizer.provider_retry_strategy).into(),
            runtime,
            provider,
        }
    }
}
