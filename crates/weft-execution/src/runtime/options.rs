use std::time::Duration;

use weft_common::config::AppConfig;

#[readonly::make]
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub dependency_tracing: bool,
    pub reduce_chunk_size: usize,
    pub max_attempts: usize,
    pub default_execution_time: Duration,
}

impl RuntimeOptions {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            dependency_tracing: config.runtime.dependency_tracing,
            reduce_chunk_size: config.runtime.reduce_chunk_size,
            max_attempts: config.runtime.max_attempts,
            default_execution_time: Duration::from_millis(
                config.scheduler.default_execution_time_ms,
            ),
        }
    }
}
