use serde::Serialize;

/// Execution-time statistics of one implementation on one worker, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    executions: u64,
    min_time: u64,
    avg_time: u64,
    max_time: u64,
}

impl Profile {
    /// Creates a profile that reports `default_time` until the first execution is recorded.
    pub fn new(default_time: u64) -> Self {
        Self {
            executions: 0,
            min_time: default_time,
            avg_time: default_time,
            max_time: default_time,
        }
    }

    pub fn executions(&self) -> u64 {
        self.executions
    }

    pub fn min_time(&self) -> u64 {
        self.min_time
    }

    pub fn average_time(&self) -> u64 {
        self.avg_time
    }

    pub fn max_time(&self) -> u64 {
        self.max_time
    }

    pub fn accumulate(&mut self, elapsed: u64) {
        if self.executions == 0 {
            self.min_time = elapsed;
            self.avg_time = elapsed;
            self.max_time = elapsed;
        } else {
            self.min_time = self.min_time.min(elapsed);
            self.max_time = self.max_time.max(elapsed);
            let total = self.avg_time as u128 * self.executions as u128 + elapsed as u128;
            self.avg_time = (total / (self.executions as u128 + 1)) as u64;
        }
        self.executions += 1;
    }

    /// Folds the executions recorded in another profile into this one.
    pub fn merge(&mut self, other: &Profile) {
        if other.executions == 0 {
            return;
        }
        if self.executions == 0 {
            *self = other.clone();
            return;
        }
        self.min_time = self.min_time.min(other.min_time);
        self.max_time = self.max_time.max(other.max_time);
        let total = self.avg_time as u128 * self.executions as u128
            + other.avg_time as u128 * other.executions as u128;
        let executions = self.executions + other.executions;
        self.avg_time = (total / executions as u128) as u64;
        self.executions = executions;
    }
}
