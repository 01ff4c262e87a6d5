use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockVerdict {
    /// Every blocked action has a chance to run.
    Clear,
    /// Tasks are blocked but the next check is not due yet.
    Waiting,
    Warning { retries_left: usize },
    /// The runtime cannot make progress and must stop.
    Fatal,
}

/// Detects a runtime that is blocked for good: actions that no worker can run while no
/// resource is being created for them.
#[derive(Debug)]
pub struct BlockGuard {
    interval: Duration,
    max_retries: usize,
    retries: usize,
    last_check: Instant,
    raised: bool,
}

impl BlockGuard {
    pub fn new(interval: Duration, max_retries: usize, now: Instant) -> Self {
        Self {
            interval,
            max_retries,
            retries: 0,
            last_check: now,
            raised: false,
        }
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Records one optimizer cycle. Consecutive blocked checks are at least one
    /// interval apart, and the fatal verdict is returned at most once.
    pub fn check(&mut self, potential_block: bool, now: Instant) -> BlockVerdict {
        if !potential_block {
            self.retries = 0;
            self.last_check = now;
            return BlockVerdict::Clear;
        }
        if self.raised || now.duration_since(self.last_check) < self.interval {
            return BlockVerdict::Waiting;
        }
        self.last_check = now;
        self.retries += 1;
        if self.retries < self.max_retries {
            BlockVerdict::Warning {
                retries_left: self.max_retries - self.retries,
            }
        } else {
            self.raised = true;
            BlockVerdict::Fatal
        }
    }
}
