mod core;
mod handler;

use std::time::Duration;

use indexmap::IndexMap;
use tokio::time::Instant;

use crate::cloud::InstanceType;
use crate::id::{CreationId, IdGenerator};
use crate::optimizer::guard::BlockGuard;
use crate::optimizer::OptimizerOptions;

/// An instance requested from the provider and not ready yet.
struct PendingCreation {
    instance_type: InstanceType,
    requested_at: Instant,
}

/// Observed latencies of successful creations.
#[derive(Debug, Default)]
struct CreationTimes {
    count: u32,
    total: Duration,
}

impl CreationTimes {
    fn record(&mut self, elapsed: Duration) {
        self.count = self.count.saturating_add(1);
        self.total = self.total.saturating_add(elapsed);
    }

    fn mean(&self) -> Option<Duration> {
        (self.count > 0).then(|| self.total / self.count)
    }
}

/// The elasticity control loop.
///
/// Every cycle takes a snapshot of the cluster, applies the scaling policies and asks the
/// cloud provider for the resulting creations and destructions. Provider calls run in the
/// background and report back to the actor.
pub struct ResourceOptimizer {
    options: OptimizerOptions,
    pending: IndexMap<CreationId, PendingCreation>,
    creation_ids: IdGenerator<CreationId>,
    creation_times: CreationTimes,
    guard: BlockGuard,
    /// Set when an instance joined the pool since the last deadlock check.
    joined_since_check: bool,
    /// Incremented by every cycle so that wakes scheduled earlier are recognized as stale.
    generation: u64,
    initialized: bool,
}

