use std::fmt;

use serde::Serialize;

use crate::id::CoreId;

/// The load of one core as seen by the scheduler. Times are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoreWorkload {
    pub core: CoreId,
    pub signature: String,
    /// Actions that no worker can run.
    pub no_resource: usize,
    /// Actions placed on a worker and waiting for its resources.
    pub ready: usize,
    pub running: usize,
    /// Tasks still waiting for a predecessor.
    pub pending: usize,
    pub min_time: u64,
    pub mean_time: u64,
    pub max_time: u64,
    /// The mean time the running actions have been running.
    pub running_mean_time: u64,
    /// Slots on the workers that accept new work.
    pub real_slots: usize,
    /// Real slots plus the slots of pending creations.
    pub total_slots: usize,
}

/// A snapshot of the workload of every core, taken once per optimizer cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkloadState {
    pub cores: Vec<CoreWorkload>,
}

impl WorkloadState {
    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    pub fn no_resource_count(&self) -> usize {
        self.cores.iter().map(|c| c.no_resource).sum()
    }

    pub fn ready_count(&self) -> usize {
        self.cores.iter().map(|c| c.ready).sum()
    }

    pub fn running_count(&self) -> usize {
        self.cores.iter().map(|c| c.running).sum()
    }

    pub fn pending_count(&self) -> usize {
        self.cores.iter().map(|c| c.pending).sum()
    }
}

impl fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.cores.iter() {
            writeln!(
                f,
                "core {} ({}): no_resource={} ready={} running={} pending={} time=[{}, {}, {}] slots={}/{}",
                c.core,
                c.signature,
                c.no_resource,
                c.ready,
                c.running,
                c.pending,
                c.min_time,
                c.mean_time,
                c.max_time,
                c.real_slots,
                c.total_slots
            )?;
        }
        Ok(())
    }
}
