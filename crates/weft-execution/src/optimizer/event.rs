use crate::cloud::Provisioning;
use crate::error::ExecutionResult;
use crate::id::{CreationId, WorkerId};

pub enum OptimizerEvent {
    /// A periodic cycle. Wakes scheduled before the latest cycle are stale and ignored.
    Wake {
        generation: u64,
    },
    /// Runs a cycle right away instead of waiting for the next wake.
    OptimizeNow,
    CreationCompleted {
        creation: CreationId,
        result: ExecutionResult<Provisioning>,
    },
    DestructionCompleted {
        worker: WorkerId,
        name: String,
        result: ExecutionResult<()>,
    },
    /// A retiring worker became idle and was removed from the scheduler.
    WorkerRetired {
        worker: WorkerId,
        name: String,
    },
    Shutdown,
}
