mod action;
mod action_set;
mod core;
mod description;
mod implementation;
mod profile;
mod resource;
mod workload;

use indexmap::IndexMap;

pub use action::{Action, ActionKind, ActionState};
pub use action_set::ActionSet;
pub use self::core::{ActionEnd, RemovedWorker};
pub use description::{ResourceDescription, UNASSIGNED};
pub use implementation::{
    CoreElement, CoreRegistry, Implementation, ImplementationDefinition, ImplementationKind,
};
pub use profile::Profile;
pub use resource::{ResourceScheduler, Score};
pub use workload::{CoreWorkload, WorkloadState};

use crate::id::{ActionId, IdGenerator, WorkerId};

/// An action that was placed on a worker and must be dispatched to it.
#[derive(Debug, Clone)]
pub struct Launch {
    pub action: Action,
    pub worker: WorkerId,
    pub worker_name: String,
    pub implementation: Implementation,
}

/// Places actions on workers and tracks what every worker is doing.
pub struct TaskScheduler {
    cores: CoreRegistry,
    workers: IndexMap<WorkerId, ResourceScheduler>,
    /// Actions that no registered worker is able to run.
    no_resource: ActionSet,
    action_ids: IdGenerator<ActionId>,
    worker_ids: IdGenerator<WorkerId>,
    default_execution_time: u64,
}

impl TaskScheduler {
    /// Creates a scheduler. `default_execution_time` is in milliseconds and stands in for
    /// implementations that have not been profiled yet.
    pub fn new(default_execution_time: u64) -> Self {
        Self {
            cores: CoreRegistry::new(),
            workers: IndexMap::new(),
            no_resource: ActionSet::new(0),
            action_ids: IdGenerator::new(),
            worker_ids: IdGenerator::new(),
            default_execution_time,
        }
    }
}
