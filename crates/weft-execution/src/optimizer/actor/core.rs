use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, error, info};
use tokio::time::Instant;
use weft_server::actor::{Actor, ActorAction, ActorHandle};

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::IdGenerator;
use crate::optimizer::actor::{CreationTimes, ResourceOptimizer};
use crate::optimizer::guard::BlockGuard;
use crate::optimizer::policy::ClusterSnapshot;
use crate::optimizer::{OptimizerEvent, OptimizerOptions};

impl Actor for ResourceOptimizer {
    const NAME: &'static str = "resource optimizer";

    type Message = OptimizerEvent;
    type Options = OptimizerOptions;
    type Error = ExecutionError;

    fn new(options: OptimizerOptions) -> Self {
        let guard = BlockGuard::new(
            options.blocked_check_interval,
            options.blocked_max_retries,
            Instant::now(),
        );
        Self {
            options,
            pending: IndexMap::new(),
            creation_ids: IdGenerator::new(),
            creation_times: CreationTimes::default(),
            guard,
            joined_since_check: false,
            generation: 0,
            initialized: false,
        }
    }

    fn start(&mut self, handle: &ActorHandle<Self>) -> ExecutionResult<()> {
        info!(
            "resource optimizer started with provider {}",
            self.options.provider.name()
        );
        handle.send_later(
            OptimizerEvent::Wake {
                generation: self.generation,
            },
            self.options.initial_sleep,
        );
        Ok(())
    }

    fn receive(
        &mut self,
        message: OptimizerEvent,
        handle: &ActorHandle<Self>,
    ) -> ExecutionResult<ActorAction> {
        let action = match &message {
            OptimizerEvent::Shutdown => ActorAction::Stop,
            _ => ActorAction::Continue,
        };
        let out = match message {
            OptimizerEvent::Wake { generation } => self.handle_wake(handle, generation),
            OptimizerEvent::OptimizeNow => self.handle_optimize_now(handle),
            OptimizerEvent::CreationCompleted { creation, result } => {
                self.handle_creation_completed(creation, result)
            }
            OptimizerEvent::DestructionCompleted {
                worker,
                name,
                result,
            } => self.handle_destruction_completed(worker, name, result),
            OptimizerEvent::WorkerRetired { worker, name } => {
                self.handle_worker_retired(handle, worker, name)
            }
            OptimizerEvent::Shutdown => Ok(ActorAction::Stop),
        };
        match out {
            Ok(ActorAction::Stop) => Ok(ActorAction::Stop),
            Ok(ActorAction::Continue) => Ok(action),
            Err(e) => {
                error!("error processing optimizer event: {e}");
                Ok(action)
            }
        }
    }

    fn stop(self) -> ExecutionResult<()> {
        match self.options.runtime.cluster_snapshot() {
            Ok(snapshot) => debug!("workload when the optimizer stopped:\n{}", snapshot.workload),
            Err(e) => error!("failed to read the final workload: {e}"),
        }
        info!(
            "resource optimizer stopped with {} pending creations",
            self.pending.len()
        );
        Ok(())
    }
}

impl ResourceOptimizer {
    pub(super) fn options(&self) -> &OptimizerOptions {
        &self.options
    }

    /// The time a new instance is expected to take to become available.
    pub(super) fn creation_time(&self) -> Duration {
        self.creation_times
            .mean()
            .unwrap_or(self.options.default_creation_time)
            .max(self.options.min_creation_time)
    }

    /// A snapshot of the cluster where pending creations count as available slots.
    pub(super) fn snapshot(&self) -> ExecutionResult<ClusterSnapshot> {
        let mut snapshot = self.options.runtime.cluster_snapshot()?;
        for creation in self.pending.values() {
            for (core, requirements) in snapshot.requirements.iter().enumerate() {
                let slots = requirements
                    .iter()
                    .map(|r| creation.instance_type.slots_for(r))
                    .max()
                    .unwrap_or(0);
                if let Some(w) = snapshot.workload.cores.get_mut(core) {
                    w.total_slots += slots;
                }
            }
        }
        Ok(snapshot)
    }

    /// The number of dynamic workers, counting the ones being created.
    pub(super) fn current_workers(&self, snapshot: &ClusterSnapshot) -> usize {
        snapshot.dynamic_workers().count() + self.pending.len()
    }

    pub(super) fn can_create(&self, snapshot: &ClusterSnapshot) -> bool {
        let current = self.current_workers(snapshot);
        self.options
            .provider
            .max_instances()
            .is_none_or(|max| current < max)
    }
}
