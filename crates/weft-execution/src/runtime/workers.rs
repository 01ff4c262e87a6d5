use log::{info, warn};

use crate::error::ExecutionResult;
use crate::id::WorkerId;
use crate::optimizer::OptimizerEvent;
use crate::runtime::{ActionOutcome, Runtime};
use crate::scheduler::ResourceDescription;

impl Runtime {
    /// Registers a worker and places the actions it can run.
    pub fn add_worker(
        &self,
        name: impl Into<String>,
        description: ResourceDescription,
        dynamic: bool,
    ) -> ExecutionResult<WorkerId> {
        let (id, launches) = {
            let mut scheduler = self.inner.scheduler.lock()?;
            let id = scheduler.next_worker_id()?;
            let launches = scheduler.add_worker(id, name, description, dynamic)?;
            (id, launches)
        };
        self.dispatch(launches);
        Ok(id)
    }

    /// Removes a worker at once. Actions running on it fail.
    /// Returns `false` if the worker is unknown.
    pub fn remove_worker(&self, id: WorkerId) -> ExecutionResult<bool> {
        let removed = self.inner.scheduler.lock()?.remove_worker(id);
        let Some(removed) = removed else {
            return Ok(false);
        };
        let mut launches = removed.launches;
        for action in removed.running {
            let outcome = ActionOutcome::Failed {
                reason: format!("worker {id} ({}) was removed", removed.worker.name()),
            };
            launches.extend(self.settle_action(action, outcome)?);
        }
        self.dispatch(launches);
        Ok(true)
    }

    /// Stops placing actions on the worker so that it can be released.
    ///
    /// An idle worker is removed right away and `Some(true)` is returned.
    /// Otherwise the worker is removed when its last action ends and the optimizer
    /// is told so. `None` means the worker is unknown.
    pub fn retire_worker(&self, id: WorkerId) -> ExecutionResult<Option<bool>> {
        let retired = self.inner.scheduler.lock()?.retire_worker(id);
        let Some((idle, launches)) = retired else {
            return Ok(None);
        };
        self.dispatch(launches);
        if idle {
            let removed = self.inner.scheduler.lock()?.remove_worker(id);
            if removed.is_some() {
                info!("retired idle worker {id}");
            }
        }
        Ok(Some(idle))
    }

    /// Removes a retiring worker whose last action ended.
    pub(super) fn finish_retirement(&self, id: WorkerId) -> ExecutionResult<()> {
        let removed = self.inner.scheduler.lock()?.remove_worker(id);
        let Some(removed) = removed else {
            warn!("retired worker {id} is already gone");
            return Ok(());
        };
        info!("retired worker {id} ({}) is idle", removed.worker.name());
        self.deliver_to_optimizer(OptimizerEvent::WorkerRetired {
            worker: id,
            name: removed.worker.name().to_string(),
        });
        Ok(())
    }
}
