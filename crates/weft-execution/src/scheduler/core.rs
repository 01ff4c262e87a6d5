use log::{debug, info, warn};

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::{ActionId, CoreId, ImplId, WorkerId};
use crate::scheduler::action::{Action, ActionState};
use crate::scheduler::description::ResourceDescription;
use crate::scheduler::implementation::{CoreRegistry, ImplementationDefinition};
use crate::scheduler::profile::Profile;
use crate::scheduler::resource::{ResourceScheduler, Score};
use crate::scheduler::workload::{CoreWorkload, WorkloadState};
use crate::scheduler::{Launch, TaskScheduler};

/// The result of the end of a running action.
#[derive(Debug)]
pub struct ActionEnd {
    pub action: Action,
    /// Blocked actions that started on the freed worker.
    pub launches: Vec<Launch>,
    /// Set when the worker is retiring and has become idle.
    pub retired: Option<WorkerId>,
}

#[derive(Debug)]
pub struct RemovedWorker {
    pub worker: ResourceScheduler,
    /// Actions that were running on the worker when it was removed.
    pub running: Vec<Action>,
    /// Blocked actions that started elsewhere.
    pub launches: Vec<Launch>,
}

impl TaskScheduler {
    pub fn cores(&self) -> &CoreRegistry {
        &self.cores
    }

    pub fn workers(&self) -> impl Iterator<Item = &ResourceScheduler> {
        self.workers.values()
    }

    pub fn worker(&self, id: WorkerId) -> Option<&ResourceScheduler> {
        self.workers.get(&id)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn no_resource_actions(&self) -> &crate::scheduler::ActionSet {
        &self.no_resource
    }

    pub fn next_action_id(&mut self) -> ExecutionResult<ActionId> {
        self.action_ids.next()
    }

    pub fn next_worker_id(&mut self) -> ExecutionResult<WorkerId> {
        let mut id = self.worker_ids.next()?;
        while self.workers.contains_key(&id) {
            id = self.worker_ids.next()?;
        }
        Ok(id)
    }

    /// Registers a core element and grows every per-core index.
    /// Actions waiting for a compatible worker are placed again.
    pub fn register_core(
        &mut self,
        signature: &str,
        definitions: Vec<ImplementationDefinition>,
    ) -> ExecutionResult<(CoreId, Vec<Launch>)> {
        let core = self.cores.register(signature, definitions)?;
        self.no_resource.update_core_count(self.cores.core_count());
        for worker in self.workers.values_mut() {
            worker.update_cores(&self.cores);
        }
        let pending = self.no_resource.remove_all_compatible_actions(|_| true);
        let launches = pending
            .into_iter()
            .filter_map(|a| self.schedule(a))
            .collect();
        Ok((core, launches))
    }

    fn requirements(&self, action: &Action) -> Option<ResourceDescription> {
        let core = action.core?;
        let implementation = action.implementation?;
        self.cores
            .implementation(core, implementation)
            .map(|i| i.requirements.clone())
    }

    fn best_implementation(
        &self,
        worker: &ResourceScheduler,
        action: &Action,
    ) -> Option<(ImplId, Score)> {
        let core = action.core?;
        if worker.is_retiring() || !worker.can_run(core) {
            return None;
        }
        let mut best: Option<(ImplId, Score)> = None;
        for implementation in self.cores.implementations(core) {
            if !worker.description().can_host(&implementation.requirements) {
                continue;
            }
            let score = worker.score(action, implementation);
            if best.as_ref().is_none_or(|(_, s)| score > *s) {
                best = Some((implementation.id, score));
            }
        }
        best
    }

    /// Places the action on the best worker.
    /// The action runs right away if the worker has room for it, waits on the worker
    /// otherwise, and is kept aside when no worker can ever run it.
    pub fn schedule(&mut self, action: Action) -> Option<Launch> {
        let mut best: Option<(WorkerId, ImplId, Score)> = None;
        for worker in self.workers.values() {
            let Some((implementation, score)) = self.best_implementation(worker, &action) else {
                continue;
            };
            if best.as_ref().is_none_or(|(_, _, s)| score > *s) {
                best = Some((worker.id(), implementation, score));
            }
        }
        match best {
            Some((worker, implementation, _)) => self.place(action, worker, implementation),
            None => {
                debug!("no worker can run action {} of task {}", action.id, action.task);
                self.park(action);
                None
            }
        }
    }

    fn park(&mut self, mut action: Action) {
        action.state = ActionState::NoResource;
        action.worker = None;
        action.implementation = None;
        self.no_resource.add_action(action);
    }

    fn place(&mut self, mut action: Action, worker_id: WorkerId, implementation: ImplId) -> Option<Launch> {
        let Some(core) = action.core else {
            self.park(action);
            return None;
        };
        let Some(implementation) = self.cores.implementation(core, implementation).cloned() else {
            warn!("implementation {implementation} of core {core} not found");
            self.park(action);
            return None;
        };
        let Some(worker) = self.workers.get_mut(&worker_id) else {
            warn!("worker {worker_id} not found");
            self.park(action);
            return None;
        };
        action.implementation = Some(implementation.id);
        if worker.can_run_now(&implementation.requirements) {
            let action = worker.host_action(action, &implementation.requirements);
            debug!("action {} runs on worker {worker_id}", action.id);
            Some(Launch {
                action,
                worker: worker_id,
                worker_name: worker.name().to_string(),
                implementation,
            })
        } else {
            debug!("action {} waits on worker {worker_id}", action.id);
            worker.wait_on_resource(action);
            None
        }
    }

    /// Starts blocked actions on the worker in FIFO order,
    /// stopping at the first one that does not fit.
    pub fn try_to_launch_blocked_actions(&mut self, worker_id: WorkerId) -> Vec<Launch> {
        let mut launches = vec![];
        loop {
            let Some(worker) = self.workers.get(&worker_id) else {
                break;
            };
            let Some(first) = worker.first_blocked() else {
                break;
            };
            let Some(implementation) = first
                .core
                .zip(first.implementation)
                .and_then(|(c, i)| self.cores.implementation(c, i))
                .cloned()
            else {
                break;
            };
            if !worker.fits(&implementation.requirements) {
                break;
            }
            let Some(worker) = self.workers.get_mut(&worker_id) else {
                break;
            };
            let Some(action) = worker.remove_first_blocked() else {
                break;
            };
            let action = worker.host_action(action, &implementation.requirements);
            launches.push(Launch {
                action,
                worker: worker_id,
                worker_name: worker.name().to_string(),
                implementation,
            });
        }
        launches
    }

    /// Records the end of a running action and starts what the freed resources allow.
    /// `elapsed` is the execution time in milliseconds of a successful execution.
    pub fn action_end(&mut self, id: ActionId, elapsed: Option<u64>) -> Option<ActionEnd> {
        let worker_id = self
            .workers
            .values()
            .find(|w| w.is_running(id))
            .map(|w| w.id())?;
        let requirements = self
            .workers
            .get(&worker_id)
            .and_then(|w| w.running_action(id))
            .and_then(|a| self.requirements(a))
            .unwrap_or_else(|| ResourceDescription::new(0, 0));
        let worker = self.workers.get_mut(&worker_id)?;
        let action = worker.unhost_action(id, &requirements)?;
        if let (Some(elapsed), Some(core), Some(implementation)) =
            (elapsed, action.core, action.implementation)
        {
            worker.profiled_execution(core, implementation, elapsed);
            worker.add_resident_data(action.inputs.iter().chain(action.outputs.iter()).copied());
        }
        let launches = self.try_to_launch_blocked_actions(worker_id);
        let retired = self
            .workers
            .get(&worker_id)
            .filter(|w| w.is_retiring() && w.is_idle())
            .map(|w| w.id());
        Some(ActionEnd {
            action,
            launches,
            retired,
        })
    }

    /// Withdraws an action that is not running yet.
    pub fn cancel_action(&mut self, id: ActionId) -> Option<Action> {
        if let Some(action) = self.no_resource.take_action(id) {
            return Some(action);
        }
        self.workers
            .values_mut()
            .find_map(|w| w.remove_blocked(id))
    }

    pub fn add_worker(
        &mut self,
        id: WorkerId,
        name: impl Into<String>,
        description: ResourceDescription,
        dynamic: bool,
    ) -> ExecutionResult<Vec<Launch>> {
        if self.workers.contains_key(&id) {
            return Err(ExecutionError::invalid(format!(
                "worker {id} is already registered"
            )));
        }
        let worker = ResourceScheduler::new(
            id,
            name,
            description,
            dynamic,
            &self.cores,
            self.default_execution_time,
        );
        let drained = self
            .no_resource
            .remove_all_compatible_actions(|c| worker.can_run(c));
        info!(
            "worker {id} ({}) registered with {}, taking {} pending actions",
            worker.name(),
            worker.description(),
            drained.len()
        );
        self.workers.insert(id, worker);
        let mut launches = vec![];
        for action in drained {
            let best = self
                .workers
                .get(&id)
                .and_then(|w| self.best_implementation(w, &action));
            let launch = match best {
                Some((implementation, _)) => self.place(action, id, implementation),
                None => self.schedule(action),
            };
            launches.extend(launch);
        }
        Ok(launches)
    }

    /// Removes the worker. Blocked actions are placed again and running actions are returned
    /// so that the caller can fail them.
    pub fn remove_worker(&mut self, id: WorkerId) -> Option<RemovedWorker> {
        let mut worker = self.workers.shift_remove(&id)?;
        let running = worker.drain_running();
        let blocked = worker.drain_blocked();
        info!(
            "worker {id} removed with {} running and {} blocked actions",
            running.len(),
            blocked.len()
        );
        let launches = blocked
            .into_iter()
            .filter_map(|a| self.schedule(a))
            .collect();
        Some(RemovedWorker {
            worker,
            running,
            launches,
        })
    }

    /// Stops giving new actions to the worker and moves its blocked actions elsewhere.
    /// Returns whether the worker is already idle, or `None` if the worker is unknown.
    pub fn retire_worker(&mut self, id: WorkerId) -> Option<(bool, Vec<Launch>)> {
        let worker = self.workers.get_mut(&id)?;
        worker.set_retiring();
        let blocked = worker.drain_blocked();
        let idle = worker.is_idle();
        let launches = blocked
            .into_iter()
            .filter_map(|a| self.schedule(a))
            .collect();
        Some((idle, launches))
    }

    /// Takes a snapshot of the load of every core.
    /// `pending` holds the number of tasks per core still waiting for predecessors.
    pub fn workload(&self, pending: &[usize]) -> WorkloadState {
        let cores = self
            .cores
            .cores()
            .map(|core| {
                let mut ready = 0;
                let mut running = 0;
                let mut running_time: u64 = 0;
                let mut real_slots = 0;
                let mut profile = Profile::new(self.default_execution_time);
                for worker in self.workers.values() {
                    ready += worker
                        .blocked_actions()
                        .filter(|a| a.core == Some(core.id))
                        .count();
                    for action in worker.running_actions().filter(|a| a.core == Some(core.id)) {
                        running += 1;
                        running_time = running_time.saturating_add(action.running_time().unwrap_or(0));
                    }
                    if !worker.is_retiring() {
                        real_slots += worker.slots(core.id);
                    }
                    for p in worker.profiles(core.id) {
                        profile.merge(p);
                    }
                }
                CoreWorkload {
                    core: core.id,
                    signature: core.signature.clone(),
                    no_resource: self.no_resource.action_count(core.id),
                    ready,
                    running,
                    pending: pending.get(core.id.index()).copied().unwrap_or(0),
                    min_time: profile.min_time(),
                    mean_time: profile.average_time(),
                    max_time: profile.max_time(),
                    running_mean_time: if running > 0 {
                        running_time / running as u64
                    } else {
                        0
                    },
                    real_slots,
                    total_slots: real_slots,
                }
            })
            .collect();
        WorkloadState { cores }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "tests use unwrap for brevity")]
mod tests {
    use super::*;
    use crate::data::DataVersion;
    use crate::id::{AppId, DataId, TaskId};
    use crate::scheduler::action::ActionKind;

    fn scheduler() -> TaskScheduler {
        let mut scheduler = TaskScheduler::new(100);
        scheduler
            .register_core(
                "small",
                vec![ImplementationDefinition::method("small", ResourceDescription::new(1, 0))],
            )
            .unwrap();
        scheduler
            .register_core(
                "large",
                vec![ImplementationDefinition::method("large", ResourceDescription::new(4, 0))],
            )
            .unwrap();
        scheduler
    }

    fn action(scheduler: &mut TaskScheduler, core: usize) -> Action {
        let id = scheduler.next_action_id().unwrap();
        Action::new(
            id,
            AppId::from(1),
            TaskId::from(u64::from(id)),
            Some(CoreId::from(core)),
            ActionKind::Execute,
        )
    }

    #[test]
    fn test_action_without_worker_waits_for_registration() {
        let mut s = scheduler();
        let a = action(&mut s, 1);
        assert!(s.schedule(a).is_none());
        assert_eq!(s.no_resource_actions().len(), 1);
        // Too small for the large core.
        assert!(s
            .add_worker(WorkerId::from(1), "w1", ResourceDescription::new(2, 0), false)
            .unwrap()
            .is_empty());
        assert_eq!(s.no_resource_actions().len(), 1);
        let launches = s
            .add_worker(WorkerId::from(2), "w2", ResourceDescription::new(4, 0), false)
            .unwrap();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].worker, WorkerId::from(2));
        assert!(s.no_resource_actions().is_empty());
        assert!(s
            .add_worker(WorkerId::from(2), "w2", ResourceDescription::new(4, 0), false)
            .is_err());
    }

    #[test]
    fn test_blocked_actions_start_in_fifo_order() {
        let mut s = scheduler();
        s.add_worker(WorkerId::from(1), "w1", ResourceDescription::new(1, 0), false)
            .unwrap();
        let a = action(&mut s, 0);
        let b = action(&mut s, 0);
        let c = action(&mut s, 0);
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);
        assert!(s.schedule(a).is_some());
        assert!(s.schedule(b).is_none());
        assert!(s.schedule(c).is_none());
        let end = s.action_end(a_id, Some(50)).unwrap();
        assert_eq!(end.launches.len(), 1);
        assert_eq!(end.launches[0].action.id, b_id);
        assert!(end.retired.is_none());
        let end = s.action_end(b_id, Some(70)).unwrap();
        assert_eq!(end.launches[0].action.id, c_id);
        assert!(s.action_end(a_id, None).is_none());
        let profile = s.worker(WorkerId::from(1)).unwrap().profiles(CoreId::from(0))[0].clone();
        assert_eq!(profile.executions(), 2);
        assert_eq!(profile.average_time(), 60);
    }

    #[test]
    fn test_locality_drives_placement() {
        let mut s = scheduler();
        s.add_worker(WorkerId::from(1), "w1", ResourceDescription::new(2, 0), false)
            .unwrap();
        s.add_worker(WorkerId::from(2), "w2", ResourceDescription::new(2, 0), false)
            .unwrap();
        let output = DataVersion::new(DataId::from(1), 1);
        let producer = action(&mut s, 0).with_data(vec![], vec![output]);
        let producer_id = producer.id;
        let worker = s.schedule(producer).unwrap().worker;
        s.action_end(producer_id, Some(10)).unwrap();
        let consumer = action(&mut s, 0).with_data(vec![output], vec![]);
        assert_eq!(s.schedule(consumer).unwrap().worker, worker);
    }

    #[test]
    fn test_remove_worker_moves_blocked_actions() {
        let mut s = scheduler();
        s.add_worker(WorkerId::from(1), "w1", ResourceDescription::new(1, 0), false)
            .unwrap();
        let a = action(&mut s, 0);
        let b = action(&mut s, 0);
        let a_id = a.id;
        s.schedule(a).unwrap();
        assert!(s.schedule(b).is_none());
        let removed = s.remove_worker(WorkerId::from(1)).unwrap();
        assert_eq!(removed.running.len(), 1);
        assert_eq!(removed.running[0].id, a_id);
        assert!(removed.launches.is_empty());
        assert_eq!(s.no_resource_actions().len(), 1);
        assert!(s.remove_worker(WorkerId::from(1)).is_none());
    }

    #[test]
    fn test_retiring_worker_takes_no_new_actions() {
        let mut s = scheduler();
        s.add_worker(WorkerId::from(1), "w1", ResourceDescription::new(1, 0), true)
            .unwrap();
        let a = action(&mut s, 0);
        let a_id = a.id;
        s.schedule(a).unwrap();
        let (idle, launches) = s.retire_worker(WorkerId::from(1)).unwrap();
        assert!(!idle);
        assert!(launches.is_empty());
        let b = action(&mut s, 0);
        assert!(s.schedule(b).is_none());
        assert_eq!(s.no_resource_actions().len(), 1);
        let end = s.action_end(a_id, Some(5)).unwrap();
        assert_eq!(end.retired, Some(WorkerId::from(1)));
    }

    #[test]
    fn test_cancel_action() {
        let mut s = scheduler();
        let a = action(&mut s, 0);
        let a_id = a.id;
        s.schedule(a);
        assert!(s.cancel_action(a_id).is_some());
        assert!(s.cancel_action(a_id).is_none());
    }

    #[test]
    fn test_workload() {
        let mut s = scheduler();
        s.add_worker(WorkerId::from(1), "w1", ResourceDescription::new(2, 0), false)
            .unwrap();
        for _ in 0..3 {
            let a = action(&mut s, 0);
            s.schedule(a);
        }
        let a = action(&mut s, 1);
        s.schedule(a);
        let workload = s.workload(&[5, 0]);
        assert_eq!(workload.core_count(), 2);
        let small = &workload.cores[0];
        assert_eq!((small.running, small.ready, small.pending), (2, 1, 5));
        assert_eq!(small.real_slots, 2);
        assert_eq!(small.mean_time, 100);
        let large = &workload.cores[1];
        assert_eq!((large.no_resource, large.real_slots), (1, 0));
        assert_eq!(workload.no_resource_count(), 1);
    }
}
