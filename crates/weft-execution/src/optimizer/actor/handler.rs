use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::time::Instant;
use weft_server::actor::{ActorAction, ActorHandle};

use crate::cloud::{select_instance_type, InstanceType, Provisioning};
use crate::error::{ExecutionError, ExecutionResult};
use crate::id::{CreationId, WorkerId};
use crate::optimizer::actor::PendingCreation;
use crate::optimizer::constraints::{merge_constraints, ConstraintSet};
use crate::optimizer::guard::BlockVerdict;
use crate::optimizer::policy::{
    apply_policies, ClusterSnapshot, PolicyInput, PolicyReason, ResourceDecision,
};
use crate::optimizer::{OptimizerEvent, ResourceOptimizer};

impl ResourceOptimizer {
    pub(super) fn handle_wake(
        &mut self,
        handle: &ActorHandle<Self>,
        generation: u64,
    ) -> ExecutionResult<ActorAction> {
        if generation != self.generation {
            return Ok(ActorAction::Continue);
        }
        self.run_cycle(handle)
    }

    pub(super) fn handle_optimize_now(
        &mut self,
        handle: &ActorHandle<Self>,
    ) -> ExecutionResult<ActorAction> {
        debug!("optimization requested");
        self.run_cycle(handle)
    }

    fn run_cycle(&mut self, handle: &ActorHandle<Self>) -> ExecutionResult<ActorAction> {
        self.generation += 1;
        handle.send_later(
            OptimizerEvent::Wake {
                generation: self.generation,
            },
            self.options().interval,
        );
        if !self.initialized {
            self.initialized = true;
            self.initial_creations(handle)?;
            return Ok(ActorAction::Continue);
        }
        self.optimize(handle)
    }

    /// Requests one merged instance for the cores no worker can run, then default instances
    /// until the pool reaches its initial size.
    fn initial_creations(&mut self, handle: &ActorHandle<Self>) -> ExecutionResult<()> {
        let snapshot = self.snapshot()?;
        let instance_types = self.options().provider.instance_types();
        let constraints: Vec<ConstraintSet> = snapshot
            .workload
            .cores
            .iter()
            .filter(|w| w.total_slots == 0)
            .flat_map(|w| {
                snapshot
                    .requirements
                    .get(w.core.index())
                    .into_iter()
                    .flatten()
                    .map(|d| ConstraintSet::new(d.clone(), w.core))
            })
            .collect();
        for c in merge_constraints(constraints) {
            if !self.can_create(&snapshot) {
                warn!("the cloud provider cannot host more instances");
                return Ok(());
            }
            match select_instance_type(&instance_types, &c.description, 1, true) {
                Some(t) => self.request_creation(handle, t.clone(), PolicyReason::Starvation)?,
                None => warn!(
                    "no instance type can run cores {:?} with requirements {}",
                    c.cores, c.description
                ),
            }
        }
        let Some(default_type) = instance_types.first() else {
            return Ok(());
        };
        while self.current_workers(&snapshot) < self.options().initial_workers
            && self.can_create(&snapshot)
            && self
                .options()
                .max_workers
                .is_none_or(|max| self.current_workers(&snapshot) < max)
        {
            self.request_creation(handle, default_type.clone(), PolicyReason::BelowMinimum)?;
        }
        Ok(())
    }

    fn optimize(&mut self, handle: &ActorHandle<Self>) -> ExecutionResult<ActorAction> {
        let snapshot = self.snapshot()?;
        let instance_types = self.options().provider.instance_types();
        let input = PolicyInput {
            snapshot: &snapshot,
            instance_types: &instance_types,
            pending_creations: self.pending.len(),
            can_create: self.can_create(&snapshot),
            creation_time: self.creation_time().as_millis() as u64,
            limit_time: self.options().interval.as_millis() as u64,
            min_workers: self.options().min_workers,
            max_workers: self.options().max_workers,
        };
        let decisions = apply_policies(&input);
        match self.check_block(&snapshot) {
            BlockVerdict::Clear | BlockVerdict::Waiting => {}
            BlockVerdict::Warning { retries_left } => {
                warn!(
                    "{} actions cannot run on any worker and no instance can be created for them, {retries_left} retries left",
                    snapshot.workload.no_resource_count()
                );
            }
            BlockVerdict::Fatal => {
                let e = ExecutionError::ResourceStarvation(format!(
                    "{} actions cannot run on any worker and no instance can be created for them",
                    snapshot.workload.no_resource_count()
                ));
                error!("{e}");
                self.options().runtime.raise_fatal(e.to_string());
                return Ok(ActorAction::Stop);
            }
        }
        for decision in decisions {
            self.apply_decision(handle, decision, &snapshot)?;
        }
        Ok(ActorAction::Continue)
    }

    /// Actions without any capable worker count as blocked unless an instance joined since
    /// the last check. A creation still in flight postpones the check. Rejected and failed
    /// creations do not count as progress.
    fn check_block(&mut self, snapshot: &ClusterSnapshot) -> BlockVerdict {
        let now = Instant::now();
        let joined = std::mem::take(&mut self.joined_since_check);
        if snapshot.workload.no_resource_count() == 0 || joined {
            self.guard.check(false, now)
        } else if !self.pending.is_empty() {
            BlockVerdict::Waiting
        } else {
            self.guard.check(true, now)
        }
    }

    fn apply_decision(
        &mut self,
        handle: &ActorHandle<Self>,
        decision: ResourceDecision,
        snapshot: &ClusterSnapshot,
    ) -> ExecutionResult<()> {
        match decision {
            ResourceDecision::Create {
                instance_type,
                reason,
            } => self.request_creation(handle, instance_type, reason),
            ResourceDecision::Destroy { worker, reason } => {
                let Some(view) = snapshot.workers.iter().find(|w| w.id == worker) else {
                    warn!("worker {worker} not found");
                    return Ok(());
                };
                info!("retiring worker {worker} ({}) for {reason:?}", view.name);
                match self.options().runtime.retire_worker(worker)? {
                    Some(true) => self.request_destruction(handle, worker, view.name.clone()),
                    Some(false) => {
                        debug!("worker {worker} will be destroyed once its actions end")
                    }
                    None => warn!("worker {worker} is no longer registered"),
                }
                Ok(())
            }
        }
    }

    fn request_creation(
        &mut self,
        handle: &ActorHandle<Self>,
        instance_type: InstanceType,
        reason: PolicyReason,
    ) -> ExecutionResult<()> {
        let creation = self.creation_ids.next()?;
        info!(
            "requesting instance {creation} of type {} for {reason:?}",
            instance_type.name
        );
        self.pending.insert(
            creation,
            PendingCreation {
                instance_type: instance_type.clone(),
                requested_at: Instant::now(),
            },
        );
        let provider = Arc::clone(&self.options().provider);
        let retry_strategy = self.options().provider_retry_strategy.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            let result = retry_strategy
                .run("instance creation", || {
                    let provider = Arc::clone(&provider);
                    let instance_type = instance_type.clone();
                    async move { provider.create_instance(&instance_type).await }
                })
                .await;
            let _ = handle
                .send(OptimizerEvent::CreationCompleted { creation, result })
                .await;
        });
        Ok(())
    }

    fn request_destruction(&self, handle: &ActorHandle<Self>, worker: WorkerId, name: String) {
        let provider = Arc::clone(&self.options().provider);
        let retry_strategy = self.options().provider_retry_strategy.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            let result = retry_strategy
                .run("instance destruction", || {
                    let provider = Arc::clone(&provider);
                    let name = name.clone();
                    async move { provider.destroy_instance(worker, &name).await }
                })
                .await;
            let _ = handle
                .send(OptimizerEvent::DestructionCompleted {
                    worker,
                    name,
                    result,
                })
                .await;
        });
    }

    pub(super) fn handle_creation_completed(
        &mut self,
        creation: CreationId,
        result: ExecutionResult<Provisioning>,
    ) -> ExecutionResult<ActorAction> {
        let Some(pending) = self.pending.shift_remove(&creation) else {
            warn!("creation {creation} not found");
            return Ok(ActorAction::Continue);
        };
        let type_name = &pending.instance_type.name;
        match result {
            Ok(Provisioning::Accepted(resource)) => {
                let elapsed = pending.requested_at.elapsed();
                self.creation_times.record(elapsed);
                self.joined_since_check = true;
                let name = resource.name.clone();
                let worker =
                    self.options()
                        .runtime
                        .add_worker(resource.name, resource.description, true)?;
                info!(
                    "instance {name} of type {type_name} joined as worker {worker} after {}s",
                    elapsed.as_secs()
                );
            }
            Ok(Provisioning::Rejected(reason)) => {
                info!("the provider rejected instance {creation} of type {type_name}: {reason}");
            }
            Err(e) => {
                error!("failed to create instance {creation} of type {type_name}: {e}");
            }
        }
        Ok(ActorAction::Continue)
    }

    pub(super) fn handle_destruction_completed(
        &mut self,
        worker: WorkerId,
        name: String,
        result: ExecutionResult<()>,
    ) -> ExecutionResult<ActorAction> {
        match result {
            Ok(()) => info!("instance {name} of worker {worker} destroyed"),
            Err(e) => error!("failed to destroy instance {name} of worker {worker}: {e}"),
        }
        Ok(ActorAction::Continue)
    }

    pub(super) fn handle_worker_retired(
        &mut self,
        handle: &ActorHandle<Self>,
        worker: WorkerId,
        name: String,
    ) -> ExecutionResult<ActorAction> {
        debug!("retired worker {worker} is idle");
        self.request_destruction(handle, worker, name);
        Ok(ActorAction::Continue)
    }
}
