use log::{debug, warn};
use serde::Serialize;

use crate::cloud::{select_instance_type, InstanceType};
use crate::id::{CoreId, WorkerId};
use crate::optimizer::constraints::{merge_constraints, ConstraintSet};
use crate::optimizer::reduction::{best_destruction, choose_destruction, trim_reduction_options};
use crate::scheduler::{CoreWorkload, ResourceDescription, WorkloadState};

/// A worker as seen by the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerView {
    pub id: WorkerId,
    pub name: String,
    /// The number of tasks of each core the worker runs at the same time.
    pub slots: Vec<usize>,
    pub running: usize,
    pub dynamic: bool,
    pub retiring: bool,
}

impl WorkerView {
    /// A critical worker is running tasks, so destroying it loses work.
    pub fn is_critical(&self) -> bool {
        self.running > 0
    }
}

/// Everything the optimizer knows about the cluster at the start of a cycle.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub workload: WorkloadState,
    pub workers: Vec<WorkerView>,
    /// For every core, the requirements of the implementations that can size a machine.
    pub requirements: Vec<Vec<ResourceDescription>>,
}

impl ClusterSnapshot {
    /// The dynamic workers that are not being retired.
    pub fn dynamic_workers(&self) -> impl Iterator<Item = &WorkerView> {
        self.workers.iter().filter(|w| w.dynamic && !w.retiring)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyReason {
    /// Some core has work and nowhere to run it.
    Starvation,
    BelowMinimum,
    AboveMaximum,
    Recommended,
}

impl PolicyReason {
    pub fn is_mandatory(&self) -> bool {
        !matches!(self, PolicyReason::Recommended)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceDecision {
    Create {
        instance_type: InstanceType,
        reason: PolicyReason,
    },
    Destroy {
        worker: WorkerId,
        reason: PolicyReason,
    },
}

impl ResourceDecision {
    pub fn reason(&self) -> PolicyReason {
        match self {
            ResourceDecision::Create { reason, .. } | ResourceDecision::Destroy { reason, .. } => {
                *reason
            }
        }
    }
}

/// The inputs of one evaluation of the scaling policies. Times are in milliseconds.
pub struct PolicyInput<'a> {
    /// The snapshot, with the slots of pending creations already counted in the total slots.
    pub snapshot: &'a ClusterSnapshot,
    pub instance_types: &'a [InstanceType],
    pub pending_creations: usize,
    /// Whether the provider accepts more instances.
    pub can_create: bool,
    pub creation_time: u64,
    pub limit_time: u64,
    pub min_workers: Option<usize>,
    pub max_workers: Option<usize>,
}

/// The projected load of one core.
#[derive(Debug, Clone, Copy, Default)]
struct CoreLoad {
    ready_mean: i64,
    pending_min: i64,
    pending_mean: i64,
}

impl CoreLoad {
    fn new(w: &CoreWorkload, creation_time: i64) -> Self {
        let min = (w.min_time as i64).min(creation_time);
        let mean = (w.mean_time as i64).min(creation_time);
        let running_mean = w.running_mean_time as i64;
        let remaining_min = (min - running_mean).clamp(0, creation_time);
        let remaining_mean = (mean - running_mean).clamp(0, creation_time);
        let (running, ready, pending) = (w.running as i64, w.ready as i64, w.pending as i64);
        let ready_min = remaining_min * running + min * ready;
        let ready_mean = remaining_mean * running + mean * ready;
        Self {
            ready_mean,
            pending_min: ready_min + min * pending,
            pending_mean: ready_mean + mean * pending,
        }
    }
}

/// Decides which resources to create or destroy in this cycle.
///
/// Mandatory conditions are checked first, in order: starved cores, a pool below the minimum
/// and a pool above the maximum. The first one that holds decides the cycle. Otherwise an
/// optional creation is considered, and then an optional destruction.
pub fn apply_policies(input: &PolicyInput) -> Vec<ResourceDecision> {
    let workload = &input.snapshot.workload;
    let creation_time = input.creation_time.max(1) as i64;
    let loads: Vec<CoreLoad> = workload
        .cores
        .iter()
        .map(|w| CoreLoad::new(w, creation_time))
        .collect();
    let current = input.snapshot.dynamic_workers().count() + input.pending_creations;
    debug!(
        "applying resource policies (current: {current}, min: {:?}, max: {:?})",
        input.min_workers, input.max_workers
    );

    let starved = starved_cores(workload);
    if !starved.is_empty() {
        debug!("cores {starved:?} cannot run anywhere, mandatory increase");
        let mut recommendations = recommend_creations(workload, &loads, creation_time);
        for core in starved.iter() {
            if let Some(r) = recommendations.get_mut(core.index()) {
                *r = r.max(1.0);
            }
        }
        return starvation_increase(input, &starved, &recommendations);
    }
    if let Some(min) = input.min_workers {
        if min > current {
            debug!("current worker count {current} is below the minimum {min}, mandatory increase");
            let recommendations = order_creations(workload, &loads);
            return mandatory_increase(input, &recommendations)
                .into_iter()
                .collect();
        }
    }
    if let Some(max) = input.max_workers {
        if max < current {
            debug!("current worker count {current} is above the maximum {max}, mandatory reduction");
            let recommendations = delete_recommendations(workload, &loads, input.limit_time);
            return mandatory_reduction(input, &recommendations)
                .into_iter()
                .collect();
        }
    }

    if input.max_workers.is_none_or(|max| max > current) && workload.ready_count() > 1 {
        let recommendations = recommend_creations(workload, &loads, creation_time);
        if let Some(decision) = optional_increase(input, &recommendations) {
            return vec![decision];
        }
    }
    let total_pending = workload.pending_count();
    let active = workload.ready_count() + workload.running_count();
    let max_concurrent = workload
        .cores
        .iter()
        .filter(|w| w.running > 0 || w.ready > 0)
        .map(|w| w.real_slots)
        .max()
        .unwrap_or(0);
    if input.min_workers.is_none_or(|min| min < current)
        && total_pending <= active
        && active <= max_concurrent
    {
        let recommendations = delete_recommendations(workload, &loads, input.limit_time);
        if let Some(decision) = optional_reduction(input, &recommendations) {
            return vec![decision];
        }
    }
    vec![]
}

/// Cores with actions that no worker can run and no slot, real or pending, to run them.
pub(crate) fn starved_cores(workload: &WorkloadState) -> Vec<CoreId> {
    if workload.no_resource_count() == 0 {
        return vec![];
    }
    workload
        .cores
        .iter()
        .filter(|w| w.no_resource > 0 && w.total_slots == 0)
        .map(|w| w.core)
        .collect()
}

/// The number of slots each core would need to absorb its load within one creation time.
fn recommend_creations(workload: &WorkloadState, loads: &[CoreLoad], creation_time: i64) -> Vec<f32> {
    workload
        .cores
        .iter()
        .zip(loads)
        .map(|(w, load)| {
            let embraceable = w.total_slots as i64 * creation_time;
            let remaining = load.ready_mean - embraceable;
            if remaining > 0 {
                (remaining / creation_time) as f32
            } else {
                0.0
            }
        })
        .collect()
}

/// Recommends one slot for the core with the highest load per slot.
fn order_creations(workload: &WorkloadState, loads: &[CoreLoad]) -> Vec<f32> {
    let mut out = vec![0.0; workload.core_count()];
    let mut best = 0;
    let mut best_ratio = 0.0;
    for (i, (w, load)) in workload.cores.iter().zip(loads).enumerate() {
        if load.ready_mean > 0 && w.total_slots > 0 {
            let ratio = load.ready_mean as f32 / w.total_slots as f32;
            if ratio > best_ratio {
                best = i;
                best_ratio = ratio;
            }
        }
    }
    if let Some(x) = out.get_mut(best) {
        *x = 1.0;
    }
    out
}

/// The number of slots each core could lose while keeping its load within the limit time.
fn delete_recommendations(workload: &WorkloadState, loads: &[CoreLoad], limit_time: u64) -> Vec<f32> {
    let limit = limit_time.max(1) as i64;
    workload
        .cores
        .iter()
        .zip(loads)
        .map(|(w, load)| {
            let embraceable = limit * w.real_slots as i64;
            if embraceable == 0 {
                0.0
            } else if load.pending_min > 0 {
                let unused = embraceable as f64 / 2.0 - load.pending_mean as f64;
                (unused / limit as f64) as f32
            } else {
                (embraceable / limit) as f32
            }
        })
        .collect()
}

/// Candidate machine requirements with their recommended slots, highest first.
fn creation_candidates(
    input: &PolicyInput,
    recommendations: &[f32],
    threshold: Option<f32>,
) -> Vec<(ResourceDescription, f32)> {
    let mut candidates: Vec<(ResourceDescription, f32)> = input
        .snapshot
        .requirements
        .iter()
        .zip(recommendations)
        .filter(|(_, r)| threshold.is_none_or(|t| **r > t))
        .flat_map(|(requirements, r)| requirements.iter().map(|d| (d.clone(), *r)))
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    candidates
}

fn request_one_creation(
    input: &PolicyInput,
    candidates: Vec<(ResourceDescription, f32)>,
    containing: bool,
    reason: PolicyReason,
) -> Option<ResourceDecision> {
    if !input.can_create {
        warn!("the cloud provider cannot host more instances");
        return None;
    }
    for (requirements, value) in candidates {
        let amount = (value as usize).max(1);
        if let Some(t) = select_instance_type(input.instance_types, &requirements, amount, containing)
        {
            return Some(ResourceDecision::Create {
                instance_type: t.clone(),
                reason,
            });
        }
    }
    warn!("no instance type matches the requirements");
    None
}

fn starvation_increase(
    input: &PolicyInput,
    starved: &[CoreId],
    recommendations: &[f32],
) -> Vec<ResourceDecision> {
    if !input.can_create {
        warn!("the cloud provider cannot host more instances");
        return vec![];
    }
    let constraints = starved
        .iter()
        .flat_map(|core| {
            input
                .snapshot
                .requirements
                .get(core.index())
                .into_iter()
                .flatten()
                .map(|d| ConstraintSet::new(d.clone(), *core))
        })
        .collect();
    let mut decisions = vec![];
    for c in merge_constraints(constraints) {
        let amount = c
            .cores
            .iter()
            .filter_map(|core| recommendations.get(core.index()))
            .fold(1.0_f32, |a, b| a.max(*b)) as usize;
        match select_instance_type(input.instance_types, &c.description, amount, true) {
            Some(t) => decisions.push(ResourceDecision::Create {
                instance_type: t.clone(),
                reason: PolicyReason::Starvation,
            }),
            None => warn!(
                "no instance type can run cores {:?} with requirements {}",
                c.cores, c.description
            ),
        }
    }
    decisions
}

fn mandatory_increase(input: &PolicyInput, recommendations: &[f32]) -> Option<ResourceDecision> {
    let candidates = creation_candidates(input, recommendations, None);
    request_one_creation(input, candidates, true, PolicyReason::BelowMinimum)
}

fn optional_increase(input: &PolicyInput, recommendations: &[f32]) -> Option<ResourceDecision> {
    let candidates = creation_candidates(input, recommendations, Some(1.0));
    if candidates.is_empty() {
        return None;
    }
    request_one_creation(input, candidates, false, PolicyReason::Recommended)
}

fn mandatory_reduction(input: &PolicyInput, recommendations: &[f32]) -> Option<ResourceDecision> {
    let (critical, non_critical): (Vec<&WorkerView>, Vec<&WorkerView>) = input
        .snapshot
        .dynamic_workers()
        .partition(|w| w.is_critical());
    let critical = trim_reduction_options(critical, recommendations);
    let non_critical = trim_reduction_options(non_critical, recommendations);
    let option = choose_destruction(
        best_destruction(&critical, recommendations),
        best_destruction(&non_critical, recommendations),
    )?;
    Some(ResourceDecision::Destroy {
        worker: option.worker,
        reason: PolicyReason::AboveMaximum,
    })
}

fn optional_reduction(input: &PolicyInput, recommendations: &[f32]) -> Option<ResourceDecision> {
    let candidates = trim_reduction_options(
        input.snapshot.dynamic_workers().filter(|w| !w.is_critical()),
        recommendations,
    );
    let Some(option) = best_destruction(&candidates, recommendations) else {
        debug!("no worker to destroy");
        return None;
    };
    debug!(
        "best worker to destroy is {} [{}, {}, {}]",
        option.worker, option.undesired_cores, option.undesired_slots, option.desired_slots
    );
    Some(ResourceDecision::Destroy {
        worker: option.worker,
        reason: PolicyReason::Recommended,
    })
}
