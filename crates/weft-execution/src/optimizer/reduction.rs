use crate::id::WorkerId;
use crate::optimizer::policy::WorkerView;

/// The effect of destroying one worker on the slots each core was recommended to lose.
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionOption {
    pub worker: WorkerId,
    /// Cores that lose slots they were not recommended to lose.
    pub undesired_cores: f32,
    pub undesired_slots: f32,
    pub desired_slots: f32,
}

impl ReductionOption {
    pub fn evaluate(worker: &WorkerView, recommendations: &[f32]) -> Self {
        let mut option = Self {
            worker: worker.id,
            undesired_cores: 0.0,
            undesired_slots: 0.0,
            desired_slots: 0.0,
        };
        for (core, slots) in worker.slots.iter().enumerate() {
            if *slots == 0 {
                continue;
            }
            let slots = *slots as f32;
            let recommended = recommendations.get(core).copied().unwrap_or(0.0);
            if recommended < 1.0 {
                option.undesired_cores += 1.0;
                option.undesired_slots += slots;
            } else if slots < recommended {
                option.desired_slots += slots;
            } else {
                option.desired_slots += recommended;
                option.undesired_slots += slots - recommended;
            }
        }
        option
    }

    /// Compares undesired cores, then undesired slots (both fewer is better),
    /// then desired slots (more is better).
    pub fn is_better_than(&self, other: &ReductionOption) -> bool {
        if self.undesired_cores != other.undesired_cores {
            return self.undesired_cores < other.undesired_cores;
        }
        if self.undesired_slots != other.undesired_slots {
            return self.undesired_slots < other.undesired_slots;
        }
        self.desired_slots > other.desired_slots
    }
}

/// Keeps the workers whose every core was recommended to lose at least one slot.
pub fn trim_reduction_options<'a>(
    workers: impl IntoIterator<Item = &'a WorkerView>,
    recommendations: &[f32],
) -> Vec<&'a WorkerView> {
    workers
        .into_iter()
        .filter(|w| {
            w.slots
                .iter()
                .enumerate()
                .filter(|(_, slots)| **slots > 0)
                .all(|(core, _)| recommendations.get(core).copied().unwrap_or(0.0) >= 1.0)
        })
        .collect()
}

pub fn best_destruction(
    workers: &[&WorkerView],
    recommendations: &[f32],
) -> Option<ReductionOption> {
    let mut best: Option<ReductionOption> = None;
    for worker in workers {
        let option = ReductionOption::evaluate(worker, recommendations);
        if best.as_ref().is_none_or(|b| option.is_better_than(b)) {
            best = Some(option);
        }
    }
    best
}

/// Picks between the best critical and the best non-critical destruction.
/// The non-critical one wins unless the critical one is strictly better.
pub fn choose_destruction(
    critical: Option<ReductionOption>,
    non_critical: Option<ReductionOption>,
) -> Option<ReductionOption> {
    match (critical, non_critical) {
        (Some(c), Some(n)) => {
            if c.is_better_than(&n) {
                Some(c)
            } else {
                Some(n)
            }
        }
        (c, n) => n.or(c),
    }
}
