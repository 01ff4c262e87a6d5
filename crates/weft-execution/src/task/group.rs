use indexmap::IndexSet;
use log::debug;
use tokio::sync::oneshot;

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::TaskId;

/// What a barrier waiter learns when the barrier is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierReport {
    pub group: String,
    pub failed_tasks: Vec<TaskId>,
}

pub type BarrierWaiter = oneshot::Receiver<BarrierReport>;

/// A single-shot release signal.
/// Releasing consumes the barrier, so it cannot be released twice.
#[derive(Debug)]
pub struct Barrier {
    sender: oneshot::Sender<BarrierReport>,
}

impl Barrier {
    pub fn new() -> (Self, BarrierWaiter) {
        let (tx, rx) = oneshot::channel();
        (Self { sender: tx }, rx)
    }

    pub fn release(self, report: BarrierReport) {
        // The waiter may have given up waiting.
        let _ = self.sender.send(report);
    }
}

#[derive(Debug)]
pub struct TaskGroup {
    name: String,
    tasks: IndexSet<TaskId>,
    closed: bool,
    /// The implicit application group never closes and releases as soon as it drains.
    implicit: bool,
    barriers: Vec<Barrier>,
    failed_tasks: Vec<TaskId>,
    released_barriers: usize,
}

impl TaskGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: IndexSet::new(),
            closed: false,
            implicit: false,
            barriers: vec![],
            failed_tasks: vec![],
            released_barriers: 0,
        }
    }

    pub fn implicit(name: impl Into<String>) -> Self {
        Self {
            implicit: true,
            ..Self::new(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_implicit(&self) -> bool {
        self.implicit
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks.iter()
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn has_barrier(&self) -> bool {
        !self.barriers.is_empty()
    }

    pub fn released_barriers(&self) -> usize {
        self.released_barriers
    }

    pub fn add_task(&mut self, task_id: TaskId) -> ExecutionResult<()> {
        if self.closed {
            return Err(ExecutionError::invalid(format!(
                "task group {} is closed",
                self.name
            )));
        }
        self.tasks.insert(task_id);
        Ok(())
    }

    /// Removes a member. Removing a task that is not a member has no effect.
    pub fn remove_task(&mut self, task_id: TaskId) -> bool {
        self.tasks.shift_remove(&task_id)
    }

    pub fn record_failure(&mut self, task_id: TaskId) {
        self.failed_tasks.push(task_id);
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Registers a barrier request. Several requests on the same group are released together.
    pub fn register_barrier(&mut self, barrier: Barrier) {
        self.barriers.push(barrier);
    }

    /// Whether the barrier of this group may be released.
    pub fn is_drained(&self) -> bool {
        self.tasks.is_empty() && (self.closed || self.implicit)
    }

    /// Releases the registered barrier if the group has drained.
    /// Returns whether a barrier was released.
    pub fn try_release_barrier(&mut self) -> bool {
        if !self.is_drained() {
            return false;
        }
        if self.barriers.is_empty() {
            return false;
        }
        debug!("releasing barrier of task group {}", self.name);
        self.released_barriers += 1;
        let report = BarrierReport {
            group: self.name.clone(),
            failed_tasks: self.failed_tasks.clone(),
        };
        for barrier in std::mem::take(&mut self.barriers) {
            barrier.release(report.clone());
        }
        true
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "tests use unwrap for brevity")]
mod tests {
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn test_barrier_released_once_for_any_completion_order() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let members = (1..=6).map(TaskId::from).collect::<Vec<_>>();
        for _ in 0..50 {
            let mut group = TaskGroup::new("g");
            for t in members.iter() {
                group.add_task(*t).unwrap();
            }
            group.close();
            let (barrier, mut waiter) = Barrier::new();
            group.register_barrier(barrier);
            let mut order = members.clone();
            order.shuffle(&mut rng);
            for (i, t) in order.iter().enumerate() {
                assert!(group.remove_task(*t));
                let released = group.try_release_barrier();
                assert_eq!(released, i == order.len() - 1);
                if i < order.len() - 1 {
                    assert!(waiter.try_recv().is_err());
                }
            }
            // Later attempts do not release again.
            assert!(!group.try_release_barrier());
            assert!(!group.remove_task(order[0]));
            assert_eq!(group.released_barriers(), 1);
            let report = waiter.try_recv().unwrap();
            assert_eq!(report.group, "g");
        }
    }

    #[test]
    fn test_barrier_waits_for_close() {
        let mut group = TaskGroup::new("g");
        group.add_task(TaskId::from(1)).unwrap();
        let (barrier, mut waiter) = Barrier::new();
        group.register_barrier(barrier);
        group.remove_task(TaskId::from(1));
        assert!(!group.try_release_barrier());
        group.close();
        assert!(group.try_release_barrier());
        assert!(waiter.try_recv().is_ok());
    }

    #[test]
    fn test_implicit_group_releases_when_drained() {
        let mut group = TaskGroup::implicit("App1");
        let (barrier, mut waiter) = Barrier::new();
        group.register_barrier(barrier);
        assert!(group.try_release_barrier());
        assert!(waiter.try_recv().is_ok());
    }

    #[test]
    fn test_closed_group_rejects_tasks() {
        let mut group = TaskGroup::new("g");
        group.close();
        assert!(matches!(
            group.add_task(TaskId::from(1)),
            Err(ExecutionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_barrier_report_lists_failures() {
        let mut group = TaskGroup::new("g");
        group.add_task(TaskId::from(1)).unwrap();
        group.add_task(TaskId::from(2)).unwrap();
        group.close();
        let (first, mut first_waiter) = Barrier::new();
        let (second, mut second_waiter) = Barrier::new();
        group.register_barrier(first);
        group.register_barrier(second);
        group.record_failure(TaskId::from(2));
        group.remove_task(TaskId::from(2));
        group.remove_task(TaskId::from(1));
        assert!(group.try_release_barrier());
        let report = first_waiter.try_recv().unwrap();
        assert_eq!(report.failed_tasks, vec![TaskId::from(2)]);
        assert_eq!(second_waiter.try_recv().unwrap(), report);
    }
}
