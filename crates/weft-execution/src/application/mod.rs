mod analyser;
mod registry;

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;
use tokio::task::AbortHandle;

pub use analyser::{Activation, EndReport, TaskOutcome};
pub use registry::ApplicationRegistry;

use crate::data::DataRegistry;
use crate::error::{ExecutionError, ExecutionResult};
use crate::id::{AppId, AtomicIdGenerator, CoreId, TaskId};
use crate::task::{Barrier, Task, TaskGraph, TaskGroup, TaskStatus};
use crate::trace::DependencyTracer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub total: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub canceled: usize,
}

/// The namespace of one job: its tasks, task groups and data.
pub struct Application {
    id: AppId,
    graph: TaskGraph,
    groups: HashMap<String, TaskGroup>,
    group_stack: Vec<String>,
    /// Closed groups moved aside so that their name can be opened again.
    set_aside_groups: usize,
    data: DataRegistry,
    total_task_count: usize,
    /// Tasks that ended, counted when they end since they later leave the graph.
    ended: TaskSummary,
    /// Ended tasks waiting to be retired from the graph.
    settled: Vec<TaskId>,
    ending: bool,
    wall_clock: Option<AbortHandle>,
    task_ids: Arc<AtomicIdGenerator<TaskId>>,
}

impl Application {
    pub fn new(
        id: AppId,
        task_ids: Arc<AtomicIdGenerator<TaskId>>,
        tracer: Option<Arc<dyn DependencyTracer>>,
    ) -> Self {
        let base = Self::base_group_name(id);
        let mut groups = HashMap::new();
        groups.insert(base.clone(), TaskGroup::implicit(base.clone()));
        Self {
            id,
            graph: TaskGraph::new(id, tracer),
            groups,
            group_stack: vec![base],
            set_aside_groups: 0,
            data: DataRegistry::new(),
            total_task_count: 0,
            ended: TaskSummary::default(),
            settled: vec![],
            ending: false,
            wall_clock: None,
            task_ids,
        }
    }

    fn base_group_name(id: AppId) -> String {
        format!("App{id}")
    }

    pub fn id(&self) -> AppId {
        self.id
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn data(&self) -> &DataRegistry {
        &self.data
    }

    pub fn task(&self, task_id: TaskId) -> Option<&Task> {
        self.graph.get(task_id)
    }

    /// The status of a task, including tasks that already left the graph.
    pub fn task_status(&self, task_id: TaskId) -> Option<TaskStatus> {
        self.graph.status(task_id)
    }

    pub fn group(&self, name: &str) -> Option<&TaskGroup> {
        self.groups.get(name)
    }

    /// The names of the open groups, outermost first.
    pub fn open_groups(&self) -> &[String] {
        &self.group_stack
    }

    pub fn total_task_count(&self) -> usize {
        self.total_task_count
    }

    pub fn is_ending(&self) -> bool {
        self.ending
    }

    /// Opens a task group nested in the current one.
    ///
    /// The name of a closed group that still has pending tasks can be reused. Barriers
    /// requested by name from then on wait for the new group.
    pub fn stack_task_group(&mut self, name: impl Into<String>) -> ExecutionResult<()> {
        let name = name.into();
        if let Some(group) = self.groups.get(&name) {
            if !group.is_closed() {
                return Err(ExecutionError::invalid(format!(
                    "task group {name} is already open in application {}",
                    self.id
                )));
            }
            self.set_aside_group(&name);
        }
        debug!("app {}: opening task group {name}", self.id);
        self.groups.insert(name.clone(), TaskGroup::new(name.clone()));
        self.group_stack.push(name);
        Ok(())
    }

    /// Moves a draining group under a generated key. Its members and barriers follow it,
    /// and its barrier report keeps the original name.
    fn set_aside_group(&mut self, name: &str) {
        let Some(group) = self.groups.remove(name) else {
            return;
        };
        let key = loop {
            self.set_aside_groups += 1;
            let key = format!("{name}#{}", self.set_aside_groups);
            if !self.groups.contains_key(&key) {
                break key;
            }
        };
        for task_id in group.tasks() {
            let Some(task) = self.graph.get_mut(*task_id) else {
                continue;
            };
            for g in task.groups.iter_mut().filter(|g| g.as_str() == name) {
                g.clone_from(&key);
            }
        }
        debug!(
            "app {}: task group {name} is still draining, keeping it as {key}",
            self.id
        );
        self.groups.insert(key, group);
    }

    /// Closes the innermost group opened by the caller.
    /// The implicit application group is never popped.
    pub fn pop_group(&mut self) -> Option<String> {
        if self.group_stack.len() <= 1 {
            warn!("app {}: no task group to close", self.id);
            return None;
        }
        let name = self.group_stack.pop()?;
        if let Some(group) = self.groups.get_mut(&name) {
            group.close();
        }
        self.settle_group(&name);
        Some(name)
    }

    /// Registers a barrier on the named group, or on the implicit group if no name is given.
    /// The barrier is released right away if the group has already drained or does not exist.
    pub fn reaches_group_barrier(&mut self, name: Option<&str>, barrier: Barrier) {
        let name = match name {
            Some(x) => x.to_string(),
            None => Self::base_group_name(self.id),
        };
        match self.groups.get_mut(&name) {
            Some(group) => {
                group.register_barrier(barrier);
                self.settle_group(&name);
            }
            None => {
                debug!("app {}: task group {name} not found, releasing barrier", self.id);
                barrier.release(crate::task::BarrierReport {
                    group: name,
                    failed_tasks: vec![],
                });
            }
        }
    }

    pub fn reaches_barrier(&mut self, barrier: Barrier) {
        self.reaches_group_barrier(None, barrier);
    }

    pub fn end_reached(&mut self, barrier: Barrier) {
        self.ending = true;
        self.reaches_barrier(barrier);
    }

    /// Admits a task into the graph and into every open group.
    pub(crate) fn new_task(&mut self, mut task: Task) -> ExecutionResult<TaskId> {
        let task_id = task.id();
        for name in self.group_stack.iter() {
            let Some(group) = self.groups.get_mut(name) else {
                continue;
            };
            group.add_task(task_id)?;
            task.groups.push(name.clone());
        }
        self.graph.insert(task);
        self.total_task_count += 1;
        Ok(task_id)
    }

    /// Removes an ended task from its groups and releases the barriers that drained.
    pub(crate) fn leave_groups(&mut self, task_id: TaskId, failed: bool) {
        let Some(task) = self.graph.get(task_id) else {
            return;
        };
        let names = task.groups.clone();
        for name in names.iter() {
            let Some(group) = self.groups.get_mut(name) else {
                continue;
            };
            group.remove_task(task_id);
            if failed {
                group.record_failure(task_id);
            }
            self.settle_group(name);
        }
    }

    /// Counts a task that reached a terminal state and marks it for retirement.
    /// Commutative groups are not user tasks and are not counted.
    pub(crate) fn settle_task(&mut self, task_id: TaskId, status: TaskStatus) {
        let counted = self
            .graph
            .get(task_id)
            .is_some_and(|t| !t.is_commutative_group());
        if counted {
            match status {
                TaskStatus::Finished => self.ended.completed += 1,
                TaskStatus::Failed => self.ended.failed += 1,
                TaskStatus::Canceled => self.ended.canceled += 1,
                TaskStatus::ToAnalyse | TaskStatus::ToExecute => return,
            }
        }
        self.settled.push(task_id);
    }

    /// Drops the ended tasks that no pending task depends on anymore.
    /// Must run after the actions of canceled tasks have been withdrawn.
    pub fn retire_settled(&mut self) -> usize {
        let before = self.graph.len();
        let graph = &mut self.graph;
        self.settled.retain(|id| !graph.retire(*id) && graph.contains(*id));
        let retired = before - self.graph.len();
        if retired > 0 {
            debug!("app {}: retired {retired} ended tasks", self.id);
        }
        retired
    }

    /// Releases the barrier of a drained group and forgets closed groups that drained.
    fn settle_group(&mut self, name: &str) {
        let Some(group) = self.groups.get_mut(name) else {
            return;
        };
        group.try_release_barrier();
        if group.is_closed() && !group.has_pending_tasks() {
            debug!("app {}: removing task group {name}", self.id);
            self.groups.remove(name);
        }
    }

    pub fn set_wall_clock(&mut self, handle: AbortHandle) {
        if let Some(previous) = self.wall_clock.replace(handle) {
            previous.abort();
        }
    }

    pub fn clear_wall_clock(&mut self) {
        if let Some(handle) = self.wall_clock.take() {
            handle.abort();
        }
    }

    pub fn task_summary(&self) -> TaskSummary {
        let TaskSummary {
            completed,
            failed,
            canceled,
            ..
        } = self.ended;
        TaskSummary {
            total: self.total_task_count,
            in_progress: self
                .total_task_count
                .saturating_sub(completed + failed + canceled),
            completed,
            failed,
            canceled,
        }
    }

    /// Counts the tasks per core that still wait for a predecessor.
    /// Only live tasks are visited, since ended tasks are retired from the graph.
    pub fn pending_counts(&self, core_count: usize) -> Vec<usize> {
        let mut counts = vec![0; core_count];
        for task in self.graph.tasks() {
            if task.status() != TaskStatus::ToExecute || task.predecessors().is_empty() {
                continue;
            }
            if let Some(count) = task.core().and_then(|c: CoreId| counts.get_mut(c.index())) {
                *count += 1;
            }
        }
        counts
    }

    /// Drops every data record. Called when the application is deregistered.
    pub(crate) fn release_data(&mut self) {
        self.data.clear();
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.clear_wall_clock();
    }
}
