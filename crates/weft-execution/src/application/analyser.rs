use std::mem;

use log::{debug, error, warn};

use crate::application::Application;
use crate::data::DataAccess;
use crate::error::{ExecutionError, ExecutionResult};
use crate::id::{ActionId, TaskId};
use crate::task::{
    CommutativeGroup, DataKey, Direction, OnFailure, Parameter, ParameterAccess, ReduceStep, Task,
    TaskKind, TaskStatus,
};

/// Work that became runnable after a change to the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    Execute(TaskId),
    Reduce {
        task: TaskId,
        steps: Vec<ReduceStep>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Finished,
    Failed,
    Canceled,
}

impl TaskOutcome {
    fn status(self) -> TaskStatus {
        match self {
            TaskOutcome::Finished => TaskStatus::Finished,
            TaskOutcome::Failed => TaskStatus::Failed,
            TaskOutcome::Canceled => TaskStatus::Canceled,
        }
    }
}

/// The consequences of a graph update that the scheduling layer has to act upon.
#[derive(Debug, Default)]
pub struct EndReport {
    pub activations: Vec<Activation>,
    /// Every task canceled by the update, in cancellation order.
    pub canceled: Vec<TaskId>,
    pub errors: Vec<ExecutionError>,
}

impl EndReport {
    pub fn is_empty(&self) -> bool {
        self.activations.is_empty() && self.canceled.is_empty() && self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParameterRole {
    Plain,
    /// The collection folded by a reduce task.
    ReduceCollection,
    ReduceElement,
}

/// The outcome of registering one data access.
struct AccessOutcome {
    producer: Option<TaskId>,
    /// Whether the version read was discarded because its producer failed.
    lost: bool,
}

impl AccessOutcome {
    fn none() -> Self {
        Self {
            producer: None,
            lost: false,
        }
    }
}

impl Application {
    /// Admits a new task: registers its data accesses, wires it to its producers and
    /// reports whether it can run right away.
    pub fn analyse_task(&mut self, task: Task) -> ExecutionResult<EndReport> {
        let reduce_collection = match &task.kind {
            TaskKind::Reduce { plan, .. } => Some(plan.collection_index()),
            _ => None,
        };
        let parameters = task.parameters().to_vec();
        let task_id = self.new_task(task)?;
        let mut lost = false;
        for (i, parameter) in parameters.iter().enumerate() {
            let role = if reduce_collection == Some(i) {
                ParameterRole::ReduceCollection
            } else {
                ParameterRole::Plain
            };
            lost |= self.register_parameter(task_id, parameter, role)?;
        }
        let mut report = EndReport::default();
        if let Some(task) = self.graph.get_mut(task_id) {
            task.set_status(TaskStatus::ToExecute);
        }
        if lost {
            warn!(
                "app {}: task {task_id} reads data whose producer failed, canceling it",
                self.id
            );
            self.cancel_tasks(vec![task_id], &mut report);
            return Ok(report);
        }
        if let Some(activation) = self.activate(task_id) {
            report.activations.push(activation);
        }
        Ok(report)
    }

    fn register_parameter(
        &mut self,
        task_id: TaskId,
        parameter: &Parameter,
        role: ParameterRole,
    ) -> ExecutionResult<bool> {
        let outcome = self.access_data(task_id, parameter)?;
        if role == ParameterRole::ReduceElement {
            if let Some(TaskKind::Reduce { plan, .. }) =
                self.graph.get_mut(task_id).map(|t| &mut t.kind)
            {
                match outcome.producer {
                    Some(producer) => plan.register_pending_input(producer, parameter.clone()),
                    None => plan.input_ready(parameter.clone()),
                }
            }
        }
        let element_role = match role {
            ParameterRole::ReduceCollection => ParameterRole::ReduceElement,
            _ => ParameterRole::Plain,
        };
        let mut lost = outcome.lost;
        for element in parameter.elements.iter() {
            lost |= self.register_parameter(task_id, element, element_role)?;
        }
        Ok(lost)
    }

    fn access_data(
        &mut self,
        task_id: TaskId,
        parameter: &Parameter,
    ) -> ExecutionResult<AccessOutcome> {
        let Some(key) = parameter.key.clone() else {
            return Ok(AccessOutcome::none());
        };
        if let DataKey::Stream(_) = key {
            self.access_stream(task_id, &key, parameter.direction)?;
            return Ok(AccessOutcome::none());
        }
        if parameter.direction == Direction::Commutative {
            let in_group = self
                .graph
                .get(task_id)
                .is_some_and(|t| t.commutative_group.is_some());
            if !in_group {
                return self.access_commutative(task_id, &key, parameter);
            }
            debug!(
                "app {}: task {task_id} is already in a commutative group, {key} is accessed as INOUT",
                self.id
            );
        }
        let info = self.data.get_or_register(&key)?;
        let data_id = info.id;
        // Any other access closes the open commutative group on the datum.
        let group = info.commutative_group.take();
        let (access, producer, readers, lost) = match parameter.direction {
            Direction::In | Direction::InDelete => (
                DataAccess::Read(info.current()),
                info.last_writer,
                vec![],
                info.discarded,
            ),
            Direction::Concurrent => {
                info.concurrent_readers.push(task_id);
                (
                    DataAccess::Read(info.current()),
                    info.last_writer,
                    vec![],
                    info.discarded,
                )
            }
            Direction::Out => {
                let readers = mem::take(&mut info.concurrent_readers);
                let write = info.next_version();
                info.last_writer = Some(task_id);
                info.discarded = false;
                (DataAccess::Write(write), None, readers, false)
            }
            Direction::InOut | Direction::Commutative => {
                let read = info.current();
                let producer = info.last_writer;
                let lost = info.discarded;
                let readers = mem::take(&mut info.concurrent_readers);
                let write = info.next_version();
                info.last_writer = Some(task_id);
                info.discarded = false;
                (
                    DataAccess::ReadWrite { read, write },
                    producer,
                    readers,
                    lost,
                )
            }
        };
        if let Some(group) = group {
            if let Some(cg) = self.commutative_group_mut(group) {
                debug!("closing commutative group {group}");
                cg.close();
            }
        }
        if parameter.direction == Direction::InDelete {
            self.data.delete(&key);
        }
        if let Some(task) = self.graph.get_mut(task_id) {
            task.accesses.push(ParameterAccess { key, access });
        }
        let producer = producer.filter(|p| *p != task_id && self.graph.is_pending(*p));
        if let Some(producer) = producer {
            self.graph
                .add_data_dependency(task_id, producer, parameter, Some(data_id))?;
        }
        for reader in readers {
            if reader != task_id && self.graph.is_pending(reader) {
                self.graph
                    .add_data_dependency(task_id, reader, parameter, Some(data_id))?;
            }
        }
        Ok(AccessOutcome { producer, lost })
    }

    fn access_stream(
        &mut self,
        task_id: TaskId,
        key: &DataKey,
        direction: Direction,
    ) -> ExecutionResult<()> {
        let info = self.data.get_or_register(key)?;
        if direction.writes() && !info.stream_writers.contains(&task_id) {
            info.stream_writers.push(task_id);
        }
        let writers = if direction.reads() {
            info.stream_writers.clone()
        } else {
            vec![]
        };
        // Retired writers have nothing left to stream.
        for writer in writers {
            if !self.graph.contains(writer) {
                continue;
            }
            self.graph.add_stream_dependency(task_id, writer)?;
        }
        Ok(())
    }

    fn access_commutative(
        &mut self,
        task_id: TaskId,
        key: &DataKey,
        parameter: &Parameter,
    ) -> ExecutionResult<AccessOutcome> {
        let open = self
            .data
            .lookup(key)
            .and_then(|info| info.commutative_group)
            .filter(|g| {
                self.graph.is_pending(*g)
                    && self
                        .commutative_group(*g)
                        .is_some_and(|cg| !cg.is_closed())
            });
        let group_id = match open {
            Some(g) => g,
            None => self.open_commutative_group(key, parameter)?,
        };
        let info = self.data.get_or_register(key)?;
        let data_id = info.id;
        let read = info.current();
        let write = info.next_version();
        let lost = info.discarded;
        let access = DataAccess::ReadWrite { read, write };
        let group_predecessors = self
            .graph
            .get(group_id)
            .map(|t| t.predecessors.clone())
            .unwrap_or_default();
        if let Some(cg) = self.commutative_group_mut(group_id) {
            cg.add_access(access);
            cg.add_member(task_id);
        }
        if let Some(task) = self.graph.get_mut(task_id) {
            task.commutative_group = Some(group_id);
            task.accesses.push(ParameterAccess {
                key: key.clone(),
                access,
            });
        }
        for p in group_predecessors {
            self.graph
                .add_data_dependency(task_id, p, parameter, Some(data_id))?;
        }
        Ok(AccessOutcome {
            producer: None,
            lost,
        })
    }

    /// Creates the synthetic task standing for a new commutative group on the datum.
    /// The group takes over as the last writer, and its predecessors are the previous
    /// writer and the pending concurrent readers.
    fn open_commutative_group(
        &mut self,
        key: &DataKey,
        parameter: &Parameter,
    ) -> ExecutionResult<TaskId> {
        let group_id = self.task_ids.next()?;
        let info = self.data.get_or_register(key)?;
        let data_id = info.id;
        let predecessor = info.last_writer;
        let readers = mem::take(&mut info.concurrent_readers);
        let mut group = CommutativeGroup::new(data_id);
        group.set_group_predecessor(predecessor, Some(DataAccess::Read(info.current())));
        info.commutative_group = Some(group_id);
        info.last_writer = Some(group_id);
        debug!(
            "app {}: opening commutative group {group_id} on {key}",
            self.id
        );
        let mut task = Task::new(
            group_id,
            self.id,
            format!("commutativeGroup{data_id}"),
            TaskKind::CommutativeGroup(group),
            vec![],
            OnFailure::Ignore,
            false,
        );
        task.set_status(TaskStatus::ToExecute);
        self.graph.insert(task);
        for p in predecessor.into_iter().chain(readers) {
            if self.graph.is_pending(p) {
                self.graph
                    .add_data_dependency(group_id, p, parameter, Some(data_id))?;
            }
        }
        Ok(group_id)
    }

    fn commutative_group(&self, group: TaskId) -> Option<&CommutativeGroup> {
        match self.graph.get(group).map(|t| &t.kind) {
            Some(TaskKind::CommutativeGroup(cg)) => Some(cg),
            _ => None,
        }
    }

    fn commutative_group_mut(&mut self, group: TaskId) -> Option<&mut CommutativeGroup> {
        match self.graph.get_mut(group).map(|t| &mut t.kind) {
            Some(TaskKind::CommutativeGroup(cg)) => Some(cg),
            _ => None,
        }
    }

    /// The accesses a task performs when it executes now.
    /// A commutative member takes the access at the head of its group's queue.
    pub fn execution_accesses(&self, task_id: TaskId) -> Vec<ParameterAccess> {
        let Some(task) = self.graph.get(task_id) else {
            return vec![];
        };
        let placeholder = task
            .commutative_group
            .and_then(|g| self.commutative_group(g))
            .and_then(|cg| cg.access_placeholder().map(|a| (cg.data(), *a)));
        task.accesses
            .iter()
            .map(|a| match placeholder {
                Some((data, access)) if a.access.data() == data => ParameterAccess {
                    key: a.key.clone(),
                    access,
                },
                _ => a.clone(),
            })
            .collect()
    }

    /// Returns what the task can launch now, if anything.
    fn activate(&mut self, task_id: TaskId) -> Option<Activation> {
        let task = self.graph.get_mut(task_id)?;
        if task.status() != TaskStatus::ToExecute {
            return None;
        }
        let satisfied = task.predecessors.is_empty();
        if let TaskKind::Reduce { plan, .. } = &mut task.kind {
            let steps = plan.poll(satisfied);
            return (!steps.is_empty()).then_some(Activation::Reduce {
                task: task_id,
                steps,
            });
        }
        if task.is_commutative_group() || !satisfied {
            return None;
        }
        let Some(group) = task.commutative_group else {
            return Some(Activation::Execute(task_id));
        };
        let acquired = self
            .commutative_group_mut(group)
            .map(|cg| cg.try_acquire(task_id))
            .unwrap_or(true);
        acquired.then_some(Activation::Execute(task_id))
    }

    pub fn record_attempt(&mut self, task_id: TaskId) -> usize {
        match self.graph.get_mut(task_id) {
            Some(task) => {
                task.attempts += 1;
                task.attempts
            }
            None => 0,
        }
    }

    pub(crate) fn record_action(&mut self, task_id: TaskId, action_id: ActionId) {
        if let Some(task) = self.graph.get_mut(task_id) {
            task.actions.push(action_id);
        }
    }

    pub fn watch_task(
        &mut self,
        task_id: TaskId,
        listener: tokio::sync::oneshot::Sender<TaskStatus>,
    ) -> ExecutionResult<()> {
        if let Some(task) = self.graph.get_mut(task_id) {
            task.add_listener(listener);
            return Ok(());
        }
        match self.graph.status(task_id) {
            Some(status) => {
                let _ = listener.send(status);
                Ok(())
            }
            None => Err(ExecutionError::invalid(format!(
                "task {task_id} not found in app {}",
                self.id
            ))),
        }
    }

    /// Records the end of an intermediate fold of a reduce task.
    pub fn reduce_partial_done(&mut self, task_id: TaskId, index: usize) -> Option<Activation> {
        match self.graph.get_mut(task_id).map(|t| &mut t.kind) {
            Some(TaskKind::Reduce { plan, .. }) => plan.partial_done(index),
            _ => {
                warn!("task {task_id} is not a reduce task");
                return None;
            }
        }
        self.activate(task_id)
    }

    /// Applies the end of a task to the graph.
    ///
    /// Ends reported for tasks that already reached a terminal state are ignored.
    pub fn end_task(&mut self, task_id: TaskId, outcome: TaskOutcome) -> EndReport {
        let mut report = EndReport::default();
        if outcome == TaskOutcome::Canceled {
            self.cancel_tasks(vec![task_id], &mut report);
            return report;
        }
        let Some(task) = self.graph.get_mut(task_id) else {
            debug!("app {}: ended task {task_id} is no longer in the graph", self.id);
            return report;
        };
        if !task.is_pending() {
            debug!(
                "app {}: ignoring end of task {task_id} in state {}",
                self.id,
                task.status()
            );
            return report;
        }
        let policy = task.on_failure();
        let signature = task.signature().to_string();
        task.set_status(outcome.status());
        self.settle_task(task_id, outcome.status());
        let failed = outcome == TaskOutcome::Failed;
        let keeps_outputs = !failed || policy.keeps_outputs();
        if failed {
            if keeps_outputs {
                warn!(
                    "app {}: task {task_id} ({signature}) failed, dependents proceed with policy {policy:?}",
                    self.id
                );
            } else {
                let discarded = self.data.discard_outputs_of(task_id);
                error!(
                    "app {}: task {task_id} ({signature}) failed, discarding {} data versions",
                    self.id,
                    discarded.len()
                );
                report.errors.push(ExecutionError::TaskFailed {
                    task_id,
                    message: format!("{signature} failed with policy {policy:?}"),
                });
            }
        }
        self.leave_groups(task_id, failed);
        self.leave_commutative_group(task_id, keeps_outputs, &mut report);
        if !keeps_outputs || (failed && policy == OnFailure::CancelSuccessors) {
            let successors = self
                .graph
                .get(task_id)
                .map(|t| t.successors.clone())
                .unwrap_or_default();
            self.cancel_tasks(successors, &mut report);
        } else {
            self.release_dependents(task_id, &mut report);
        }
        report
    }

    fn release_dependents(&mut self, task_id: TaskId, report: &mut EndReport) {
        let successors = self
            .graph
            .get(task_id)
            .map(|t| t.successors.clone())
            .unwrap_or_default();
        let mut reductions = vec![];
        for s in successors {
            let Some(TaskKind::Reduce { plan, .. }) = self.graph.get_mut(s).map(|t| &mut t.kind)
            else {
                continue;
            };
            plan.producer_done(task_id);
            self.graph.release_reduction_dependency(s, task_id);
            reductions.push(s);
        }
        let free = self.graph.release_data_dependents(task_id);
        for s in free.into_iter().chain(reductions) {
            if let Some(activation) = self.activate(s) {
                report.activations.push(activation);
            }
        }
    }

    /// Takes the member out of its commutative group and hands the turn to the next member.
    /// The group completes once its last member has left.
    fn leave_commutative_group(&mut self, task_id: TaskId, updated: bool, report: &mut EndReport) {
        let Some(group) = self.graph.get(task_id).and_then(|t| t.commutative_group) else {
            return;
        };
        let Some(cg) = self.commutative_group_mut(group) else {
            return;
        };
        cg.next_access();
        if !updated {
            cg.mark_lost();
        }
        let next = cg.release(task_id);
        let empty = cg.remove_member(task_id);
        let lost = cg.is_lost();
        let data = cg.data();
        if let Some(next) = next {
            if let Some(activation) = self.activate(next) {
                report.activations.push(activation);
            }
        }
        if !empty {
            return;
        }
        if let Some(info) = self.data.get_mut(data) {
            if info.commutative_group == Some(group) {
                info.commutative_group = None;
            }
        }
        if lost {
            self.cancel_tasks(vec![group], report);
        } else if let Some(task) = self.graph.get_mut(group) {
            debug!("app {}: commutative group {group} completed", self.id);
            task.set_status(TaskStatus::Finished);
            self.settle_task(group, TaskStatus::Finished);
            self.release_dependents(group, report);
        }
    }

    /// Cancels the tasks and everything that depends on them.
    fn cancel_tasks(&mut self, tasks: Vec<TaskId>, report: &mut EndReport) {
        let mut stack = tasks;
        while let Some(task_id) = stack.pop() {
            let Some(task) = self.graph.get_mut(task_id) else {
                continue;
            };
            if !task.set_status(TaskStatus::Canceled) {
                continue;
            }
            let group_data = match &task.kind {
                TaskKind::CommutativeGroup(cg) => Some(cg.data()),
                _ => None,
            };
            debug!("app {}: canceling task {task_id}", self.id);
            if !task.is_commutative_group() {
                report.canceled.push(task_id);
            }
            if let Some(info) = group_data.and_then(|d| self.data.get_mut(d)) {
                if info.commutative_group == Some(task_id) {
                    info.commutative_group = None;
                }
            }
            self.settle_task(task_id, TaskStatus::Canceled);
            self.data.discard_outputs_of(task_id);
            self.leave_groups(task_id, false);
            self.leave_commutative_group(task_id, false, report);
            self.graph.detach_predecessors(task_id);
            let successors = self
                .graph
                .get_mut(task_id)
                .map(|t| mem::take(&mut t.successors))
                .unwrap_or_default();
            for s in successors {
                if let Some(successor) = self.graph.get_mut(s) {
                    successor.predecessors.retain(|x| *x != task_id);
                }
                stack.push(s);
            }
        }
    }

    /// Cancels every pending task of the application.
    pub fn cancel_pending_tasks(&mut self) -> EndReport {
        let mut pending: Vec<TaskId> = self
            .graph
            .tasks()
            .filter(|t| t.is_pending() && !t.is_commutative_group())
            .map(|t| t.id())
            .collect();
        pending.sort();
        pending.reverse();
        let mut report = EndReport::default();
        self.cancel_tasks(pending, &mut report);
        report
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "tests use unwrap for brevity")]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::id::{AppId, AtomicIdGenerator, CoreId};
    use crate::task::{Barrier, ReducePlan};

    struct Fixture {
        app: Application,
        ids: Arc<AtomicIdGenerator<TaskId>>,
    }

    impl Fixture {
        fn new() -> Self {
            let ids = Arc::new(AtomicIdGenerator::new());
            Self {
                app: Application::new(AppId::from(1), ids.clone(), None),
                ids,
            }
        }

        fn submit(&mut self, parameters: Vec<Parameter>, on_failure: OnFailure) -> (TaskId, EndReport) {
            let id = self.ids.next().unwrap();
            let task = Task::new(
                id,
                self.app.id(),
                "method",
                TaskKind::Method {
                    core: CoreId::from(0),
                },
                parameters,
                on_failure,
                false,
            );
            let report = self.app.analyse_task(task).unwrap();
            (id, report)
        }

        fn submit_reduce(&mut self, parameters: Vec<Parameter>) -> (TaskId, EndReport) {
            let id = self.ids.next().unwrap();
            let plan = ReducePlan::try_new(id, &parameters, 2, 0).unwrap();
            let task = Task::new(
                id,
                self.app.id(),
                "reduce",
                TaskKind::Reduce {
                    core: CoreId::from(0),
                    plan,
                },
                parameters,
                OnFailure::default(),
                false,
            );
            let report = self.app.analyse_task(task).unwrap();
            (id, report)
        }

        fn status(&self, id: TaskId) -> TaskStatus {
            self.app.task_status(id).unwrap()
        }
    }

    fn executed(report: &EndReport) -> Vec<TaskId> {
        report
            .activations
            .iter()
            .filter_map(|a| match a {
                Activation::Execute(id) => Some(*id),
                Activation::Reduce { .. } => None,
            })
            .collect()
    }

    fn obj(hash: u64, direction: Direction) -> Parameter {
        Parameter::object("x", hash, direction)
    }

    #[test]
    fn test_read_after_write_dependency() {
        let mut f = Fixture::new();
        let (a, report) = f.submit(vec![obj(1, Direction::Out)], OnFailure::Fail);
        assert_eq!(executed(&report), vec![a]);
        let (b, report) = f.submit(vec![obj(1, Direction::In)], OnFailure::Fail);
        assert!(report.activations.is_empty());
        assert_eq!(f.app.task(b).unwrap().predecessors(), &[a]);
        assert_eq!(
            f.app.task(b).unwrap().accesses()[0].access,
            DataAccess::Read(f.app.task(a).unwrap().accesses()[0].access.write_version().unwrap())
        );
        let report = f.app.end_task(a, TaskOutcome::Finished);
        assert_eq!(executed(&report), vec![b]);
        assert_eq!(f.status(a), TaskStatus::Finished);
    }

    #[test]
    fn test_independent_readers_run_together() {
        let mut f = Fixture::new();
        let (a, _) = f.submit(vec![obj(1, Direction::Out)], OnFailure::Fail);
        let (b, _) = f.submit(vec![obj(1, Direction::In)], OnFailure::Fail);
        let (c, _) = f.submit(vec![obj(1, Direction::In)], OnFailure::Fail);
        let mut released = executed(&f.app.end_task(a, TaskOutcome::Finished));
        released.sort();
        assert_eq!(released, vec![b, c]);
    }

    #[test]
    fn test_writer_waits_for_concurrent_readers() {
        let mut f = Fixture::new();
        let (r1, _) = f.submit(vec![obj(1, Direction::Concurrent)], OnFailure::Fail);
        let (r2, _) = f.submit(vec![obj(1, Direction::Concurrent)], OnFailure::Fail);
        let (w, report) = f.submit(vec![obj(1, Direction::Out)], OnFailure::Fail);
        assert!(report.activations.is_empty());
        assert!(f.app.end_task(r1, TaskOutcome::Finished).activations.is_empty());
        assert_eq!(executed(&f.app.end_task(r2, TaskOutcome::Finished)), vec![w]);
    }

    #[test]
    fn test_failed_task_cancels_dependents_transitively() {
        let mut f = Fixture::new();
        let (a, _) = f.submit(vec![obj(1, Direction::Out)], OnFailure::Fail);
        let (b, _) = f.submit(vec![obj(1, Direction::In), obj(2, Direction::Out)], OnFailure::Fail);
        let (c, _) = f.submit(vec![obj(2, Direction::In)], OnFailure::Fail);
        let (d, _) = f.submit(vec![obj(3, Direction::Out)], OnFailure::Fail);
        let report = f.app.end_task(a, TaskOutcome::Failed);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], ExecutionError::TaskFailed { task_id, .. } if task_id == a));
        assert_eq!(f.status(a), TaskStatus::Failed);
        assert_eq!(f.status(b), TaskStatus::Canceled);
        assert_eq!(f.status(c), TaskStatus::Canceled);
        assert_eq!(f.status(d), TaskStatus::ToExecute);
        // A late reader of the lost datum is canceled at submission.
        let (e, report) = f.submit(vec![obj(1, Direction::In)], OnFailure::Fail);
        assert_eq!(report.canceled, vec![e]);
        // A late completion of a canceled task is ignored.
        assert!(f.app.end_task(b, TaskOutcome::Finished).is_empty());
        assert_eq!(f.status(b), TaskStatus::Canceled);
    }

    #[test]
    fn test_ignore_policy_releases_dependents() {
        let mut f = Fixture::new();
        let (a, _) = f.submit(vec![obj(1, Direction::Out)], OnFailure::Ignore);
        let (b, _) = f.submit(vec![obj(1, Direction::In)], OnFailure::Fail);
        let report = f.app.end_task(a, TaskOutcome::Failed);
        assert!(report.errors.is_empty());
        assert_eq!(executed(&report), vec![b]);
    }

    #[test]
    fn test_cancel_successors_policy() {
        let mut f = Fixture::new();
        let (a, _) = f.submit(vec![obj(1, Direction::Out)], OnFailure::CancelSuccessors);
        let (b, _) = f.submit(vec![obj(1, Direction::In)], OnFailure::Fail);
        let report = f.app.end_task(a, TaskOutcome::Failed);
        assert!(report.errors.is_empty());
        assert_eq!(report.canceled, vec![b]);
        // The output is still expected, so later readers run.
        let (c, report) = f.submit(vec![obj(1, Direction::In)], OnFailure::Fail);
        assert_eq!(executed(&report), vec![c]);
    }

    #[test]
    fn test_commutative_members_run_one_at_a_time() {
        let mut f = Fixture::new();
        let (w, _) = f.submit(vec![obj(1, Direction::Out)], OnFailure::Fail);
        let (m1, r1) = f.submit(vec![obj(1, Direction::Commutative)], OnFailure::Fail);
        let (m2, r2) = f.submit(vec![obj(1, Direction::Commutative)], OnFailure::Fail);
        let (reader, _) = f.submit(vec![obj(1, Direction::In)], OnFailure::Fail);
        assert!(r1.activations.is_empty() && r2.activations.is_empty());
        let group = f.app.task(m1).unwrap().commutative_group.unwrap();
        assert_eq!(f.app.task(m2).unwrap().commutative_group, Some(group));
        assert_eq!(f.app.task(reader).unwrap().predecessors(), &[group]);

        let released = executed(&f.app.end_task(w, TaskOutcome::Finished));
        assert_eq!(released.len(), 1);
        let first = released[0];
        let second = if first == m1 { m2 } else { m1 };
        let placeholder = f.app.execution_accesses(first)[0].access;
        assert_eq!(
            placeholder,
            f.app.task(m1).unwrap().accesses()[0].access
        );

        assert_eq!(executed(&f.app.end_task(first, TaskOutcome::Finished)), vec![second]);
        assert_eq!(
            f.app.execution_accesses(second)[0].access,
            f.app.task(m2).unwrap().accesses()[0].access
        );
        assert_eq!(f.status(group), TaskStatus::ToExecute);
        assert_eq!(executed(&f.app.end_task(second, TaskOutcome::Finished)), vec![reader]);
        assert_eq!(f.status(group), TaskStatus::Finished);
        assert!(f.app.data().lookup(&DataKey::Object(1)).unwrap().commutative_group.is_none());
    }

    #[test]
    fn test_plain_access_closes_commutative_group() {
        let mut f = Fixture::new();
        let (m1, _) = f.submit(vec![obj(1, Direction::Commutative)], OnFailure::Fail);
        let (_, _) = f.submit(vec![obj(1, Direction::In)], OnFailure::Fail);
        let (m2, _) = f.submit(vec![obj(1, Direction::Commutative)], OnFailure::Fail);
        let g1 = f.app.task(m1).unwrap().commutative_group.unwrap();
        let g2 = f.app.task(m2).unwrap().commutative_group.unwrap();
        assert_ne!(g1, g2);
    }

    #[test]
    fn test_reduce_consumes_elements_as_they_arrive() {
        let mut f = Fixture::new();
        let mut producers = vec![];
        for i in 0..4 {
            let (p, _) = f.submit(vec![obj(i, Direction::Out)], OnFailure::Fail);
            producers.push(p);
        }
        let elements = (0..4).map(|i| obj(i, Direction::In)).collect();
        let (r, report) = f.submit_reduce(vec![
            Parameter::collection("c", "values", Direction::In, elements),
            obj(100, Direction::Out),
        ]);
        assert!(report.activations.is_empty());
        assert!(f.app.end_task(producers[0], TaskOutcome::Finished).activations.is_empty());
        let report = f.app.end_task(producers[1], TaskOutcome::Finished);
        let Activation::Reduce { task, steps } = &report.activations[0] else {
            panic!("expected a reduction");
        };
        assert_eq!(*task, r);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].index, Some(0));
        f.app.end_task(producers[2], TaskOutcome::Finished);
        f.app.end_task(producers[3], TaskOutcome::Finished);
        assert!(f.app.task(r).unwrap().predecessors().is_empty());
        assert!(f.app.reduce_partial_done(r, 0).is_none());
        let Some(Activation::Reduce { steps, .. }) = f.app.reduce_partial_done(r, 1) else {
            panic!("expected the final fold");
        };
        assert!(steps[0].is_final());
        f.app.end_task(r, TaskOutcome::Finished);
        assert_eq!(f.status(r), TaskStatus::Finished);
    }

    #[test]
    fn test_barrier_released_when_tasks_end() {
        let mut f = Fixture::new();
        let (a, _) = f.submit(vec![obj(1, Direction::Out)], OnFailure::Ignore);
        let (barrier, mut waiter) = Barrier::new();
        f.app.reaches_barrier(barrier);
        assert!(waiter.try_recv().is_err());
        f.app.end_task(a, TaskOutcome::Failed);
        let report = waiter.try_recv().unwrap();
        assert_eq!(report.failed_tasks, vec![a]);
    }

    #[test]
    fn test_user_group_barrier() {
        let mut f = Fixture::new();
        f.app.stack_task_group("g").unwrap();
        let (a, _) = f.submit(vec![obj(1, Direction::Out)], OnFailure::Fail);
        assert_eq!(
            f.app.task(a).unwrap().groups(),
            &["App1".to_string(), "g".to_string()]
        );
        let (barrier, mut waiter) = Barrier::new();
        f.app.reaches_group_barrier(Some("g"), barrier);
        f.app.end_task(a, TaskOutcome::Finished);
        // The group is still open.
        assert!(waiter.try_recv().is_err());
        assert!(f.app.stack_task_group("g").is_err());
        assert_eq!(f.app.pop_group().as_deref(), Some("g"));
        assert!(waiter.try_recv().is_ok());
        assert!(f.app.group("g").is_none());
        assert!(f.app.pop_group().is_none());
    }

    #[test]
    fn test_draining_group_name_can_be_reused() {
        let mut f = Fixture::new();
        f.app.stack_task_group("g").unwrap();
        let (a, _) = f.submit(vec![obj(1, Direction::Out)], OnFailure::Fail);
        assert_eq!(f.app.pop_group().as_deref(), Some("g"));
        let (old, mut old_waiter) = Barrier::new();
        f.app.reaches_group_barrier(Some("g"), old);

        f.app.stack_task_group("g").unwrap();
        let (b, _) = f.submit(vec![obj(2, Direction::Out)], OnFailure::Fail);
        assert_eq!(
            f.app.task(b).unwrap().groups(),
            &["App1".to_string(), "g".to_string()]
        );
        assert_ne!(f.app.task(a).unwrap().groups()[1], "g");
        let (new, mut new_waiter) = Barrier::new();
        f.app.reaches_group_barrier(Some("g"), new);

        f.app.end_task(a, TaskOutcome::Finished);
        assert_eq!(old_waiter.try_recv().unwrap().group, "g");
        assert!(new_waiter.try_recv().is_err());
        assert!(f.app.group("g").is_some());

        f.app.pop_group();
        f.app.end_task(b, TaskOutcome::Finished);
        assert!(new_waiter.try_recv().is_ok());
        assert!(f.app.group("g").is_none());
    }

    #[test]
    fn test_cancel_pending_tasks() {
        let mut f = Fixture::new();
        let (a, _) = f.submit(vec![obj(1, Direction::Out)], OnFailure::Fail);
        let (b, _) = f.submit(vec![obj(1, Direction::In)], OnFailure::Fail);
        f.app.end_task(a, TaskOutcome::Finished);
        let (c, _) = f.submit(vec![obj(2, Direction::InOut)], OnFailure::Fail);
        let mut canceled = f.app.cancel_pending_tasks().canceled;
        canceled.sort();
        assert_eq!(canceled, vec![b, c]);
        let summary = f.app.task_summary();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.canceled, 2);
        assert_eq!(summary.in_progress, 0);
    }

    #[test]
    fn test_ended_tasks_leave_the_graph() {
        let mut f = Fixture::new();
        let (a, _) = f.submit(vec![obj(1, Direction::Out)], OnFailure::Fail);
        let (b, _) = f.submit(vec![obj(1, Direction::In)], OnFailure::Fail);
        let (c, _) = f.submit(vec![obj(1, Direction::InOut)], OnFailure::Fail);
        assert_eq!(f.app.graph().len(), 3);
        assert_eq!(f.app.pending_counts(1), vec![2]);

        f.app.end_task(a, TaskOutcome::Finished);
        assert_eq!(f.app.retire_settled(), 1);
        assert_eq!(f.app.graph().len(), 2);
        assert!(f.app.task(a).is_none());
        assert_eq!(f.status(a), TaskStatus::Finished);
        assert_eq!(f.app.pending_counts(1), vec![0]);
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        f.app.watch_task(a, tx).unwrap();
        assert_eq!(rx.try_recv().unwrap(), TaskStatus::Finished);

        // A reader of the retired producer's output has nothing to wait for.
        let (d, report) = f.submit(vec![obj(1, Direction::In)], OnFailure::Fail);
        assert!(report.activations.is_empty());
        assert_eq!(f.app.task(d).unwrap().predecessors(), &[c]);

        f.app.end_task(b, TaskOutcome::Finished);
        f.app.end_task(c, TaskOutcome::Failed);
        f.app.retire_settled();
        assert!(f.app.graph().is_empty());
        assert_eq!(f.app.pending_counts(1), vec![0]);
        let summary = f.app.task_summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.canceled, 1);
        assert_eq!(summary.in_progress, 0);
        assert!(f.app.end_task(d, TaskOutcome::Finished).is_empty());
    }

    #[test]
    fn test_commutative_group_leaves_the_graph_with_its_members() {
        let mut f = Fixture::new();
        let (m1, _) = f.submit(vec![obj(1, Direction::Commutative)], OnFailure::Fail);
        let (m2, _) = f.submit(vec![obj(1, Direction::Commutative)], OnFailure::Fail);
        assert_eq!(f.app.graph().len(), 3);
        f.app.end_task(m1, TaskOutcome::Finished);
        f.app.end_task(m2, TaskOutcome::Finished);
        f.app.retire_settled();
        assert!(f.app.graph().is_empty());
        let summary = f.app.task_summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.completed, 2);
        // A new commutative access opens a fresh group.
        let (m3, report) = f.submit(vec![obj(1, Direction::Commutative)], OnFailure::Fail);
        assert_eq!(executed(&report), vec![m3]);
    }
}
