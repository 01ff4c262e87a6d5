use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::{AppId, DataId, TaskId};
use crate::task::{Parameter, Task, TaskStatus};
use crate::trace::DependencyTracer;

/// The tasks of one application and the edges between them.
///
/// Tasks refer to each other by ID only, and every edge is stored on both ends:
/// `A -> B` means `A` is in the predecessors of `B` and `B` is in the successors of `A`.
///
/// Ended tasks without successors are retired: only their final status is kept.
pub struct TaskGraph {
    app: AppId,
    tasks: HashMap<TaskId, Task>,
    retired: HashMap<TaskId, TaskStatus>,
    tracer: Option<Arc<dyn DependencyTracer>>,
}

impl TaskGraph {
    pub fn new(app: AppId, tracer: Option<Arc<dyn DependencyTracer>>) -> Self {
        Self {
            app,
            tasks: HashMap::new(),
            retired: HashMap::new(),
            tracer,
        }
    }

    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.id(), task);
    }

    pub fn get(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.get(&task_id)
    }

    pub fn get_mut(&mut self, task_id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&task_id)
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.tasks.contains_key(&task_id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_pending(&self, task_id: TaskId) -> bool {
        self.tasks.get(&task_id).is_some_and(|t| t.is_pending())
    }

    /// The status of a live or retired task.
    pub fn status(&self, task_id: TaskId) -> Option<TaskStatus> {
        match self.tasks.get(&task_id) {
            Some(task) => Some(task.status()),
            None => self.retired.get(&task_id).copied(),
        }
    }

    /// Drops an ended task that no other task points to.
    /// Returns `false` if the task is still pending or has successors.
    pub fn retire(&mut self, task_id: TaskId) -> bool {
        let retirable = self
            .tasks
            .get(&task_id)
            .is_some_and(|t| t.status().is_terminal() && t.successors.is_empty());
        if !retirable {
            return false;
        }
        if let Some(task) = self.tasks.remove(&task_id) {
            self.retired.insert(task_id, task.status());
        }
        true
    }

    fn task_mut(&mut self, task_id: TaskId) -> ExecutionResult<&mut Task> {
        self.tasks
            .get_mut(&task_id)
            .ok_or_else(|| ExecutionError::internal(format!("task {task_id} not found")))
    }

    /// Records that `consumer` reads data produced by `producer` through `parameter`.
    pub fn add_data_dependency(
        &mut self,
        consumer: TaskId,
        producer: TaskId,
        parameter: &Parameter,
        data: Option<DataId>,
    ) -> ExecutionResult<()> {
        if consumer == producer {
            return Ok(());
        }
        let p = self.task_mut(producer)?;
        if !p.successors.contains(&consumer) {
            p.successors.push(consumer);
        }
        let c = self.task_mut(consumer)?;
        if !c.predecessors.contains(&producer) {
            c.predecessors.push(producer);
        }
        c.dependency_parameters
            .entry(producer)
            .or_insert_with(|| parameter.clone());
        if let Some(tracer) = &self.tracer {
            tracer.record_edge(self.app, producer, consumer, data);
        }
        Ok(())
    }

    /// Records a stream edge. Stream edges never block the consumer.
    pub fn add_stream_dependency(
        &mut self,
        consumer: TaskId,
        producer: TaskId,
    ) -> ExecutionResult<()> {
        if consumer == producer {
            return Ok(());
        }
        let p = self.task_mut(producer)?;
        if !p.stream_consumers.contains(&consumer) {
            p.stream_consumers.push(consumer);
        }
        let c = self.task_mut(consumer)?;
        if !c.stream_producers.contains(&producer) {
            c.stream_producers.push(producer);
        }
        Ok(())
    }

    /// Removes the task from the predecessors of every successor, except reduce tasks
    /// which keep their edges until the reduction releases them explicitly.
    /// Returns the successors that have no predecessor left.
    pub fn release_data_dependents(&mut self, task_id: TaskId) -> Vec<TaskId> {
        let Some(task) = self.tasks.get_mut(&task_id) else {
            return vec![];
        };
        let successors = std::mem::take(&mut task.successors);
        let mut kept = vec![];
        let mut free = vec![];
        for successor in successors {
            let Some(s) = self.tasks.get_mut(&successor) else {
                continue;
            };
            if s.is_reduce() {
                kept.push(successor);
                continue;
            }
            s.predecessors.retain(|x| *x != task_id);
            if s.is_free() {
                free.push(successor);
            }
        }
        if let Some(task) = self.tasks.get_mut(&task_id) {
            task.successors = kept;
        }
        free
    }

    /// Removes the edge from `producer` into the reduce task `reduce`.
    /// Returns whether the edge existed.
    pub fn release_reduction_dependency(&mut self, reduce: TaskId, producer: TaskId) -> bool {
        let mut existed = false;
        if let Some(r) = self.tasks.get_mut(&reduce) {
            let before = r.predecessors.len();
            r.predecessors.retain(|x| *x != producer);
            existed = r.predecessors.len() != before;
        }
        if let Some(p) = self.tasks.get_mut(&producer) {
            p.successors.retain(|x| *x != reduce);
        }
        existed
    }

    /// Removes every edge into the task, for tasks that will never execute.
    pub fn detach_predecessors(&mut self, task_id: TaskId) {
        let Some(task) = self.tasks.get_mut(&task_id) else {
            return;
        };
        let predecessors = std::mem::take(&mut task.predecessors);
        for p in predecessors {
            if let Some(p) = self.tasks.get_mut(&p) {
                p.successors.retain(|x| *x != task_id);
            }
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "tests use unwrap for brevity")]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::id::CoreId;
    use crate::task::{Direction, OnFailure, ReducePlan, TaskKind, TaskStatus};

    #[derive(Default)]
    struct RecordingTracer {
        edges: Mutex<Vec<(TaskId, TaskId)>>,
    }

    impl DependencyTracer for RecordingTracer {
        fn record_edge(&self, _: AppId, producer: TaskId, consumer: TaskId, _: Option<DataId>) {
            self.edges.lock().unwrap().push((producer, consumer));
        }
    }

    fn method(id: u64) -> Task {
        let mut task = Task::new(
            TaskId::from(id),
            AppId::from(1),
            "m",
            TaskKind::Method {
                core: CoreId::from(0),
            },
            vec![],
            OnFailure::default(),
            false,
        );
        task.set_status(TaskStatus::ToExecute);
        task
    }

    fn reduce(id: u64) -> Task {
        let parameters = vec![
            Parameter::collection("c", "c", Direction::In, vec![]),
            Parameter::object("r", 1, Direction::Out),
        ];
        let plan = ReducePlan::try_new(TaskId::from(id), &parameters, 2, 0).unwrap();
        let mut task = Task::new(
            TaskId::from(id),
            AppId::from(1),
            "r",
            TaskKind::Reduce {
                core: CoreId::from(0),
                plan,
            },
            parameters,
            OnFailure::default(),
            false,
        );
        task.set_status(TaskStatus::ToExecute);
        task
    }

    fn param() -> Parameter {
        Parameter::object("x", 1, Direction::In)
    }

    #[test]
    fn test_edges_are_consistent() {
        let tracer = Arc::new(RecordingTracer::default());
        let mut graph = TaskGraph::new(AppId::from(1), Some(tracer.clone()));
        for id in 1..=3 {
            graph.insert(method(id));
        }
        let (a, b, c) = (TaskId::from(1), TaskId::from(2), TaskId::from(3));
        graph.add_data_dependency(b, a, &param(), None).unwrap();
        graph.add_data_dependency(c, a, &param(), None).unwrap();
        graph.add_data_dependency(c, b, &param(), None).unwrap();
        assert_eq!(graph.get(b).unwrap().predecessors(), &[a]);
        assert_eq!(graph.get(a).unwrap().successors(), &[b, c]);
        assert_eq!(graph.get(c).unwrap().dependency_parameter(a), Some(&param()));
        assert_eq!(tracer.edges.lock().unwrap().len(), 3);

        let free = graph.release_data_dependents(a);
        assert_eq!(free, vec![b]);
        assert!(graph.get(a).unwrap().successors().is_empty());
        assert_eq!(graph.get(c).unwrap().predecessors(), &[b]);
        assert_eq!(graph.release_data_dependents(b), vec![c]);
    }

    #[test]
    fn test_reduce_edges_are_preserved() {
        let mut graph = TaskGraph::new(AppId::from(1), None);
        graph.insert(method(1));
        graph.insert(reduce(2));
        graph.insert(method(3));
        let (a, r, m) = (TaskId::from(1), TaskId::from(2), TaskId::from(3));
        graph.add_data_dependency(r, a, &param(), None).unwrap();
        graph.add_data_dependency(m, a, &param(), None).unwrap();
        assert_eq!(graph.release_data_dependents(a), vec![m]);
        assert_eq!(graph.get(r).unwrap().predecessors(), &[a]);
        assert_eq!(graph.get(a).unwrap().successors(), &[r]);
        assert!(graph.release_reduction_dependency(r, a));
        assert!(graph.get(r).unwrap().predecessors().is_empty());
        assert!(graph.get(a).unwrap().successors().is_empty());
        assert!(!graph.release_reduction_dependency(r, a));
    }

    #[test]
    fn test_only_ended_tasks_without_successors_retire() {
        let mut graph = TaskGraph::new(AppId::from(1), None);
        graph.insert(method(1));
        graph.insert(method(2));
        let (a, b) = (TaskId::from(1), TaskId::from(2));
        graph.add_data_dependency(b, a, &param(), None).unwrap();
        assert!(!graph.retire(a));
        graph.get_mut(a).unwrap().set_status(TaskStatus::Finished);
        // Still referenced by its successor.
        assert!(!graph.retire(a));
        graph.release_data_dependents(a);
        assert!(graph.retire(a));
        assert_eq!(graph.len(), 1);
        assert!(graph.get(a).is_none());
        assert_eq!(graph.status(a), Some(TaskStatus::Finished));
        assert!(!graph.is_pending(a));
        assert_eq!(graph.status(b), Some(TaskStatus::ToExecute));
        assert_eq!(graph.status(TaskId::from(9)), None);
    }

    #[test]
    fn test_stream_edges_do_not_block() {
        let mut graph = TaskGraph::new(AppId::from(1), None);
        graph.insert(method(1));
        graph.insert(method(2));
        let (a, b) = (TaskId::from(1), TaskId::from(2));
        graph.add_stream_dependency(b, a).unwrap();
        assert!(graph.get(b).unwrap().is_free());
        assert_eq!(graph.get(b).unwrap().stream_producers(), &[a]);
        assert_eq!(graph.get(a).unwrap().stream_consumers(), &[b]);
    }
}
