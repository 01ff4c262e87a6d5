mod commutative;
mod graph;
mod group;
mod parameter;
mod reduce;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tokio::sync::oneshot;

pub use commutative::CommutativeGroup;
pub use graph::TaskGraph;
pub use group::{Barrier, BarrierReport, BarrierWaiter, TaskGroup};
pub use parameter::{DataKey, Direction, Parameter, ParameterKind};
pub use reduce::{count_operations, ReducePlan, ReduceStep};

use crate::data::DataAccess;
use crate::error::ExecutionError;
use crate::id::{ActionId, AppId, CoreId, TaskId};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    ToAnalyse,
    ToExecute,
    Finished,
    Canceled,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Canceled | TaskStatus::Failed
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::ToAnalyse => "TO_ANALYSE",
            TaskStatus::ToExecute => "TO_EXECUTE",
            TaskStatus::Finished => "FINISHED",
            TaskStatus::Canceled => "CANCELED",
            TaskStatus::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// What happens to a task and its dependents when one of its executions fails.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnFailure {
    #[default]
    Retry,
    Fail,
    Ignore,
    CancelSuccessors,
}

impl OnFailure {
    /// Whether the outputs of a failed task are still expected by its readers.
    pub fn keeps_outputs(&self) -> bool {
        matches!(self, OnFailure::Ignore | OnFailure::CancelSuccessors)
    }
}

impl FromStr for OnFailure {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RETRY" => Ok(OnFailure::Retry),
            "FAIL" => Ok(OnFailure::Fail),
            "IGNORE" => Ok(OnFailure::Ignore),
            "CANCEL_SUCCESSORS" => Ok(OnFailure::CancelSuccessors),
            _ => Err(ExecutionError::configuration(format!(
                "unknown failure policy: {s}"
            ))),
        }
    }
}

#[derive(Debug)]
pub enum TaskKind {
    Method { core: CoreId },
    Reduce { core: CoreId, plan: ReducePlan },
    CommutativeGroup(CommutativeGroup),
}

/// The data access a task performs through one of its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterAccess {
    pub key: DataKey,
    pub access: DataAccess,
}

#[derive(Debug)]
pub struct Task {
    id: TaskId,
    app: AppId,
    signature: String,
    pub(crate) kind: TaskKind,
    status: TaskStatus,
    on_failure: OnFailure,
    priority: bool,
    parameters: Vec<Parameter>,
    pub(crate) accesses: Vec<ParameterAccess>,
    pub(crate) predecessors: Vec<TaskId>,
    pub(crate) successors: Vec<TaskId>,
    /// The parameter through which each predecessor feeds this task.
    pub(crate) dependency_parameters: HashMap<TaskId, Parameter>,
    pub(crate) stream_producers: Vec<TaskId>,
    pub(crate) stream_consumers: Vec<TaskId>,
    pub(crate) actions: Vec<ActionId>,
    listeners: Vec<oneshot::Sender<TaskStatus>>,
    pub(crate) groups: Vec<String>,
    /// The commutative group this task is a member of.
    pub(crate) commutative_group: Option<TaskId>,
    pub(crate) attempts: usize,
}

impl Task {
    pub fn new(
        id: TaskId,
        app: AppId,
        signature: impl Into<String>,
        kind: TaskKind,
        parameters: Vec<Parameter>,
        on_failure: OnFailure,
        priority: bool,
    ) -> Self {
        Self {
            id,
            app,
            signature: signature.into(),
            kind,
            status: TaskStatus::ToAnalyse,
            on_failure,
            priority,
            parameters,
            accesses: vec![],
            predecessors: vec![],
            successors: vec![],
            dependency_parameters: HashMap::new(),
            stream_producers: vec![],
            stream_consumers: vec![],
            actions: vec![],
            listeners: vec![],
            groups: vec![],
            commutative_group: None,
            attempts: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn app(&self) -> AppId {
        self.app
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn on_failure(&self) -> OnFailure {
        self.on_failure
    }

    pub fn has_priority(&self) -> bool {
        self.priority
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn accesses(&self) -> &[ParameterAccess] {
        &self.accesses
    }

    pub fn predecessors(&self) -> &[TaskId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[TaskId] {
        &self.successors
    }

    pub fn dependency_parameter(&self, predecessor: TaskId) -> Option<&Parameter> {
        self.dependency_parameters.get(&predecessor)
    }

    pub fn stream_producers(&self) -> &[TaskId] {
        &self.stream_producers
    }

    pub fn stream_consumers(&self) -> &[TaskId] {
        &self.stream_consumers
    }

    pub fn actions(&self) -> &[ActionId] {
        &self.actions
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn core(&self) -> Option<CoreId> {
        match &self.kind {
            TaskKind::Method { core } | TaskKind::Reduce { core, .. } => Some(*core),
            TaskKind::CommutativeGroup(_) => None,
        }
    }

    pub fn is_reduce(&self) -> bool {
        matches!(self.kind, TaskKind::Reduce { .. })
    }

    pub fn is_commutative_group(&self) -> bool {
        matches!(self.kind, TaskKind::CommutativeGroup(_))
    }

    pub fn is_pending(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_free(&self) -> bool {
        self.status == TaskStatus::ToExecute && self.predecessors.is_empty()
    }

    pub fn add_listener(&mut self, listener: oneshot::Sender<TaskStatus>) {
        if self.status.is_terminal() {
            let _ = listener.send(self.status);
        } else {
            self.listeners.push(listener);
        }
    }

    /// Moves the task to a new status.
    /// Terminal states are final: once finished, failed or canceled, the task never
    /// transitions again and the call returns `false`.
    pub fn set_status(&mut self, status: TaskStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        if status.is_terminal() {
            for listener in self.listeners.drain(..) {
                let _ = listener.send(status);
            }
        }
        true
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "tests use unwrap for brevity")]
mod tests {
    use super::*;

    fn task(id: u64) -> Task {
        Task::new(
            TaskId::from(id),
            AppId::from(1),
            "m",
            TaskKind::Method {
                core: CoreId::from(0),
            },
            vec![],
            OnFailure::default(),
            false,
        )
    }

    #[test]
    fn test_canceled_task_never_transitions() {
        let mut t = task(1);
        assert_eq!(t.status(), TaskStatus::ToAnalyse);
        assert!(t.set_status(TaskStatus::ToExecute));
        assert!(t.set_status(TaskStatus::Canceled));
        assert!(!t.set_status(TaskStatus::Finished));
        assert!(!t.set_status(TaskStatus::Failed));
        assert_eq!(t.status(), TaskStatus::Canceled);
        assert!(!t.is_pending());
    }

    #[test]
    fn test_listeners_notified_on_terminal_status() {
        let mut t = task(1);
        let (tx, mut rx) = oneshot::channel();
        t.add_listener(tx);
        t.set_status(TaskStatus::ToExecute);
        assert!(rx.try_recv().is_err());
        t.set_status(TaskStatus::Finished);
        assert_eq!(rx.try_recv().unwrap(), TaskStatus::Finished);
        let (tx, mut rx) = oneshot::channel();
        t.add_listener(tx);
        assert_eq!(rx.try_recv().unwrap(), TaskStatus::Finished);
    }

    #[test]
    fn test_on_failure_from_str() {
        assert_eq!(
            "cancel_successors".parse::<OnFailure>().unwrap(),
            OnFailure::CancelSuccessors
        );
        assert!("explode".parse::<OnFailure>().is_err());
        assert!(OnFailure::Ignore.keeps_outputs());
        assert!(!OnFailure::Fail.keeps_outputs());
    }
}
