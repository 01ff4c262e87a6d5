use serde::Serialize;
use tokio::time::Instant;

use crate::data::DataVersion;
use crate::id::{ActionId, AppId, CoreId, ImplId, TaskId, WorkerId};
use crate::task::Parameter;

/// What an action does for its task.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Execute,
    ReducePartial { index: usize },
    ReduceFinal,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
    /// No worker is able to run the action.
    NoResource,
    /// The action waits on a worker for resources to be freed.
    Blocked,
    Running,
}

/// One execution attempt of a task on one implementation.
#[derive(Debug, Clone)]
pub struct Action {
    pub id: ActionId,
    pub app: AppId,
    pub task: TaskId,
    pub core: Option<CoreId>,
    pub kind: ActionKind,
    pub priority: bool,
    pub parameters: Vec<Parameter>,
    pub inputs: Vec<DataVersion>,
    pub outputs: Vec<DataVersion>,
    pub(crate) state: ActionState,
    pub(crate) implementation: Option<ImplId>,
    pub(crate) worker: Option<WorkerId>,
    pub(crate) started_at: Option<Instant>,
}

impl Action {
    pub fn new(id: ActionId, app: AppId, task: TaskId, core: Option<CoreId>, kind: ActionKind) -> Self {
        Self {
            id,
            app,
            task,
            core,
            kind,
            priority: false,
            parameters: vec![],
            inputs: vec![],
            outputs: vec![],
            state: ActionState::NoResource,
            implementation: None,
            worker: None,
            started_at: None,
        }
    }

    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_data(mut self, inputs: Vec<DataVersion>, outputs: Vec<DataVersion>) -> Self {
        self.inputs = inputs;
        self.outputs = outputs;
        self
    }

    pub fn state(&self) -> ActionState {
        self.state
    }

    pub fn implementation(&self) -> Option<ImplId> {
        self.implementation
    }

    pub fn worker(&self) -> Option<WorkerId> {
        self.worker
    }

    /// The time the action has been running, in milliseconds.
    pub fn running_time(&self) -> Option<u64> {
        self.started_at
            .map(|t| t.elapsed().as_millis().min(u64::MAX as u128) as u64)
    }
}
