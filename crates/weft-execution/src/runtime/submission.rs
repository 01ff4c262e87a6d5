use log::{debug, error, warn};

use crate::application::{Activation, Application, EndReport};
use crate::error::{ExecutionError, ExecutionResult};
use crate::id::{AppId, TaskId};
use crate::runtime::Runtime;
use crate::scheduler::{Action, ActionKind, Launch, TaskScheduler};
use crate::task::{DataKey, OnFailure, Parameter, ReducePlan, ReduceStep, Task, TaskKind};

/// A task as submitted by an application.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    signature: String,
    parameters: Vec<Parameter>,
    on_failure: OnFailure,
    priority: bool,
    reduce: bool,
    chunk_size: Option<usize>,
}

impl TaskDefinition {
    pub fn method(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            parameters: vec![],
            on_failure: OnFailure::default(),
            priority: false,
            reduce: false,
            chunk_size: None,
        }
    }

    /// A task that folds a collection parameter into its last parameter.
    pub fn reduce(signature: impl Into<String>) -> Self {
        Self {
            reduce: true,
            ..Self::method(signature)
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = on_failure;
        self
    }

    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    /// Overrides the configured number of elements folded by each reduce operation.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }
}

impl Runtime {
    /// Adds a task to the application's graph and schedules it if it is ready.
    /// Unknown applications are registered on their first submission.
    pub fn submit_task(&self, app_id: AppId, definition: TaskDefinition) -> ExecutionResult<TaskId> {
        let (core, workers) = {
            let scheduler = self.inner.scheduler.lock()?;
            let core = scheduler.cores().lookup(&definition.signature).ok_or_else(|| {
                ExecutionError::configuration(format!(
                    "no core element registered for {}",
                    definition.signature
                ))
            })?;
            (core, scheduler.worker_count())
        };
        let (app, task_id) = {
            let mut applications = self.inner.applications.lock()?;
            let app = applications.get_or_register(app_id);
            let task_id = applications.task_ids().next()?;
            (app, task_id)
        };
        let kind = if definition.reduce {
            let chunk_size = definition
                .chunk_size
                .unwrap_or(self.inner.options.reduce_chunk_size);
            let plan = ReducePlan::try_new(task_id, &definition.parameters, chunk_size, workers)?;
            TaskKind::Reduce { core, plan }
        } else {
            TaskKind::Method { core }
        };
        let task = Task::new(
            task_id,
            app_id,
            definition.signature,
            kind,
            definition.parameters,
            definition.on_failure,
            definition.priority,
        );
        let launches = {
            let mut app = app.lock()?;
            let report = app.analyse_task(task)?;
            debug!(
                "app {app_id}: task {task_id} analysed with {} activations",
                report.activations.len()
            );
            self.apply_report(&mut app, report)?
        };
        self.dispatch(launches);
        Ok(task_id)
    }

    /// Turns the activations of a graph update into scheduled actions
    /// and withdraws the actions of canceled tasks.
    /// Must be called with the application locked.
    pub(super) fn apply_report(
        &self,
        app: &mut Application,
        report: EndReport,
    ) -> ExecutionResult<Vec<Launch>> {
        for e in report.errors.iter() {
            error!("app {}: {e}", app.id());
        }
        let mut scheduler = self.inner.scheduler.lock()?;
        let parked = scheduler.no_resource_actions().len();
        for task_id in report.canceled {
            withdraw_actions(app, &mut scheduler, task_id);
        }
        app.retire_settled();
        let mut launches = vec![];
        for activation in report.activations {
            let actions: Vec<Action> = match activation {
                Activation::Execute(task_id) => {
                    execution_action(app, &mut scheduler, task_id)?.into_iter().collect()
                }
                Activation::Reduce { task, steps } => steps
                    .into_iter()
                    .map(|step| reduce_action(app, &mut scheduler, task, step))
                    .collect::<ExecutionResult<Vec<_>>>()?
                    .into_iter()
                    .flatten()
                    .collect(),
            };
            for action in actions {
                launches.extend(scheduler.schedule(action));
            }
        }
        let starving = scheduler.no_resource_actions().len() > parked;
        drop(scheduler);
        if starving {
            self.optimize_now();
        }
        Ok(launches)
    }

    /// Schedules a new attempt of a failed action.
    pub(super) fn resubmit(&self, app: &mut Application, action: Action) -> ExecutionResult<Vec<Launch>> {
        let mut scheduler = self.inner.scheduler.lock()?;
        let id = scheduler.next_action_id()?;
        debug!(
            "app {}: resubmitting task {} as action {id}",
            action.app, action.task
        );
        let task = action.task;
        let retry = Action::new(id, action.app, task, action.core, action.kind)
            .with_priority(action.priority)
            .with_parameters(action.parameters)
            .with_data(action.inputs, action.outputs);
        app.record_action(task, id);
        let parked = scheduler.no_resource_actions().len();
        let launch = scheduler.schedule(retry);
        let starving = scheduler.no_resource_actions().len() > parked;
        drop(scheduler);
        if starving {
            self.optimize_now();
        }
        Ok(launch.into_iter().collect())
    }
}

fn withdraw_actions(app: &Application, scheduler: &mut TaskScheduler, task_id: TaskId) {
    let Some(task) = app.task(task_id) else {
        return;
    };
    for id in task.actions() {
        if scheduler.cancel_action(*id).is_some() {
            debug!("app {}: withdrew action {id} of canceled task {task_id}", app.id());
        }
    }
}

fn execution_action(
    app: &mut Application,
    scheduler: &mut TaskScheduler,
    task_id: TaskId,
) -> ExecutionResult<Option<Action>> {
    let Some(task) = app.task(task_id) else {
        warn!("app {}: activated task {task_id} not found", app.id());
        return Ok(None);
    };
    let (mut inputs, mut outputs) = (vec![], vec![]);
    for access in app.execution_accesses(task_id) {
        inputs.extend(access.access.read_version());
        outputs.extend(access.access.write_version());
    }
    let id = scheduler.next_action_id()?;
    let action = Action::new(id, app.id(), task_id, task.core(), ActionKind::Execute)
        .with_priority(task.has_priority())
        .with_parameters(task.parameters().to_vec())
        .with_data(inputs, outputs);
    app.record_action(task_id, id);
    Ok(Some(action))
}

fn reduce_action(
    app: &mut Application,
    scheduler: &mut TaskScheduler,
    task_id: TaskId,
    step: ReduceStep,
) -> ExecutionResult<Option<Action>> {
    let Some(task) = app.task(task_id) else {
        warn!("app {}: activated reduce task {task_id} not found", app.id());
        return Ok(None);
    };
    let kind = match step.index {
        Some(index) => ActionKind::ReducePartial { index },
        None => ActionKind::ReduceFinal,
    };
    // Partial results have no data version, only the folded user elements and the final
    // output are tracked.
    let access = |key: &Option<DataKey>| {
        let key = key.as_ref()?;
        task.accesses()
            .iter()
            .find(|a| &a.key == key)
            .map(|a| a.access)
    };
    let inputs = step
        .collection
        .elements
        .iter()
        .filter_map(|e| access(&e.key)?.read_version())
        .collect();
    let outputs = access(&step.output.key)
        .and_then(|a| a.write_version())
        .into_iter()
        .collect();
    let id = scheduler.next_action_id()?;
    let action = Action::new(id, app.id(), task_id, task.core(), kind)
        .with_priority(task.has_priority())
        .with_parameters(vec![step.collection, step.output])
        .with_data(inputs, outputs);
    app.record_action(task_id, id);
    Ok(Some(action))
}
