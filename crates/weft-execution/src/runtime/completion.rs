use std::collections::VecDeque;
use std::time::Duration;

use log::{debug, error, warn};

use crate::application::{EndReport, TaskOutcome};
use crate::error::ExecutionResult;
use crate::id::ActionId;
use crate::runtime::Runtime;
use crate::scheduler::{Action, ActionKind, Launch};
use crate::task::OnFailure;

/// How an action ended on its worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Succeeded { elapsed: Duration },
    Failed { reason: String },
}

impl Runtime {
    /// Reports the end of a dispatched action.
    pub fn notify_action_end(&self, action: ActionId, outcome: ActionOutcome) -> ExecutionResult<()> {
        let launches = self.complete_action(action, outcome)?;
        self.dispatch(launches);
        Ok(())
    }

    fn complete_action(&self, id: ActionId, outcome: ActionOutcome) -> ExecutionResult<Vec<Launch>> {
        let elapsed = match &outcome {
            ActionOutcome::Succeeded { elapsed } => Some(elapsed.as_millis() as u64),
            ActionOutcome::Failed { .. } => None,
        };
        let end = self.inner.scheduler.lock()?.action_end(id, elapsed);
        let Some(end) = end else {
            warn!("action {id} is not running on any worker");
            return Ok(vec![]);
        };
        let mut launches = end.launches;
        if let Some(worker) = end.retired {
            self.finish_retirement(worker)?;
        }
        launches.extend(self.settle_action(end.action, outcome)?);
        Ok(launches)
    }

    /// Applies the end of an action that left the scheduler to its task.
    pub(super) fn settle_action(
        &self,
        action: Action,
        outcome: ActionOutcome,
    ) -> ExecutionResult<Vec<Launch>> {
        let app = self.inner.applications.lock()?.get(action.app);
        let Some(app) = app else {
            debug!(
                "application {} is gone, ignoring the end of action {}",
                action.app, action.id
            );
            return Ok(vec![]);
        };
        let mut app = app.lock()?;
        let Some(task) = app.task(action.task) else {
            debug!(
                "app {}: task {} already left the graph, ignoring the end of action {}",
                action.app, action.task, action.id
            );
            return Ok(vec![]);
        };
        if !task.is_pending() {
            debug!(
                "app {}: ignoring the end of action {} of task {} in state {}",
                action.app,
                action.id,
                action.task,
                task.status()
            );
            return Ok(vec![]);
        }
        let on_failure = task.on_failure();
        let report = match outcome {
            ActionOutcome::Succeeded { .. } => match action.kind {
                ActionKind::ReducePartial { index } => EndReport {
                    activations: app
                        .reduce_partial_done(action.task, index)
                        .into_iter()
                        .collect(),
                    ..Default::default()
                },
                ActionKind::Execute | ActionKind::ReduceFinal => {
                    app.end_task(action.task, TaskOutcome::Finished)
                }
            },
            ActionOutcome::Failed { reason } => {
                let attempts = app.record_attempt(action.task);
                warn!(
                    "app {}: action {} of task {} failed at attempt {attempts}: {reason}",
                    action.app, action.id, action.task
                );
                if on_failure == OnFailure::Retry && attempts < self.inner.options.max_attempts {
                    let launches = self.resubmit(&mut app, action)?;
                    return Ok(launches);
                }
                app.end_task(action.task, TaskOutcome::Failed)
            }
        };
        let launches = self.apply_report(&mut app, report)?;
        Ok(launches)
    }

    /// Sends placed actions to their workers.
    /// An action that cannot be delivered ends as failed, which may place more actions.
    pub(crate) fn dispatch(&self, launches: Vec<Launch>) {
        let mut queue = VecDeque::from(launches);
        while let Some(launch) = queue.pop_front() {
            let Err(e) = self.inner.dispatcher.dispatch(&launch) else {
                continue;
            };
            warn!(
                "failed to dispatch action {} to worker {}: {e}",
                launch.action.id, launch.worker_name
            );
            let outcome = ActionOutcome::Failed {
                reason: e.to_string(),
            };
            match self.complete_action(launch.action.id, outcome) {
                Ok(launches) => queue.extend(launches),
                Err(e) => error!(
                    "failed to process the end of action {}: {e}",
                    launch.action.id
                ),
            }
        }
    }
}
