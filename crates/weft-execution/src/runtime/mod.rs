mod completion;
mod options;
mod snapshot;
mod submission;
mod workers;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{oneshot, watch};
use weft_server::actor::ActorHandle;

pub use completion::ActionOutcome;
pub use options::RuntimeOptions;
pub use submission::TaskDefinition;

use crate::application::{Application, ApplicationRegistry, TaskSummary};
use crate::error::{ExecutionError, ExecutionResult};
use crate::id::{AppId, CoreId, TaskId};
use crate::optimizer::{OptimizerEvent, OptimizerOptions, ResourceOptimizer};
use crate::scheduler::{ImplementationDefinition, Launch, TaskScheduler};
use crate::task::{Barrier, BarrierReport, BarrierWaiter, TaskStatus};
use crate::trace::{DependencyTracer, LogTracer};

/// Delivers placed actions to the workers that run them.
pub trait ActionDispatcher: Send + Sync + 'static {
    /// Hands the action over to its worker.
    /// An error fails the action as if the worker had reported the failure.
    fn dispatch(&self, launch: &Launch) -> ExecutionResult<()>;
}

/// The scheduling core shared by every application.
///
/// Locks are always taken in the same order: an application, then the scheduler.
/// The application registry lock is never held while an application is locked.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeState>,
}

struct RuntimeState {
    options: RuntimeOptions,
    applications: Mutex<ApplicationRegistry>,
    scheduler: Mutex<TaskScheduler>,
    dispatcher: Arc<dyn ActionDispatcher>,
    optimizer: Mutex<Option<ActorHandle<ResourceOptimizer>>>,
    fatal: watch::Sender<Option<String>>,
}

impl Runtime {
    pub fn new(options: RuntimeOptions, dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        let tracer: Option<Arc<dyn DependencyTracer>> = if options.dependency_tracing {
            Some(Arc::new(LogTracer))
        } else {
            None
        };
        let scheduler = TaskScheduler::new(options.default_execution_time.as_millis() as u64);
        let (fatal, _) = watch::channel(None);
        Self {
            inner: Arc::new(RuntimeState {
                options,
                applications: Mutex::new(ApplicationRegistry::new(tracer)),
                scheduler: Mutex::new(scheduler),
                dispatcher,
                optimizer: Mutex::new(None),
                fatal,
            }),
        }
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.options
    }

    fn application(&self, id: AppId) -> ExecutionResult<Arc<Mutex<Application>>> {
        self.inner
            .applications
            .lock()?
            .get(id)
            .ok_or_else(|| ExecutionError::invalid(format!("application {id} not found")))
    }

    pub fn register_application(&self) -> ExecutionResult<AppId> {
        let (id, _) = self.inner.applications.lock()?.register()?;
        info!("registered application {id}");
        Ok(id)
    }

    /// Cancels what is left of the application and forgets it.
    pub fn deregister_application(&self, id: AppId) -> ExecutionResult<TaskSummary> {
        self.cancel_application(id)?;
        let Some(app) = self.inner.applications.lock()?.deregister(id) else {
            return Err(ExecutionError::invalid(format!(
                "application {id} not found"
            )));
        };
        let mut app = app.lock()?;
        app.clear_wall_clock();
        app.release_data();
        let summary = app.task_summary();
        info!(
            "deregistered application {id}: {} tasks, {} completed, {} failed, {} canceled",
            summary.total, summary.completed, summary.failed, summary.canceled
        );
        Ok(summary)
    }

    pub fn register_core(
        &self,
        signature: &str,
        definitions: Vec<ImplementationDefinition>,
    ) -> ExecutionResult<CoreId> {
        let (core, launches) = self
            .inner
            .scheduler
            .lock()?
            .register_core(signature, definitions)?;
        self.dispatch(launches);
        Ok(core)
    }

    pub fn open_group(&self, app: AppId, name: &str) -> ExecutionResult<()> {
        let app = self.application(app)?;
        let mut app = app.lock()?;
        app.stack_task_group(name)
    }

    /// Closes the innermost open group and returns its name.
    pub fn close_group(&self, app: AppId) -> ExecutionResult<Option<String>> {
        let app = self.application(app)?;
        let mut app = app.lock()?;
        let name = app.pop_group();
        Ok(name)
    }

    async fn wait_barrier(waiter: BarrierWaiter) -> ExecutionResult<BarrierReport> {
        waiter
            .await
            .map_err(|_| ExecutionError::internal("barrier dropped before its release"))
    }

    /// Waits until every task submitted so far by the application has ended.
    pub async fn barrier(&self, id: AppId) -> ExecutionResult<BarrierReport> {
        let waiter = {
            let app = self.application(id)?;
            let mut app = app.lock()?;
            let (barrier, waiter) = Barrier::new();
            app.reaches_barrier(barrier);
            waiter
        };
        Self::wait_barrier(waiter).await
    }

    /// Waits until every task of a closed group has ended.
    pub async fn group_barrier(&self, id: AppId, group: &str) -> ExecutionResult<BarrierReport> {
        let waiter = {
            let app = self.application(id)?;
            let mut app = app.lock()?;
            let (barrier, waiter) = Barrier::new();
            app.reaches_group_barrier(Some(group), barrier);
            waiter
        };
        Self::wait_barrier(waiter).await
    }

    /// Waits for the application to drain once it announced that no more tasks will come.
    pub async fn end_reached(&self, id: AppId) -> ExecutionResult<BarrierReport> {
        let waiter = {
            let app = self.application(id)?;
            let mut app = app.lock()?;
            let (barrier, waiter) = Barrier::new();
            app.end_reached(barrier);
            waiter
        };
        Self::wait_barrier(waiter).await
    }

    /// Cancels every pending task of the application and returns how many were canceled.
    pub fn cancel_application(&self, id: AppId) -> ExecutionResult<usize> {
        let app = self.application(id)?;
        let (canceled, launches) = {
            let mut app = app.lock()?;
            let report = app.cancel_pending_tasks();
            let canceled = report.canceled.len();
            (canceled, self.apply_report(&mut app, report)?)
        };
        info!("canceled {canceled} tasks of application {id}");
        self.dispatch(launches);
        Ok(canceled)
    }

    /// Cancels the application if it is still running after `timeout`.
    pub fn set_wall_clock(&self, id: AppId, timeout: Duration) -> ExecutionResult<()> {
        let app = self.application(id)?;
        let runtime = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!(
                "application {id} reached its wall clock limit of {}s",
                timeout.as_secs()
            );
            if let Err(e) = runtime.cancel_application(id) {
                error!("failed to cancel application {id}: {e}");
            }
        });
        let mut app = app.lock()?;
        app.set_wall_clock(timer.abort_handle());
        Ok(())
    }

    pub fn task_summary(&self, id: AppId) -> ExecutionResult<TaskSummary> {
        let app = self.application(id)?;
        let app = app.lock()?;
        let summary = app.task_summary();
        Ok(summary)
    }

    pub fn task_status(&self, id: AppId, task: TaskId) -> ExecutionResult<Option<TaskStatus>> {
        let app = self.application(id)?;
        let app = app.lock()?;
        let status = app.task_status(task);
        Ok(status)
    }

    /// Waits for the task to reach a terminal state.
    pub async fn wait_for_task(&self, id: AppId, task: TaskId) -> ExecutionResult<TaskStatus> {
        let (tx, rx) = oneshot::channel();
        {
            let app = self.application(id)?;
            let mut app = app.lock()?;
            app.watch_task(task, tx)?;
        }
        rx.await
            .map_err(|_| ExecutionError::internal(format!("task {task} dropped its listeners")))
    }

    pub fn start_optimizer(&self, options: OptimizerOptions) -> ExecutionResult<()> {
        if !options.enabled {
            info!("the resource optimizer is disabled");
            return Ok(());
        }
        let mut optimizer = self.inner.optimizer.lock()?;
        if optimizer.is_some() {
            return Err(ExecutionError::invalid(
                "the resource optimizer is already running",
            ));
        }
        *optimizer = Some(ActorHandle::new(options));
        Ok(())
    }

    /// Asks the optimizer for an immediate cycle.
    pub fn optimize_now(&self) {
        self.notify_optimizer(OptimizerEvent::OptimizeNow);
    }

    fn optimizer_handle(&self) -> Option<ActorHandle<ResourceOptimizer>> {
        match self.inner.optimizer.lock() {
            Ok(optimizer) => optimizer.clone(),
            Err(e) => {
                error!("failed to reach the resource optimizer: {e}");
                None
            }
        }
    }

    /// Sends an event the optimizer may skip if it is busy.
    fn notify_optimizer(&self, event: OptimizerEvent) {
        let Some(handle) = self.optimizer_handle() else {
            return;
        };
        if !handle.try_send(event) {
            debug!("the resource optimizer did not accept the event");
        }
    }

    /// Sends an event the optimizer must see, waiting for room in its mailbox if needed.
    fn deliver_to_optimizer(&self, event: OptimizerEvent) {
        let Some(handle) = self.optimizer_handle() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = handle.send(event).await {
                        warn!("failed to notify the resource optimizer: {e}");
                    }
                });
            }
            Err(_) => {
                if !handle.try_send(event) {
                    warn!("the resource optimizer did not accept the event");
                }
            }
        }
    }

    /// Whether an optimizer was started and has stopped since.
    pub fn optimizer_stopped(&self) -> bool {
        match self.inner.optimizer.lock() {
            Ok(optimizer) => optimizer.as_ref().is_some_and(|h| h.is_stopped()),
            Err(_) => true,
        }
    }

    /// Reports a condition the runtime cannot recover from.
    /// Pending tasks of every application are canceled so that waiters are released.
    pub fn raise_fatal(&self, message: impl Into<String>) {
        let message = message.into();
        error!("fatal runtime error: {message}");
        self.inner.fatal.send_replace(Some(message));
        let ids = match self.inner.applications.lock() {
            Ok(applications) => applications.ids(),
            Err(e) => {
                error!("failed to read the applications: {e}");
                return;
            }
        };
        for id in ids {
            if let Err(e) = self.cancel_application(id) {
                error!("failed to cancel application {id}: {e}");
            }
        }
    }

    pub fn fatal_error(&self) -> Option<String> {
        self.inner.fatal.borrow().clone()
    }

    pub fn subscribe_fatal(&self) -> watch::Receiver<Option<String>> {
        self.inner.fatal.subscribe()
    }

    pub async fn shutdown(&self) {
        let handle = match self.inner.optimizer.lock() {
            Ok(mut optimizer) => optimizer.take(),
            Err(e) => {
                error!("failed to stop the resource optimizer: {e}");
                None
            }
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.send(OptimizerEvent::Shutdown).await {
                debug!("the resource optimizer has already stopped: {e}");
            }
            handle.wait_for_stop().await;
        }
        info!("runtime stopped");
    }
}
