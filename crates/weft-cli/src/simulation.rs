use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use log::info;
use weft_common::config::AppConfig;
use weft_execution::error::ExecutionResult;
use weft_execution::id::AppId;
use weft_execution::monitor::MonitorSnapshot;
use weft_execution::optimizer::OptimizerOptions;
use weft_execution::runtime::{Runtime, RuntimeOptions, TaskDefinition};
use weft_execution::scheduler::{ImplementationDefinition, ResourceDescription};
use weft_execution::task::{Direction, Parameter};

use crate::local::{spawn_executor, LocalDispatcher, LocalProvider};

pub struct SimulationOptions {
    pub applications: usize,
    pub tasks: usize,
    pub chunk_size: usize,
    pub workers: usize,
    pub task_time: Duration,
    /// Lets the optimizer grow and shrink the pool with local instances.
    pub elastic: bool,
}

/// Runs the workload of every application concurrently and waits for all of them to drain.
pub async fn run_simulation(
    config: &AppConfig,
    options: SimulationOptions,
) -> ExecutionResult<MonitorSnapshot> {
    let (dispatcher, receiver) = LocalDispatcher::new();
    let runtime = Runtime::new(RuntimeOptions::new(config), Arc::new(dispatcher));
    let executor = spawn_executor(runtime.clone(), receiver, options.task_time);

    let requirements = ResourceDescription::new(1, 512);
    for signature in ["produce", "sum"] {
        runtime.register_core(
            signature,
            vec![ImplementationDefinition::method(
                signature,
                requirements.clone(),
            )],
        )?;
    }
    for i in 0..options.workers {
        runtime.add_worker(
            format!("static-{i}"),
            ResourceDescription::new(2, 4096),
            false,
        )?;
    }
    if options.elastic {
        let provider = Arc::new(LocalProvider::new(Duration::from_secs(2)));
        runtime.start_optimizer(OptimizerOptions::new(config, runtime.clone(), provider))?;
    }

    let mut apps = vec![];
    for _ in 0..options.applications {
        apps.push(submit_workload(&runtime, &options)?);
    }
    let reports = try_join_all(apps.iter().map(|app| runtime.end_reached(*app))).await?;
    for (app, report) in apps.iter().zip(reports) {
        info!(
            "application {app} drained with {} failed tasks",
            report.failed_tasks.len()
        );
    }
    let snapshot = runtime.monitor_snapshot()?;
    for app in apps {
        runtime.deregister_application(app)?;
    }
    runtime.shutdown().await;
    executor.abort();
    Ok(snapshot)
}

/// Produces `tasks` values in parallel and folds them with a reduce task.
fn submit_workload(runtime: &Runtime, options: &SimulationOptions) -> ExecutionResult<AppId> {
    let app = runtime.register_application()?;
    let mut elements = vec![];
    for i in 0..options.tasks {
        let value = format!("value-{i}");
        runtime.submit_task(
            app,
            TaskDefinition::method("produce").with_parameters(vec![Parameter::object(
                &value,
                i as u64,
                Direction::Out,
            )]),
        )?;
        elements.push(Parameter::object(&value, i as u64, Direction::In));
    }
    let total = runtime.submit_task(
        app,
        TaskDefinition::reduce("sum")
            .with_chunk_size(options.chunk_size)
            .with_parameters(vec![
                Parameter::collection("values", "values", Direction::In, elements),
                Parameter::object("total", u64::MAX, Direction::Out),
            ]),
    )?;
    info!(
        "application {app}: submitted {} tasks and reduce task {total}",
        options.tasks
    );
    Ok(app)
}
