use log::debug;

use crate::id::{AppId, DataId, TaskId};

/// A write-only sink for dependency edges.
/// Recording must not block or fail the graph mutation that produced the edge.
pub trait DependencyTracer: Send + Sync + 'static {
    fn record_edge(&self, app: AppId, producer: TaskId, consumer: TaskId, data: Option<DataId>);
}

/// Emits one debug record per dependency edge.
#[derive(Debug, Default)]
pub struct LogTracer;

impl DependencyTracer for LogTracer {
    fn record_edge(&self, app: AppId, producer: TaskId, consumer: TaskId, data: Option<DataId>) {
        match data {
            Some(data) => debug!("app {app}: task {producer} -> task {consumer} (data {data})"),
            None => debug!("app {app}: task {producer} -> task {consumer}"),
        }
    }
}
