use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::TaskSummary;
use crate::error::ExecutionResult;
use crate::id::{AppId, CoreId, WorkerId};
use crate::scheduler::ResourceDescription;

/// A read-only view of the runtime for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub taken_at: DateTime<Utc>,
    pub applications: Vec<ApplicationStatus>,
    pub cores: Vec<CoreStatus>,
    pub workers: Vec<WorkerStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationStatus {
    pub id: AppId,
    #[serde(flatten)]
    pub tasks: TaskSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoreStatus {
    pub core: CoreId,
    pub signature: String,
    pub running: usize,
    pub ready: usize,
    pub pending: usize,
    pub no_resource: usize,
    /// Mean execution time in milliseconds.
    pub mean_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub id: WorkerId,
    pub name: String,
    pub description: ResourceDescription,
    pub hosted: usize,
    pub blocked: usize,
    pub dynamic: bool,
    pub retiring: bool,
}

impl MonitorSnapshot {
    pub fn to_json(&self) -> ExecutionResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn running_count(&self) -> usize {
        self.cores.iter().map(|c| c.running).sum()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_json_flattens_task_summary() {
        let snapshot = MonitorSnapshot {
            taken_at: Utc::now(),
            applications: vec![ApplicationStatus {
                id: AppId::from(1),
                tasks: TaskSummary {
                    total: 3,
                    in_progress: 1,
                    completed: 2,
                    failed: 0,
                    canceled: 0,
                },
            }],
            cores: vec![],
            workers: vec![],
        };
        let value: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(value["applications"][0]["id"], 1);
        assert_eq!(value["applications"][0]["completed"], 2);
        assert_eq!(value["applications"][0]["in_progress"], 1);
        assert!(value["taken_at"].is_string());
    }
}
