use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::application::Application;
use crate::error::ExecutionResult;
use crate::monitor::{ApplicationStatus, CoreStatus, MonitorSnapshot, WorkerStatus};
use crate::optimizer::{ClusterSnapshot, WorkerView};
use crate::runtime::Runtime;

impl Runtime {
    fn applications(&self) -> ExecutionResult<Vec<Arc<Mutex<Application>>>> {
        let applications = self.inner.applications.lock()?;
        Ok(applications.applications().cloned().collect())
    }

    /// Counts, for every core, the tasks of all applications still waiting for a predecessor.
    fn pending_counts(&self, core_count: usize) -> ExecutionResult<Vec<usize>> {
        let mut pending = vec![0; core_count];
        for app in self.applications()? {
            let counts = app.lock()?.pending_counts(core_count);
            for (total, count) in pending.iter_mut().zip(counts) {
                *total += count;
            }
        }
        Ok(pending)
    }

    pub fn cluster_snapshot(&self) -> ExecutionResult<ClusterSnapshot> {
        let core_count = self.inner.scheduler.lock()?.cores().core_count();
        let pending = self.pending_counts(core_count)?;
        let scheduler = self.inner.scheduler.lock()?;
        let cores = scheduler.cores();
        let workers = scheduler
            .workers()
            .map(|w| WorkerView {
                id: w.id(),
                name: w.name().to_string(),
                slots: cores.cores().map(|c| w.slots(c.id)).collect(),
                running: w.running_len(),
                dynamic: w.is_dynamic(),
                retiring: w.is_retiring(),
            })
            .collect();
        let requirements = cores
            .cores()
            .map(|c| {
                c.implementations
                    .iter()
                    .filter(|i| !i.kind.is_service())
                    .map(|i| i.requirements.clone())
                    .collect()
            })
            .collect();
        Ok(ClusterSnapshot {
            workload: scheduler.workload(&pending),
            workers,
            requirements,
        })
    }

    pub fn monitor_snapshot(&self) -> ExecutionResult<MonitorSnapshot> {
        let mut applications = vec![];
        for app in self.applications()? {
            let app = app.lock()?;
            applications.push(ApplicationStatus {
                id: app.id(),
                tasks: app.task_summary(),
            });
        }
        applications.sort_by_key(|a| a.id);
        let cluster = self.cluster_snapshot()?;
        let cores = cluster
            .workload
            .cores
            .into_iter()
            .map(|w| CoreStatus {
                core: w.core,
                signature: w.signature,
                running: w.running,
                ready: w.ready,
                pending: w.pending,
                no_resource: w.no_resource,
                mean_time: w.mean_time,
            })
            .collect();
        let scheduler = self.inner.scheduler.lock()?;
        let workers = scheduler
            .workers()
            .map(|w| WorkerStatus {
                id: w.id(),
                name: w.name().to_string(),
                description: w.description().clone(),
                hosted: w.running_len(),
                blocked: w.blocked_len(),
                dynamic: w.is_dynamic(),
                retiring: w.is_retiring(),
            })
            .collect();
        Ok(MonitorSnapshot {
            taken_at: Utc::now(),
            applications,
            cores,
            workers,
        })
    }
}
