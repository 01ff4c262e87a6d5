use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use weft_execution::cloud::{CloudProvider, InstanceType, ProvisionedResource, Provisioning};
use weft_execution::error::{ExecutionError, ExecutionResult};
use weft_execution::id::WorkerId;
use weft_execution::runtime::{ActionDispatcher, ActionOutcome, Runtime};
use weft_execution::scheduler::{Launch, ResourceDescription};

/// Hands placed actions to an in-process executor.
pub struct LocalDispatcher {
    sender: mpsc::UnboundedSender<Launch>,
}

impl LocalDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Launch>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ActionDispatcher for LocalDispatcher {
    fn dispatch(&self, launch: &Launch) -> ExecutionResult<()> {
        self.sender
            .send(launch.clone())
            .map_err(|_| ExecutionError::internal("the local executor has stopped"))
    }
}

/// Runs every dispatched action for `task_time` and reports its success.
pub fn spawn_executor(
    runtime: Runtime,
    mut receiver: mpsc::UnboundedReceiver<Launch>,
    task_time: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(launch) = receiver.recv().await {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                tokio::time::sleep(task_time).await;
                let outcome = ActionOutcome::Succeeded { elapsed: task_time };
                if let Err(e) = runtime.notify_action_end(launch.action.id, outcome) {
                    error!("failed to report the end of action {}: {e}", launch.action.id);
                }
            });
        }
    })
}

/// A provider whose instances are local workers that take a while to boot.
pub struct LocalProvider {
    startup: Duration,
    created: AtomicUsize,
}

impl LocalProvider {
    pub fn new(startup: Duration) -> Self {
        Self {
            startup,
            created: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CloudProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn instance_types(&self) -> Vec<InstanceType> {
        vec![
            InstanceType::new("local.small", ResourceDescription::new(2, 4096))
                .with_cost_per_hour(0.1),
            InstanceType::new("local.large", ResourceDescription::new(8, 16384))
                .with_cost_per_hour(0.4),
        ]
    }

    fn max_instances(&self) -> Option<usize> {
        Some(8)
    }

    async fn create_instance(&self, instance_type: &InstanceType) -> ExecutionResult<Provisioning> {
        tokio::time::sleep(self.startup).await;
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Provisioning::Accepted(ProvisionedResource {
            name: format!("{}-{n}", instance_type.name),
            description: instance_type.description.clone(),
        }))
    }

    async fn destroy_instance(&self, worker: WorkerId, name: &str) -> ExecutionResult<()> {
        info!("released local instance {name} of worker {worker}");
        Ok(())
    }
}
