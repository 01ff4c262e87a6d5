use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::info;

use crate::application::Application;
use crate::error::ExecutionResult;
use crate::id::{AppId, AtomicIdGenerator, IdGenerator, TaskId};
use crate::trace::DependencyTracer;

/// The live applications, each behind its own lock.
pub struct ApplicationRegistry {
    applications: HashMap<AppId, Arc<Mutex<Application>>>,
    app_ids: IdGenerator<AppId>,
    /// Task IDs are unique across applications.
    task_ids: Arc<AtomicIdGenerator<TaskId>>,
    tracer: Option<Arc<dyn DependencyTracer>>,
}

impl ApplicationRegistry {
    pub fn new(tracer: Option<Arc<dyn DependencyTracer>>) -> Self {
        Self {
            applications: HashMap::new(),
            app_ids: IdGenerator::new(),
            task_ids: Arc::new(AtomicIdGenerator::new()),
            tracer,
        }
    }

    pub fn register(&mut self) -> ExecutionResult<(AppId, Arc<Mutex<Application>>)> {
        let mut id = self.app_ids.next()?;
        while self.applications.contains_key(&id) {
            id = self.app_ids.next()?;
        }
        Ok((id, self.insert(id)))
    }

    /// Returns the application, registering it under the given ID on first use.
    pub fn get_or_register(&mut self, id: AppId) -> Arc<Mutex<Application>> {
        match self.applications.get(&id) {
            Some(app) => app.clone(),
            None => self.insert(id),
        }
    }

    fn insert(&mut self, id: AppId) -> Arc<Mutex<Application>> {
        let app = Arc::new(Mutex::new(Application::new(
            id,
            self.task_ids.clone(),
            self.tracer.clone(),
        )));
        self.applications.insert(id, app.clone());
        info!("registered application {id}");
        app
    }

    pub fn get(&self, id: AppId) -> Option<Arc<Mutex<Application>>> {
        self.applications.get(&id).cloned()
    }

    pub fn deregister(&mut self, id: AppId) -> Option<Arc<Mutex<Application>>> {
        let app = self.applications.remove(&id)?;
        info!("deregistered application {id}");
        Some(app)
    }

    pub fn ids(&self) -> Vec<AppId> {
        let mut ids: Vec<AppId> = self.applications.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn applications(&self) -> impl Iterator<Item = &Arc<Mutex<Application>>> {
        self.applications.values()
    }

    pub fn task_ids(&self) -> &Arc<AtomicIdGenerator<TaskId>> {
        &self.task_ids
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }
}
