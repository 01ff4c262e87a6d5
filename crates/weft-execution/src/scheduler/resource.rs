use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;
use log::warn;
use tokio::time::Instant;

use crate::data::DataVersion;
use crate::id::{ActionId, CoreId, ImplId, WorkerId};
use crate::scheduler::action::{Action, ActionState};
use crate::scheduler::description::ResourceDescription;
use crate::scheduler::implementation::{CoreRegistry, Implementation};
use crate::scheduler::profile::Profile;

/// The placement score of an action on a worker. Scores compare field by field.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Score {
    pub priority: i64,
    /// The number of inputs already resident on the worker.
    pub locality: i64,
    /// Minus the length of the blocked queue of the worker.
    pub waiting: i64,
    /// Minus the expected execution time, or a very low value when the implementation
    /// does not fit in the free resources of the worker right now.
    pub implementation: f64,
}

const UNAVAILABLE_IMPLEMENTATION: f64 = -1.0e18;

/// The scheduling state of one worker.
#[derive(Debug)]
pub struct ResourceScheduler {
    id: WorkerId,
    name: String,
    description: ResourceDescription,
    free: ResourceDescription,
    dynamic: bool,
    retiring: bool,
    running: IndexMap<ActionId, Action>,
    blocked: VecDeque<Action>,
    /// Profiles by core and implementation.
    profiles: Vec<Vec<Profile>>,
    /// The number of actions of each core the worker can run at the same time.
    slots: Vec<usize>,
    resident: HashSet<DataVersion>,
    default_execution_time: u64,
}

impl ResourceScheduler {
    pub fn new(
        id: WorkerId,
        name: impl Into<String>,
        description: ResourceDescription,
        dynamic: bool,
        cores: &CoreRegistry,
        default_execution_time: u64,
    ) -> Self {
        let mut scheduler = Self {
            id,
            name: name.into(),
            free: description.clone(),
            description,
            dynamic,
            retiring: false,
            running: IndexMap::new(),
            blocked: VecDeque::new(),
            profiles: vec![],
            slots: vec![],
            resident: HashSet::new(),
            default_execution_time,
        };
        scheduler.update_cores(cores);
        scheduler
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &ResourceDescription {
        &self.description
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn is_retiring(&self) -> bool {
        self.retiring
    }

    pub fn set_retiring(&mut self) {
        self.retiring = true;
    }

    /// Recomputes the per-core capacity after cores or implementations were registered.
    pub fn update_cores(&mut self, cores: &CoreRegistry) {
        let count = cores.core_count();
        self.profiles.resize_with(count, Vec::new);
        self.slots.resize(count, 0);
        for core in cores.cores() {
            let index = core.id.index();
            let profiles = &mut self.profiles[index];
            while profiles.len() < core.implementations.len() {
                profiles.push(Profile::new(self.default_execution_time));
            }
            self.slots[index] = core
                .implementations
                .iter()
                .map(|i| self.description.can_host_simultaneously(&i.requirements))
                .max()
                .unwrap_or(0);
        }
    }

    pub fn can_run(&self, core: CoreId) -> bool {
        self.slots(core) > 0
    }

    pub fn slots(&self, core: CoreId) -> usize {
        self.slots.get(core.index()).copied().unwrap_or(0)
    }

    pub fn executable_cores(&self) -> impl Iterator<Item = CoreId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| **s > 0)
            .map(|(i, _)| CoreId::from(i))
    }

    /// Whether the implementation fits in the free resources and no older action is waiting.
    pub fn can_run_now(&self, requirements: &ResourceDescription) -> bool {
        self.blocked.is_empty() && self.free.can_host(requirements)
    }

    /// Whether the implementation fits in the free resources.
    pub fn fits(&self, requirements: &ResourceDescription) -> bool {
        self.free.can_host(requirements)
    }

    /// Starts running the action and returns a copy of it in its running state.
    pub fn host_action(&mut self, mut action: Action, requirements: &ResourceDescription) -> Action {
        self.free.reduce(requirements);
        action.state = ActionState::Running;
        action.worker = Some(self.id);
        action.started_at = Some(Instant::now());
        self.running.insert(action.id, action.clone());
        action
    }

    pub fn is_running(&self, id: ActionId) -> bool {
        self.running.contains_key(&id)
    }

    pub fn running_action(&self, id: ActionId) -> Option<&Action> {
        self.running.get(&id)
    }

    pub fn unhost_action(
        &mut self,
        id: ActionId,
        requirements: &ResourceDescription,
    ) -> Option<Action> {
        let Some(action) = self.running.shift_remove(&id) else {
            warn!("action {id} is not running on worker {}", self.id);
            return None;
        };
        self.free.release(requirements);
        Some(action)
    }

    pub fn wait_on_resource(&mut self, mut action: Action) {
        action.state = ActionState::Blocked;
        action.worker = Some(self.id);
        self.blocked.push_back(action);
    }

    pub fn first_blocked(&self) -> Option<&Action> {
        self.blocked.front()
    }

    pub fn remove_first_blocked(&mut self) -> Option<Action> {
        self.blocked.pop_front()
    }

    pub fn remove_blocked(&mut self, id: ActionId) -> Option<Action> {
        let position = self.blocked.iter().position(|a| a.id == id)?;
        self.blocked.remove(position)
    }

    pub fn drain_blocked(&mut self) -> Vec<Action> {
        self.blocked.drain(..).collect()
    }

    pub fn blocked_len(&self) -> usize {
        self.blocked.len()
    }

    pub fn blocked_actions(&self) -> impl Iterator<Item = &Action> {
        self.blocked.iter()
    }

    pub fn running_actions(&self) -> impl Iterator<Item = &Action> {
        self.running.values()
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    pub fn drain_running(&mut self) -> Vec<Action> {
        self.free = self.description.clone();
        self.running.drain(..).map(|(_, a)| a).collect()
    }

    pub fn is_idle(&self) -> bool {
        self.running.is_empty() && self.blocked.is_empty()
    }

    pub fn profile(&self, core: CoreId, implementation: ImplId) -> Option<&Profile> {
        self.profiles
            .get(core.index())
            .and_then(|x| x.get(implementation.index()))
    }

    pub fn profiles(&self, core: CoreId) -> &[Profile] {
        self.profiles
            .get(core.index())
            .map(|x| x.as_slice())
            .unwrap_or_default()
    }

    pub fn profiled_execution(&mut self, core: CoreId, implementation: ImplId, elapsed: u64) {
        match self
            .profiles
            .get_mut(core.index())
            .and_then(|x| x.get_mut(implementation.index()))
        {
            Some(profile) => profile.accumulate(elapsed),
            None => warn!("no profile for implementation {implementation} of core {core}"),
        }
    }

    pub fn add_resident_data(&mut self, data: impl IntoIterator<Item = DataVersion>) {
        self.resident.extend(data);
    }

    pub fn is_resident(&self, data: &DataVersion) -> bool {
        self.resident.contains(data)
    }

    /// Scores running the action with the implementation on this worker.
    pub fn score(&self, action: &Action, implementation: &Implementation) -> Score {
        let locality = action
            .inputs
            .iter()
            .filter(|x| self.resident.contains(x))
            .count() as i64;
        let implementation_score = if self.free.can_host(&implementation.requirements) {
            let time = self
                .profile(implementation.core, implementation.id)
                .map(|p| p.average_time())
                .unwrap_or(self.default_execution_time);
            -(time as f64)
        } else {
            UNAVAILABLE_IMPLEMENTATION
        };
        Score {
            priority: i64::from(action.priority),
            locality,
            waiting: -(self.blocked.len() as i64),
            implementation: implementation_score,
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "tests use unwrap for brevity")]
mod tests {
    use super::*;
    use crate::id::{AppId, TaskId};
    use crate::scheduler::action::ActionKind;
    use crate::scheduler::implementation::ImplementationDefinition;

    fn registry() -> CoreRegistry {
        let mut cores = CoreRegistry::new();
        cores
            .register(
                "small",
                vec![ImplementationDefinition::method("small", ResourceDescription::new(1, 0))],
            )
            .unwrap();
        cores
            .register(
                "large",
                vec![ImplementationDefinition::method("large", ResourceDescription::new(8, 0))],
            )
            .unwrap();
        cores
    }

    fn action(id: u64, core: usize) -> Action {
        Action::new(
            ActionId::from(id),
            AppId::from(1),
            TaskId::from(id),
            Some(CoreId::from(core)),
            ActionKind::Execute,
        )
    }

    #[test]
    fn test_slots() {
        let cores = registry();
        let worker = ResourceScheduler::new(
            WorkerId::from(1),
            "w1",
            ResourceDescription::new(4, 0),
            false,
            &cores,
            100,
        );
        assert_eq!(worker.slots(CoreId::from(0)), 4);
        assert!(!worker.can_run(CoreId::from(1)));
        assert_eq!(worker.executable_cores().collect::<Vec<_>>(), vec![CoreId::from(0)]);
        assert!(!worker.can_run(CoreId::from(9)));
    }

    #[test]
    fn test_host_and_blocked_fifo() {
        let cores = registry();
        let requirements = ResourceDescription::new(2, 0);
        let mut worker = ResourceScheduler::new(
            WorkerId::from(1),
            "w1",
            ResourceDescription::new(2, 0),
            false,
            &cores,
            100,
        );
        assert!(worker.can_run_now(&requirements));
        worker.host_action(action(1, 0), &requirements);
        assert!(!worker.can_run_now(&requirements));
        worker.wait_on_resource(action(2, 0));
        worker.wait_on_resource(action(3, 0));
        assert_eq!(worker.first_blocked().unwrap().id, ActionId::from(2));
        worker.unhost_action(ActionId::from(1), &requirements).unwrap();
        // The free resources fit, but the blocked queue goes first.
        assert!(!worker.can_run_now(&requirements));
        assert_eq!(worker.remove_first_blocked().unwrap().id, ActionId::from(2));
        assert_eq!(worker.remove_first_blocked().unwrap().id, ActionId::from(3));
        assert!(worker.is_idle());
        assert!(worker.unhost_action(ActionId::from(1), &requirements).is_none());
    }

    #[test]
    fn test_score_prefers_locality_then_speed() {
        let cores = registry();
        let implementation = cores.implementation(CoreId::from(0), ImplId::from(0)).unwrap();
        let mut fast = ResourceScheduler::new(
            WorkerId::from(1),
            "fast",
            ResourceDescription::new(4, 0),
            false,
            &cores,
            100,
        );
        let mut local = ResourceScheduler::new(
            WorkerId::from(2),
            "local",
            ResourceDescription::new(4, 0),
            false,
            &cores,
            100,
        );
        fast.profiled_execution(CoreId::from(0), ImplId::from(0), 10);
        local.profiled_execution(CoreId::from(0), ImplId::from(0), 500);
        let input = DataVersion::new(crate::id::DataId::from(1), 1);
        local.add_resident_data([input]);
        let a = action(1, 0).with_data(vec![input], vec![]);
        assert!(local.score(&a, implementation) > fast.score(&a, implementation));
        let b = action(2, 0);
        assert!(fast.score(&b, implementation) > local.score(&b, implementation));
    }
}
