use indexmap::IndexMap;

use crate::id::{ActionId, CoreId};
use crate::scheduler::action::Action;

/// Actions that no worker can host yet, indexed by core.
///
/// The per-core index only grows: cores are never unregistered.
#[derive(Debug, Default)]
pub struct ActionSet {
    no_core: IndexMap<ActionId, Action>,
    per_core: Vec<IndexMap<ActionId, Action>>,
    count: usize,
}

impl ActionSet {
    pub fn new(core_count: usize) -> Self {
        let mut set = Self::default();
        set.update_core_count(core_count);
        set
    }

    pub fn update_core_count(&mut self, core_count: usize) {
        if core_count > self.per_core.len() {
            self.per_core.resize_with(core_count, IndexMap::new);
        }
    }

    pub fn core_count(&self) -> usize {
        self.per_core.len()
    }

    fn list_mut(&mut self, core: Option<CoreId>) -> &mut IndexMap<ActionId, Action> {
        match core {
            Some(core) => {
                self.update_core_count(core.index() + 1);
                &mut self.per_core[core.index()]
            }
            None => &mut self.no_core,
        }
    }

    pub fn add_action(&mut self, action: Action) {
        let core = action.core;
        if self.list_mut(core).insert(action.id, action).is_none() {
            self.count += 1;
        }
    }

    pub fn remove_action(&mut self, id: ActionId, core: Option<CoreId>) -> Option<Action> {
        let action = self.list_mut(core).shift_remove(&id)?;
        self.count -= 1;
        Some(action)
    }

    /// Finds and removes the action without knowing its core.
    pub fn take_action(&mut self, id: ActionId) -> Option<Action> {
        if let Some(action) = self.no_core.shift_remove(&id) {
            self.count -= 1;
            return Some(action);
        }
        for list in self.per_core.iter_mut() {
            if let Some(action) = list.shift_remove(&id) {
                self.count -= 1;
                return Some(action);
            }
        }
        None
    }

    pub fn get_actions(&self, core: Option<CoreId>) -> impl Iterator<Item = &Action> {
        let list = match core {
            Some(core) => self.per_core.get(core.index()),
            None => Some(&self.no_core),
        };
        list.into_iter().flat_map(|x| x.values())
    }

    pub fn action_count(&self, core: CoreId) -> usize {
        self.per_core.get(core.index()).map(|x| x.len()).unwrap_or(0)
    }

    /// Removes every action the worker is able to run, in insertion order per core.
    /// Actions without a core are compatible with any worker.
    /// The drained per-core lists are left empty in place.
    pub fn remove_all_compatible_actions(
        &mut self,
        can_run: impl Fn(CoreId) -> bool,
    ) -> Vec<Action> {
        let mut out: Vec<Action> = self.no_core.drain(..).map(|(_, a)| a).collect();
        for (index, list) in self.per_core.iter_mut().enumerate() {
            if can_run(CoreId::from(index)) {
                out.extend(list.drain(..).map(|(_, a)| a));
            }
        }
        self.count -= out.len();
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.no_core
            .values()
            .chain(self.per_core.iter().flat_map(|x| x.values()))
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
