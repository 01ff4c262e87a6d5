use std::collections::VecDeque;

use indexmap::IndexSet;

use crate::data::DataAccess;
use crate::id::{DataId, TaskId};

/// The state of a synthetic task that serializes commutative updates of one datum.
///
/// From the outside the group behaves as a single task with one evolving data version:
/// readers of the datum depend on the group task, and the group completes when its last
/// member has ended. Inside, members run one at a time and each member consumes the
/// access at the head of the queue, in submission order.
#[derive(Debug)]
pub struct CommutativeGroup {
    data: DataId,
    current: Option<DataAccess>,
    accesses: VecDeque<DataAccess>,
    members: IndexSet<TaskId>,
    group_predecessor: Option<TaskId>,
    group_predecessor_access: Option<DataAccess>,
    running: Option<TaskId>,
    waiting: VecDeque<TaskId>,
    closed: bool,
    /// Set when a member ended without producing its update.
    lost: bool,
}

impl CommutativeGroup {
    pub fn new(data: DataId) -> Self {
        Self {
            data,
            current: None,
            accesses: VecDeque::new(),
            members: IndexSet::new(),
            group_predecessor: None,
            group_predecessor_access: None,
            running: None,
            waiting: VecDeque::new(),
            closed: false,
            lost: false,
        }
    }

    pub fn data(&self) -> DataId {
        self.data
    }

    pub fn add_access(&mut self, access: DataAccess) {
        if self.current.is_none() {
            self.current = Some(access);
        } else {
            self.accesses.push_back(access);
        }
    }

    /// Returns the current access and replaces it with the head of the queue.
    pub fn next_access(&mut self) -> Option<DataAccess> {
        let current = self.current.take();
        self.current = self.accesses.pop_front();
        current
    }

    /// The access currently visible to the rest of the graph.
    pub fn access_placeholder(&self) -> Option<&DataAccess> {
        self.current.as_ref()
    }

    pub fn pending_accesses(&self) -> usize {
        self.accesses.len() + usize::from(self.current.is_some())
    }

    pub fn set_group_predecessor(&mut self, task_id: Option<TaskId>, access: Option<DataAccess>) {
        self.group_predecessor = task_id;
        self.group_predecessor_access = access;
    }

    pub fn group_predecessor(&self) -> Option<TaskId> {
        self.group_predecessor
    }

    pub fn group_predecessor_access(&self) -> Option<&DataAccess> {
        self.group_predecessor_access.as_ref()
    }

    pub fn add_member(&mut self, task_id: TaskId) {
        self.members.insert(task_id);
    }

    /// Removes a member and returns whether the group has no members left.
    pub fn remove_member(&mut self, task_id: TaskId) -> bool {
        self.members.shift_remove(&task_id);
        self.waiting.retain(|x| *x != task_id);
        if self.running == Some(task_id) {
            self.running = None;
        }
        self.members.is_empty()
    }

    pub fn members(&self) -> impl Iterator<Item = &TaskId> {
        self.members.iter()
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.members.contains(&task_id)
    }

    /// Lets the member run if no other member is running.
    /// Otherwise the member is parked until [`Self::release`] hands over the turn.
    pub fn try_acquire(&mut self, task_id: TaskId) -> bool {
        match self.running {
            None => {
                self.running = Some(task_id);
                true
            }
            Some(x) if x == task_id => true,
            Some(_) => {
                if !self.waiting.contains(&task_id) {
                    self.waiting.push_back(task_id);
                }
                false
            }
        }
    }

    /// Ends the turn of the running member and returns the next member allowed to run.
    pub fn release(&mut self, task_id: TaskId) -> Option<TaskId> {
        if self.running != Some(task_id) {
            return None;
        }
        self.running = self.waiting.pop_front();
        self.running
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn mark_lost(&mut self) {
        self.lost = true;
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataVersion;

    fn access(data: DataId, version: u32) -> DataAccess {
        DataAccess::ReadWrite {
            read: DataVersion::new(data, version),
            write: DataVersion::new(data, version + 1),
        }
    }

    #[test]
    fn test_next_access_is_fifo() {
        let data = DataId::from(1);
        let mut group = CommutativeGroup::new(data);
        let accesses = (0..5).map(|v| access(data, v)).collect::<Vec<_>>();
        for a in accesses.iter() {
            group.add_access(*a);
        }
        assert_eq!(group.pending_accesses(), 5);
        for a in accesses.iter() {
            assert_eq!(group.access_placeholder(), Some(a));
            assert_eq!(group.next_access(), Some(*a));
        }
        assert_eq!(group.next_access(), None);
        assert_eq!(group.access_placeholder(), None);
    }

    #[test]
    fn test_add_access_after_drain() {
        let data = DataId::from(1);
        let mut group = CommutativeGroup::new(data);
        group.add_access(access(data, 0));
        assert_eq!(group.next_access(), Some(access(data, 0)));
        group.add_access(access(data, 1));
        assert_eq!(group.access_placeholder(), Some(&access(data, 1)));
    }

    #[test]
    fn test_members_take_turns() {
        let mut group = CommutativeGroup::new(DataId::from(1));
        let (a, b, c) = (TaskId::from(1), TaskId::from(2), TaskId::from(3));
        for t in [a, b, c] {
            group.add_member(t);
        }
        assert!(group.try_acquire(b));
        assert!(!group.try_acquire(a));
        assert!(!group.try_acquire(c));
        assert!(!group.try_acquire(a));
        assert_eq!(group.release(b), Some(a));
        assert!(!group.remove_member(b));
        assert_eq!(group.release(a), Some(c));
        assert!(!group.remove_member(a));
        assert_eq!(group.release(c), None);
        assert!(group.remove_member(c));
    }
}
