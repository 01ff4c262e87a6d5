use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::{DataId, IdGenerator, TaskId};
use crate::task::DataKey;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize)]
pub struct DataVersion {
    pub data: DataId,
    pub version: u32,
}

impl DataVersion {
    pub fn new(data: DataId, version: u32) -> Self {
        Self { data, version }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataAccess {
    Read(DataVersion),
    Write(DataVersion),
    ReadWrite {
        read: DataVersion,
        write: DataVersion,
    },
}

impl DataAccess {
    pub fn data(&self) -> DataId {
        match self {
            DataAccess::Read(v) | DataAccess::Write(v) => v.data,
            DataAccess::ReadWrite { read, .. } => read.data,
        }
    }

    pub fn read_version(&self) -> Option<DataVersion> {
        match self {
            DataAccess::Read(v) => Some(*v),
            DataAccess::ReadWrite { read, .. } => Some(*read),
            DataAccess::Write(_) => None,
        }
    }

    pub fn write_version(&self) -> Option<DataVersion> {
        match self {
            DataAccess::Write(v) => Some(*v),
            DataAccess::ReadWrite { write, .. } => Some(*write),
            DataAccess::Read(_) => None,
        }
    }
}

/// The internal record behind an application-level data handle.
#[derive(Debug)]
pub struct DataInfo {
    pub id: DataId,
    pub key: DataKey,
    pub version: u32,
    /// The task that produces the current version, if it was produced by a task at all.
    pub last_writer: Option<TaskId>,
    /// Concurrent readers of the current version.
    /// The next writer must wait for all of them.
    pub concurrent_readers: Vec<TaskId>,
    /// The open commutative group on this datum.
    pub commutative_group: Option<TaskId>,
    pub stream_writers: Vec<TaskId>,
    /// Set when the producer of the current version failed or was canceled
    /// and its output can no longer be expected.
    pub discarded: bool,
}

impl DataInfo {
    fn new(id: DataId, key: DataKey) -> Self {
        Self {
            id,
            key,
            version: 0,
            last_writer: None,
            concurrent_readers: vec![],
            commutative_group: None,
            stream_writers: vec![],
            discarded: false,
        }
    }

    pub fn current(&self) -> DataVersion {
        DataVersion::new(self.id, self.version)
    }

    /// Allocates the next version and returns it.
    pub fn next_version(&mut self) -> DataVersion {
        self.version += 1;
        self.current()
    }
}

#[derive(Debug)]
pub struct DataRegistry {
    name_to_id: HashMap<DataKey, DataId>,
    infos: HashMap<DataId, DataInfo>,
    written_files: HashSet<DataId>,
    id_generator: IdGenerator<DataId>,
}

impl DataRegistry {
    pub fn new() -> Self {
        Self {
            name_to_id: HashMap::new(),
            infos: HashMap::new(),
            written_files: HashSet::new(),
            id_generator: IdGenerator::new(),
        }
    }

    pub fn lookup(&self, key: &DataKey) -> Option<&DataInfo> {
        self.name_to_id.get(key).and_then(|id| self.infos.get(id))
    }

    pub fn get(&self, id: DataId) -> Option<&DataInfo> {
        self.infos.get(&id)
    }

    pub fn get_mut(&mut self, id: DataId) -> Option<&mut DataInfo> {
        self.infos.get_mut(&id)
    }

    pub fn get_or_register(&mut self, key: &DataKey) -> ExecutionResult<&mut DataInfo> {
        let id = match self.name_to_id.get(key) {
            Some(id) => *id,
            None => {
                let id = self.id_generator.next()?;
                self.name_to_id.insert(key.clone(), id);
                self.infos.insert(id, DataInfo::new(id, key.clone()));
                id
            }
        };
        if matches!(key, DataKey::File(_)) {
            self.written_files.insert(id);
        }
        self.infos
            .get_mut(&id)
            .ok_or_else(|| ExecutionError::internal(format!("data {id} not registered")))
    }

    /// Forgets the mapping from the key so that the next access starts a new record.
    /// The record itself is kept while tasks may still refer to its versions.
    pub fn delete(&mut self, key: &DataKey) -> Option<DataId> {
        let id = self.name_to_id.remove(key)?;
        self.written_files.remove(&id);
        Some(id)
    }

    /// Marks every datum whose current version is produced by the task as discarded.
    pub fn discard_outputs_of(&mut self, task_id: TaskId) -> Vec<DataId> {
        let mut out = vec![];
        for info in self.infos.values_mut() {
            if info.last_writer == Some(task_id) {
                info.discarded = true;
                out.push(info.id);
            }
        }
        out
    }

    pub fn written_files(&self) -> impl Iterator<Item = &DataKey> {
        self.written_files
            .iter()
            .filter_map(|id| self.infos.get(id).map(|info| &info.key))
    }

    pub fn len(&self) -> usize {
        self.name_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_to_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.name_to_id.clear();
        self.infos.clear();
        self.written_files.clear();
    }
}

impl Default for DataRegistry {
    fn default() -> Self {
        Self::new()
    }
}
