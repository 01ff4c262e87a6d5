use std::fmt;

use serde::Serialize;

/// The value of an architecture or operating system that matches anything.
pub const UNASSIGNED: &str = "[unassigned]";

const PROCESSOR_DIFFERENCE_WEIGHT: f32 = 10_000.0;

/// The capabilities of a worker, or the requirements of an implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceDescription {
    pub processors: u32,
    pub memory_mb: u64,
    pub architecture: String,
    pub operating_system: String,
}

impl Default for ResourceDescription {
    fn default() -> Self {
        Self {
            processors: 1,
            memory_mb: 0,
            architecture: UNASSIGNED.to_string(),
            operating_system: UNASSIGNED.to_string(),
        }
    }
}

fn compatible(a: &str, b: &str) -> bool {
    a == UNASSIGNED || b == UNASSIGNED || a == b
}

impl ResourceDescription {
    pub fn new(processors: u32, memory_mb: u64) -> Self {
        Self {
            processors,
            memory_mb,
            ..Default::default()
        }
    }

    pub fn with_architecture(mut self, architecture: impl Into<String>) -> Self {
        self.architecture = architecture.into();
        self
    }

    pub fn with_operating_system(mut self, operating_system: impl Into<String>) -> Self {
        self.operating_system = operating_system.into();
        self
    }

    pub fn has_architecture(&self) -> bool {
        self.architecture != UNASSIGNED
    }

    fn is_compatible(&self, other: &ResourceDescription) -> bool {
        compatible(&self.architecture, &other.architecture)
            && compatible(&self.operating_system, &other.operating_system)
    }

    /// Whether the operating systems of both descriptions may be served by one machine.
    pub fn shares_operating_system(&self, other: &ResourceDescription) -> bool {
        compatible(&self.operating_system, &other.operating_system)
    }

    pub fn can_host(&self, requirements: &ResourceDescription) -> bool {
        self.is_compatible(requirements)
            && self.processors >= requirements.processors
            && self.memory_mb >= requirements.memory_mb
    }

    /// The number of copies of `requirements` this description holds at the same time.
    pub fn can_host_simultaneously(&self, requirements: &ResourceDescription) -> usize {
        if !self.is_compatible(requirements) {
            return 0;
        }
        let mut slots = if requirements.processors == 0 {
            self.processors as usize
        } else {
            (self.processors / requirements.processors) as usize
        };
        if requirements.memory_mb > 0 {
            slots = slots.min((self.memory_mb / requirements.memory_mb) as usize);
        }
        slots
    }

    /// Grows this description so that it also covers `other`.
    pub fn increase(&mut self, other: &ResourceDescription) {
        self.processors = self.processors.max(other.processors);
        self.memory_mb = self.memory_mb.max(other.memory_mb);
        if self.architecture == UNASSIGNED {
            self.architecture = other.architecture.clone();
        }
        if self.operating_system == UNASSIGNED {
            self.operating_system = other.operating_system.clone();
        }
    }

    /// Takes the resources of a hosted action away from the free resources.
    pub fn reduce(&mut self, used: &ResourceDescription) {
        self.processors = self.processors.saturating_sub(used.processors);
        self.memory_mb = self.memory_mb.saturating_sub(used.memory_mb);
    }

    /// Gives back the resources of an action that stopped running.
    pub fn release(&mut self, used: &ResourceDescription) {
        self.processors = self.processors.saturating_add(used.processors);
        self.memory_mb = self.memory_mb.saturating_add(used.memory_mb);
    }

    /// A signed size distance used to pick the closest description.
    /// Processors weigh much more than memory.
    pub fn difference(&self, other: &ResourceDescription) -> f32 {
        let processors = self.processors as f32 - other.processors as f32;
        let memory = self.memory_mb as f32 - other.memory_mb as f32;
        processors * PROCESSOR_DIFFERENCE_WEIGHT + memory
    }
}

impl fmt::Display for ResourceDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[processors={} memory_mb={} architecture={} os={}]",
            self.processors, self.memory_mb, self.architecture, self.operating_system
        )
    }
}
