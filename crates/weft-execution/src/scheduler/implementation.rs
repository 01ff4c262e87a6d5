use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use log::{debug, info};
use serde::Serialize;

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::{CoreId, ImplId};
use crate::scheduler::description::ResourceDescription;

/// How an implementation is executed on a worker.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplementationKind {
    Method,
    Binary,
    Mpi,
    Container,
    Service,
}

impl ImplementationKind {
    /// Service implementations run on externally managed endpoints.
    pub fn is_service(&self) -> bool {
        matches!(self, ImplementationKind::Service)
    }
}

impl FromStr for ImplementationKind {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "method" => Ok(ImplementationKind::Method),
            "binary" => Ok(ImplementationKind::Binary),
            "mpi" => Ok(ImplementationKind::Mpi),
            "container" => Ok(ImplementationKind::Container),
            "service" => Ok(ImplementationKind::Service),
            _ => Err(ExecutionError::configuration(format!(
                "unknown implementation kind: {s}"
            ))),
        }
    }
}

impl fmt::Display for ImplementationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImplementationKind::Method => "method",
            ImplementationKind::Binary => "binary",
            ImplementationKind::Mpi => "mpi",
            ImplementationKind::Container => "container",
            ImplementationKind::Service => "service",
        };
        write!(f, "{s}")
    }
}

/// An implementation as declared by the application, before it is registered.
#[derive(Debug, Clone)]
pub struct ImplementationDefinition {
    pub signature: String,
    pub kind: String,
    pub requirements: ResourceDescription,
}

impl ImplementationDefinition {
    pub fn new(
        signature: impl Into<String>,
        kind: impl Into<String>,
        requirements: ResourceDescription,
    ) -> Self {
        Self {
            signature: signature.into(),
            kind: kind.into(),
            requirements,
        }
    }

    pub fn method(signature: impl Into<String>, requirements: ResourceDescription) -> Self {
        Self::new(signature, "method", requirements)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Implementation {
    pub id: ImplId,
    pub core: CoreId,
    pub signature: String,
    pub kind: ImplementationKind,
    pub requirements: ResourceDescription,
}

/// A family of interchangeable implementations of one task signature.
#[derive(Debug, Clone, Serialize)]
pub struct CoreElement {
    pub id: CoreId,
    pub signature: String,
    pub implementations: Vec<Implementation>,
}

#[derive(Debug, Default)]
pub struct CoreRegistry {
    cores: Vec<CoreElement>,
    signatures: HashMap<String, CoreId>,
}

impl CoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a core element, or adds the new implementations to an existing one.
    /// Implementation kinds are resolved here, so an unknown kind fails the whole registration.
    pub fn register(
        &mut self,
        signature: &str,
        definitions: Vec<ImplementationDefinition>,
    ) -> ExecutionResult<CoreId> {
        let kinds = definitions
            .iter()
            .map(|d| d.kind.parse::<ImplementationKind>())
            .collect::<ExecutionResult<Vec<_>>>()?;
        let core_id = match self.signatures.get(signature) {
            Some(id) => *id,
            None => {
                let id = CoreId::from(self.cores.len());
                self.cores.push(CoreElement {
                    id,
                    signature: signature.to_string(),
                    implementations: vec![],
                });
                self.signatures.insert(signature.to_string(), id);
                info!("registered core element {signature} as core {id}");
                id
            }
        };
        let core = self
            .cores
            .get_mut(core_id.index())
            .ok_or_else(|| ExecutionError::internal(format!("core {core_id} not found")))?;
        for (definition, kind) in definitions.into_iter().zip(kinds) {
            if core
                .implementations
                .iter()
                .any(|x| x.signature == definition.signature)
            {
                debug!(
                    "implementation {} of core {core_id} is already registered",
                    definition.signature
                );
                continue;
            }
            let id = ImplId::from(core.implementations.len());
            core.implementations.push(Implementation {
                id,
                core: core_id,
                signature: definition.signature,
                kind,
                requirements: definition.requirements,
            });
        }
        Ok(core_id)
    }

    pub fn lookup(&self, signature: &str) -> Option<CoreId> {
        self.signatures.get(signature).copied()
    }

    pub fn get(&self, core: CoreId) -> Option<&CoreElement> {
        self.cores.get(core.index())
    }

    pub fn implementations(&self, core: CoreId) -> &[Implementation] {
        self.get(core)
            .map(|c| c.implementations.as_slice())
            .unwrap_or_default()
    }

    pub fn implementation(&self, core: CoreId, implementation: ImplId) -> Option<&Implementation> {
        self.implementations(core).get(implementation.index())
    }

    pub fn cores(&self) -> impl Iterator<Item = &CoreElement> {
        self.cores.iter()
    }

    pub fn core_count(&self) -> usize {
        self.cores.len()
    }
}
