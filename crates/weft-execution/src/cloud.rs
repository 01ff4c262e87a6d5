use serde::Serialize;

use crate::error::ExecutionResult;
use crate::id::WorkerId;
use crate::scheduler::ResourceDescription;

/// A kind of machine a cloud provider can create.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceType {
    pub name: String,
    pub description: ResourceDescription,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_per_hour: Option<f32>,
}

impl InstanceType {
    pub fn new(name: impl Into<String>, description: ResourceDescription) -> Self {
        Self {
            name: name.into(),
            description,
            cost_per_hour: None,
        }
    }

    pub fn with_cost_per_hour(mut self, cost: f32) -> Self {
        self.cost_per_hour = Some(cost);
        self
    }

    /// How many tasks with the requirements the instance runs at the same time.
    pub fn slots_for(&self, requirements: &ResourceDescription) -> usize {
        self.description.can_host_simultaneously(requirements)
    }

    fn is_cheaper_than(&self, other: &InstanceType) -> bool {
        match (self.cost_per_hour, other.cost_per_hour) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }
}

/// A machine the provider has made available.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionedResource {
    pub name: String,
    pub description: ResourceDescription,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Provisioning {
    Accepted(ProvisionedResource),
    /// The provider declined the request. This is not an error.
    Rejected(String),
}

#[async_trait::async_trait]
pub trait CloudProvider: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// The instance types the provider offers, in order of preference.
    fn instance_types(&self) -> Vec<InstanceType>;

    /// The maximum number of instances the provider can run at once.
    fn max_instances(&self) -> Option<usize> {
        None
    }

    /// Creates an instance of the type and waits until it is ready to run tasks.
    async fn create_instance(&self, instance_type: &InstanceType) -> ExecutionResult<Provisioning>;

    /// Destroys an instance previously created by the provider.
    async fn destroy_instance(&self, worker: WorkerId, name: &str) -> ExecutionResult<()>;
}

/// Picks the instance type for `amount` simultaneous tasks with the given requirements.
///
/// When `containing` is set, the instance must run at least `amount` tasks and the smallest
/// such instance wins. Otherwise the instance must run at most `amount` tasks and the
/// largest such instance wins. Equal candidates are broken by cost.
pub fn select_instance_type<'a>(
    types: &'a [InstanceType],
    requirements: &ResourceDescription,
    amount: usize,
    containing: bool,
) -> Option<&'a InstanceType> {
    let mut best: Option<(&InstanceType, i64)> = None;
    for t in types.iter().filter(|t| t.description.can_host(requirements)) {
        let distance = t.slots_for(requirements) as i64 - amount as i64;
        if (containing && distance < 0) || (!containing && distance > 0) {
            continue;
        }
        let better = match best {
            None => true,
            Some((current, d)) if d == distance => t.is_cheaper_than(current),
            Some((_, d)) => {
                if containing {
                    distance < d
                } else {
                    distance > d
                }
            }
        };
        if better {
            best = Some((t, distance));
        }
    }
    best.map(|(t, _)| t)
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "tests use unwrap for brevity")]
mod tests {
    use super::*;

    fn types() -> Vec<InstanceType> {
        vec![
            InstanceType::new("small", ResourceDescription::new(2, 4096)).with_cost_per_hour(0.1),
            InstanceType::new("medium", ResourceDescription::new(4, 8192)).with_cost_per_hour(0.2),
            InstanceType::new("medium-cheap", ResourceDescription::new(4, 8192))
                .with_cost_per_hour(0.15),
            InstanceType::new("large", ResourceDescription::new(16, 32768)).with_cost_per_hour(0.8),
        ]
    }

    #[test]
    fn test_containing_instance_is_the_smallest_that_fits() {
        let types = types();
        let requirements = ResourceDescription::new(1, 0);
        let t = select_instance_type(&types, &requirements, 3, true).unwrap();
        assert_eq!(t.name, "medium-cheap");
        let t = select_instance_type(&types, &requirements, 1, true).unwrap();
        assert_eq!(t.name, "small");
        assert!(select_instance_type(&types, &requirements, 32, true).is_none());
    }

    #[test]
    fn test_contained_instance_is_the_largest_within_the_amount() {
        let types = types();
        let requirements = ResourceDescription::new(1, 0);
        let t = select_instance_type(&types, &requirements, 10, false).unwrap();
        assert_eq!(t.name, "medium-cheap");
        assert!(select_instance_type(&types, &requirements, 1, false).is_none());
    }

    #[test]
    fn test_incompatible_types_are_skipped() {
        let types = vec![
            InstanceType::new("arm", ResourceDescription::new(8, 0).with_architecture("arm64")),
            InstanceType::new("x86", ResourceDescription::new(2, 0).with_architecture("x86_64")),
        ];
        let requirements = ResourceDescription::new(1, 0).with_architecture("x86_64");
        let t = select_instance_type(&types, &requirements, 1, true).unwrap();
        assert_eq!(t.name, "x86");
        assert_eq!(t.slots_for(&requirements), 2);
    }
}
