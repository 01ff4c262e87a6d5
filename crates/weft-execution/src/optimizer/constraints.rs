use indexmap::IndexMap;

use crate::id::CoreId;
use crate::scheduler::{ResourceDescription, UNASSIGNED};

/// Resource requirements that one machine must meet to run a set of cores.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintSet {
    pub description: ResourceDescription,
    pub cores: Vec<CoreId>,
}

impl ConstraintSet {
    pub fn new(description: ResourceDescription, core: CoreId) -> Self {
        Self {
            description,
            cores: vec![core],
        }
    }

    fn join(&mut self, other: ConstraintSet) {
        self.description.increase(&other.description);
        for core in other.cores {
            if !self.cores.contains(&core) {
                self.cores.push(core);
            }
        }
    }
}

/// Merges the requirements into as few machine requests as possible.
///
/// Requirements are grouped by architecture and merged when their operating systems agree.
/// Requirements without an architecture then join the architecture whose requirements
/// are closest in size, and the groups are merged once more.
pub fn merge_constraints(constraints: Vec<ConstraintSet>) -> Vec<ConstraintSet> {
    let mut by_architecture = classify(constraints);
    merge_by_operating_system(&mut by_architecture);
    reassign_unassigned(&mut by_architecture);
    merge_by_operating_system(&mut by_architecture);
    by_architecture.into_values().flatten().collect()
}

fn classify(constraints: Vec<ConstraintSet>) -> IndexMap<String, Vec<ConstraintSet>> {
    let mut out: IndexMap<String, Vec<ConstraintSet>> = IndexMap::new();
    for c in constraints {
        out.entry(c.description.architecture.clone())
            .or_default()
            .push(c);
    }
    out
}

fn merge_by_operating_system(by_architecture: &mut IndexMap<String, Vec<ConstraintSet>>) {
    for list in by_architecture.values_mut() {
        // The operating system each merged request was opened with.
        let mut merged: Vec<(String, ConstraintSet)> = vec![];
        for c in list.drain(..) {
            let target = merged.iter_mut().find(|(os, _)| {
                os == UNASSIGNED
                    || c.description.operating_system == UNASSIGNED
                    || *os == c.description.operating_system
            });
            match target {
                Some((_, m)) => m.join(c),
                None => merged.push((c.description.operating_system.clone(), c)),
            }
        }
        *list = merged.into_iter().map(|(_, c)| c).collect();
    }
}

fn reassign_unassigned(by_architecture: &mut IndexMap<String, Vec<ConstraintSet>>) {
    let Some(unassigned) = by_architecture.shift_remove(UNASSIGNED) else {
        return;
    };
    if by_architecture.len() <= 1 {
        match by_architecture.values_mut().next() {
            Some(list) => list.extend(unassigned),
            None => {
                by_architecture.insert(UNASSIGNED.to_string(), unassigned);
            }
        }
        return;
    }
    let assigned: Vec<(String, ResourceDescription)> = by_architecture
        .iter()
        .flat_map(|(arch, list)| list.iter().map(|c| (arch.clone(), c.description.clone())))
        .collect();
    for mut c in unassigned {
        let mut best: Option<&str> = None;
        let mut best_difference = f32::MAX;
        for (arch, option) in assigned.iter() {
            let difference = c.description.difference(option);
            // Once a larger option is found, only larger options closer in size replace it.
            let better = if best_difference < 0.0 {
                difference < 0.0 && difference > best_difference
            } else {
                difference < best_difference
            };
            if better {
                best = Some(arch.as_str());
                best_difference = difference;
            }
        }
        let Some(arch) = best.map(|x| x.to_string()) else {
            continue;
        };
        c.description.architecture = arch.clone();
        by_architecture.entry(arch).or_default().push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraint(processors: u32, arch: &str, os: &str, core: usize) -> ConstraintSet {
        ConstraintSet::new(
            ResourceDescription::new(processors, 0)
                .with_architecture(arch)
                .with_operating_system(os),
            CoreId::from(core),
        )
    }

    #[test]
    fn test_same_architecture_and_os_are_merged() {
        let merged = merge_constraints(vec![
            constraint(2, "x86_64", "linux", 0),
            constraint(4, "x86_64", "linux", 1),
            constraint(1, "arm64", "linux", 2),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].description.processors, 4);
        assert_eq!(merged[0].cores, vec![CoreId::from(0), CoreId::from(1)]);
        assert_eq!(merged[1].cores, vec![CoreId::from(2)]);
    }

    #[test]
    fn test_different_operating_systems_are_kept_apart() {
        let merged = merge_constraints(vec![
            constraint(2, "x86_64", "linux", 0),
            constraint(2, "x86_64", "windows", 1),
            constraint(2, "x86_64", UNASSIGNED, 2),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].cores, vec![CoreId::from(0), CoreId::from(2)]);
        assert_eq!(merged[1].cores, vec![CoreId::from(1)]);
    }

    #[test]
    fn test_unassigned_architecture_joins_the_closest_containing_one() {
        let merged = merge_constraints(vec![
            constraint(8, "x86_64", "linux", 0),
            constraint(2, "arm64", "linux", 1),
            constraint(3, UNASSIGNED, "linux", 2),
        ]);
        assert_eq!(merged.len(), 2);
        let x86 = merged
            .iter()
            .find(|c| c.description.architecture == "x86_64")
            .map(|c| (c.description.processors, c.cores.clone()));
        assert_eq!(x86, Some((8, vec![CoreId::from(0), CoreId::from(2)])));
    }

    #[test]
    fn test_unassigned_architecture_without_containing_option() {
        let merged = merge_constraints(vec![
            constraint(2, "x86_64", "linux", 0),
            constraint(1, "arm64", "linux", 1),
            constraint(3, UNASSIGNED, "linux", 2),
        ]);
        assert_eq!(merged.len(), 2);
        let x86 = merged
            .iter()
            .find(|c| c.description.architecture == "x86_64")
            .map(|c| (c.description.processors, c.cores.clone()));
        assert_eq!(x86, Some((3, vec![CoreId::from(0), CoreId::from(2)])));
    }

    #[test]
    fn test_only_unassigned_architectures() {
        let merged = merge_constraints(vec![
            constraint(1, UNASSIGNED, UNASSIGNED, 0),
            constraint(2, UNASSIGNED, "linux", 1),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].description.processors, 2);
        assert_eq!(merged[0].description.operating_system, "linux");
    }
}
