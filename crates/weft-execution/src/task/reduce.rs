use std::collections::HashMap;

use log::{debug, warn};

use crate::error::{ExecutionError, ExecutionResult};
use crate::id::TaskId;
use crate::task::parameter::{DataKey, Direction, Parameter};

/// Counts the fold operations of a reduction over `collection_size` elements.
/// The count is seeded with one operation per worker plus the final one.
pub fn count_operations(collection_size: usize, chunk_size: usize, workers: usize) -> usize {
    let mut total = workers + 1;
    let mut accum = collection_size;
    while accum > chunk_size {
        accum = accum / chunk_size + accum % chunk_size;
        total += accum;
    }
    total
}

/// One fold launched by a reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceStep {
    /// The index of the intermediate operation, or `None` for the final fold.
    pub index: Option<usize>,
    pub collection: Parameter,
    pub output: Parameter,
}

impl ReduceStep {
    pub fn is_final(&self) -> bool {
        self.index.is_none()
    }
}

/// The intermediate parameters and fold progress of a reduce task.
#[derive(Debug)]
pub struct ReducePlan {
    chunk_size: usize,
    collection_index: usize,
    total_operations: usize,
    partials_in: Vec<Parameter>,
    used_partials_in: Vec<Parameter>,
    partials_out: Vec<Parameter>,
    used_partials_out: Vec<Parameter>,
    intermediate_collections: Vec<Parameter>,
    final_collection: Parameter,
    final_output: Parameter,
    expected_inputs: usize,
    received_inputs: usize,
    ready: Vec<Parameter>,
    /// Elements whose producer has not ended yet, by producer.
    pending_inputs: HashMap<TaskId, Vec<Parameter>>,
    running: HashMap<usize, Parameter>,
    next_index: usize,
    final_launched: bool,
}

impl ReducePlan {
    pub fn try_new(
        task_id: TaskId,
        parameters: &[Parameter],
        chunk_size: usize,
        workers: usize,
    ) -> ExecutionResult<Self> {
        if chunk_size < 2 {
            return Err(ExecutionError::configuration(format!(
                "reduce chunk size must be at least 2, got {chunk_size}"
            )));
        }
        if parameters.len() < 2 {
            return Err(ExecutionError::configuration(format!(
                "reduce task {task_id} needs at least two parameters, got {}",
                parameters.len()
            )));
        }
        let (last, rest) = parameters
            .split_last()
            .ok_or_else(|| ExecutionError::internal("empty reduce parameters"))?;
        let Some(collection_index) = rest.iter().position(|p| p.is_collection()) else {
            return Err(ExecutionError::configuration(format!(
                "reduce task {task_id} has no collection parameter to reduce"
            )));
        };
        if last.direction != Direction::Out {
            return Err(ExecutionError::configuration(format!(
                "the last parameter of reduce task {task_id} must be an output"
            )));
        }
        let collection = &rest[collection_index];
        let collection_size = collection.elements.len();
        if collection_size < 2 {
            warn!("reduce collection of task {task_id} has fewer than two elements to reduce");
        }
        let total_operations = count_operations(collection_size, chunk_size, workers);
        debug!("creating {total_operations} intermediate operations for reduce task {task_id}");
        let mut partials_in = Vec::with_capacity(total_operations);
        let mut partials_out = Vec::with_capacity(total_operations);
        let mut intermediate_collections = Vec::with_capacity(total_operations);
        for i in 0..total_operations {
            let partial_id = format!("reduce{i}PartialResultTask{task_id}");
            partials_out.push(Parameter::file(
                last.name.clone(),
                partial_id.clone(),
                Direction::Out,
            ));
            partials_in.push(Parameter::file(
                last.name.clone(),
                partial_id.clone(),
                Direction::In,
            ));
            intermediate_collections.push(Parameter::collection(
                collection.name.clone(),
                format!("{partial_id}Collection"),
                collection.direction,
                vec![],
            ));
        }
        let final_collection = Parameter::collection(
            collection.name.clone(),
            format!("finalReduceTask{task_id}"),
            Direction::In,
            vec![],
        );
        Ok(Self {
            chunk_size,
            collection_index,
            total_operations,
            partials_in,
            used_partials_in: vec![],
            partials_out,
            used_partials_out: vec![],
            intermediate_collections,
            final_collection,
            final_output: last.clone(),
            expected_inputs: collection_size,
            received_inputs: 0,
            ready: vec![],
            pending_inputs: HashMap::new(),
            running: HashMap::new(),
            next_index: 0,
            final_launched: false,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn collection_index(&self) -> usize {
        self.collection_index
    }

    pub fn total_operations(&self) -> usize {
        self.total_operations
    }

    pub fn intermediate_in_parameters(&self) -> &[Parameter] {
        &self.partials_in
    }

    pub fn intermediate_out_parameters(&self) -> &[Parameter] {
        &self.partials_out
    }

    pub fn used_in_parameters(&self) -> &[Parameter] {
        &self.used_partials_in
    }

    pub fn used_out_parameters(&self) -> &[Parameter] {
        &self.used_partials_out
    }

    pub fn intermediate_collections(&self) -> &[Parameter] {
        &self.intermediate_collections
    }

    pub fn final_collection(&self) -> &Parameter {
        &self.final_collection
    }

    /// All intermediate parameters: outputs, inputs, collections, then the final collection.
    pub fn intermediate_parameters(&self) -> Vec<Parameter> {
        self.partials_out
            .iter()
            .chain(self.partials_in.iter())
            .chain(self.intermediate_collections.iter())
            .chain(std::iter::once(&self.final_collection))
            .cloned()
            .collect()
    }

    /// Intermediate files that were never consumed by a fold.
    pub fn unused_intermediate_parameters(&self) -> Vec<Parameter> {
        self.partials_in
            .iter()
            .chain(self.partials_out.iter())
            .cloned()
            .collect()
    }

    pub fn set_partial_in_used(&mut self, partial: &Parameter) {
        if let Some(pos) = self.partials_in.iter().position(|p| p == partial) {
            let p = self.partials_in.remove(pos);
            self.used_partials_in.push(p);
        }
    }

    pub fn set_partial_out_used(&mut self, partial: &Parameter) {
        if let Some(pos) = self.partials_out.iter().position(|p| p == partial) {
            let p = self.partials_out.remove(pos);
            self.used_partials_out.push(p);
        }
    }

    pub fn clear_partials(&mut self) {
        self.partials_in.clear();
        self.partials_out.clear();
        self.intermediate_collections.clear();
    }

    /// Whether the parameter is one of the elements being reduced.
    pub fn is_reduced_element(&self, parameter: &Parameter) -> bool {
        parameter.direction.reads()
            && !parameter.is_collection()
            && !matches!(&parameter.key, Some(DataKey::Stream(_)))
    }

    /// Registers an element of the reduced collection as available.
    pub fn input_ready(&mut self, parameter: Parameter) {
        if self.received_inputs >= self.expected_inputs {
            warn!("unexpected input {} for reduction", parameter.name);
            return;
        }
        self.received_inputs += 1;
        self.ready.push(parameter);
    }

    /// Records that an element will be available once `producer` ends.
    pub fn register_pending_input(&mut self, producer: TaskId, parameter: Parameter) {
        self.pending_inputs.entry(producer).or_default().push(parameter);
    }

    /// Makes every element produced by `producer` available.
    /// Returns how many elements were released.
    pub fn producer_done(&mut self, producer: TaskId) -> usize {
        let inputs = self.pending_inputs.remove(&producer).unwrap_or_default();
        let count = inputs.len();
        for parameter in inputs {
            self.input_ready(parameter);
        }
        count
    }

    pub fn has_pending_inputs(&self) -> bool {
        !self.pending_inputs.is_empty()
    }

    /// Registers the output of an intermediate fold as available.
    pub fn partial_done(&mut self, index: usize) {
        match self.running.remove(&index) {
            Some(parameter) => self.ready.push(parameter),
            None => warn!("partial reduction {index} is not running"),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.final_launched
    }

    /// Values still to be folded: ready elements, running partial results and elements
    /// that have not arrived yet.
    fn remaining_values(&self) -> usize {
        self.ready.len() + self.running.len() + (self.expected_inputs - self.received_inputs)
    }

    /// Launches every fold that can run now.
    /// A partial fold runs whenever `chunk_size` values are ready and more than one fold is
    /// still needed. The final fold waits until all elements have arrived, no intermediate
    /// fold is running and `dependencies_satisfied` reports that the task has no other
    /// pending producer.
    pub fn poll(&mut self, dependencies_satisfied: bool) -> Vec<ReduceStep> {
        let mut steps = vec![];
        if self.final_launched {
            return steps;
        }
        while self.ready.len() >= self.chunk_size && self.remaining_values() > self.chunk_size {
            let Some(step) = self.launch_partial() else {
                warn!("no intermediate parameters left for a partial reduction");
                break;
            };
            steps.push(step);
        }
        if dependencies_satisfied
            && self.received_inputs == self.expected_inputs
            && self.running.is_empty()
        {
            self.final_launched = true;
            let mut collection = self.final_collection.clone();
            collection.elements = std::mem::take(&mut self.ready);
            steps.push(ReduceStep {
                index: None,
                collection,
                output: self.final_output.clone(),
            });
        }
        steps
    }

    fn launch_partial(&mut self) -> Option<ReduceStep> {
        let index = self.next_index;
        let mut collection = self.intermediate_collections.get(index)?.clone();
        let output = self.partials_out.first()?.clone();
        let input = self.partials_in.first()?.clone();
        self.set_partial_out_used(&output);
        self.set_partial_in_used(&input);
        collection.elements = self.ready.drain(..self.chunk_size).collect();
        self.next_index += 1;
        self.running.insert(index, input);
        Some(ReduceStep {
            index: Some(index),
            collection,
            output,
        })
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "tests use unwrap for brevity")]
mod tests {
    use super::*;

    fn elements(n: usize) -> Vec<Parameter> {
        (0..n)
            .map(|i| Parameter::object(format!("e{i}"), i as u64, Direction::In))
            .collect()
    }

    fn reduce_parameters(n: usize) -> Vec<Parameter> {
        vec![
            Parameter::collection("values", "c", Direction::In, elements(n)),
            Parameter::object("result", 1000, Direction::Out),
        ]
    }

    /// Folds the collection the way a balanced k-ary tree does and counts the operations.
    fn simulate(n: usize, chunk: usize, workers: usize) -> usize {
        let mut total = workers + 1;
        let mut level = n;
        while level > chunk {
            let mut next = 0;
            let mut remaining = level;
            while remaining >= chunk {
                remaining -= chunk;
                next += 1;
            }
            level = next + remaining;
            total += level;
        }
        total
    }

    #[test]
    fn test_count_operations_matches_simulation() {
        for chunk in [2, 3, 5] {
            for n in [1, chunk, chunk + 1, 10 * chunk, 10 * chunk + 7] {
                for workers in [0, 1, 4] {
                    assert_eq!(
                        count_operations(n, chunk, workers),
                        simulate(n, chunk, workers),
                        "n={n} chunk={chunk} workers={workers}"
                    );
                }
            }
        }
        assert_eq!(count_operations(10, 2, 0), 11);
        assert_eq!(count_operations(2, 2, 3), 4);
    }

    #[test]
    fn test_invalid_shapes() {
        let task_id = TaskId::from(1);
        let only_one = vec![Parameter::collection("c", "c", Direction::In, vec![])];
        assert!(matches!(
            ReducePlan::try_new(task_id, &only_one, 2, 1),
            Err(ExecutionError::ConfigurationError(_))
        ));
        let no_collection = vec![
            Parameter::object("a", 1, Direction::In),
            Parameter::object("b", 2, Direction::Out),
        ];
        assert!(matches!(
            ReducePlan::try_new(task_id, &no_collection, 2, 1),
            Err(ExecutionError::ConfigurationError(_))
        ));
        let mut not_out = reduce_parameters(4);
        not_out[1].direction = Direction::InOut;
        assert!(matches!(
            ReducePlan::try_new(task_id, &not_out, 2, 1),
            Err(ExecutionError::ConfigurationError(_))
        ));
        assert!(matches!(
            ReducePlan::try_new(task_id, &reduce_parameters(4), 1, 1),
            Err(ExecutionError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_intermediate_parameters_order() {
        let plan = ReducePlan::try_new(TaskId::from(9), &reduce_parameters(4), 2, 0).unwrap();
        let n = plan.total_operations();
        assert_eq!(n, 3);
        let params = plan.intermediate_parameters();
        assert_eq!(params.len(), 3 * n + 1);
        assert!(params[..n].iter().all(|p| p.direction == Direction::Out));
        assert!(params[n..2 * n].iter().all(|p| p.direction == Direction::In));
        assert!(params[2 * n..3 * n].iter().all(|p| p.is_collection()));
        assert_eq!(
            params[0].key,
            Some(DataKey::File("reduce0PartialResultTask9".to_string()))
        );
        assert_eq!(
            params[3 * n].key,
            Some(DataKey::Collection("finalReduceTask9".to_string()))
        );
    }

    #[test]
    fn test_partials_move_to_used() {
        let mut plan = ReducePlan::try_new(TaskId::from(1), &reduce_parameters(4), 2, 0).unwrap();
        let out = plan.intermediate_out_parameters()[0].clone();
        let input = plan.intermediate_in_parameters()[1].clone();
        plan.set_partial_out_used(&out);
        plan.set_partial_in_used(&input);
        assert_eq!(plan.used_out_parameters(), &[out]);
        assert_eq!(plan.used_in_parameters(), &[input]);
        assert_eq!(plan.unused_intermediate_parameters().len(), 4);
        plan.clear_partials();
        assert!(plan.unused_intermediate_parameters().is_empty());
    }

    #[test]
    fn test_fold_progress() {
        let params = reduce_parameters(5);
        let mut plan = ReducePlan::try_new(TaskId::from(1), &params, 2, 0).unwrap();
        let mut launched = vec![];
        for e in params[0].elements.iter() {
            plan.input_ready(e.clone());
            launched.extend(plan.poll(true));
        }
        // Four elements were folded in pairs and the fifth waits for a partial result.
        assert_eq!(launched.len(), 2);
        assert!(launched.iter().all(|s| s.collection.elements.len() == 2));
        plan.partial_done(0);
        let steps = plan.poll(true);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].index, Some(2));
        plan.partial_done(1);
        assert!(plan.poll(true).is_empty());
        plan.partial_done(2);
        let steps = plan.poll(true);
        assert_eq!(steps.len(), 1);
        assert!(steps[0].is_final());
        assert_eq!(steps[0].collection.elements.len(), 2);
        assert_eq!(steps[0].output, params[1]);
        assert!(plan.is_complete());
        assert!(plan.poll(true).is_empty());
    }

    #[test]
    fn test_ready_elements_are_folded_in_chunks() {
        let params = reduce_parameters(4);
        let mut plan = ReducePlan::try_new(TaskId::from(1), &params, 2, 0).unwrap();
        for e in params[0].elements.iter() {
            plan.input_ready(e.clone());
        }
        let steps = plan.poll(true);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].index, Some(0));
        assert_eq!(steps[1].index, Some(1));
        assert!(steps.iter().all(|s| s.collection.elements.len() == 2));
        plan.partial_done(1);
        assert!(plan.poll(true).is_empty());
        plan.partial_done(0);
        let steps = plan.poll(true);
        assert_eq!(steps.len(), 1);
        assert!(steps[0].is_final());
        assert_eq!(steps[0].collection.elements.len(), 2);
        assert_eq!(plan.used_out_parameters().len() + 1, plan.total_operations());
    }

    #[test]
    fn test_large_ready_collection_never_exceeds_chunk() {
        let params = reduce_parameters(10);
        let mut plan = ReducePlan::try_new(TaskId::from(1), &params, 3, 0).unwrap();
        for e in params[0].elements.iter() {
            plan.input_ready(e.clone());
        }
        let mut steps = plan.poll(true);
        let mut last = None;
        while let Some(step) = steps.pop() {
            assert!(step.collection.elements.len() <= 3);
            match step.index {
                Some(index) => {
                    plan.partial_done(index);
                    steps.extend(plan.poll(true));
                }
                None => last = Some(step),
            }
        }
        assert!(last.is_some());
        assert!(plan.is_complete());
    }

    #[test]
    fn test_final_fold_waits_for_dependencies() {
        let params = reduce_parameters(1);
        let mut plan = ReducePlan::try_new(TaskId::from(1), &params, 2, 0).unwrap();
        plan.input_ready(params[0].elements[0].clone());
        assert!(plan.poll(false).is_empty());
        let steps = plan.poll(true);
        assert_eq!(steps.len(), 1);
        assert!(steps[0].is_final());
    }

    #[test]
    fn test_producer_releases_all_its_elements() {
        let params = reduce_parameters(3);
        let mut plan = ReducePlan::try_new(TaskId::from(1), &params, 3, 0).unwrap();
        let producer = TaskId::from(7);
        plan.register_pending_input(producer, params[0].elements[0].clone());
        plan.register_pending_input(producer, params[0].elements[1].clone());
        plan.input_ready(params[0].elements[2].clone());
        assert!(plan.has_pending_inputs());
        assert!(plan.poll(true).is_empty());
        assert_eq!(plan.producer_done(producer), 2);
        assert_eq!(plan.producer_done(producer), 0);
        assert!(!plan.has_pending_inputs());
        let steps = plan.poll(true);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].collection.elements.len(), 3);
    }
}
