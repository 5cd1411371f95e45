use crate::evaluator::{EvalContext, Evaluator};
use crate::field::{FieldBinder, FieldHandle, FieldSpec, FieldTable};
use crate::layout::FieldLayout;
use crate::workset::{ExternalSource, HostBatch, Workset, WorksetDims};
use feval_traits::Scalar;
use log::debug;
use rustc_hash::FxHashMap;
use std::error::Error;
use std::fmt;

/// Errors raised while wiring or resolving the evaluation graph.
///
/// All of these are fatal and surface at registration or setup time; a graph
/// that passed [`EvaluatorRegistry::setup`] cannot fail structurally during
/// execution.
#[derive(Debug)]
pub enum GraphError {
    /// The dependency relation contains a cycle among the listed nodes.
    CyclicDependency { nodes: Vec<String> },
    /// A consumed field has no producer and is not declared external.
    UnresolvedDependency { field: String, consumer: String },
    /// Two nodes (or a node and an external declaration) produce one field.
    DuplicateProducer {
        field: String,
        first: String,
        second: String,
    },
    /// A node declares the same field as both input and output.
    SelfDependency { field: String, node: String },
    /// A field name was declared with two different layouts.
    LayoutMismatch {
        field: String,
        first: FieldLayout,
        other: FieldLayout,
    },
    /// A required field or evaluator is unknown to the registry.
    UnknownRequirement { name: String },
    /// Two registered evaluators share a name.
    DuplicateEvaluatorName { name: String },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::CyclicDependency { nodes } => {
                write!(f, "Cyclic dependency among evaluators: {}", nodes.join(", "))
            }
            GraphError::UnresolvedDependency { field, consumer } => write!(
                f,
                "Field '{}' required by '{}' has no producer and is not external",
                field, consumer
            ),
            GraphError::DuplicateProducer { field, first, second } => write!(
                f,
                "Field '{}' is produced by both '{}' and '{}'",
                field, first, second
            ),
            GraphError::SelfDependency { field, node } => write!(
                f,
                "Evaluator '{}' declares field '{}' as both input and output",
                node, field
            ),
            GraphError::LayoutMismatch { field, first, other } => write!(
                f,
                "Field '{}' declared with conflicting layouts {} and {}",
                field, first, other
            ),
            GraphError::UnknownRequirement { name } => {
                write!(f, "Required field or evaluator '{}' is not registered", name)
            }
            GraphError::DuplicateEvaluatorName { name } => {
                write!(f, "An evaluator named '{}' is already registered", name)
            }
        }
    }
}

impl Error for GraphError {}

struct Plan {
    /// Indices into `evaluators`, in execution order.
    order: Vec<usize>,
    table: FieldTable,
    externals: Vec<(FieldHandle, ExternalSource)>,
}

/// The evaluator registry and dependency graph for one scalar-type pass.
///
/// Usage follows a strict phase protocol: register evaluators and external
/// fields, mark requirements, call [`setup`](Self::setup) once, then execute
/// worksets. The same composition routine is typically run twice, once per
/// scalar type (plain values for the residual pass, dual numbers for the
/// Jacobian pass); nodes whose output set is empty under a given scalar type
/// simply drop out of that pass unless explicitly required.
pub struct EvaluatorRegistry<T: Scalar> {
    evaluators: Vec<Box<dyn Evaluator<T>>>,
    external_fields: Vec<(FieldSpec, ExternalSource)>,
    required_fields: Vec<String>,
    required_evaluators: Vec<String>,
    plan: Option<Plan>,
}

impl<T: Scalar> Default for EvaluatorRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> EvaluatorRegistry<T> {
    pub fn new() -> Self {
        Self {
            evaluators: Vec::new(),
            external_fields: Vec::new(),
            required_fields: Vec::new(),
            required_evaluators: Vec::new(),
            plan: None,
        }
    }

    /// Inserts a node, validating its declarations against the graph so far.
    pub fn register_evaluator(&mut self, evaluator: Box<dyn Evaluator<T>>) -> Result<(), GraphError> {
        assert!(self.plan.is_none(), "Cannot register evaluators after setup");

        let name = evaluator.name().to_string();
        if self.evaluators.iter().any(|e| e.name() == name) {
            return Err(GraphError::DuplicateEvaluatorName { name });
        }

        let deps = evaluator.dependent_fields();
        let evals = evaluator.evaluated_fields();
        for out in &evals {
            if deps.iter().any(|d| d.name == out.name) {
                return Err(GraphError::SelfDependency {
                    field: out.name.clone(),
                    node: name.clone(),
                });
            }
            if let Some(producer) = self.producer_name(&out.name) {
                return Err(GraphError::DuplicateProducer {
                    field: out.name.clone(),
                    first: producer,
                    second: name.clone(),
                });
            }
        }

        self.evaluators.push(evaluator);
        Ok(())
    }

    /// Declares a field that the host fills when a workset is created.
    pub fn declare_external(
        &mut self,
        spec: FieldSpec,
        source: ExternalSource,
    ) -> Result<(), GraphError> {
        assert!(self.plan.is_none(), "Cannot declare external fields after setup");
        if let Some(producer) = self.producer_name(&spec.name) {
            return Err(GraphError::DuplicateProducer {
                field: spec.name.clone(),
                first: producer,
                second: "<external>".to_string(),
            });
        }
        self.external_fields.push((spec, source));
        Ok(())
    }

    /// Marks a field as a graph root that must be computed.
    pub fn require_field(&mut self, name: impl Into<String>) {
        self.required_fields.push(name.into());
    }

    /// Marks a node as required even if nothing consumes its outputs.
    ///
    /// This is how zero-output leaves (state saves, scatters) enter the
    /// active subgraph.
    pub fn require_evaluator(&mut self, name: impl Into<String>) {
        self.required_evaluators.push(name.into());
    }

    fn producer_name(&self, field: &str) -> Option<String> {
        if self
            .external_fields
            .iter()
            .any(|(spec, _)| spec.name == field)
        {
            return Some("<external>".to_string());
        }
        self.evaluators
            .iter()
            .find(|e| e.evaluated_fields().iter().any(|s| s.name == field))
            .map(|e| e.name().to_string())
    }

    /// Resolves the graph: reachability from the required roots, topological
    /// ordering, field handle binding and per-node setup.
    ///
    /// Must be called exactly once before any workset is processed. Every
    /// configuration error a kernel can detect is reported here.
    pub fn setup(&mut self, dims: &WorksetDims) -> Result<(), GraphError> {
        assert!(self.plan.is_none(), "Registry setup may only run once");

        let num_nodes = self.evaluators.len();
        let mut producer_of: FxHashMap<String, usize> = FxHashMap::default();
        for (index, evaluator) in self.evaluators.iter().enumerate() {
            for spec in evaluator.evaluated_fields() {
                producer_of.insert(spec.name, index);
            }
        }
        let external: FxHashMap<String, ExternalSource> = self
            .external_fields
            .iter()
            .map(|(spec, source)| (spec.name.clone(), *source))
            .collect();

        // Roots of the reachability sweep.
        let mut pending: Vec<usize> = Vec::new();
        for field in &self.required_fields {
            if let Some(&producer) = producer_of.get(field) {
                pending.push(producer);
            } else if !external.contains_key(field) {
                return Err(GraphError::UnresolvedDependency {
                    field: field.clone(),
                    consumer: "<required>".to_string(),
                });
            }
        }
        for name in &self.required_evaluators {
            let index = self
                .evaluators
                .iter()
                .position(|e| e.name() == name.as_str())
                .ok_or_else(|| GraphError::UnknownRequirement { name: name.clone() })?;
            pending.push(index);
        }

        // Transitively activate producers.
        let mut active = vec![false; num_nodes];
        while let Some(index) = pending.pop() {
            if active[index] {
                continue;
            }
            active[index] = true;
            for dep in self.evaluators[index].dependent_fields() {
                if external.contains_key(&dep.name) {
                    continue;
                }
                match producer_of.get(&dep.name) {
                    Some(&producer) => pending.push(producer),
                    None => {
                        return Err(GraphError::UnresolvedDependency {
                            field: dep.name,
                            consumer: self.evaluators[index].name().to_string(),
                        })
                    }
                }
            }
        }

        // Kahn's algorithm over the active subgraph. Ties are broken by
        // registration index, which makes the order deterministic for a
        // given registration sequence.
        let mut in_degree = vec![0usize; num_nodes];
        let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); num_nodes];
        for index in 0..num_nodes {
            if !active[index] {
                continue;
            }
            let mut producers: Vec<usize> = self.evaluators[index]
                .dependent_fields()
                .iter()
                .filter_map(|dep| producer_of.get(&dep.name).copied())
                .collect();
            producers.sort_unstable();
            producers.dedup();
            in_degree[index] = producers.len();
            for producer in producers {
                consumers[producer].push(index);
            }
        }

        let mut ready: Vec<usize> = (0..num_nodes)
            .filter(|&i| active[i] && in_degree[i] == 0)
            .collect();
        let mut order = Vec::new();
        while !ready.is_empty() {
            ready.sort_unstable();
            let node = ready.remove(0);
            order.push(node);
            for &consumer in &consumers[node] {
                in_degree[consumer] -= 1;
                if in_degree[consumer] == 0 {
                    ready.push(consumer);
                }
            }
        }

        let num_active = active.iter().filter(|a| **a).count();
        if order.len() != num_active {
            let stuck = (0..num_nodes)
                .filter(|&i| active[i] && !order.contains(&i))
                .map(|i| self.evaluators[i].name().to_string())
                .collect();
            return Err(GraphError::CyclicDependency { nodes: stuck });
        }

        // Bind fields: externals first so their layouts anchor validation,
        // then every active node, in execution order.
        let mut table = FieldTable::default();
        let mut externals = Vec::new();
        for (spec, source) in &self.external_fields {
            externals.push((table.intern(spec)?, *source));
        }
        {
            let mut binder = FieldBinder { table: &mut table };
            for &index in &order {
                self.evaluators[index].setup(dims, &mut binder)?;
            }
        }

        debug!(
            "Evaluation graph resolved: {} of {} nodes active, {} fields",
            num_active,
            num_nodes,
            table.specs().len()
        );

        self.plan = Some(Plan {
            order,
            table,
            externals,
        });
        Ok(())
    }

    /// The names of the active nodes in execution order.
    pub fn execution_order(&self) -> Vec<&str> {
        let plan = self.plan.as_ref().expect("Registry has not been set up");
        plan.order
            .iter()
            .map(|&i| self.evaluators[i].name())
            .collect()
    }

    /// Resolved handle of a named field, once setup has run.
    ///
    /// This is how a host reads computed output fields (stress, state
    /// variables marked for write-out) back out of a workset.
    pub fn field_handle(&self, name: &str) -> Option<FieldHandle> {
        let plan = self.plan.as_ref().expect("Registry has not been set up");
        plan.table.lookup(name)
    }

    /// Allocates the field storage for one batch and fills external fields.
    pub fn create_workset<'a>(&self, host: &'a HostBatch<'a>) -> eyre::Result<Workset<'a, T>> {
        let plan = self.plan.as_ref().expect("Registry has not been set up");
        Workset::new(&plan.table, &plan.externals, host)
    }

    /// Runs every active evaluator over the workset, in dependency order.
    pub fn evaluate_workset(
        &self,
        workset: &Workset<'_, T>,
        ctx: &mut EvalContext<'_>,
    ) -> eyre::Result<()> {
        let plan = self.plan.as_ref().expect("Registry has not been set up");
        for &index in &plan.order {
            self.evaluators[index].evaluate(workset, ctx)?;
        }
        Ok(())
    }
}
