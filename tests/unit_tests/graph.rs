use feval::evaluator::{EvalContext, Evaluator};
use feval::field::{FieldBinder, FieldSpec};
use feval::graph::{EvaluatorRegistry, GraphError};
use feval::layout::FieldLayout;
use feval::workset::{Workset, WorksetDims};

/// A do-nothing node with configurable inputs and outputs.
struct Node {
    name: String,
    deps: Vec<FieldSpec>,
    evals: Vec<FieldSpec>,
}

impl Node {
    fn boxed(name: &str, deps: &[&str], evals: &[&str]) -> Box<Self> {
        let spec = |n: &&str| FieldSpec::new(*n, FieldLayout::qp_scalar());
        Box::new(Self {
            name: name.to_string(),
            deps: deps.iter().map(spec).collect(),
            evals: evals.iter().map(spec).collect(),
        })
    }
}

impl Evaluator<f64> for Node {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependent_fields(&self) -> Vec<FieldSpec> {
        self.deps.clone()
    }

    fn evaluated_fields(&self) -> Vec<FieldSpec> {
        self.evals.clone()
    }

    fn setup(&mut self, _dims: &WorksetDims, binder: &mut FieldBinder<'_>) -> Result<(), GraphError> {
        for spec in self.deps.iter().chain(&self.evals) {
            binder.bind(spec)?;
        }
        Ok(())
    }

    fn evaluate(&self, _workset: &Workset<'_, f64>, _ctx: &mut EvalContext<'_>) -> eyre::Result<()> {
        Ok(())
    }
}

fn dims() -> WorksetDims {
    WorksetDims {
        cells: 1,
        nodes_per_cell: 4,
        quad_points: 4,
        dims: 2,
        solution_dim: 2,
    }
}

fn position(order: &[&str], name: &str) -> usize {
    order
        .iter()
        .position(|n| *n == name)
        .unwrap_or_else(|| panic!("'{}' missing from execution order {:?}", name, order))
}

#[test]
fn execution_order_respects_dependencies_for_any_insertion_order() {
    let registrations: [&[&str]; 3] = [
        &["source", "middle", "sink"],
        &["sink", "middle", "source"],
        &["middle", "sink", "source"],
    ];
    for sequence in registrations {
        let mut registry = EvaluatorRegistry::<f64>::new();
        for name in sequence {
            let node = match *name {
                "source" => Node::boxed("source", &[], &["a"]),
                "middle" => Node::boxed("middle", &["a"], &["b"]),
                _ => Node::boxed("sink", &["b"], &["c"]),
            };
            registry.register_evaluator(node).unwrap();
        }
        registry.require_field("c");
        registry.setup(&dims()).unwrap();

        let order = registry.execution_order();
        assert!(position(&order, "source") < position(&order, "middle"));
        assert!(position(&order, "middle") < position(&order, "sink"));
    }
}

#[test]
fn rebuilding_the_same_registration_sequence_is_deterministic() {
    let build = || {
        let mut registry = EvaluatorRegistry::<f64>::new();
        registry
            .register_evaluator(Node::boxed("p1", &[], &["a"]))
            .unwrap();
        registry
            .register_evaluator(Node::boxed("p2", &[], &["b"]))
            .unwrap();
        registry
            .register_evaluator(Node::boxed("combine", &["a", "b"], &["c"]))
            .unwrap();
        registry.require_field("c");
        registry.setup(&dims()).unwrap();
        registry
            .execution_order()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
    };
    assert_eq!(build(), build());
}

#[test]
fn unresolved_dependency_names_field_and_consumer() {
    let mut registry = EvaluatorRegistry::<f64>::new();
    registry
        .register_evaluator(Node::boxed("needs input", &["missing"], &["out"]))
        .unwrap();
    registry.require_field("out");

    match registry.setup(&dims()) {
        Err(GraphError::UnresolvedDependency { field, consumer }) => {
            assert_eq!(field, "missing");
            assert_eq!(consumer, "needs input");
        }
        other => panic!("Expected UnresolvedDependency, got {:?}", other.err()),
    }
}

#[test]
fn required_field_without_producer_is_unresolved() {
    let mut registry = EvaluatorRegistry::<f64>::new();
    registry.require_field("nobody makes this");
    match registry.setup(&dims()) {
        Err(GraphError::UnresolvedDependency { field, .. }) => {
            assert_eq!(field, "nobody makes this");
        }
        other => panic!("Expected UnresolvedDependency, got {:?}", other.err()),
    }
}

#[test]
fn cycles_are_rejected() {
    let mut registry = EvaluatorRegistry::<f64>::new();
    registry
        .register_evaluator(Node::boxed("x", &["b"], &["a"]))
        .unwrap();
    registry
        .register_evaluator(Node::boxed("y", &["a"], &["b"]))
        .unwrap();
    registry.require_field("a");

    match registry.setup(&dims()) {
        Err(GraphError::CyclicDependency { nodes }) => {
            assert_eq!(nodes.len(), 2);
        }
        other => panic!("Expected CyclicDependency, got {:?}", other.err()),
    }
}

#[test]
fn duplicate_producers_are_rejected_at_registration() {
    let mut registry = EvaluatorRegistry::<f64>::new();
    registry
        .register_evaluator(Node::boxed("first", &[], &["a"]))
        .unwrap();
    let err = registry
        .register_evaluator(Node::boxed("second", &[], &["a"]))
        .unwrap_err();
    assert!(matches!(err, GraphError::DuplicateProducer { field, .. } if field == "a"));
}

#[test]
fn self_dependency_is_rejected_at_registration() {
    let mut registry = EvaluatorRegistry::<f64>::new();
    let err = registry
        .register_evaluator(Node::boxed("loop", &["a"], &["a"]))
        .unwrap_err();
    assert!(matches!(err, GraphError::SelfDependency { field, .. } if field == "a"));
}

#[test]
fn conflicting_layout_declarations_are_rejected() {
    let mut registry = EvaluatorRegistry::<f64>::new();
    registry
        .register_evaluator(Node::boxed("producer", &[], &["a"]))
        .unwrap();

    // Same field name, different layout on the consumer side.
    let consumer = Box::new(Node {
        name: "consumer".to_string(),
        deps: vec![FieldSpec::new("a", FieldLayout::qp_vector())],
        evals: vec![FieldSpec::new("b", FieldLayout::qp_scalar())],
    });
    registry.register_evaluator(consumer).unwrap();
    registry.require_field("b");

    match registry.setup(&dims()) {
        Err(GraphError::LayoutMismatch { field, .. }) => assert_eq!(field, "a"),
        other => panic!("Expected LayoutMismatch, got {:?}", other.err()),
    }
}

#[test]
fn zero_output_nodes_run_only_when_required() {
    let build = |require_sink: bool| {
        let mut registry = EvaluatorRegistry::<f64>::new();
        registry
            .register_evaluator(Node::boxed("producer", &[], &["a"]))
            .unwrap();
        registry
            .register_evaluator(Node::boxed("sink", &["a"], &[]))
            .unwrap();
        if require_sink {
            registry.require_evaluator("sink");
        } else {
            registry.require_field("a");
        }
        registry.setup(&dims()).unwrap();
        registry
            .execution_order()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
    };

    // Not required: the sink is a leaf nothing points at and drops out.
    assert_eq!(build(false), vec!["producer"]);
    // Required: the sink runs and pulls its producer in.
    assert_eq!(build(true), vec!["producer", "sink"]);
}

#[test]
fn nodes_outside_the_required_subgraph_are_pruned() {
    let mut registry = EvaluatorRegistry::<f64>::new();
    registry
        .register_evaluator(Node::boxed("needed", &[], &["a"]))
        .unwrap();
    registry
        .register_evaluator(Node::boxed("irrelevant", &[], &["z"]))
        .unwrap();
    registry.require_field("a");
    registry.setup(&dims()).unwrap();
    assert_eq!(registry.execution_order(), vec!["needed"]);
}
