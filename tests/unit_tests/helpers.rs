use feval::assembly::GlobalSystem;
use feval::evaluator::EvalContext;
use feval::graph::EvaluatorRegistry;
use feval::scalar::Scalar;
use feval::state::StateStore;
use feval::workset::{HostBatch, Workset};
use nalgebra::DMatrix;

/// Runs a resolved registry over one host batch and returns the workset
/// (with all computed fields) together with the accumulated global system.
pub fn run_graph<'a, T: Scalar>(
    registry: &EvaluatorRegistry<T>,
    host: &'a HostBatch<'a>,
    state: &mut StateStore,
    with_jacobian: bool,
) -> (Workset<'a, T>, GlobalSystem) {
    let num_dofs = host.num_global_nodes * host.dims.solution_dim;
    let mut global = if with_jacobian {
        GlobalSystem::with_jacobian(num_dofs)
    } else {
        GlobalSystem::residual_only(num_dofs)
    };
    let workset = registry.create_workset(host).unwrap();
    {
        let mut ctx = EvalContext {
            state,
            global: &mut global,
            block: "block",
        };
        registry.evaluate_workset(&workset, &mut ctx).unwrap();
    }
    (workset, global)
}

/// Sums the Jacobian triplets into a dense matrix for comparisons.
pub fn dense_jacobian(global: &GlobalSystem) -> DMatrix<f64> {
    let coo = global.jacobian.as_ref().expect("No Jacobian storage");
    let mut dense = DMatrix::zeros(global.num_dofs(), global.num_dofs());
    for (i, j, value) in coo.triplet_iter() {
        dense[(i, j)] += *value;
    }
    dense
}
