use crate::evaluator::{EvalContext, Evaluator};
use crate::field::{FieldBinder, FieldHandle, FieldSpec};
use crate::graph::GraphError;
use crate::layout::FieldLayout;
use crate::workset::{Workset, WorksetDims};
use davenport::{define_thread_local_workspace, with_thread_local_workspace};
use feval_traits::Scalar;

#[derive(Debug, Default)]
struct ScatterWorkspace {
    /// Global DOF index per element-local DOF.
    dofs: Vec<usize>,
}

define_thread_local_workspace!(WORKSPACE);

/// Writes an element residual field into the global system.
///
/// Values accumulate into the residual vector. Under a derivative-carrying
/// scalar type the derivative array of every entry is additionally scattered
/// into Jacobian triplets, with columns resolved through the element
/// connectivity — the column of local DOF `l` is the global DOF the gather
/// seeded at slot `l`.
///
/// This node has no evaluated fields; it is pulled into the graph with
/// [`require_evaluator`](crate::graph::EvaluatorRegistry::require_evaluator).
pub struct ScatterResidual {
    name: String,
    residual: FieldSpec,
    scalar_dof: bool,
    residual_handle: Option<FieldHandle>,
}

impl ScatterResidual {
    pub fn vector(residual: impl Into<String>) -> Self {
        let residual = FieldSpec::new(residual, FieldLayout::node_vector());
        Self {
            name: format!("Scatter {}", residual.name),
            residual,
            scalar_dof: false,
            residual_handle: None,
        }
    }

    pub fn scalar(residual: impl Into<String>) -> Self {
        let residual = FieldSpec::new(residual, FieldLayout::node_scalar());
        Self {
            name: format!("Scatter {}", residual.name),
            residual,
            scalar_dof: true,
            residual_handle: None,
        }
    }
}

impl<T: Scalar> Evaluator<T> for ScatterResidual {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependent_fields(&self) -> Vec<FieldSpec> {
        vec![self.residual.clone()]
    }

    fn evaluated_fields(&self) -> Vec<FieldSpec> {
        vec![]
    }

    fn setup(&mut self, dims: &WorksetDims, binder: &mut FieldBinder<'_>) -> Result<(), GraphError> {
        if self.scalar_dof {
            assert_eq!(dims.solution_dim, 1, "Scalar scatter expects one DOF per node");
        } else {
            assert_eq!(
                dims.solution_dim, dims.dims,
                "Vector scatter expects one DOF component per spatial dimension"
            );
        }
        self.residual_handle = Some(binder.bind(&self.residual)?);
        Ok(())
    }

    fn evaluate(&self, workset: &Workset<'_, T>, ctx: &mut EvalContext<'_>) -> eyre::Result<()> {
        let dims = *workset.dims();
        let residual = workset.field(self.residual_handle.expect("Setup has run"));
        let ncomp = dims.solution_dim;
        let element_dofs = dims.element_dofs();

        with_thread_local_workspace(&WORKSPACE, |scratch: &mut ScatterWorkspace| {
            scratch.dofs.resize(element_dofs, usize::MAX);
            for c in 0..dims.cells {
                for n in 0..dims.nodes_per_cell {
                    let node = workset.node_index(c, n);
                    for comp in 0..ncomp {
                        scratch.dofs[n * ncomp + comp] = node * ncomp + comp;
                    }
                }

                for n in 0..dims.nodes_per_cell {
                    for comp in 0..ncomp {
                        let entry = if self.scalar_dof {
                            residual[(c, n)]
                        } else {
                            residual[(c, n, comp)]
                        };
                        let row = scratch.dofs[n * ncomp + comp];
                        ctx.global.residual[row] += entry.value();
                        if T::DERIVATIVE_DIM > 0 {
                            if let Some(jacobian) = ctx.global.jacobian.as_mut() {
                                for local in 0..element_dofs {
                                    jacobian.push(row, scratch.dofs[local], entry.derivative(local));
                                }
                            }
                        }
                    }
                }
            }
        });
        Ok(())
    }
}
