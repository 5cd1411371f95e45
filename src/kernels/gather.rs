use crate::evaluator::{EvalContext, Evaluator};
use crate::field::{FieldBinder, FieldHandle, FieldSpec};
use crate::graph::GraphError;
use crate::layout::FieldLayout;
use crate::workset::{Workset, WorksetDims};
use eyre::eyre;
use feval_traits::Scalar;

/// Copies global solution DOFs into a nodal workset field.
///
/// Under a derivative-carrying scalar type every gathered entry is seeded
/// with a unit partial at its element-local DOF index, making the solution
/// the set of independent variables of the Jacobian pass.
pub struct GatherSolution {
    name: String,
    field: FieldSpec,
    scalar_dof: bool,
    handle: Option<FieldHandle>,
}

impl GatherSolution {
    /// Gathers a vector-valued DOF (one component per spatial dimension).
    pub fn vector(field: impl Into<String>) -> Self {
        let field = FieldSpec::new(field, FieldLayout::node_vector());
        Self {
            name: format!("Gather {}", field.name),
            field,
            scalar_dof: false,
            handle: None,
        }
    }

    /// Gathers a scalar DOF.
    pub fn scalar(field: impl Into<String>) -> Self {
        let field = FieldSpec::new(field, FieldLayout::node_scalar());
        Self {
            name: format!("Gather {}", field.name),
            field,
            scalar_dof: true,
            handle: None,
        }
    }
}

impl<T: Scalar> Evaluator<T> for GatherSolution {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependent_fields(&self) -> Vec<FieldSpec> {
        vec![]
    }

    fn evaluated_fields(&self) -> Vec<FieldSpec> {
        vec![self.field.clone()]
    }

    fn setup(&mut self, dims: &WorksetDims, binder: &mut FieldBinder<'_>) -> Result<(), GraphError> {
        if self.scalar_dof {
            assert_eq!(dims.solution_dim, 1, "Scalar gather expects one DOF per node");
        } else {
            assert_eq!(
                dims.solution_dim, dims.dims,
                "Vector gather expects one DOF component per spatial dimension"
            );
        }
        if T::DERIVATIVE_DIM > 0 {
            assert!(
                dims.element_dofs() <= T::DERIVATIVE_DIM,
                "Scalar type carries {} derivative slots but the element has {} DOFs",
                T::DERIVATIVE_DIM,
                dims.element_dofs()
            );
        }
        self.handle = Some(binder.bind(&self.field)?);
        Ok(())
    }

    fn evaluate(&self, workset: &Workset<'_, T>, _ctx: &mut EvalContext<'_>) -> eyre::Result<()> {
        let dims = *workset.dims();
        let host = workset.host();
        let mut field = workset.field_mut(self.handle.expect("Setup has run"));
        for c in 0..dims.cells {
            for n in 0..dims.nodes_per_cell {
                let node = workset.node_index(c, n);
                for comp in 0..dims.solution_dim {
                    let value = host.solution[node * dims.solution_dim + comp];
                    let local = n * dims.solution_dim + comp;
                    let entry = if T::DERIVATIVE_DIM > 0 {
                        T::seeded(value, local)
                    } else {
                        T::from_f64(value)
                    };
                    if self.scalar_dof {
                        field[(c, n)] = entry;
                    } else {
                        field[(c, n, comp)] = entry;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Copies the global solution time derivative into a nodal workset field.
///
/// The rate is gathered as a constant: the Jacobian pass differentiates with
/// respect to the solution only, so rate entries carry no seed.
pub struct GatherRate {
    name: String,
    field: FieldSpec,
    scalar_dof: bool,
    handle: Option<FieldHandle>,
}

impl GatherRate {
    pub fn vector(field: impl Into<String>) -> Self {
        let field = FieldSpec::new(field, FieldLayout::node_vector());
        Self {
            name: format!("Gather {}", field.name),
            field,
            scalar_dof: false,
            handle: None,
        }
    }

    pub fn scalar(field: impl Into<String>) -> Self {
        let field = FieldSpec::new(field, FieldLayout::node_scalar());
        Self {
            name: format!("Gather {}", field.name),
            field,
            scalar_dof: true,
            handle: None,
        }
    }
}

impl<T: Scalar> Evaluator<T> for GatherRate {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependent_fields(&self) -> Vec<FieldSpec> {
        vec![]
    }

    fn evaluated_fields(&self) -> Vec<FieldSpec> {
        vec![self.field.clone()]
    }

    fn setup(&mut self, _dims: &WorksetDims, binder: &mut FieldBinder<'_>) -> Result<(), GraphError> {
        self.handle = Some(binder.bind(&self.field)?);
        Ok(())
    }

    fn evaluate(&self, workset: &Workset<'_, T>, _ctx: &mut EvalContext<'_>) -> eyre::Result<()> {
        let dims = *workset.dims();
        let rate = workset
            .host()
            .solution_rate
            .ok_or_else(|| eyre!("Host batch provides no solution rate for '{}'", self.field.name))?;
        let mut field = workset.field_mut(self.handle.expect("Setup has run"));
        for c in 0..dims.cells {
            for n in 0..dims.nodes_per_cell {
                let node = workset.node_index(c, n);
                for comp in 0..dims.solution_dim {
                    let value = T::from_f64(rate[node * dims.solution_dim + comp]);
                    if self.scalar_dof {
                        field[(c, n)] = value;
                    } else {
                        field[(c, n, comp)] = value;
                    }
                }
            }
        }
        Ok(())
    }
}
