use crate::evaluator::{EvalContext, Evaluator};
use crate::field::{FieldBinder, FieldHandle, FieldSpec};
use crate::graph::GraphError;
use crate::layout::FieldLayout;
use crate::workset::{Workset, WorksetDims};
use feval_traits::Scalar;

/// Projects a nodal field to quadrature-point values using the host basis
/// functions: `u(c, q) = Σ_n BF(c, n, q) · u(c, n)`.
pub struct DofInterpolation {
    name: String,
    nodal: FieldSpec,
    basis: FieldSpec,
    qp: FieldSpec,
    scalar_dof: bool,
    nodal_handle: Option<FieldHandle>,
    basis_handle: Option<FieldHandle>,
    qp_handle: Option<FieldHandle>,
}

impl DofInterpolation {
    pub fn vector(nodal: impl Into<String>, basis: impl Into<String>, qp: impl Into<String>) -> Self {
        let nodal = FieldSpec::new(nodal, FieldLayout::node_vector());
        let qp = FieldSpec::new(qp, FieldLayout::qp_vector());
        Self {
            name: format!("Interpolate {}", qp.name),
            nodal,
            basis: FieldSpec::new(basis, FieldLayout::node_qp_scalar()),
            qp,
            scalar_dof: false,
            nodal_handle: None,
            basis_handle: None,
            qp_handle: None,
        }
    }

    pub fn scalar(nodal: impl Into<String>, basis: impl Into<String>, qp: impl Into<String>) -> Self {
        let nodal = FieldSpec::new(nodal, FieldLayout::node_scalar());
        let qp = FieldSpec::new(qp, FieldLayout::qp_scalar());
        Self {
            name: format!("Interpolate {}", qp.name),
            nodal,
            basis: FieldSpec::new(basis, FieldLayout::node_qp_scalar()),
            qp,
            scalar_dof: true,
            nodal_handle: None,
            basis_handle: None,
            qp_handle: None,
        }
    }
}

impl<T: Scalar> Evaluator<T> for DofInterpolation {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependent_fields(&self) -> Vec<FieldSpec> {
        vec![self.nodal.clone(), self.basis.clone()]
    }

    fn evaluated_fields(&self) -> Vec<FieldSpec> {
        vec![self.qp.clone()]
    }

    fn setup(&mut self, _dims: &WorksetDims, binder: &mut FieldBinder<'_>) -> Result<(), GraphError> {
        self.nodal_handle = Some(binder.bind(&self.nodal)?);
        self.basis_handle = Some(binder.bind(&self.basis)?);
        self.qp_handle = Some(binder.bind(&self.qp)?);
        Ok(())
    }

    fn evaluate(&self, workset: &Workset<'_, T>, _ctx: &mut EvalContext<'_>) -> eyre::Result<()> {
        let dims = *workset.dims();
        let nodal = workset.field(self.nodal_handle.expect("Setup has run"));
        let basis = workset.field(self.basis_handle.expect("Setup has run"));
        let mut qp = workset.field_mut(self.qp_handle.expect("Setup has run"));

        let components = if self.scalar_dof { 1 } else { dims.dims };
        for c in 0..dims.cells {
            for q in 0..dims.quad_points {
                for i in 0..components {
                    let mut sum = T::zero();
                    for n in 0..dims.nodes_per_cell {
                        let u = if self.scalar_dof {
                            nodal[(c, n)]
                        } else {
                            nodal[(c, n, i)]
                        };
                        sum += basis[(c, n, q)] * u;
                    }
                    if self.scalar_dof {
                        qp[(c, q)] = sum;
                    } else {
                        qp[(c, q, i)] = sum;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Projects a nodal field's gradient to quadrature points using the host
/// basis gradients: `∇u(c, q)_{ij} = Σ_n u(c, n)_i · ∇BF(c, n, q)_j`.
pub struct DofGradInterpolation {
    name: String,
    nodal: FieldSpec,
    gradients: FieldSpec,
    qp: FieldSpec,
    scalar_dof: bool,
    nodal_handle: Option<FieldHandle>,
    grad_handle: Option<FieldHandle>,
    qp_handle: Option<FieldHandle>,
}

impl DofGradInterpolation {
    pub fn vector(
        nodal: impl Into<String>,
        gradients: impl Into<String>,
        qp: impl Into<String>,
    ) -> Self {
        let nodal = FieldSpec::new(nodal, FieldLayout::node_vector());
        let qp = FieldSpec::new(qp, FieldLayout::qp_tensor());
        Self {
            name: format!("Interpolate {}", qp.name),
            nodal,
            gradients: FieldSpec::new(gradients, FieldLayout::node_qp_vector()),
            qp,
            scalar_dof: false,
            nodal_handle: None,
            grad_handle: None,
            qp_handle: None,
        }
    }

    pub fn scalar(
        nodal: impl Into<String>,
        gradients: impl Into<String>,
        qp: impl Into<String>,
    ) -> Self {
        let nodal = FieldSpec::new(nodal, FieldLayout::node_scalar());
        let qp = FieldSpec::new(qp, FieldLayout::qp_vector());
        Self {
            name: format!("Interpolate {}", qp.name),
            nodal,
            gradients: FieldSpec::new(gradients, FieldLayout::node_qp_vector()),
            qp,
            scalar_dof: true,
            nodal_handle: None,
            grad_handle: None,
            qp_handle: None,
        }
    }
}

impl<T: Scalar> Evaluator<T> for DofGradInterpolation {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependent_fields(&self) -> Vec<FieldSpec> {
        vec![self.nodal.clone(), self.gradients.clone()]
    }

    fn evaluated_fields(&self) -> Vec<FieldSpec> {
        vec![self.qp.clone()]
    }

    fn setup(&mut self, _dims: &WorksetDims, binder: &mut FieldBinder<'_>) -> Result<(), GraphError> {
        self.nodal_handle = Some(binder.bind(&self.nodal)?);
        self.grad_handle = Some(binder.bind(&self.gradients)?);
        self.qp_handle = Some(binder.bind(&self.qp)?);
        Ok(())
    }

    fn evaluate(&self, workset: &Workset<'_, T>, _ctx: &mut EvalContext<'_>) -> eyre::Result<()> {
        let dims = *workset.dims();
        let nodal = workset.field(self.nodal_handle.expect("Setup has run"));
        let gradients = workset.field(self.grad_handle.expect("Setup has run"));
        let mut qp = workset.field_mut(self.qp_handle.expect("Setup has run"));

        for c in 0..dims.cells {
            for q in 0..dims.quad_points {
                if self.scalar_dof {
                    for j in 0..dims.dims {
                        let mut sum = T::zero();
                        for n in 0..dims.nodes_per_cell {
                            sum += gradients[(c, n, q, j)] * nodal[(c, n)];
                        }
                        qp[(c, q, j)] = sum;
                    }
                } else {
                    for i in 0..dims.dims {
                        for j in 0..dims.dims {
                            let mut sum = T::zero();
                            for n in 0..dims.nodes_per_cell {
                                sum += gradients[(c, n, q, j)] * nodal[(c, n, i)];
                            }
                            qp[(c, q, i, j)] = sum;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
