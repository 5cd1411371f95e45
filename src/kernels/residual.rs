use crate::evaluator::{EvalContext, Evaluator};
use crate::field::{FieldBinder, FieldHandle, FieldSpec};
use crate::graph::GraphError;
use crate::layout::FieldLayout;
use crate::workset::{Workset, WorksetDims};
use feval_traits::Scalar;

/// Momentum residual: stress against weighted basis gradients, plus an
/// optional inertial term against weighted basis values:
///
/// `R(c, n, i) = Σ_q Σ_j σ(c, q, i, j) wGradBF(c, n, q, j)
///             + Σ_q ρ a(c, q, i) wBF(c, n, q)`.
///
/// Quadrature points are accumulated in plain index order; no reassociation,
/// so repeated runs produce identical rounding and golden-file comparisons
/// stay stable.
pub struct MomentumResidual {
    name: String,
    stress: FieldSpec,
    weighted_gradients: FieldSpec,
    residual: FieldSpec,
    /// Present when a transient term is configured.
    inertia: Option<Inertia>,
    stress_handle: Option<FieldHandle>,
    wgrad_handle: Option<FieldHandle>,
    residual_handle: Option<FieldHandle>,
}

struct Inertia {
    acceleration: FieldSpec,
    weighted_basis: FieldSpec,
    density: f64,
    acceleration_handle: Option<FieldHandle>,
    wbf_handle: Option<FieldHandle>,
}

impl MomentumResidual {
    pub fn new(
        stress: impl Into<String>,
        weighted_gradients: impl Into<String>,
        residual: impl Into<String>,
    ) -> Self {
        let residual = FieldSpec::new(residual, FieldLayout::node_vector());
        Self {
            name: format!("Residual {}", residual.name),
            stress: FieldSpec::new(stress, FieldLayout::qp_tensor()),
            weighted_gradients: FieldSpec::new(weighted_gradients, FieldLayout::node_qp_vector()),
            residual,
            inertia: None,
            stress_handle: None,
            wgrad_handle: None,
            residual_handle: None,
        }
    }

    /// Adds the inertial term `ρ a · wBF`.
    pub fn with_inertia(
        mut self,
        acceleration: impl Into<String>,
        weighted_basis: impl Into<String>,
        density: f64,
    ) -> Self {
        self.inertia = Some(Inertia {
            acceleration: FieldSpec::new(acceleration, FieldLayout::qp_vector()),
            weighted_basis: FieldSpec::new(weighted_basis, FieldLayout::node_qp_scalar()),
            density,
            acceleration_handle: None,
            wbf_handle: None,
        });
        self
    }
}

impl<T: Scalar> Evaluator<T> for MomentumResidual {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependent_fields(&self) -> Vec<FieldSpec> {
        let mut deps = vec![self.stress.clone(), self.weighted_gradients.clone()];
        if let Some(inertia) = &self.inertia {
            deps.push(inertia.acceleration.clone());
            deps.push(inertia.weighted_basis.clone());
        }
        deps
    }

    fn evaluated_fields(&self) -> Vec<FieldSpec> {
        vec![self.residual.clone()]
    }

    fn setup(&mut self, _dims: &WorksetDims, binder: &mut FieldBinder<'_>) -> Result<(), GraphError> {
        self.stress_handle = Some(binder.bind(&self.stress)?);
        self.wgrad_handle = Some(binder.bind(&self.weighted_gradients)?);
        self.residual_handle = Some(binder.bind(&self.residual)?);
        if let Some(inertia) = &mut self.inertia {
            inertia.acceleration_handle = Some(binder.bind(&inertia.acceleration)?);
            inertia.wbf_handle = Some(binder.bind(&inertia.weighted_basis)?);
        }
        Ok(())
    }

    fn evaluate(&self, workset: &Workset<'_, T>, _ctx: &mut EvalContext<'_>) -> eyre::Result<()> {
        let dims = *workset.dims();
        let stress = workset.field(self.stress_handle.expect("Setup has run"));
        let wgrad = workset.field(self.wgrad_handle.expect("Setup has run"));
        let mut residual = workset.field_mut(self.residual_handle.expect("Setup has run"));

        for c in 0..dims.cells {
            for n in 0..dims.nodes_per_cell {
                for i in 0..dims.dims {
                    let mut sum = T::zero();
                    for q in 0..dims.quad_points {
                        for j in 0..dims.dims {
                            sum += stress[(c, q, i, j)] * wgrad[(c, n, q, j)];
                        }
                    }
                    residual[(c, n, i)] = sum;
                }
            }
        }

        if let Some(inertia) = &self.inertia {
            let acceleration = workset.field(inertia.acceleration_handle.expect("Setup has run"));
            let wbf = workset.field(inertia.wbf_handle.expect("Setup has run"));
            let rho = T::from_f64(inertia.density);
            for c in 0..dims.cells {
                for n in 0..dims.nodes_per_cell {
                    for i in 0..dims.dims {
                        let mut sum = residual[(c, n, i)];
                        for q in 0..dims.quad_points {
                            sum += rho * acceleration[(c, q, i)] * wbf[(c, n, q)];
                        }
                        residual[(c, n, i)] = sum;
                    }
                }
            }
        }
        Ok(())
    }
}
