use crate::evaluator::{EvalContext, Evaluator};
use crate::field::{FieldBinder, FieldHandle, FieldSpec};
use crate::graph::GraphError;
use crate::layout::FieldLayout;
use crate::params::{ParameterError, Parameters};
use crate::workset::{Workset, WorksetDims};
use feval_traits::Scalar;

/// Mass-balance residual for a scalar pressure unknown:
///
/// `R(c, n) = Σ_q wBF(c, n, q) ṗ(c, q) / M
///          + Σ_q Σ_d wGradBF(c, n, q, d) k ∇p(c, q, d)`.
///
/// The storage term uses the Biot modulus `M`, the flux term the
/// permeability `k` (the sign of `−k∇p` cancels against integration by
/// parts). Accumulation is in plain quadrature order.
pub struct PressureMassResidual {
    name: String,
    rate: FieldSpec,
    gradient: FieldSpec,
    weighted_basis: FieldSpec,
    weighted_gradients: FieldSpec,
    residual: FieldSpec,
    permeability: f64,
    biot_modulus: f64,
    rate_handle: Option<FieldHandle>,
    gradient_handle: Option<FieldHandle>,
    wbf_handle: Option<FieldHandle>,
    wgrad_handle: Option<FieldHandle>,
    residual_handle: Option<FieldHandle>,
}

impl PressureMassResidual {
    /// Reads `"Permeability"` and `"Biot Modulus"` from the block parameters.
    pub fn from_parameters(
        params: &Parameters,
        rate: impl Into<String>,
        gradient: impl Into<String>,
        weighted_basis: impl Into<String>,
        weighted_gradients: impl Into<String>,
        residual: impl Into<String>,
    ) -> Result<Self, ParameterError> {
        let permeability = params.get_real("Permeability")?;
        let biot_modulus = params.get_real_or("Biot Modulus", 1.0)?;
        let residual = FieldSpec::new(residual, FieldLayout::node_scalar());
        Ok(Self {
            name: format!("Residual {}", residual.name),
            rate: FieldSpec::new(rate, FieldLayout::qp_scalar()),
            gradient: FieldSpec::new(gradient, FieldLayout::qp_vector()),
            weighted_basis: FieldSpec::new(weighted_basis, FieldLayout::node_qp_scalar()),
            weighted_gradients: FieldSpec::new(weighted_gradients, FieldLayout::node_qp_vector()),
            residual,
            permeability,
            biot_modulus,
            rate_handle: None,
            gradient_handle: None,
            wbf_handle: None,
            wgrad_handle: None,
            residual_handle: None,
        })
    }
}

impl<T: Scalar> Evaluator<T> for PressureMassResidual {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependent_fields(&self) -> Vec<FieldSpec> {
        vec![
            self.rate.clone(),
            self.gradient.clone(),
            self.weighted_basis.clone(),
            self.weighted_gradients.clone(),
        ]
    }

    fn evaluated_fields(&self) -> Vec<FieldSpec> {
        vec![self.residual.clone()]
    }

    fn setup(&mut self, _dims: &WorksetDims, binder: &mut FieldBinder<'_>) -> Result<(), GraphError> {
        self.rate_handle = Some(binder.bind(&self.rate)?);
        self.gradient_handle = Some(binder.bind(&self.gradient)?);
        self.wbf_handle = Some(binder.bind(&self.weighted_basis)?);
        self.wgrad_handle = Some(binder.bind(&self.weighted_gradients)?);
        self.residual_handle = Some(binder.bind(&self.residual)?);
        Ok(())
    }

    fn evaluate(&self, workset: &Workset<'_, T>, _ctx: &mut EvalContext<'_>) -> eyre::Result<()> {
        let dims = *workset.dims();
        let rate = workset.field(self.rate_handle.expect("Setup has run"));
        let gradient = workset.field(self.gradient_handle.expect("Setup has run"));
        let wbf = workset.field(self.wbf_handle.expect("Setup has run"));
        let wgrad = workset.field(self.wgrad_handle.expect("Setup has run"));
        let mut residual = workset.field_mut(self.residual_handle.expect("Setup has run"));

        let inv_biot = T::from_f64(1.0 / self.biot_modulus);
        let permeability = T::from_f64(self.permeability);

        for c in 0..dims.cells {
            for n in 0..dims.nodes_per_cell {
                let mut sum = T::zero();
                for q in 0..dims.quad_points {
                    sum += wbf[(c, n, q)] * rate[(c, q)] * inv_biot;
                }
                for q in 0..dims.quad_points {
                    for d in 0..dims.dims {
                        sum += wgrad[(c, n, q, d)] * permeability * gradient[(c, q, d)];
                    }
                }
                residual[(c, n)] = sum;
            }
        }
        Ok(())
    }
}
