use crate::evaluator::{EvalContext, Evaluator};
use crate::field::{FieldBinder, FieldHandle, FieldSpec};
use crate::graph::GraphError;
use crate::layout::FieldLayout;
use crate::params::Parameters;
use crate::workset::{Workset, WorksetDims};
use feval_traits::Scalar;
use numeric_literals::replace_float_literals;
use std::error::Error;
use std::fmt;

/// Selector for the stabilization law.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StabilizationType {
    ShakibHughes,
    /// Mesh-size-based law; recognized as configuration but not implemented.
    MeshSize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilizationError {
    /// The selector names a law this kernel cannot evaluate. Raised at
    /// construction so the failure can never manifest as stale output.
    UnsupportedStabilizationType { selector: String },
    /// The selector does not name any known law.
    UnknownStabilizationType { selector: String },
}

impl fmt::Display for StabilizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StabilizationError::UnsupportedStabilizationType { selector } => {
                write!(f, "Stabilization type '{}' is not implemented", selector)
            }
            StabilizationError::UnknownStabilizationType { selector } => {
                write!(f, "Unknown stabilization type '{}'", selector)
            }
        }
    }
}

impl Error for StabilizationError {}

/// Floor applied to the radicand of the Shakib–Hughes expression.
///
/// With μ = 0 and V = 0 the radicand is exactly zero and Tau would be
/// infinite; flooring keeps a degenerate point large but finite instead of
/// aborting the pass.
pub const TAU_RADICAND_FLOOR: f64 = 1e-30;

/// Shakib–Hughes stabilization parameter:
///
/// `Tau = 1 / sqrt( Σ_ij ρ² V_i Gc_ij V_j + 12 μ² sqrt(Σ_ij Gc_ij²) )`.
#[derive(Debug)]
pub struct StabilizationTau {
    name: String,
    velocity: FieldSpec,
    metric: FieldSpec,
    tau: FieldSpec,
    viscosity: f64,
    density: f64,
    velocity_handle: Option<FieldHandle>,
    metric_handle: Option<FieldHandle>,
    tau_handle: Option<FieldHandle>,
}

impl StabilizationTau {
    /// Reads `"Viscosity"`, `"Density"` and `"Stabilization Type"` from the
    /// block parameters. Fails fast on an unknown or unimplemented selector.
    pub fn from_parameters(
        params: &Parameters,
        velocity: impl Into<String>,
        metric: impl Into<String>,
        tau: impl Into<String>,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let selector = params.get_str("Stabilization Type")?;
        let stab_type = match selector {
            "Shakib-Hughes" => StabilizationType::ShakibHughes,
            "Tsunami" => StabilizationType::MeshSize,
            other => {
                return Err(Box::new(StabilizationError::UnknownStabilizationType {
                    selector: other.to_string(),
                }))
            }
        };
        if stab_type == StabilizationType::MeshSize {
            return Err(Box::new(StabilizationError::UnsupportedStabilizationType {
                selector: selector.to_string(),
            }));
        }

        let viscosity = params.get_real("Viscosity")?;
        let density = params.get_real("Density")?;
        Ok(Self::new(viscosity, density, velocity, metric, tau))
    }

    pub fn new(
        viscosity: f64,
        density: f64,
        velocity: impl Into<String>,
        metric: impl Into<String>,
        tau: impl Into<String>,
    ) -> Self {
        let tau = FieldSpec::new(tau, FieldLayout::qp_scalar());
        Self {
            name: format!("Tau {}", tau.name),
            velocity: FieldSpec::new(velocity, FieldLayout::qp_vector()),
            metric: FieldSpec::new(metric, FieldLayout::qp_tensor()),
            tau,
            viscosity,
            density,
            velocity_handle: None,
            metric_handle: None,
            tau_handle: None,
        }
    }
}

impl<T: Scalar> Evaluator<T> for StabilizationTau {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependent_fields(&self) -> Vec<FieldSpec> {
        vec![self.velocity.clone(), self.metric.clone()]
    }

    fn evaluated_fields(&self) -> Vec<FieldSpec> {
        vec![self.tau.clone()]
    }

    fn setup(&mut self, _dims: &WorksetDims, binder: &mut FieldBinder<'_>) -> Result<(), GraphError> {
        self.velocity_handle = Some(binder.bind(&self.velocity)?);
        self.metric_handle = Some(binder.bind(&self.metric)?);
        self.tau_handle = Some(binder.bind(&self.tau)?);
        Ok(())
    }

    #[replace_float_literals(T::from_f64(literal))]
    fn evaluate(&self, workset: &Workset<'_, T>, _ctx: &mut EvalContext<'_>) -> eyre::Result<()> {
        let dims = *workset.dims();
        let velocity = workset.field(self.velocity_handle.expect("Setup has run"));
        let metric = workset.field(self.metric_handle.expect("Setup has run"));
        let mut tau = workset.field_mut(self.tau_handle.expect("Setup has run"));

        let rho_sq = T::from_f64(self.density * self.density);
        let mu_sq = T::from_f64(self.viscosity * self.viscosity);

        for c in 0..dims.cells {
            for q in 0..dims.quad_points {
                let mut advective = T::zero();
                let mut norm_gc = T::zero();
                for i in 0..dims.dims {
                    for j in 0..dims.dims {
                        let gc = metric[(c, q, i, j)];
                        advective += rho_sq * velocity[(c, q, i)] * gc * velocity[(c, q, j)];
                        norm_gc += gc * gc;
                    }
                }
                let radicand = advective + 12.0 * mu_sq * norm_gc.sqrt();
                tau[(c, q)] = 1.0 / radicand.max(T::from_f64(TAU_RADICAND_FLOOR)).sqrt();
            }
        }
        Ok(())
    }
}
