//! Per-element-block composition of evaluator graphs and the drivers that
//! run them over worksets.
//!
//! Everything here is glue: it instantiates kernels, wires field names and
//! requirements, and moves data between the host and the graph. The kernels
//! themselves know nothing about the compositions.

use crate::evaluator::EvalContext;
use crate::field::FieldSpec;
use crate::graph::EvaluatorRegistry;
use crate::kernels::{
    DofGradInterpolation, DofInterpolation, GatherRate, GatherSolution, InfinitesimalStrain,
    Kinematics, MomentumResidual, PressureMassResidual, ScatterResidual, StabilizationTau,
};
use crate::layout::FieldLayout;
use crate::material::{ConstitutiveFieldNames, ConstitutiveModelEvaluator, MaterialModel};
use crate::params::Parameters;
use crate::state::{LoadState, SaveState, StateInit, StateStore};
use crate::workset::{ExternalSource, HostBatch, WorksetDims};
use eyre::eyre;
use feval_traits::Scalar;
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

/// Canonical field names used by the built-in compositions.
pub mod fields {
    pub const DISPLACEMENT: &str = "Displacement";
    pub const DISPLACEMENT_GRADIENT: &str = "Displacement Gradient";
    pub const DISPLACEMENT_RATE: &str = "Displacement Rate";
    pub const ACCELERATION: &str = "Acceleration";
    pub const DEF_GRAD: &str = "F";
    pub const DET_DEF_GRAD: &str = "J";
    pub const STRAIN: &str = "Strain";
    pub const STRESS: &str = "Stress";
    pub const FP: &str = "Fp";
    pub const EQPS: &str = "eqps";
    pub const YIELD_SURFACE: &str = "Yield Surface";
    pub const MOMENTUM_RESIDUAL: &str = "Momentum Residual";

    pub const PORE_PRESSURE: &str = "Pore Pressure";
    pub const PORE_PRESSURE_RATE: &str = "Pore Pressure Rate";
    pub const PORE_PRESSURE_RATE_QP: &str = "Pore Pressure Rate QP";
    pub const PORE_PRESSURE_GRADIENT: &str = "Pore Pressure Gradient";
    pub const MASS_RESIDUAL: &str = "Mass Residual";

    pub const VELOCITY: &str = "Velocity";
    pub const VELOCITY_QP: &str = "Velocity QP";
    pub const TAU: &str = "Tau";
    pub const CONTRAVARIANT_METRIC: &str = "Contravariant Metric";

    pub const BF: &str = "BF";
    pub const WEIGHTED_BF: &str = "wBF";
    pub const GRAD_BF: &str = "Grad BF";
    pub const WEIGHTED_GRAD_BF: &str = "wGrad BF";
}

/// Global residual vector and optional Jacobian triplet storage.
///
/// Scatter kernels accumulate into this; the COO triplets are summed into a
/// CSR matrix once assembly over all blocks is done.
pub struct GlobalSystem {
    pub residual: DVector<f64>,
    pub jacobian: Option<CooMatrix<f64>>,
}

impl GlobalSystem {
    pub fn residual_only(num_dofs: usize) -> Self {
        Self {
            residual: DVector::zeros(num_dofs),
            jacobian: None,
        }
    }

    pub fn with_jacobian(num_dofs: usize) -> Self {
        Self {
            residual: DVector::zeros(num_dofs),
            jacobian: Some(CooMatrix::new(num_dofs, num_dofs)),
        }
    }

    pub fn num_dofs(&self) -> usize {
        self.residual.len()
    }

    /// Sums the accumulated triplets into a CSR Jacobian.
    pub fn jacobian_csr(&self) -> Option<CsrMatrix<f64>> {
        self.jacobian.as_ref().map(CsrMatrix::from)
    }
}

/// Builds the solid-mechanics graph for one element block:
/// gather → gradient interpolation → kinematics → constitutive model →
/// momentum residual → scatter, with state load/save wired in for
/// history-carrying materials.
///
/// Consumed parameters: `"Material Model"` and whatever the selected model
/// reads, `"Transient"`/`"Density"` for the inertial term, and
/// `"Output Strain"` to additionally evaluate the infinitesimal strain.
pub fn build_mechanics_graph<T: Scalar>(
    params: &Parameters,
    state: &mut StateStore,
) -> eyre::Result<EvaluatorRegistry<T>> {
    let model = MaterialModel::from_parameters(params).map_err(|e| eyre!(e))?;
    let uses_history = model.uses_history();
    let transient = params.get_bool_or("Transient", false)?;

    let mut registry = EvaluatorRegistry::new();
    registry.declare_external(
        FieldSpec::new(fields::GRAD_BF, FieldLayout::node_qp_vector()),
        ExternalSource::BasisGradients,
    )?;
    registry.declare_external(
        FieldSpec::new(fields::WEIGHTED_GRAD_BF, FieldLayout::node_qp_vector()),
        ExternalSource::WeightedBasisGradients,
    )?;

    registry.register_evaluator(Box::new(GatherSolution::vector(fields::DISPLACEMENT)))?;
    registry.register_evaluator(Box::new(DofGradInterpolation::vector(
        fields::DISPLACEMENT,
        fields::GRAD_BF,
        fields::DISPLACEMENT_GRADIENT,
    )))?;
    registry.register_evaluator(Box::new(Kinematics::new(
        fields::DISPLACEMENT_GRADIENT,
        fields::DEF_GRAD,
        fields::DET_DEF_GRAD,
    )))?;

    registry.register_evaluator(Box::new(InfinitesimalStrain::new(
        fields::DISPLACEMENT_GRADIENT,
        fields::STRAIN,
    )))?;
    if params.get_bool_or("Output Strain", false)? {
        registry.require_field(fields::STRAIN);
    }

    if uses_history {
        let fp = state.register_state_variable(
            fields::FP,
            FieldLayout::qp_tensor(),
            StateInit::Identity,
            true,
        )?;
        let eqps = state.register_state_variable(
            fields::EQPS,
            FieldLayout::qp_scalar(),
            StateInit::Scalar(0.0),
            true,
        )?;
        registry.register_evaluator(Box::new(LoadState::new(fp.clone())))?;
        registry.register_evaluator(Box::new(LoadState::new(eqps.clone())))?;
        registry.register_evaluator(Box::new(SaveState::new(fp.clone())))?;
        registry.register_evaluator(Box::new(SaveState::new(eqps.clone())))?;
        // Saves write concrete values; only the value pass runs them.
        if T::DERIVATIVE_DIM == 0 {
            registry.require_evaluator(format!("Save {}", fp.name));
            registry.require_evaluator(format!("Save {}", eqps.name));
        }
    }
    registry.register_evaluator(Box::new(ConstitutiveModelEvaluator::new(
        model,
        ConstitutiveFieldNames::default(),
    )))?;

    let mut residual = MomentumResidual::new(
        fields::STRESS,
        fields::WEIGHTED_GRAD_BF,
        fields::MOMENTUM_RESIDUAL,
    );
    if transient {
        let density = params.get_real("Density")?;
        registry.declare_external(
            FieldSpec::new(fields::BF, FieldLayout::node_qp_scalar()),
            ExternalSource::BasisValues,
        )?;
        registry.declare_external(
            FieldSpec::new(fields::WEIGHTED_BF, FieldLayout::node_qp_scalar()),
            ExternalSource::WeightedBasisValues,
        )?;
        registry.register_evaluator(Box::new(GatherRate::vector(fields::DISPLACEMENT_RATE)))?;
        registry.register_evaluator(Box::new(DofInterpolation::vector(
            fields::DISPLACEMENT_RATE,
            fields::BF,
            fields::ACCELERATION,
        )))?;
        residual = residual.with_inertia(fields::ACCELERATION, fields::WEIGHTED_BF, density);
    }
    registry.register_evaluator(Box::new(residual))?;

    registry.register_evaluator(Box::new(ScatterResidual::vector(fields::MOMENTUM_RESIDUAL)))?;
    registry.require_evaluator(format!("Scatter {}", fields::MOMENTUM_RESIDUAL));

    Ok(registry)
}

/// Builds the pressure mass-balance graph for one element block: scalar
/// gathers → value/gradient interpolation → mass residual → scatter.
///
/// Consumed parameters: `"Permeability"`, optional `"Biot Modulus"`.
pub fn build_pressure_graph<T: Scalar>(params: &Parameters) -> eyre::Result<EvaluatorRegistry<T>> {
    let mut registry = EvaluatorRegistry::new();
    registry.declare_external(
        FieldSpec::new(fields::BF, FieldLayout::node_qp_scalar()),
        ExternalSource::BasisValues,
    )?;
    registry.declare_external(
        FieldSpec::new(fields::WEIGHTED_BF, FieldLayout::node_qp_scalar()),
        ExternalSource::WeightedBasisValues,
    )?;
    registry.declare_external(
        FieldSpec::new(fields::GRAD_BF, FieldLayout::node_qp_vector()),
        ExternalSource::BasisGradients,
    )?;
    registry.declare_external(
        FieldSpec::new(fields::WEIGHTED_GRAD_BF, FieldLayout::node_qp_vector()),
        ExternalSource::WeightedBasisGradients,
    )?;

    registry.register_evaluator(Box::new(GatherSolution::scalar(fields::PORE_PRESSURE)))?;
    registry.register_evaluator(Box::new(GatherRate::scalar(fields::PORE_PRESSURE_RATE)))?;
    registry.register_evaluator(Box::new(DofInterpolation::scalar(
        fields::PORE_PRESSURE_RATE,
        fields::BF,
        fields::PORE_PRESSURE_RATE_QP,
    )))?;
    registry.register_evaluator(Box::new(DofGradInterpolation::scalar(
        fields::PORE_PRESSURE,
        fields::GRAD_BF,
        fields::PORE_PRESSURE_GRADIENT,
    )))?;
    registry.register_evaluator(Box::new(PressureMassResidual::from_parameters(
        params,
        fields::PORE_PRESSURE_RATE_QP,
        fields::PORE_PRESSURE_GRADIENT,
        fields::WEIGHTED_BF,
        fields::WEIGHTED_GRAD_BF,
        fields::MASS_RESIDUAL,
    )?))?;
    registry.register_evaluator(Box::new(ScatterResidual::scalar(fields::MASS_RESIDUAL)))?;
    registry.require_evaluator(format!("Scatter {}", fields::MASS_RESIDUAL));

    Ok(registry)
}

/// Builds the stabilized-flow fragment that evaluates the stabilization
/// parameter from the interpolated velocity and the host metric tensor.
///
/// Consumed parameters: `"Viscosity"`, `"Density"`, `"Stabilization Type"`.
pub fn build_stabilization_graph<T: Scalar>(
    params: &Parameters,
) -> eyre::Result<EvaluatorRegistry<T>> {
    let mut registry = EvaluatorRegistry::new();
    registry.declare_external(
        FieldSpec::new(fields::BF, FieldLayout::node_qp_scalar()),
        ExternalSource::BasisValues,
    )?;
    registry.declare_external(
        FieldSpec::new(fields::CONTRAVARIANT_METRIC, FieldLayout::qp_tensor()),
        ExternalSource::ContravariantMetric,
    )?;

    registry.register_evaluator(Box::new(GatherSolution::vector(fields::VELOCITY)))?;
    registry.register_evaluator(Box::new(DofInterpolation::vector(
        fields::VELOCITY,
        fields::BF,
        fields::VELOCITY_QP,
    )))?;
    registry.register_evaluator(Box::new(
        StabilizationTau::from_parameters(
            params,
            fields::VELOCITY_QP,
            fields::CONTRAVARIANT_METRIC,
            fields::TAU,
        )
        .map_err(|e| eyre!(e))?,
    ))?;
    registry.require_field(fields::TAU);

    Ok(registry)
}

/// Owns the resolved evaluator graph of one element block and drives it
/// over host batches.
pub struct BlockAssembler<T: Scalar> {
    block: String,
    registry: EvaluatorRegistry<T>,
}

impl<T: Scalar> BlockAssembler<T> {
    /// Composes and resolves the solid-mechanics graph for the block.
    pub fn mechanics(
        block: impl Into<String>,
        params: &Parameters,
        dims: &WorksetDims,
        state: &mut StateStore,
    ) -> eyre::Result<Self> {
        let block = block.into();
        let mut registry = build_mechanics_graph::<T>(params, state)?;
        registry.setup(dims)?;
        state.prepare_block(block.clone(), dims);
        Ok(Self { block, registry })
    }

    /// Composes and resolves the pressure mass-balance graph for the block.
    pub fn pressure(
        block: impl Into<String>,
        params: &Parameters,
        dims: &WorksetDims,
    ) -> eyre::Result<Self> {
        let mut registry = build_pressure_graph::<T>(params)?;
        registry.setup(dims)?;
        Ok(Self {
            block: block.into(),
            registry,
        })
    }

    pub fn block(&self) -> &str {
        &self.block
    }

    pub fn registry(&self) -> &EvaluatorRegistry<T> {
        &self.registry
    }

    /// Evaluates the graph for one batch, accumulating into `global`.
    pub fn assemble(
        &self,
        host: &HostBatch<'_>,
        state: &mut StateStore,
        global: &mut GlobalSystem,
    ) -> eyre::Result<()> {
        let workset = self.registry.create_workset(host)?;
        let mut ctx = EvalContext {
            state,
            global,
            block: &self.block,
        };
        self.registry.evaluate_workset(&workset, &mut ctx)
    }
}
