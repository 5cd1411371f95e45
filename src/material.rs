//! Constitutive models and the evaluator that drives them.

use crate::evaluator::{EvalContext, EvaluationError, Evaluator};
use crate::field::{FieldBinder, FieldHandle, FieldSpec, TensorField};
use crate::graph::GraphError;
use crate::layout::FieldLayout;
use crate::params::Parameters;
use crate::tensor::Tensor2;
use crate::workset::{Workset, WorksetDims};
use feval_traits::Scalar;
use rayon::prelude::*;
use std::error::Error;
use std::fmt;

mod j2;
mod linear_elastic;

pub use j2::*;
pub use linear_elastic::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterialError {
    UnknownMaterialModel { name: String },
}

impl fmt::Display for MaterialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterialError::UnknownMaterialModel { name } => {
                write!(f, "Unknown material model '{}'", name)
            }
        }
    }
}

impl Error for MaterialError {}

/// Optional thermal-expansion capability shared by the models.
///
/// When present, the computed stress receives the linearized correction
/// `σ -= 3 κ α (θ - θ_ref) I`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ThermalExpansion {
    pub coefficient: f64,
    pub ref_temperature: f64,
}

impl ThermalExpansion {
    fn from_parameters(params: &Parameters) -> Result<Option<Self>, Box<dyn Error + Send + Sync>> {
        if !params.contains("Expansion Coefficient") {
            return Ok(None);
        }
        Ok(Some(Self {
            coefficient: params.get_real("Expansion Coefficient")?,
            ref_temperature: params.get_real("Reference Temperature")?,
        }))
    }
}

/// Per-point inputs to a constitutive update.
pub struct MaterialInput<T> {
    pub def_grad: Tensor2<T>,
    /// `det F`, precomputed by the kinematics kernel.
    pub det: T,
    pub temperature: Option<T>,
}

/// The persisted internal variables of a material point.
#[derive(Clone, Debug)]
pub struct MaterialState<T> {
    /// Plastic part of the deformation gradient.
    pub fp: Tensor2<T>,
    /// Equivalent plastic strain.
    pub eqps: T,
}

impl<T: Scalar> MaterialState<T> {
    /// The virgin state: `Fp = I`, `eqps = 0`.
    pub fn virgin(dim: usize) -> Self {
        Self {
            fp: Tensor2::identity(dim),
            eqps: T::zero(),
        }
    }
}

/// Per-point outputs of a constitutive update.
#[derive(Debug)]
pub struct MaterialOutput<T> {
    pub stress: Tensor2<T>,
    pub state: MaterialState<T>,
    /// Value of the yield function at the trial state; negative inside the
    /// elastic domain.
    pub yield_value: T,
}

/// The material law of one element block, selected by the
/// `"Material Model"` parameter.
///
/// Variants are independent types behind a tagged enum; optional
/// capabilities (temperature dependence, internal state) are data, not
/// subclasses. Points are updated independently — there is no cross-point
/// coupling inside one call, which is what makes the evaluator's cell loop
/// embarrassingly parallel.
#[derive(Clone, Debug)]
pub enum MaterialModel {
    LinearElastic(LinearElastic),
    J2(J2Plasticity),
}

impl MaterialModel {
    pub fn from_parameters(params: &Parameters) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let name = params.get_str("Material Model")?;
        match name {
            "Linear Elastic" => Ok(Self::LinearElastic(LinearElastic::from_parameters(params)?)),
            "J2" => Ok(Self::J2(J2Plasticity::from_parameters(params)?)),
            other => Err(Box::new(MaterialError::UnknownMaterialModel {
                name: other.to_string(),
            })),
        }
    }

    /// Whether this model carries persisted internal variables.
    pub fn uses_history(&self) -> bool {
        match self {
            Self::LinearElastic(_) => false,
            Self::J2(_) => true,
        }
    }

    /// The active hardening law, for test oracle construction.
    pub fn hardening_law(&self) -> Option<HardeningLaw> {
        match self {
            Self::LinearElastic(_) => None,
            Self::J2(model) => Some(model.hardening_law()),
        }
    }

    pub fn compute_point<T: Scalar>(
        &self,
        cell: usize,
        point: usize,
        input: &MaterialInput<T>,
        old: &MaterialState<T>,
    ) -> Result<MaterialOutput<T>, EvaluationError> {
        match self {
            Self::LinearElastic(model) => Ok(model.compute_point(input, old)),
            Self::J2(model) => model.compute_point(cell, point, input, old),
        }
    }
}

/// Graph node running a [`MaterialModel`] at every (cell, quadrature point).
///
/// Inputs: deformation gradient and determinant from the kinematics kernel,
/// optionally a temperature field and, for history-carrying models, the
/// loaded previous-step state. Outputs: stress, and for history-carrying
/// models the updated state and the yield indicator. Cells are processed in
/// parallel; the first point failure aborts the whole workset.
pub struct ConstitutiveModelEvaluator {
    name: String,
    model: MaterialModel,
    def_grad: FieldSpec,
    det: FieldSpec,
    stress: FieldSpec,
    temperature: Option<FieldSpec>,
    history: Option<HistoryFields>,
    def_grad_handle: Option<FieldHandle>,
    det_handle: Option<FieldHandle>,
    stress_handle: Option<FieldHandle>,
    temperature_handle: Option<FieldHandle>,
}

struct HistoryFields {
    fp_old: FieldSpec,
    eqps_old: FieldSpec,
    fp: FieldSpec,
    eqps: FieldSpec,
    yield_surface: FieldSpec,
    fp_old_handle: Option<FieldHandle>,
    eqps_old_handle: Option<FieldHandle>,
    fp_handle: Option<FieldHandle>,
    eqps_handle: Option<FieldHandle>,
    yield_handle: Option<FieldHandle>,
}

/// Field names used by a [`ConstitutiveModelEvaluator`].
#[derive(Clone, Debug)]
pub struct ConstitutiveFieldNames {
    pub def_grad: String,
    pub det: String,
    pub stress: String,
    pub fp: String,
    pub eqps: String,
    pub yield_surface: String,
    /// Consumed in addition when the model has temperature support.
    pub temperature: Option<String>,
}

impl Default for ConstitutiveFieldNames {
    fn default() -> Self {
        Self {
            def_grad: "F".to_string(),
            det: "J".to_string(),
            stress: "Stress".to_string(),
            fp: "Fp".to_string(),
            eqps: "eqps".to_string(),
            yield_surface: "Yield Surface".to_string(),
            temperature: None,
        }
    }
}

impl ConstitutiveModelEvaluator {
    pub fn new(model: MaterialModel, names: ConstitutiveFieldNames) -> Self {
        let history = model.uses_history().then(|| HistoryFields {
            fp_old: FieldSpec::new(format!("{}_old", names.fp), FieldLayout::qp_tensor()),
            eqps_old: FieldSpec::new(format!("{}_old", names.eqps), FieldLayout::qp_scalar()),
            fp: FieldSpec::new(names.fp.clone(), FieldLayout::qp_tensor()),
            eqps: FieldSpec::new(names.eqps.clone(), FieldLayout::qp_scalar()),
            yield_surface: FieldSpec::new(names.yield_surface.clone(), FieldLayout::qp_scalar()),
            fp_old_handle: None,
            eqps_old_handle: None,
            fp_handle: None,
            eqps_handle: None,
            yield_handle: None,
        });
        Self {
            name: format!("Constitutive Model {}", names.stress),
            model,
            def_grad: FieldSpec::new(names.def_grad, FieldLayout::qp_tensor()),
            det: FieldSpec::new(names.det, FieldLayout::qp_scalar()),
            stress: FieldSpec::new(names.stress, FieldLayout::qp_tensor()),
            temperature: names
                .temperature
                .map(|name| FieldSpec::new(name, FieldLayout::qp_scalar())),
            history,
            def_grad_handle: None,
            det_handle: None,
            stress_handle: None,
            temperature_handle: None,
        }
    }

    pub fn model(&self) -> &MaterialModel {
        &self.model
    }

    fn point_input<T: Scalar>(
        &self,
        def_grad: &TensorField<T>,
        det: &TensorField<T>,
        temperature: Option<&TensorField<T>>,
        dim: usize,
        c: usize,
        q: usize,
    ) -> MaterialInput<T> {
        MaterialInput {
            def_grad: Tensor2::from_fn(dim, |i, j| def_grad[(c, q, i, j)]),
            det: det[(c, q)],
            temperature: temperature.map(|field| field[(c, q)]),
        }
    }
}

impl<T: Scalar> Evaluator<T> for ConstitutiveModelEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependent_fields(&self) -> Vec<FieldSpec> {
        let mut deps = vec![self.def_grad.clone(), self.det.clone()];
        if let Some(temperature) = &self.temperature {
            deps.push(temperature.clone());
        }
        if let Some(history) = &self.history {
            deps.push(history.fp_old.clone());
            deps.push(history.eqps_old.clone());
        }
        deps
    }

    fn evaluated_fields(&self) -> Vec<FieldSpec> {
        let mut evals = vec![self.stress.clone()];
        if let Some(history) = &self.history {
            evals.push(history.fp.clone());
            evals.push(history.eqps.clone());
            evals.push(history.yield_surface.clone());
        }
        evals
    }

    fn setup(&mut self, _dims: &WorksetDims, binder: &mut FieldBinder<'_>) -> Result<(), GraphError> {
        self.def_grad_handle = Some(binder.bind(&self.def_grad)?);
        self.det_handle = Some(binder.bind(&self.det)?);
        self.stress_handle = Some(binder.bind(&self.stress)?);
        if let Some(temperature) = &self.temperature {
            self.temperature_handle = Some(binder.bind(temperature)?);
        }
        if let Some(history) = &mut self.history {
            history.fp_old_handle = Some(binder.bind(&history.fp_old)?);
            history.eqps_old_handle = Some(binder.bind(&history.eqps_old)?);
            history.fp_handle = Some(binder.bind(&history.fp)?);
            history.eqps_handle = Some(binder.bind(&history.eqps)?);
            history.yield_handle = Some(binder.bind(&history.yield_surface)?);
        }
        Ok(())
    }

    fn evaluate(&self, workset: &Workset<'_, T>, _ctx: &mut EvalContext<'_>) -> eyre::Result<()> {
        let dims = *workset.dims();
        let dim = dims.dims;
        let points = dims.quad_points;

        let def_grad_ref = workset.field(self.def_grad_handle.expect("Setup has run"));
        let det_ref = workset.field(self.det_handle.expect("Setup has run"));
        let temperature_ref = self.temperature_handle.map(|handle| workset.field(handle));
        // Plain references cross the rayon closure boundary below.
        let def_grad = &*def_grad_ref;
        let det = &*det_ref;
        let temperature = temperature_ref.as_deref();
        let mut stress = workset.field_mut(self.stress_handle.expect("Setup has run"));
        let stress_stride = stress.cell_stride();

        match &self.history {
            None => {
                stress
                    .as_mut_slice()
                    .par_chunks_mut(stress_stride)
                    .enumerate()
                    .try_for_each(|(c, stress_cell)| {
                        for q in 0..points {
                            let input = self.point_input(def_grad, det, temperature, dim, c, q);
                            let old = MaterialState::virgin(dim);
                            let output = self.model.compute_point(c, q, &input, &old)?;
                            write_tensor(stress_cell, q, dim, &output.stress);
                        }
                        Ok::<(), EvaluationError>(())
                    })?;
            }
            Some(history) => {
                let fp_old_ref = workset.field(history.fp_old_handle.expect("Setup has run"));
                let eqps_old_ref = workset.field(history.eqps_old_handle.expect("Setup has run"));
                let fp_old = &*fp_old_ref;
                let eqps_old = &*eqps_old_ref;
                let mut fp = workset.field_mut(history.fp_handle.expect("Setup has run"));
                let mut eqps = workset.field_mut(history.eqps_handle.expect("Setup has run"));
                let mut yield_surface =
                    workset.field_mut(history.yield_handle.expect("Setup has run"));
                let fp_stride = fp.cell_stride();
                let eqps_stride = eqps.cell_stride();
                let yield_stride = yield_surface.cell_stride();

                stress
                    .as_mut_slice()
                    .par_chunks_mut(stress_stride)
                    .zip(fp.as_mut_slice().par_chunks_mut(fp_stride))
                    .zip(eqps.as_mut_slice().par_chunks_mut(eqps_stride))
                    .zip(yield_surface.as_mut_slice().par_chunks_mut(yield_stride))
                    .enumerate()
                    .try_for_each(|(c, (((stress_cell, fp_cell), eqps_cell), yield_cell))| {
                        for q in 0..points {
                            let input = self.point_input(def_grad, det, temperature, dim, c, q);
                            let old = MaterialState {
                                fp: Tensor2::from_fn(dim, |i, j| fp_old[(c, q, i, j)]),
                                eqps: eqps_old[(c, q)],
                            };
                            let output = self.model.compute_point(c, q, &input, &old)?;
                            write_tensor(stress_cell, q, dim, &output.stress);
                            write_tensor(fp_cell, q, dim, &output.state.fp);
                            eqps_cell[q] = output.state.eqps;
                            yield_cell[q] = output.yield_value;
                        }
                        Ok::<(), EvaluationError>(())
                    })?;
            }
        }
        Ok(())
    }
}

/// Writes a point tensor into a cell-local slice of a qp_tensor field.
fn write_tensor<T: Scalar>(cell_slice: &mut [T], q: usize, dim: usize, tensor: &Tensor2<T>) {
    let base = q * dim * dim;
    for i in 0..dim {
        for j in 0..dim {
            cell_slice[base + i * dim + j] = tensor[(i, j)];
        }
    }
}
