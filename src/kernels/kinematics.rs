use crate::evaluator::{EvalContext, EvaluationError, Evaluator};
use crate::field::{FieldBinder, FieldHandle, FieldSpec};
use crate::graph::GraphError;
use crate::layout::FieldLayout;
use crate::tensor::Tensor2;
use crate::workset::{Workset, WorksetDims};
use feval_traits::Scalar;

/// Deformation gradient and its determinant from the displacement gradient:
/// `F = I + ∇u`, `J = det F`.
///
/// An inverted cell (`J ≤ 0`) is a fatal evaluation error; clamping would
/// feed a nonphysical configuration to the material model.
pub struct Kinematics {
    name: String,
    gradient: FieldSpec,
    def_grad: FieldSpec,
    det: FieldSpec,
    gradient_handle: Option<FieldHandle>,
    def_grad_handle: Option<FieldHandle>,
    det_handle: Option<FieldHandle>,
}

impl Kinematics {
    pub fn new(
        gradient: impl Into<String>,
        def_grad: impl Into<String>,
        det: impl Into<String>,
    ) -> Self {
        let def_grad = FieldSpec::new(def_grad, FieldLayout::qp_tensor());
        Self {
            name: format!("Kinematics {}", def_grad.name),
            gradient: FieldSpec::new(gradient, FieldLayout::qp_tensor()),
            def_grad,
            det: FieldSpec::new(det, FieldLayout::qp_scalar()),
            gradient_handle: None,
            def_grad_handle: None,
            det_handle: None,
        }
    }
}

impl<T: Scalar> Evaluator<T> for Kinematics {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependent_fields(&self) -> Vec<FieldSpec> {
        vec![self.gradient.clone()]
    }

    fn evaluated_fields(&self) -> Vec<FieldSpec> {
        vec![self.def_grad.clone(), self.det.clone()]
    }

    fn setup(&mut self, _dims: &WorksetDims, binder: &mut FieldBinder<'_>) -> Result<(), GraphError> {
        self.gradient_handle = Some(binder.bind(&self.gradient)?);
        self.def_grad_handle = Some(binder.bind(&self.def_grad)?);
        self.det_handle = Some(binder.bind(&self.det)?);
        Ok(())
    }

    fn evaluate(&self, workset: &Workset<'_, T>, _ctx: &mut EvalContext<'_>) -> eyre::Result<()> {
        let dims = *workset.dims();
        let gradient = workset.field(self.gradient_handle.expect("Setup has run"));
        let mut def_grad = workset.field_mut(self.def_grad_handle.expect("Setup has run"));
        let mut det = workset.field_mut(self.det_handle.expect("Setup has run"));

        for c in 0..dims.cells {
            for q in 0..dims.quad_points {
                let f = Tensor2::from_fn(dims.dims, |i, j| {
                    let delta = if i == j { T::one() } else { T::zero() };
                    delta + gradient[(c, q, i, j)]
                });
                let j = f.determinant();
                if j.value() <= 0.0 {
                    return Err(EvaluationError::SingularDeformationGradient {
                        cell: c,
                        point: q,
                        jacobian: j.value(),
                    }
                    .into());
                }
                for i in 0..dims.dims {
                    for k in 0..dims.dims {
                        def_grad[(c, q, i, k)] = f[(i, k)];
                    }
                }
                det[(c, q)] = j;
            }
        }
        Ok(())
    }
}
