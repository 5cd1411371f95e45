use crate::evaluator::{EvalContext, Evaluator};
use crate::field::{FieldBinder, FieldHandle, FieldSpec};
use crate::graph::GraphError;
use crate::layout::FieldLayout;
use crate::workset::{Workset, WorksetDims};
use feval_traits::Scalar;
use numeric_literals::replace_float_literals;

/// Infinitesimal strain from the displacement gradient:
/// `ε = ½(∇u + ∇uᵀ)`.
///
/// Both `ε_ij` and `ε_ji` are written from the same pair sum, so the output
/// is symmetric to the last bit under any scalar type.
pub struct InfinitesimalStrain {
    name: String,
    gradient: FieldSpec,
    strain: FieldSpec,
    gradient_handle: Option<FieldHandle>,
    strain_handle: Option<FieldHandle>,
}

impl InfinitesimalStrain {
    pub fn new(gradient: impl Into<String>, strain: impl Into<String>) -> Self {
        let strain = FieldSpec::new(strain, FieldLayout::qp_tensor());
        Self {
            name: strain.name.clone(),
            gradient: FieldSpec::new(gradient, FieldLayout::qp_tensor()),
            strain,
            gradient_handle: None,
            strain_handle: None,
        }
    }
}

impl<T: Scalar> Evaluator<T> for InfinitesimalStrain {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependent_fields(&self) -> Vec<FieldSpec> {
        vec![self.gradient.clone()]
    }

    fn evaluated_fields(&self) -> Vec<FieldSpec> {
        vec![self.strain.clone()]
    }

    fn setup(&mut self, _dims: &WorksetDims, binder: &mut FieldBinder<'_>) -> Result<(), GraphError> {
        self.gradient_handle = Some(binder.bind(&self.gradient)?);
        self.strain_handle = Some(binder.bind(&self.strain)?);
        Ok(())
    }

    #[replace_float_literals(T::from_f64(literal))]
    fn evaluate(&self, workset: &Workset<'_, T>, _ctx: &mut EvalContext<'_>) -> eyre::Result<()> {
        let dims = *workset.dims();
        let gradient = workset.field(self.gradient_handle.expect("Setup has run"));
        let mut strain = workset.field_mut(self.strain_handle.expect("Setup has run"));

        for c in 0..dims.cells {
            for q in 0..dims.quad_points {
                for i in 0..dims.dims {
                    for j in i..dims.dims {
                        let pair = 0.5 * (gradient[(c, q, i, j)] + gradient[(c, q, j, i)]);
                        strain[(c, q, i, j)] = pair;
                        strain[(c, q, j, i)] = pair;
                    }
                }
            }
        }
        Ok(())
    }
}
