use crate::assembly::GlobalSystem;
use crate::field::{FieldBinder, FieldSpec};
use crate::graph::GraphError;
use crate::state::StateStore;
use crate::workset::{Workset, WorksetDims};
use feval_traits::Scalar;
use std::error::Error;
use std::fmt;

/// Numerical failures raised during kernel execution.
///
/// All of these abort the evaluation of the current workset; there is no
/// partial-result recovery. The outer solver decides whether to retry with a
/// smaller step.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationError {
    /// The deformation gradient has non-positive determinant (inverted cell).
    SingularDeformationGradient {
        cell: usize,
        point: usize,
        jacobian: f64,
    },
    /// The persisted plastic deformation gradient is not invertible.
    SingularPlasticDeformation { cell: usize, point: usize },
    /// The local return-mapping iteration failed to converge; the last
    /// iterate is discarded rather than silently accepted.
    ReturnMappingDiverged {
        cell: usize,
        point: usize,
        iterations: usize,
        residual: f64,
    },
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationError::SingularDeformationGradient { cell, point, jacobian } => write!(
                f,
                "Singular deformation gradient at cell {}, point {} (det F = {:e})",
                cell, point, jacobian
            ),
            EvaluationError::SingularPlasticDeformation { cell, point } => write!(
                f,
                "Persisted plastic deformation gradient at cell {}, point {} is singular",
                cell, point
            ),
            EvaluationError::ReturnMappingDiverged {
                cell,
                point,
                iterations,
                residual,
            } => write!(
                f,
                "Return mapping failed to converge at cell {}, point {} after {} iterations (residual {:e})",
                cell, point, iterations, residual
            ),
        }
    }
}

impl Error for EvaluationError {}

/// Mutable collaborators threaded through graph execution.
///
/// The state store and global output are passed explicitly rather than held
/// as ambient globals; one context lives for the duration of one workset
/// evaluation.
pub struct EvalContext<'a> {
    pub state: &'a mut StateStore,
    pub global: &'a mut GlobalSystem,
    /// Element block the current workset belongs to.
    pub block: &'a str,
}

/// A unit of computation in the evaluation graph.
///
/// An evaluator declares the fields it consumes and the fields it produces,
/// is bound to resolved field handles once during [`setup`](Evaluator::setup)
/// and is then executed once per workset, in the topological order computed
/// by the registry. Implementations own no field data and must not allocate
/// per quadrature point during [`evaluate`](Evaluator::evaluate); scratch is
/// sized at setup.
///
/// An evaluator may declare no evaluated fields at all (for example a state
/// save under a derivative scalar type). Such nodes are graph leaves and run
/// only when explicitly required via
/// [`require_evaluator`](crate::graph::EvaluatorRegistry::require_evaluator).
pub trait Evaluator<T: Scalar> {
    fn name(&self) -> &str;

    /// Fields this node consumes.
    fn dependent_fields(&self) -> Vec<FieldSpec>;

    /// Fields this node produces.
    fn evaluated_fields(&self) -> Vec<FieldSpec>;

    /// Resolves declared fields to handles and sizes internal scratch.
    ///
    /// Called exactly once, after the execution order has been established
    /// and before any workset is processed. Layout and rank mismatches
    /// surface here.
    fn setup(&mut self, dims: &WorksetDims, binder: &mut FieldBinder<'_>) -> Result<(), GraphError>;

    /// Computes all declared outputs for every cell of the workset.
    ///
    /// On error the workset contents are unspecified and the whole analysis
    /// step is abandoned; partial results are never consumed downstream.
    fn evaluate(&self, workset: &Workset<'_, T>, ctx: &mut EvalContext<'_>) -> eyre::Result<()>;
}
