//! Persistence of selected fields across time steps.
//!
//! State variables are owned by an explicit store object with an
//! `init`/`advance` lifecycle; evaluators interact with it only through the
//! [`LoadState`]/[`SaveState`] graph nodes and the evaluation context.

use crate::evaluator::{EvalContext, Evaluator};
use crate::field::{FieldBinder, FieldHandle, FieldSpec, TensorField};
use crate::graph::GraphError;
use crate::layout::FieldLayout;
use crate::workset::{Workset, WorksetDims};
use feval_traits::Scalar;
use itertools::izip;
use log::debug;
use rustc_hash::FxHashMap;
use std::error::Error;
use std::fmt;

/// First-step initialization policy for a state variable.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum StateInit {
    /// Fill every entry with the given value.
    Scalar(f64),
    /// Rank-2 fields only: the identity tensor at every (cell, point).
    Identity,
}

#[derive(Debug)]
pub enum StateError {
    /// A state variable was registered twice with conflicting declarations.
    ConflictingRegistration { name: String },
    /// `StateInit::Identity` on a layout that is not rank 2.
    InitRequiresTensor { name: String },
    UnknownVariable { name: String },
    /// A workset referenced a block the store was never prepared for.
    BlockNotPrepared { block: String },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::ConflictingRegistration { name } => write!(
                f,
                "State variable '{}' registered twice with conflicting declarations",
                name
            ),
            StateError::InitRequiresTensor { name } => write!(
                f,
                "State variable '{}' requests identity initialization but is not rank 2",
                name
            ),
            StateError::UnknownVariable { name } => {
                write!(f, "State variable '{}' is not registered", name)
            }
            StateError::BlockNotPrepared { block } => {
                write!(f, "State store has no storage for element block '{}'", block)
            }
        }
    }
}

impl Error for StateError {}

/// Declaration of one persisted variable; returned by registration and
/// consumed by the [`LoadState`]/[`SaveState`] node constructors.
#[derive(Clone, Debug)]
pub struct StateRegistration {
    pub name: String,
    pub layout: FieldLayout,
    pub init: StateInit,
    /// Whether the saved values are exposed for mesh write-out.
    pub output: bool,
}

struct StateEntry {
    old: TensorField<f64>,
    new: TensorField<f64>,
    /// Whether `old` holds meaningful history (saved data or first-step init).
    old_valid: bool,
    new_valid: bool,
}

struct BlockState {
    entries: FxHashMap<String, StateEntry>,
}

/// The double-buffered store of all registered state variables.
///
/// `old` buffers are what [`LoadState`] exposes to the current step; `new`
/// buffers receive [`SaveState`] writes; [`advance`](StateStore::advance)
/// promotes new to old at the end of a converged step.
pub struct StateStore {
    variables: Vec<StateRegistration>,
    blocks: FxHashMap<String, BlockState>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            variables: Vec::new(),
            blocks: FxHashMap::default(),
        }
    }

    /// Registers a persisted variable and returns its descriptor.
    ///
    /// Registration is idempotent so that the residual and Jacobian graph
    /// compositions can both run it; conflicting re-registration is an error
    /// (two kernels must never write the same state variable).
    pub fn register_state_variable(
        &mut self,
        name: impl Into<String>,
        layout: FieldLayout,
        init: StateInit,
        output: bool,
    ) -> Result<StateRegistration, StateError> {
        let name = name.into();
        if init == StateInit::Identity && layout.tensor_rank() != 2 {
            return Err(StateError::InitRequiresTensor { name });
        }
        let registration = StateRegistration {
            name: name.clone(),
            layout,
            init,
            output,
        };
        if let Some(existing) = self.variables.iter().find(|v| v.name == name) {
            if existing.layout != registration.layout
                || existing.init != registration.init
                || existing.output != registration.output
            {
                return Err(StateError::ConflictingRegistration { name });
            }
            return Ok(registration);
        }
        debug!("Registered state variable '{}'", name);
        self.variables.push(registration.clone());
        Ok(registration)
    }

    pub fn variables(&self) -> &[StateRegistration] {
        &self.variables
    }

    /// Names of variables flagged for write-out.
    pub fn output_variables(&self) -> Vec<&str> {
        self.variables
            .iter()
            .filter(|v| v.output)
            .map(|v| v.name.as_str())
            .collect()
    }

    /// Allocates (or verifies) storage for one element block.
    pub fn prepare_block(&mut self, block: impl Into<String>, dims: &WorksetDims) {
        let block = block.into();
        let entries = self
            .blocks
            .entry(block)
            .or_insert_with(|| BlockState {
                entries: FxHashMap::default(),
            });
        for var in &self.variables {
            entries.entries.entry(var.name.clone()).or_insert_with(|| StateEntry {
                old: TensorField::from_layout(&var.layout, dims),
                new: TensorField::from_layout(&var.layout, dims),
                old_valid: false,
                new_valid: false,
            });
        }
    }

    /// Promotes saved values to history at the end of a converged step.
    pub fn advance(&mut self) {
        for block in self.blocks.values_mut() {
            for entry in block.entries.values_mut() {
                if entry.new_valid {
                    std::mem::swap(&mut entry.old, &mut entry.new);
                    entry.old_valid = true;
                    entry.new_valid = false;
                }
            }
        }
    }

    /// The most recently saved values of a variable, for host write-out.
    pub fn saved(&self, block: &str, name: &str) -> Option<&TensorField<f64>> {
        let entry = self.blocks.get(block)?.entries.get(name)?;
        entry.new_valid.then_some(&entry.new)
    }

    /// The history buffer of a variable.
    pub fn history(&self, block: &str, name: &str) -> Option<&TensorField<f64>> {
        let entry = self.blocks.get(block)?.entries.get(name)?;
        entry.old_valid.then_some(&entry.old)
    }

    fn entry_mut(&mut self, block: &str, name: &str) -> Result<&mut StateEntry, StateError> {
        if !self.variables.iter().any(|v| v.name == name) {
            return Err(StateError::UnknownVariable {
                name: name.to_string(),
            });
        }
        self.blocks
            .get_mut(block)
            .ok_or_else(|| StateError::BlockNotPrepared {
                block: block.to_string(),
            })?
            .entries
            .get_mut(name)
            .ok_or_else(|| StateError::BlockNotPrepared {
                block: block.to_string(),
            })
    }
}

fn initialize(field: &mut TensorField<f64>, layout: &FieldLayout, init: StateInit) {
    match init {
        StateInit::Scalar(value) => field.fill(value),
        StateInit::Identity => {
            field.fill(0.0);
            let cells = field.extent(0);
            let points = field.extent(1);
            let dim = field.extent(2);
            debug_assert_eq!(layout.tensor_rank(), 2);
            for c in 0..cells {
                for p in 0..points {
                    for i in 0..dim {
                        field[(c, p, i, i)] = 1.0;
                    }
                }
            }
        }
    }
}

/// Copies a state variable's history into a workset field.
///
/// On the very first step, before any save has been promoted, the history
/// buffer is populated from the registered initialization policy, so a model
/// never reads an uninitialized persisted value.
pub struct LoadState {
    registration: StateRegistration,
    name: String,
    field: FieldSpec,
    handle: Option<FieldHandle>,
}

impl LoadState {
    pub fn new(registration: StateRegistration) -> Self {
        let field = FieldSpec::new(
            format!("{}_old", registration.name),
            registration.layout.clone(),
        );
        let name = format!("Load {}", registration.name);
        Self {
            registration,
            name,
            field,
            handle: None,
        }
    }

    /// Name of the field this node produces.
    pub fn field_name(&self) -> &str {
        &self.field.name
    }
}

impl<T: Scalar> Evaluator<T> for LoadState {
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

    fn evaluate(&self, workset: &Workset<'_, T>, ctx: &mut EvalContext<'_>) -> eyre::Result<()> {
        let entry = ctx.state.entry_mut(ctx.block, &self.registration.name)?;
        if !entry.old_valid {
            initialize(&mut entry.old, &self.registration.layout, self.registration.init);
            entry.old_valid = true;
        }
        let mut field = workset.field_mut(self.handle.expect("Setup has run"));
        for (dst, src) in izip!(field.as_mut_slice(), entry.old.as_slice()) {
            *dst = T::from_f64(*src);
        }
        Ok(())
    }
}

/// Copies a computed field into the persisted store.
///
/// Saves only execute under the value scalar type; under derivative-carrying
/// types the node declares no outputs and is left out of the active graph
/// (it would be a leaf nothing requires). The node itself is a zero-output
/// leaf even on the value pass and must be pulled in with
/// [`require_evaluator`](crate::graph::EvaluatorRegistry::require_evaluator).
pub struct SaveState {
    registration: StateRegistration,
    name: String,
    field: FieldSpec,
    handle: Option<FieldHandle>,
}

impl SaveState {
    pub fn new(registration: StateRegistration) -> Self {
        let field = FieldSpec::new(registration.name.clone(), registration.layout.clone());
        let name = format!("Save {}", registration.name);
        Self {
            registration,
            name,
            field,
            handle: None,
        }
    }
}

impl<T: Scalar> Evaluator<T> for SaveState {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependent_fields(&self) -> Vec<FieldSpec> {
        vec![self.field.clone()]
    }

    fn evaluated_fields(&self) -> Vec<FieldSpec> {
        vec![]
    }

    fn setup(&mut self, _dims: &WorksetDims, binder: &mut FieldBinder<'_>) -> Result<(), GraphError> {
        self.handle = Some(binder.bind(&self.field)?);
        Ok(())
    }

    fn evaluate(&self, workset: &Workset<'_, T>, ctx: &mut EvalContext<'_>) -> eyre::Result<()> {
        if T::DERIVATIVE_DIM != 0 {
            return Ok(());
        }
        let entry = ctx.state.entry_mut(ctx.block, &self.registration.name)?;
        let field = workset.field(self.handle.expect("Setup has run"));
        for (dst, src) in izip!(entry.new.as_mut_slice(), field.as_slice()) {
            *dst = src.value();
        }
        entry.new_valid = true;
        Ok(())
    }
}
