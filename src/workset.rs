use crate::field::{FieldHandle, FieldTable, TensorField};
use eyre::{bail, eyre};
use feval_traits::Scalar;
use itertools::izip;
use serde::{Deserialize, Serialize};
use std::cell::{Ref, RefCell, RefMut};

/// Sizes shared by every field of a workset.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorksetDims {
    /// Number of cells in the batch.
    pub cells: usize,
    pub nodes_per_cell: usize,
    pub quad_points: usize,
    /// Spatial dimension.
    pub dims: usize,
    /// Solution components per node.
    pub solution_dim: usize,
}

impl WorksetDims {
    /// Element-local degrees of freedom; bounds the derivative dimension of
    /// the AD scalar type used for the Jacobian pass.
    pub fn element_dofs(&self) -> usize {
        self.nodes_per_cell * self.solution_dim
    }
}

/// Host array that backs an externally supplied field.
///
/// External fields are declared on the registry and filled from the
/// [`HostBatch`] when a workset is allocated; no evaluator produces them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExternalSource {
    /// Cell × node × dim nodal coordinates.
    Coordinates,
    /// Cell × node × qp basis function values.
    BasisValues,
    /// Cell × node × qp basis values times quadrature weight and Jacobian.
    WeightedBasisValues,
    /// Cell × node × qp × dim physical basis gradients.
    BasisGradients,
    /// Cell × node × qp × dim weighted physical basis gradients.
    WeightedBasisGradients,
    /// Cell × qp × dim × dim contravariant metric tensor of the mapping.
    ContravariantMetric,
    /// Cell × qp determinant of the mapping Jacobian.
    JacobianDeterminant,
    /// The time step, a single workset scalar.
    DeltaTime,
}

/// The arrays one element block hands over for a batch of cells.
///
/// Everything here is owned by the host discretization; the evaluation graph
/// only reads it. Solution data is global (indexed through `connectivity`),
/// geometry and basis data are already laid out per workset.
#[derive(Debug)]
pub struct HostBatch<'a> {
    pub dims: WorksetDims,
    /// Cell × node global node indices.
    pub connectivity: &'a [usize],
    /// Number of nodes in the global solution vectors.
    pub num_global_nodes: usize,
    /// Global node × component solution values.
    pub solution: &'a [f64],
    /// Global node × component solution time derivative, if transient.
    pub solution_rate: Option<&'a [f64]>,
    /// Cell × node × dim coordinates.
    pub coordinates: &'a [f64],
    /// Cell × node × qp.
    pub basis_values: &'a [f64],
    /// Cell × node × qp.
    pub weighted_basis_values: &'a [f64],
    /// Cell × node × qp × dim.
    pub basis_gradients: &'a [f64],
    /// Cell × node × qp × dim.
    pub weighted_basis_gradients: &'a [f64],
    /// Cell × qp × dim × dim, if a kernel requires it.
    pub contravariant_metric: Option<&'a [f64]>,
    /// Cell × qp, if a kernel requires it.
    pub jacobian_determinant: Option<&'a [f64]>,
    pub delta_time: f64,
}

impl<'a> HostBatch<'a> {
    fn source_slice(&self, source: ExternalSource) -> eyre::Result<&'a [f64]> {
        match source {
            ExternalSource::Coordinates => Ok(self.coordinates),
            ExternalSource::BasisValues => Ok(self.basis_values),
            ExternalSource::WeightedBasisValues => Ok(self.weighted_basis_values),
            ExternalSource::BasisGradients => Ok(self.basis_gradients),
            ExternalSource::WeightedBasisGradients => Ok(self.weighted_basis_gradients),
            ExternalSource::ContravariantMetric => self
                .contravariant_metric
                .ok_or_else(|| eyre!("Host batch does not provide the contravariant metric")),
            ExternalSource::JacobianDeterminant => self
                .jacobian_determinant
                .ok_or_else(|| eyre!("Host batch does not provide Jacobian determinants")),
            ExternalSource::DeltaTime => {
                unreachable!("Delta time is filled as a workset scalar")
            }
        }
    }
}

/// A batch of cells together with the storage for all active fields.
///
/// Created per element block per assembly pass and dropped afterwards.
/// Fields live behind `RefCell`s so an executing evaluator can borrow its
/// inputs shared and its outputs mutably at the same time; the registry
/// guarantees at registration time that no node declares the same field as
/// both, so borrows cannot conflict.
#[derive(Debug)]
pub struct Workset<'a, T: Scalar> {
    dims: WorksetDims,
    host: &'a HostBatch<'a>,
    fields: Vec<RefCell<TensorField<T>>>,
}

impl<'a, T: Scalar> Workset<'a, T> {
    pub(crate) fn new(
        table: &FieldTable,
        externals: &[(FieldHandle, ExternalSource)],
        host: &'a HostBatch<'a>,
    ) -> eyre::Result<Self> {
        let dims = host.dims;
        let fields = table
            .specs()
            .iter()
            .map(|spec| RefCell::new(TensorField::from_layout(&spec.layout, &dims)))
            .collect();
        let workset = Self { dims, host, fields };

        for &(handle, source) in externals {
            if source == ExternalSource::DeltaTime {
                workset
                    .field_mut(handle)
                    .set_workset_scalar(T::from_f64(host.delta_time));
                continue;
            }
            let src = host.source_slice(source)?;
            let mut field = workset.field_mut(handle);
            if src.len() != field.len() {
                bail!(
                    "Host array for {:?} has {} entries, field expects {}",
                    source,
                    src.len(),
                    field.len()
                );
            }
            for (dst, value) in izip!(field.as_mut_slice(), src) {
                *dst = T::from_f64(*value);
            }
        }
        Ok(workset)
    }

    pub fn dims(&self) -> &WorksetDims {
        &self.dims
    }

    pub fn host(&self) -> &HostBatch<'a> {
        self.host
    }

    /// Global node index of a cell-local node.
    #[inline]
    pub fn node_index(&self, cell: usize, node: usize) -> usize {
        self.host.connectivity[cell * self.dims.nodes_per_cell + node]
    }

    pub fn field(&self, handle: FieldHandle) -> Ref<'_, TensorField<T>> {
        self.fields[handle.0].borrow()
    }

    pub fn field_mut(&self, handle: FieldHandle) -> RefMut<'_, TensorField<T>> {
        self.fields[handle.0].borrow_mut()
    }
}
