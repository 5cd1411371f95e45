use crate::workset::WorksetDims;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One axis of a field layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    Cell,
    Node,
    QuadPoint,
    Dim,
}

/// The index structure of a field: an ordered list of axes.
///
/// A field's layout is fixed for its lifetime. The producer of a field and
/// all of its consumers must declare identical layouts; mismatches are
/// reported at setup time, before any workset is processed.
///
/// The constructors cover the canonical layouts of the evaluation graph.
/// Axis extents are only resolved against concrete [`WorksetDims`] when a
/// workset is allocated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLayout {
    axes: Vec<Axis>,
}

impl FieldLayout {
    /// A single scalar per workset (e.g. the time step).
    pub fn workset_scalar() -> Self {
        Self { axes: vec![] }
    }

    pub fn cell_scalar() -> Self {
        Self { axes: vec![Axis::Cell] }
    }

    pub fn qp_scalar() -> Self {
        Self {
            axes: vec![Axis::Cell, Axis::QuadPoint],
        }
    }

    pub fn qp_vector() -> Self {
        Self {
            axes: vec![Axis::Cell, Axis::QuadPoint, Axis::Dim],
        }
    }

    pub fn qp_tensor() -> Self {
        Self {
            axes: vec![Axis::Cell, Axis::QuadPoint, Axis::Dim, Axis::Dim],
        }
    }

    pub fn node_scalar() -> Self {
        Self {
            axes: vec![Axis::Cell, Axis::Node],
        }
    }

    pub fn node_vector() -> Self {
        Self {
            axes: vec![Axis::Cell, Axis::Node, Axis::Dim],
        }
    }

    /// Basis function values: (cell, node, quadrature point).
    pub fn node_qp_scalar() -> Self {
        Self {
            axes: vec![Axis::Cell, Axis::Node, Axis::QuadPoint],
        }
    }

    /// Basis function gradients: (cell, node, quadrature point, dim).
    pub fn node_qp_vector() -> Self {
        Self {
            axes: vec![Axis::Cell, Axis::Node, Axis::QuadPoint, Axis::Dim],
        }
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Total number of axes, including site axes.
    pub fn num_axes(&self) -> usize {
        self.axes.len()
    }

    /// Tensor rank: the number of `Dim` axes (0 = scalar, 1 = vector, ...).
    pub fn tensor_rank(&self) -> usize {
        self.axes.iter().filter(|a| **a == Axis::Dim).count()
    }

    /// Resolves each axis to its extent under the given workset dimensions.
    pub fn extents(&self, dims: &WorksetDims) -> Vec<usize> {
        self.axes
            .iter()
            .map(|axis| match axis {
                Axis::Cell => dims.cells,
                Axis::Node => dims.nodes_per_cell,
                Axis::QuadPoint => dims.quad_points,
                Axis::Dim => dims.dims,
            })
            .collect()
    }

    /// Number of entries a field with this layout occupies.
    pub fn num_entries(&self, dims: &WorksetDims) -> usize {
        self.extents(dims).iter().product()
    }
}

impl fmt::Display for FieldLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        for (i, axis) in self.axes.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{:?}", axis)?;
        }
        write!(f, ">")
    }
}
