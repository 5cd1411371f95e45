use crate::graph::GraphError;
use crate::layout::FieldLayout;
use crate::workset::WorksetDims;
use feval_traits::Scalar;
use rustc_hash::FxHashMap;
use std::ops::{Index, IndexMut};

/// A field declaration: name plus layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub layout: FieldLayout,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, layout: FieldLayout) -> Self {
        Self {
            name: name.into(),
            layout,
        }
    }
}

/// A resolved reference to a field in the workset storage.
///
/// Handles are produced once at setup by [`FieldBinder::bind`]; execution
/// addresses fields exclusively through handles, never by name lookup.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldHandle(pub(crate) usize);

/// Flat, strided storage for one field over a workset.
///
/// Entries are laid out row-major in the order of the layout's axes, so the
/// cell axis is outermost and consecutive tensor components are adjacent.
/// Indexing is by tuple, one `usize` per axis.
#[derive(Clone, Debug)]
pub struct TensorField<T> {
    extents: [usize; 4],
    strides: [usize; 4],
    num_axes: usize,
    data: Vec<T>,
}

impl<T: Scalar> TensorField<T> {
    pub fn from_layout(layout: &FieldLayout, dims: &WorksetDims) -> Self {
        let resolved = layout.extents(dims);
        assert!(resolved.len() <= 4, "Field rank exceeds the supported maximum");
        let mut extents = [1; 4];
        extents[..resolved.len()].copy_from_slice(&resolved);

        let mut strides = [1; 4];
        for axis in (0..resolved.len().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * extents[axis + 1];
        }

        // The empty product of a workset-scalar layout is one entry.
        let len = resolved.iter().product::<usize>();
        Self {
            extents,
            strides,
            num_axes: resolved.len(),
            data: vec![T::zero(); len],
        }
    }

    pub fn num_axes(&self) -> usize {
        self.num_axes
    }

    pub fn extent(&self, axis: usize) -> usize {
        self.extents[axis]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Entries per cell; the chunk size for per-cell parallel iteration.
    pub fn cell_stride(&self) -> usize {
        self.strides[0]
    }

    /// The single entry of a workset-scalar field.
    pub fn as_workset_scalar(&self) -> T {
        debug_assert_eq!(self.num_axes, 0, "Not a workset-scalar field");
        self.data[0]
    }

    pub fn set_workset_scalar(&mut self, value: T) {
        debug_assert_eq!(self.num_axes, 0, "Not a workset-scalar field");
        self.data[0] = value;
    }

    #[inline]
    fn offset(&self, idx: [usize; 4], used: usize) -> usize {
        debug_assert_eq!(used, self.num_axes, "Index arity does not match field rank");
        let mut offset = 0;
        for axis in 0..used {
            debug_assert!(idx[axis] < self.extents[axis], "Field index out of bounds");
            offset += idx[axis] * self.strides[axis];
        }
        offset
    }
}

impl<T: Scalar> Index<usize> for TensorField<T> {
    type Output = T;

    #[inline]
    fn index(&self, c: usize) -> &T {
        &self.data[self.offset([c, 0, 0, 0], 1)]
    }
}

impl<T: Scalar> IndexMut<usize> for TensorField<T> {
    #[inline]
    fn index_mut(&mut self, c: usize) -> &mut T {
        let i = self.offset([c, 0, 0, 0], 1);
        &mut self.data[i]
    }
}

impl<T: Scalar> Index<(usize, usize)> for TensorField<T> {
    type Output = T;

    #[inline]
    fn index(&self, (c, p): (usize, usize)) -> &T {
        &self.data[self.offset([c, p, 0, 0], 2)]
    }
}

impl<T: Scalar> IndexMut<(usize, usize)> for TensorField<T> {
    #[inline]
    fn index_mut(&mut self, (c, p): (usize, usize)) -> &mut T {
        let i = self.offset([c, p, 0, 0], 2);
        &mut self.data[i]
    }
}

impl<T: Scalar> Index<(usize, usize, usize)> for TensorField<T> {
    type Output = T;

    #[inline]
    fn index(&self, (c, p, i): (usize, usize, usize)) -> &T {
        &self.data[self.offset([c, p, i, 0], 3)]
    }
}

impl<T: Scalar> IndexMut<(usize, usize, usize)> for TensorField<T> {
    #[inline]
    fn index_mut(&mut self, (c, p, i): (usize, usize, usize)) -> &mut T {
        let k = self.offset([c, p, i, 0], 3);
        &mut self.data[k]
    }
}

impl<T: Scalar> Index<(usize, usize, usize, usize)> for TensorField<T> {
    type Output = T;

    #[inline]
    fn index(&self, (c, p, i, j): (usize, usize, usize, usize)) -> &T {
        &self.data[self.offset([c, p, i, j], 4)]
    }
}

impl<T: Scalar> IndexMut<(usize, usize, usize, usize)> for TensorField<T> {
    #[inline]
    fn index_mut(&mut self, (c, p, i, j): (usize, usize, usize, usize)) -> &mut T {
        let k = self.offset([c, p, i, j], 4);
        &mut self.data[k]
    }
}

/// The name → handle table built up during registration and setup.
///
/// The first declaration of a name fixes its layout; later declarations with
/// a different layout are a fatal [`GraphError::LayoutMismatch`].
#[derive(Debug, Default)]
pub(crate) struct FieldTable {
    by_name: FxHashMap<String, FieldHandle>,
    specs: Vec<FieldSpec>,
}

impl FieldTable {
    pub fn intern(&mut self, spec: &FieldSpec) -> Result<FieldHandle, GraphError> {
        if let Some(&handle) = self.by_name.get(&spec.name) {
            let existing = &self.specs[handle.0];
            if existing.layout != spec.layout {
                return Err(GraphError::LayoutMismatch {
                    field: spec.name.clone(),
                    first: existing.layout.clone(),
                    other: spec.layout.clone(),
                });
            }
            return Ok(handle);
        }
        let handle = FieldHandle(self.specs.len());
        self.specs.push(spec.clone());
        self.by_name.insert(spec.name.clone(), handle);
        Ok(handle)
    }

    pub fn lookup(&self, name: &str) -> Option<FieldHandle> {
        self.by_name.get(name).copied()
    }

    pub fn specs(&self) -> &[FieldSpec] {
        &self.specs
    }
}

/// Hands out resolved field handles to evaluators during setup.
pub struct FieldBinder<'a> {
    pub(crate) table: &'a mut FieldTable,
}

impl<'a> FieldBinder<'a> {
    /// Resolves a declared field to its handle, validating the layout against
    /// every prior declaration of the same name.
    pub fn bind(&mut self, spec: &FieldSpec) -> Result<FieldHandle, GraphError> {
        self.table.intern(spec)
    }
}
