//! Second-order tensor algebra at a single material point.
//!
//! Kernels receive the spatial dimension at runtime, so tensors are backed by
//! a fixed 3×3 component array with the active `dim × dim` block in the upper
//! left. All operations are allocation-free and generic over the scalar type.

use feval_traits::Scalar;
use std::ops::{Add, AddAssign, Index, IndexMut, Mul, Sub};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Tensor2<T> {
    dim: usize,
    comps: [T; 9],
}

impl<T: Scalar> Tensor2<T> {
    pub fn zero(dim: usize) -> Self {
        debug_assert!((1..=3).contains(&dim));
        Self {
            dim,
            comps: [T::zero(); 9],
        }
    }

    pub fn identity(dim: usize) -> Self {
        let mut t = Self::zero(dim);
        for i in 0..dim {
            t[(i, i)] = T::one();
        }
        t
    }

    pub fn from_fn(dim: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut t = Self::zero(dim);
        for i in 0..dim {
            for j in 0..dim {
                t[(i, j)] = f(i, j);
            }
        }
        t
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn transpose(&self) -> Self {
        Self::from_fn(self.dim, |i, j| self[(j, i)])
    }

    /// Matrix product `self · rhs`.
    pub fn dot(&self, rhs: &Self) -> Self {
        debug_assert_eq!(self.dim, rhs.dim);
        Self::from_fn(self.dim, |i, j| {
            let mut sum = T::zero();
            for k in 0..self.dim {
                sum += self[(i, k)] * rhs[(k, j)];
            }
            sum
        })
    }

    pub fn trace(&self) -> T {
        let mut tr = T::zero();
        for i in 0..self.dim {
            tr += self[(i, i)];
        }
        tr
    }

    pub fn determinant(&self) -> T {
        match self.dim {
            1 => self[(0, 0)],
            2 => self[(0, 0)] * self[(1, 1)] - self[(0, 1)] * self[(1, 0)],
            _ => {
                self[(0, 0)] * (self[(1, 1)] * self[(2, 2)] - self[(1, 2)] * self[(2, 1)])
                    - self[(0, 1)] * (self[(1, 0)] * self[(2, 2)] - self[(1, 2)] * self[(2, 0)])
                    + self[(0, 2)] * (self[(1, 0)] * self[(2, 1)] - self[(1, 1)] * self[(2, 0)])
            }
        }
    }

    /// Inverse via the adjugate; `None` if the determinant vanishes.
    pub fn try_inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det.value() == 0.0 {
            return None;
        }
        let inv_det = T::one() / det;
        let inv = match self.dim {
            1 => {
                let mut t = Self::zero(1);
                t[(0, 0)] = inv_det;
                t
            }
            2 => {
                let mut t = Self::zero(2);
                t[(0, 0)] = self[(1, 1)] * inv_det;
                t[(0, 1)] = -self[(0, 1)] * inv_det;
                t[(1, 0)] = -self[(1, 0)] * inv_det;
                t[(1, 1)] = self[(0, 0)] * inv_det;
                t
            }
            _ => Self::from_fn(3, |i, j| {
                // Adjugate entry (i, j) is the (j, i) cofactor.
                let r0 = (j + 1) % 3;
                let r1 = (j + 2) % 3;
                let c0 = (i + 1) % 3;
                let c1 = (i + 2) % 3;
                (self[(r0, c0)] * self[(r1, c1)] - self[(r0, c1)] * self[(r1, c0)]) * inv_det
            }),
        };
        Some(inv)
    }

    /// Deviatoric part: `self - tr(self)/dim · I`.
    pub fn deviator(&self) -> Self {
        let mean = self.trace() / T::from_f64(self.dim as f64);
        let mut dev = *self;
        for i in 0..self.dim {
            dev[(i, i)] -= mean;
        }
        dev
    }

    pub fn symmetric_part(&self) -> Self {
        let half = T::from_f64(0.5);
        Self::from_fn(self.dim, |i, j| (self[(i, j)] + self[(j, i)]) * half)
    }

    /// Frobenius norm.
    pub fn norm(&self) -> T {
        let mut sum = T::zero();
        for i in 0..self.dim {
            for j in 0..self.dim {
                sum += self[(i, j)] * self[(i, j)];
            }
        }
        sum.sqrt()
    }

    pub fn scaled(&self, factor: T) -> Self {
        Self::from_fn(self.dim, |i, j| self[(i, j)] * factor)
    }

    /// Tensor exponential by truncated power series.
    ///
    /// Intended for small-argument tensors such as the plastic flow increment
    /// `dgamma · n`; the series is truncated once a term no longer changes the
    /// partial sum at working precision.
    pub fn exp(&self) -> Self {
        let mut term = Self::identity(self.dim);
        let mut sum = term;
        for k in 1..=32 {
            term = term.dot(self).scaled(T::from_f64(1.0 / k as f64));
            sum += term;
            if term.norm().value() <= 1e-16 * sum.norm().value() {
                break;
            }
        }
        sum
    }
}

impl<T: Scalar> Index<(usize, usize)> for Tensor2<T> {
    type Output = T;

    #[inline]
    fn index(&self, (i, j): (usize, usize)) -> &T {
        debug_assert!(i < self.dim && j < self.dim);
        &self.comps[3 * i + j]
    }
}

impl<T: Scalar> IndexMut<(usize, usize)> for Tensor2<T> {
    #[inline]
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut T {
        debug_assert!(i < self.dim && j < self.dim);
        &mut self.comps[3 * i + j]
    }
}

impl<T: Scalar> Add for Tensor2<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        debug_assert_eq!(self.dim, rhs.dim);
        Self::from_fn(self.dim, |i, j| self[(i, j)] + rhs[(i, j)])
    }
}

impl<T: Scalar> AddAssign for Tensor2<T> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<T: Scalar> Sub for Tensor2<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        debug_assert_eq!(self.dim, rhs.dim);
        Self::from_fn(self.dim, |i, j| self[(i, j)] - rhs[(i, j)])
    }
}

impl<T: Scalar> Mul<T> for Tensor2<T> {
    type Output = Self;

    fn mul(self, factor: T) -> Self {
        self.scaled(factor)
    }
}
