use crate::Scalar;
use num::{One, Zero};
use std::cmp::Ordering;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

/// A fixed-size forward-mode dual number.
///
/// Carries a value and `N` partial derivatives with respect to the
/// element-local unknowns. All arithmetic propagates derivatives by the chain
/// rule while computing the value component with exactly the same floating
/// point operations as plain `f64` arithmetic, so values are bit-identical
/// across the two instantiations of a kernel.
///
/// `N` bounds the number of element degrees of freedom of the instantiating
/// problem (nodes per element times solution components). The derivative
/// array is inline; `Dual` is `Copy` and arithmetic never touches the heap.
///
/// Comparison operators act on the value component only, mirroring how the
/// underlying real number would compare.
#[derive(Copy, Clone, Debug)]
pub struct Dual<const N: usize> {
    val: f64,
    dot: [f64; N],
}

impl<const N: usize> Dual<N> {
    /// A dual with the given value and all derivatives zero.
    #[inline]
    pub fn constant(val: f64) -> Self {
        Self { val, dot: [0.0; N] }
    }

    #[inline]
    pub fn new(val: f64, dot: [f64; N]) -> Self {
        Self { val, dot }
    }

    #[inline]
    pub fn val(&self) -> f64 {
        self.val
    }

    #[inline]
    pub fn dot(&self) -> &[f64; N] {
        &self.dot
    }

    /// Applies `f(val)` with derivative factor `dfdv` (chain rule).
    #[inline]
    fn lift(self, val: f64, dfdv: f64) -> Self {
        let mut dot = self.dot;
        for d in dot.iter_mut() {
            *d *= dfdv;
        }
        Self { val, dot }
    }
}

impl<const N: usize> From<f64> for Dual<N> {
    #[inline]
    fn from(val: f64) -> Self {
        Self::constant(val)
    }
}

impl<const N: usize> PartialEq for Dual<N> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.val == other.val
    }
}

impl<const N: usize> PartialOrd for Dual<N> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.val.partial_cmp(&other.val)
    }
}

impl<const N: usize> Add for Dual<N> {
    type Output = Self;

    #[inline]
    fn add(mut self, rhs: Self) -> Self {
        self.val += rhs.val;
        for (d, r) in self.dot.iter_mut().zip(&rhs.dot) {
            *d += r;
        }
        self
    }
}

impl<const N: usize> Sub for Dual<N> {
    type Output = Self;

    #[inline]
    fn sub(mut self, rhs: Self) -> Self {
        self.val -= rhs.val;
        for (d, r) in self.dot.iter_mut().zip(&rhs.dot) {
            *d -= r;
        }
        self
    }
}

impl<const N: usize> Mul for Dual<N> {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        let mut dot = [0.0; N];
        for i in 0..N {
            dot[i] = self.dot[i] * rhs.val + self.val * rhs.dot[i];
        }
        Self {
            val: self.val * rhs.val,
            dot,
        }
    }
}

impl<const N: usize> Div for Dual<N> {
    type Output = Self;

    #[inline]
    fn div(self, rhs: Self) -> Self {
        // The value must be the plain quotient, not val * (1/rhs), so the
        // result stays bit-identical to the f64 computation.
        let val = self.val / rhs.val;
        let inv = 1.0 / rhs.val;
        let mut dot = [0.0; N];
        for i in 0..N {
            dot[i] = (self.dot[i] - val * rhs.dot[i]) * inv;
        }
        Self { val, dot }
    }
}

impl<const N: usize> Neg for Dual<N> {
    type Output = Self;

    #[inline]
    fn neg(mut self) -> Self {
        self.val = -self.val;
        for d in self.dot.iter_mut() {
            *d = -*d;
        }
        self
    }
}

impl<const N: usize> AddAssign for Dual<N> {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<const N: usize> SubAssign for Dual<N> {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl<const N: usize> MulAssign for Dual<N> {
    #[inline]
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl<const N: usize> DivAssign for Dual<N> {
    #[inline]
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

impl<const N: usize> Zero for Dual<N> {
    #[inline]
    fn zero() -> Self {
        Self::constant(0.0)
    }

    #[inline]
    fn is_zero(&self) -> bool {
        self.val == 0.0
    }
}

impl<const N: usize> One for Dual<N> {
    #[inline]
    fn one() -> Self {
        Self::constant(1.0)
    }
}

impl<const N: usize> Scalar for Dual<N> {
    const DERIVATIVE_DIM: usize = N;

    #[inline]
    fn from_f64(value: f64) -> Self {
        Self::constant(value)
    }

    #[inline]
    fn value(&self) -> f64 {
        self.val
    }

    #[inline]
    fn derivative(&self, i: usize) -> f64 {
        self.dot[i]
    }

    #[inline]
    fn seeded(value: f64, i: usize) -> Self {
        let mut dot = [0.0; N];
        dot[i] = 1.0;
        Self { val: value, dot }
    }

    /// Derivative is undefined at exactly zero; the propagated components
    /// become infinite there, as for the real square root's one-sided limit.
    #[inline]
    fn sqrt(self) -> Self {
        let s = self.val.sqrt();
        self.lift(s, 0.5 / s)
    }

    #[inline]
    fn exp(self) -> Self {
        let e = self.val.exp();
        self.lift(e, e)
    }

    #[inline]
    fn ln(self) -> Self {
        self.lift(self.val.ln(), 1.0 / self.val)
    }

    #[inline]
    fn abs(self) -> Self {
        if self.val < 0.0 {
            -self
        } else {
            self
        }
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        if n == 0 {
            return Self::one();
        }
        let val = self.val.powi(n);
        self.lift(val, f64::from(n) * self.val.powi(n - 1))
    }

    #[inline]
    fn max(self, other: Self) -> Self {
        if other.val > self.val {
            other
        } else {
            self
        }
    }

    #[inline]
    fn min(self, other: Self) -> Self {
        if other.val < self.val {
            other
        } else {
            self
        }
    }

    #[inline]
    fn is_finite(&self) -> bool {
        self.val.is_finite() && self.dot.iter().all(|d| d.is_finite())
    }
}
