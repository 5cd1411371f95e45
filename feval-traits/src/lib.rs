use num::{One, Zero};
use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

mod dual;

pub use dual::Dual;

/// The scalar type every evaluation kernel is written against.
///
/// A kernel generic over `Scalar` can be instantiated with `f64` to compute
/// plain values, or with [`Dual`] to additionally propagate exact partial
/// derivatives with respect to the element-local unknowns. The value component
/// of any arithmetic expression is required to be bit-identical between the
/// two instantiations, so residual and Jacobian passes agree exactly.
pub trait Scalar:
    Copy
    + Debug
    + PartialEq
    + PartialOrd
    + Zero
    + One
    + Sub<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
    + Send
    + Sync
    + 'static
{
    /// Number of derivative components carried by this scalar type.
    ///
    /// `0` for plain values. A scalar with `DERIVATIVE_DIM == 0` is the
    /// "value trait": state saves and other concrete side effects only run
    /// under this instantiation.
    const DERIVATIVE_DIM: usize;

    fn from_f64(value: f64) -> Self;

    /// The value component.
    fn value(&self) -> f64;

    /// The partial derivative with respect to local unknown `i`.
    ///
    /// Always `0.0` for plain values.
    fn derivative(&self, i: usize) -> f64;

    /// A scalar with the given value and a unit derivative in slot `i`.
    ///
    /// Used by gather kernels to mark solution entries as independent
    /// variables. For plain values this is just the value.
    fn seeded(value: f64, i: usize) -> Self;

    fn sqrt(self) -> Self;

    fn exp(self) -> Self;

    fn ln(self) -> Self;

    fn abs(self) -> Self;

    fn powi(self, n: i32) -> Self;

    /// The larger of the two value components, derivatives following the winner.
    fn max(self, other: Self) -> Self;

    /// The smaller of the two value components, derivatives following the winner.
    fn min(self, other: Self) -> Self;

    fn is_finite(&self) -> bool;
}

impl Scalar for f64 {
    const DERIVATIVE_DIM: usize = 0;

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }

    #[inline]
    fn value(&self) -> f64 {
        *self
    }

    #[inline]
    fn derivative(&self, _i: usize) -> f64 {
        0.0
    }

    #[inline]
    fn seeded(value: f64, _i: usize) -> Self {
        value
    }

    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }

    #[inline]
    fn ln(self) -> Self {
        f64::ln(self)
    }

    #[inline]
    fn abs(self) -> Self {
        f64::abs(self)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        f64::powi(self, n)
    }

    #[inline]
    fn max(self, other: Self) -> Self {
        f64::max(self, other)
    }

    #[inline]
    fn min(self, other: Self) -> Self {
        f64::min(self, other)
    }

    #[inline]
    fn is_finite(&self) -> bool {
        f64::is_finite(*self)
    }
}
