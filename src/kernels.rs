//! The evaluator kernels shipped with the crate.

mod gather;
mod interpolate;
mod kinematics;
mod mass_residual;
mod residual;
mod scatter;
mod strain;
mod tau;

pub use gather::*;
pub use interpolate::*;
pub use kinematics::*;
pub use mass_residual::*;
pub use residual::*;
pub use scatter::*;
pub use strain::*;
pub use tau::*;
