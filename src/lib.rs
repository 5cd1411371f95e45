pub mod assembly;
pub mod evaluator;
pub mod field;
pub mod graph;
pub mod kernels;
pub mod layout;
pub mod material;
pub mod params;
pub mod state;
pub mod tensor;
pub mod testing;
pub mod workset;

pub mod scalar {
    pub use feval_traits::*;
}

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
