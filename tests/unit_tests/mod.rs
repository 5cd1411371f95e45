mod assembly;
mod graph;
mod helpers;
mod kernels;
mod material;
mod state_roundtrip;
