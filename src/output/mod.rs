//! Post-processing of the agent's raw output into the emitted document.

pub mod bridge;
pub mod normalizer;

pub use bridge::inject_storage_bridge;
pub use normalizer::normalize;
