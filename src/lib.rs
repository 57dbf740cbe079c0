//! A minimal library for persisting and restoring fully-connected
//! classifier networks using a PyTorch-like checkpoint format.

pub mod arch;
pub mod checkpoint;
pub mod nn;
