//! `dk-tensor` - compute kernels behind the decodekit engine seam.
//!
//! This crate provides:
//! - A `ComputeBackend` trait: the operations a transformer forward pass needs
//! - A reference `CpuBackend` that splits matrix products across a thread budget
//! - Data type definitions for GGUF tensor storage (F32, F16, Q4_0, Q8_0)
//! - Dequantization of raw GGUF tensor bytes to f32

pub mod backend;
pub mod cpu;
pub mod dtype;
pub mod error;
pub mod quant;

pub use backend::ComputeBackend;
pub use cpu::CpuBackend;
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use quant::dequantize;
