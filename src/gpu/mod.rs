//! GPU/VRAM backend.
//!
//! This module provides the wgpu implementation of the compute backend
//! for cross-platform support (Vulkan, Metal, DX12). Device memory is
//! exercised with plain buffer copies, no shaders.

pub mod backend;
pub mod buffers;
pub mod device;

pub use backend::WgpuBackend;
pub use device::{enumerate_gpus, select_gpu, GpuInfo};
