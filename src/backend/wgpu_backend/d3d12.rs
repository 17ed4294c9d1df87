//! Direct3D12 backend
//!
//! Runs wgpu restricted to DX12. Programs write into three constant buffers
//! owned by the backend (b0 matrices, b1 material, b2 light). Every draw is
//! submitted on its own so each one sees the constants written before it, and
//! `present` waits for the GPU, keeping a single frame in flight.

use super::{Flavor, WgpuCore};
use crate::GraphicsApi;

/// Renderer backend for `GraphicsApi::DirectX12`
pub struct D3D12Backend {
    core: WgpuCore,
}

impl D3D12Backend {
    pub fn new(vsync: bool) -> Self {
        Self {
            core: WgpuCore::new(GraphicsApi::DirectX12, vsync, Flavor::d3d12()),
        }
    }
}

impl_renderer_backend!(D3D12Backend);
