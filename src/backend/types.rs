//! Common types shared between backends

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::dummy::HeadlessContext;
#[cfg(not(target_arch = "wasm32"))]
use crate::backend::vulkan::{VulkanContext, VulkanProgramHandle, VulkanShaderModule};
use crate::backend::wgpu_backend::{WgpuContext, WgpuProgramHandle, WgpuShaderModule};
use crate::scene::{model_matrix, CameraState};

/// Uniform slot for camera matrices (model/view/projection)
pub const MATRICES_SLOT: u32 = 0;
/// Uniform slot for the material base color
pub const MATERIAL_SLOT: u32 = 1;
/// Uniform slot for the light direction
pub const LIGHT_SLOT: u32 = 2;

pub const MATRICES_BLOCK: &str = "Matrices";
pub const MATERIAL_BLOCK: &str = "MaterialData";
pub const LIGHT_BLOCK: &str = "LightData";

/// Number of fixed uniform slots
pub const UNIFORM_SLOT_COUNT: usize = 3;
/// Bytes reserved per slot in pre-allocated uniform arenas (covers minUniformBufferOffsetAlignment)
pub const UNIFORM_SLOT_STRIDE: u64 = 256;

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Depth comparison function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareFunction {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Backend-owned texture id. `TextureId::NONE` means "no texture".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureId(pub u32);

impl TextureId {
    pub const NONE: TextureId = TextureId(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

/// Lifecycle of a backend instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendState {
    #[default]
    Uninitialized,
    /// `init_window_context` succeeded
    ContextReady,
    /// `init` succeeded, all GPU resources allocated
    Ready,
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Slot 0 contents
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MatricesUniform {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

impl MatricesUniform {
    pub fn new(model: Mat4, view: Mat4, projection: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
        }
    }

    /// Per-object matrices for a camera, with the model spun by elapsed time
    pub fn for_camera(camera: &CameraState, elapsed_seconds: f32) -> Self {
        Self::new(
            model_matrix(elapsed_seconds),
            camera.view_matrix(),
            camera.projection_matrix(),
        )
    }

    /// Skybox matrices: identity model and a translation-free view
    pub fn for_skybox(camera: &CameraState) -> Self {
        Self::new(
            Mat4::IDENTITY,
            camera.skybox_view_matrix(),
            camera.projection_matrix(),
        )
    }

    /// Flip clip-space Y for APIs whose framebuffer Y points down
    pub fn flip_y(mut self) -> Self {
        self.projection[1][1] = -self.projection[1][1];
        self
    }
}

/// Slot 1 contents
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialUniform {
    pub color: [f32; 4],
}

/// Slot 2 contents. `w` carries the light type tag.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightUniform {
    pub direction: [f32; 4],
}

/// Device access handed to shader, program and mesh buffer factories.
///
/// Cloning is cheap: every variant holds reference-counted handles.
#[derive(Clone)]
pub enum DeviceContext {
    /// The backend has no device yet (`init` has not run)
    Uninitialized,
    /// No GPU; objects validate their inputs and record calls
    Headless(HeadlessContext),
    #[cfg(not(target_arch = "wasm32"))]
    Vulkan(VulkanContext),
    Wgpu(WgpuContext),
}

impl DeviceContext {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceContext::Uninitialized => "uninitialized",
            DeviceContext::Headless(_) => "headless",
            #[cfg(not(target_arch = "wasm32"))]
            DeviceContext::Vulkan(_) => "vulkan",
            DeviceContext::Wgpu(_) => "wgpu",
        }
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceContext::{}", self.name())
    }
}

/// A compiled shader stage. Native resources are released on drop.
pub enum CompiledShader {
    Headless { stage: ShaderStage, byte_len: usize },
    #[cfg(not(target_arch = "wasm32"))]
    Vulkan(VulkanShaderModule),
    Wgpu(WgpuShaderModule),
}

impl CompiledShader {
    pub fn stage(&self) -> ShaderStage {
        match self {
            CompiledShader::Headless { stage, .. } => *stage,
            #[cfg(not(target_arch = "wasm32"))]
            CompiledShader::Vulkan(module) => module.stage,
            CompiledShader::Wgpu(module) => module.stage,
        }
    }
}

impl fmt::Debug for CompiledShader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompiledShader::Headless { stage, byte_len } => f
                .debug_struct("Headless")
                .field("stage", stage)
                .field("byte_len", byte_len)
                .finish(),
            #[cfg(not(target_arch = "wasm32"))]
            CompiledShader::Vulkan(module) => write!(f, "Vulkan({} {:?})", module.stage, module.module),
            CompiledShader::Wgpu(module) => write!(f, "Wgpu({})", module.stage),
        }
    }
}

/// Opaque native handle(s) of an uploaded mesh
#[derive(Debug, Clone, Default)]
pub enum MeshHandle {
    #[default]
    None,
    Headless {
        id: u64,
        vertex_count: u32,
    },
    #[cfg(not(target_arch = "wasm32"))]
    Vulkan {
        positions: ash::vk::Buffer,
        normals: ash::vk::Buffer,
        vertex_count: u32,
    },
    Wgpu {
        positions: Arc<wgpu::Buffer>,
        normals: Arc<wgpu::Buffer>,
        vertex_count: u32,
    },
}

impl MeshHandle {
    pub fn vertex_count(&self) -> u32 {
        match self {
            MeshHandle::None => 0,
            MeshHandle::Headless { vertex_count, .. } => *vertex_count,
            #[cfg(not(target_arch = "wasm32"))]
            MeshHandle::Vulkan { vertex_count, .. } => *vertex_count,
            MeshHandle::Wgpu { vertex_count, .. } => *vertex_count,
        }
    }
}

/// Opaque native handle of a linked program / pipeline pair
#[derive(Debug, Clone, Default)]
pub enum ProgramHandle {
    #[default]
    None,
    Headless {
        id: u64,
    },
    #[cfg(not(target_arch = "wasm32"))]
    Vulkan(VulkanProgramHandle),
    Wgpu(WgpuProgramHandle),
}

impl ProgramHandle {
    pub fn is_none(&self) -> bool {
        matches!(self, ProgramHandle::None)
    }
}

/// Leading bytes of the DXBC/DXIL containers written by fxc and dxc
pub const DXBC_MAGIC: &[u8; 4] = b"DXBC";

/// Stand-in for a `.cso` holding DXBC/DXIL, which the wgpu Direct3D12 path
/// cannot consume: the sibling `.spv`, else the sibling `.glsl`
pub fn dxbc_substitute(cso: &Path) -> Option<PathBuf> {
    ["spv", "glsl"]
        .into_iter()
        .map(|ext| cso.with_extension(ext))
        .find(|candidate| candidate != cso && candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::spirv_first(&["unlit.vxs.spv", "unlit.vxs.glsl"], Some("unlit.vxs.spv"))]
    #[case::glsl_only(&["unlit.vxs.glsl"], Some("unlit.vxs.glsl"))]
    #[case::nothing(&[], None)]
    fn dxbc_substitute_prefers_spirv(#[case] present: &[&str], #[case] expected: Option<&str>) {
        let dir = tempfile::tempdir().unwrap();
        for name in present {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        assert_eq!(
            dxbc_substitute(&dir.path().join("unlit.vxs.cso")),
            expected.map(|name| dir.path().join(name))
        );
    }
}
