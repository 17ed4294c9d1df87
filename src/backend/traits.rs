//! Core backend abstraction traits
//!
//! These traits define the interface every per-API backend implements. The
//! renderer, materials and meshes only ever talk to a backend through them.

use crate::backend::types::*;
use crate::resources::Mesh;
use crate::scene::{Camera, CameraState, Light};
use crate::GraphicsApi;
use raw_window_handle::RawDisplayHandle;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend is not initialized")]
    NotInitialized,
    #[error("Invalid backend state: expected {expected}, found {actual}")]
    InvalidState {
        expected: BackendState,
        actual: BackendState,
    },
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Swapchain error: {0}")]
    SwapchainFailed(String),
    #[error("Failed to compile shader {path}: {reason}")]
    ShaderCompilationFailed { path: PathBuf, reason: String },
    #[error("Failed to link shader program: {0}")]
    ProgramLinkFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{api} is not supported by a {context} device context")]
    UnsupportedApi {
        api: GraphicsApi,
        context: &'static str,
    },
    #[error("No shader program bound for draw")]
    NoProgramBound,
    #[error("Command recording failed: {0}")]
    CommandFailed(String),
}

impl BackendError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        BackendError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn compile(path: &Path, reason: impl Into<String>) -> Self {
        BackendError::ShaderCompilationFailed {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Per-frame state tracked by every backend: the active camera and light list
#[derive(Debug, Clone, Default)]
pub struct FrameState {
    /// Snapshot of the camera last passed to `set_camera`
    pub camera: Option<CameraState>,
    /// Value copy of the scene lights
    pub lights: Vec<Light>,
}

/// Compiles a shader file into a native handle for one API
pub trait ShaderCompiler {
    fn compile(&self, path: &Path, stage: ShaderStage) -> BackendResult<CompiledShader>;
}

/// A linkable GPU program (OpenGL) or graphics pipeline (Vulkan / D3D12)
pub trait ShaderProgram {
    /// Attach a compiled stage
    fn attach_shader(&mut self, shader: &CompiledShader) -> BackendResult<()>;

    /// Drop every attached stage. A linked program stays usable until the next `link`.
    fn detach_shaders(&mut self);

    /// Link the attached stages into an executable program/pipeline
    fn link(&mut self) -> BackendResult<()>;

    /// Make this program current for subsequent uniform uploads and draws
    fn use_program(&mut self);

    /// Upload a named uniform block to its binding slot
    fn set_uniform_buffer(&mut self, name: &str, binding: u32, data: &[u8]) -> BackendResult<()>;

    fn handle(&self) -> ProgramHandle;

    fn is_valid(&self) -> bool;
}

/// GPU-resident vertex and normal data
pub trait MeshBuffer {
    /// Upload vertex/normal arrays; fails if allocation fails
    fn create_buffers(&mut self, vertices: &[f32], normals: &[f32]) -> BackendResult<()>;

    /// Make this buffer the active vertex source
    fn bind(&mut self);

    fn unbind(&mut self);

    fn is_bound(&self) -> bool;

    fn handle(&self) -> MeshHandle;
}

/// The per-API renderer backend.
///
/// Lifecycle: `Uninitialized` -> `init_window_context` -> `ContextReady` ->
/// `init` -> `Ready`, then per frame `clear` -> (`set_uniforms`, `draw`)* ->
/// `present`. Constructors never touch the GPU.
pub trait RendererBackend {
    /// The API this backend was constructed for
    fn graphics_api(&self) -> GraphicsApi;

    fn state(&self) -> BackendState;

    /// Create the minimal instance/context needed before a window exists
    fn init_window_context(&mut self, display: RawDisplayHandle) -> BackendResult<()>;

    /// Full device, swapchain and pipeline setup against the window surface
    fn init(&mut self, window: Arc<winit::window::Window>) -> BackendResult<()>;

    /// Device access for the shader/program/mesh factories
    fn device_context(&self) -> DeviceContext;

    /// Recreate size-dependent resources
    fn resize(&mut self, width: u32, height: u32) -> BackendResult<()>;

    /// Begin a frame, clearing to the active camera's background color
    fn clear(&mut self) -> BackendResult<()>;

    /// Draw the mesh's vertex buffer as a non-indexed triangle list
    fn draw(&mut self, mesh: &Mesh) -> BackendResult<()>;

    /// Upload model/view/projection for the active camera and bind the program
    fn set_uniforms(&mut self, program: &mut dyn ShaderProgram) -> BackendResult<()>;

    /// Load six faces (+X, -X, +Y, -Y, +Z, -Z) into one cubemap.
    /// Returns `TextureId::NONE` if any face fails to load.
    fn create_cubemap_texture(&mut self, faces: &[PathBuf]) -> TextureId;

    /// Release a cubemap. `TextureId::NONE` is ignored.
    fn delete_cubemap_texture(&mut self, texture: TextureId);

    /// Draw a skybox with depth compare relaxed to `LessEqual`.
    /// Depth compare is `Less` again when this returns, on every path.
    fn render_skybox(
        &mut self,
        mesh: &Mesh,
        program: &mut dyn ShaderProgram,
        texture: TextureId,
    ) -> BackendResult<()>;

    /// End the frame and hand it to the presentation engine
    fn present(&mut self) -> BackendResult<()>;

    fn depth_compare(&self) -> CompareFunction;

    fn set_depth_compare(&mut self, compare: CompareFunction);

    fn frame_state(&self) -> &FrameState;

    fn frame_state_mut(&mut self) -> &mut FrameState;

    /// API-specific reaction to a new camera (clear color setup)
    fn on_camera_set(&mut self);

    /// Bind the camera for subsequent frames
    fn set_camera(&mut self, camera: &Camera) {
        self.frame_state_mut().camera = Some(camera.state());
        self.on_camera_set();
    }

    fn camera(&self) -> Option<&CameraState> {
        self.frame_state().camera.as_ref()
    }

    fn set_lights(&mut self, lights: &[Light]) {
        let state = self.frame_state_mut();
        state.lights.clear();
        state.lights.extend_from_slice(lights);
    }

    fn lights(&self) -> &[Light] {
        &self.frame_state().lights
    }
}

/// Relaxes the depth compare of a backend and restores `Less` when dropped.
///
/// Derefs to the backend so the guarded section keeps full access to it.
pub struct DepthCompareGuard<'a, B: RendererBackend + ?Sized> {
    backend: &'a mut B,
}

impl<'a, B: RendererBackend + ?Sized> DepthCompareGuard<'a, B> {
    pub fn new(backend: &'a mut B, compare: CompareFunction) -> Self {
        backend.set_depth_compare(compare);
        Self { backend }
    }
}

impl<B: RendererBackend + ?Sized> Deref for DepthCompareGuard<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.backend
    }
}

impl<B: RendererBackend + ?Sized> DerefMut for DepthCompareGuard<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.backend
    }
}

impl<B: RendererBackend + ?Sized> Drop for DepthCompareGuard<'_, B> {
    fn drop(&mut self) {
        self.backend.set_depth_compare(CompareFunction::Less);
    }
}
