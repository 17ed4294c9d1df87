//! Dummy backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. Shaders are read from
//! disk and checked for the shape the target API expects, programs check their
//! stages at link time, and every call is written to a shared
//! [`HeadlessRecorder`] so tests can assert on what a frame did.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use raw_window_handle::RawDisplayHandle;
use web_time::Instant;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{CubemapData, Mesh};
use crate::scene::CameraState;
use crate::GraphicsApi;

/// Calls observed by a headless device
#[derive(Debug, Clone, Default)]
pub struct HeadlessRecorder {
    pub shaders_compiled: usize,
    pub programs_linked: usize,
    pub buffers_created: usize,
    /// (block name, binding, bytes) per upload
    pub uniform_uploads: Vec<(String, u32, Vec<u8>)>,
    pub clear_colors: Vec<[f32; 4]>,
    /// Vertex count of every draw, skybox included
    pub draws: Vec<u32>,
    pub skybox_draws: usize,
    /// Depth compare observed while each skybox call was running
    pub skybox_depth: Vec<CompareFunction>,
    pub presents: usize,
    pub cubemaps_created: usize,
    pub cubemaps_deleted: usize,
}

impl HeadlessRecorder {
    pub fn uploads_to(&self, binding: u32) -> usize {
        self.uniform_uploads
            .iter()
            .filter(|(_, b, _)| *b == binding)
            .count()
    }

    /// Base colors uploaded to the material slot, in upload order
    pub fn material_colors(&self) -> Vec<[f32; 4]> {
        self.uniform_uploads
            .iter()
            .filter(|(_, binding, data)| {
                *binding == MATERIAL_SLOT && data.len() == std::mem::size_of::<MaterialUniform>()
            })
            .map(|(_, _, data)| bytemuck::pod_read_unaligned::<MaterialUniform>(data).color)
            .collect()
    }
}

/// Device context of the dummy backend
#[derive(Debug, Clone)]
pub struct HeadlessContext {
    api: GraphicsApi,
    recorder: Arc<Mutex<HeadlessRecorder>>,
}

impl HeadlessContext {
    pub fn new(api: GraphicsApi) -> Self {
        Self {
            api,
            recorder: Arc::new(Mutex::new(HeadlessRecorder::default())),
        }
    }

    pub fn api(&self) -> GraphicsApi {
        self.api
    }

    /// Snapshot of everything recorded so far
    pub fn recorded(&self) -> HeadlessRecorder {
        self.recorder.lock().clone()
    }

    fn record(&self, f: impl FnOnce(&mut HeadlessRecorder)) {
        f(&mut self.recorder.lock());
    }

    fn next_id(&self) -> u64 {
        let recorder = self.recorder.lock();
        (recorder.programs_linked + recorder.buffers_created + 1) as u64
    }
}

/// Dummy renderer backend
pub struct DummyBackend {
    api: GraphicsApi,
    state: BackendState,
    context: HeadlessContext,
    frame: FrameState,
    depth_compare: CompareFunction,
    clear_color: [f32; 4],
    frame_active: bool,
    program_bound: bool,
    textures: HashSet<u32>,
    next_texture: u32,
    started: Instant,
}

impl DummyBackend {
    /// Create an uninitialized dummy backend reporting `api`
    pub fn new(api: GraphicsApi) -> Self {
        Self {
            api,
            state: BackendState::Uninitialized,
            context: HeadlessContext::new(api),
            frame: FrameState::default(),
            depth_compare: CompareFunction::Less,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            frame_active: false,
            program_bound: false,
            textures: HashSet::new(),
            next_texture: 1,
            started: Instant::now(),
        }
    }

    /// Create a dummy backend that is already `Ready`; no window needed
    pub fn headless(api: GraphicsApi) -> Self {
        let mut backend = Self::new(api);
        backend.state = BackendState::Ready;
        backend
    }

    pub fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    pub fn recorded(&self) -> HeadlessRecorder {
        self.context.recorded()
    }

    fn require_state(&self, expected: BackendState) -> BackendResult<()> {
        if self.state != expected {
            return Err(BackendError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn require_frame(&self) -> BackendResult<()> {
        if !self.frame_active {
            return Err(BackendError::CommandFailed("no frame in progress".into()));
        }
        Ok(())
    }

    fn camera_state(&self) -> BackendResult<CameraState> {
        self.frame
            .camera
            .ok_or_else(|| BackendError::CommandFailed("no camera bound".into()))
    }

    fn record_draw(&mut self, mesh: &Mesh) -> BackendResult<u32> {
        let vertex_count = match mesh.handle() {
            MeshHandle::Headless { vertex_count, .. } => vertex_count,
            MeshHandle::None => {
                return Err(BackendError::CommandFailed("mesh is not configured".into()))
            }
            _ => {
                return Err(BackendError::CommandFailed(
                    "mesh was uploaded to another device".into(),
                ))
            }
        };
        self.context.record(|r| r.draws.push(vertex_count));
        Ok(vertex_count)
    }
}

impl RendererBackend for DummyBackend {
    fn graphics_api(&self) -> GraphicsApi {
        self.api
    }

    fn state(&self) -> BackendState {
        self.state
    }

    fn init_window_context(&mut self, _display: RawDisplayHandle) -> BackendResult<()> {
        self.require_state(BackendState::Uninitialized)?;
        log::trace!("DummyBackend: window context ready for {}", self.api);
        self.state = BackendState::ContextReady;
        Ok(())
    }

    fn init(&mut self, _window: Arc<winit::window::Window>) -> BackendResult<()> {
        self.require_state(BackendState::ContextReady)?;
        self.state = BackendState::Ready;
        Ok(())
    }

    fn device_context(&self) -> DeviceContext {
        DeviceContext::Headless(self.context.clone())
    }

    fn resize(&mut self, width: u32, height: u32) -> BackendResult<()> {
        log::trace!("DummyBackend: resize to {}x{}", width, height);
        Ok(())
    }

    fn clear(&mut self) -> BackendResult<()> {
        self.require_state(BackendState::Ready)?;
        self.frame_active = true;
        self.program_bound = false;
        let color = self.clear_color;
        self.context.record(|r| r.clear_colors.push(color));
        Ok(())
    }

    fn draw(&mut self, mesh: &Mesh) -> BackendResult<()> {
        self.require_frame()?;
        if !self.program_bound {
            return Err(BackendError::NoProgramBound);
        }
        self.record_draw(mesh).map(|_| ())
    }

    fn set_uniforms(&mut self, program: &mut dyn ShaderProgram) -> BackendResult<()> {
        self.require_frame()?;
        let camera = self.camera_state()?;
        let elapsed = self.started.elapsed().as_secs_f32();
        let matrices = MatricesUniform::for_camera(&camera, elapsed);
        program.set_uniform_buffer(MATRICES_BLOCK, MATRICES_SLOT, bytemuck::bytes_of(&matrices))?;
        if program.handle().is_none() {
            return Err(BackendError::NoProgramBound);
        }
        self.program_bound = true;
        Ok(())
    }

    fn create_cubemap_texture(&mut self, faces: &[PathBuf]) -> TextureId {
        match CubemapData::load(faces) {
            Ok(cubemap) => {
                let id = self.next_texture;
                self.next_texture += 1;
                self.textures.insert(id);
                self.context.record(|r| r.cubemaps_created += 1);
                log::trace!("DummyBackend: cubemap {} ({}px faces)", id, cubemap.size);
                TextureId(id)
            }
            Err(e) => {
                log::error!("Failed to load cubemap: {e}");
                TextureId::NONE
            }
        }
    }

    fn delete_cubemap_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture.0) {
            self.context.record(|r| r.cubemaps_deleted += 1);
        }
    }

    fn render_skybox(
        &mut self,
        mesh: &Mesh,
        program: &mut dyn ShaderProgram,
        texture: TextureId,
    ) -> BackendResult<()> {
        let mut guard = DepthCompareGuard::new(self, CompareFunction::LessEqual);
        let depth = guard.depth_compare;
        guard.context.record(|r| r.skybox_depth.push(depth));

        guard.require_frame()?;
        if texture.is_none() || !guard.textures.contains(&texture.0) {
            return Err(BackendError::TextureCreationFailed(format!(
                "unknown cubemap {}",
                texture.0
            )));
        }
        if !program.is_valid() {
            return Err(BackendError::NoProgramBound);
        }

        let camera = guard.camera_state()?;
        let matrices = MatricesUniform::for_skybox(&camera);
        program.set_uniform_buffer(MATRICES_BLOCK, MATRICES_SLOT, bytemuck::bytes_of(&matrices))?;
        guard.record_draw(mesh)?;
        guard.context.record(|r| r.skybox_draws += 1);
        Ok(())
    }

    fn present(&mut self) -> BackendResult<()> {
        self.require_frame()?;
        self.frame_active = false;
        self.context.record(|r| r.presents += 1);
        Ok(())
    }

    fn depth_compare(&self) -> CompareFunction {
        self.depth_compare
    }

    fn set_depth_compare(&mut self, compare: CompareFunction) {
        self.depth_compare = compare;
    }

    fn frame_state(&self) -> &FrameState {
        &self.frame
    }

    fn frame_state_mut(&mut self) -> &mut FrameState {
        &mut self.frame
    }

    fn on_camera_set(&mut self) {
        if let Some(camera) = &self.frame.camera {
            self.clear_color = camera.background_color;
        }
    }
}

/// Reads shader files and checks them for the target API's format
pub struct HeadlessShaderCompiler {
    api: GraphicsApi,
    context: HeadlessContext,
}

impl HeadlessShaderCompiler {
    pub fn new(api: GraphicsApi, context: HeadlessContext) -> Self {
        Self { api, context }
    }
}

impl HeadlessShaderCompiler {
    fn check(path: &Path, bytes: &[u8], source: bool) -> BackendResult<()> {
        if bytes.is_empty() {
            return Err(BackendError::compile(path, "empty shader"));
        }
        if source {
            std::str::from_utf8(bytes)
                .map_err(|e| BackendError::compile(path, format!("source is not UTF-8: {e}")))?;
        } else if bytes.len() % 4 != 0 {
            return Err(BackendError::compile(
                path,
                format!("bytecode length {} is not a multiple of 4", bytes.len()),
            ));
        }
        Ok(())
    }
}

impl ShaderCompiler for HeadlessShaderCompiler {
    fn compile(&self, path: &Path, stage: ShaderStage) -> BackendResult<CompiledShader> {
        let mut bytes = std::fs::read(path).map_err(|e| BackendError::io(path, e))?;
        let mut source = self.api.compiles_source();

        // Same substitution as the wgpu Direct3D12 compiler
        if self.api == GraphicsApi::DirectX12 && bytes.starts_with(DXBC_MAGIC) {
            let substitute = dxbc_substitute(path).ok_or_else(|| {
                BackendError::compile(path, "DXBC/DXIL bytecode needs a sibling .spv or .glsl file")
            })?;
            log::warn!(
                "{} is DXBC/DXIL, loading {} instead",
                path.display(),
                substitute.display()
            );
            bytes = std::fs::read(&substitute).map_err(|e| BackendError::io(&substitute, e))?;
            source = substitute.extension().is_some_and(|ext| ext == "glsl");
            Self::check(&substitute, &bytes, source)?;
        } else {
            Self::check(path, &bytes, source)?;
        }

        self.context.record(|r| r.shaders_compiled += 1);
        Ok(CompiledShader::Headless {
            stage,
            byte_len: bytes.len(),
        })
    }
}

/// Program that links when it holds exactly one vertex and one fragment stage
pub struct HeadlessShaderProgram {
    context: HeadlessContext,
    stages: Vec<ShaderStage>,
    id: Option<u64>,
    in_use: bool,
}

impl HeadlessShaderProgram {
    pub fn new(context: HeadlessContext) -> Self {
        Self {
            context,
            stages: Vec::new(),
            id: None,
            in_use: false,
        }
    }
}

impl ShaderProgram for HeadlessShaderProgram {
    fn attach_shader(&mut self, shader: &CompiledShader) -> BackendResult<()> {
        match shader {
            CompiledShader::Headless { stage, .. } => {
                self.stages.push(*stage);
                Ok(())
            }
            _ => Err(BackendError::ProgramLinkFailed(
                "shader was compiled for another device".into(),
            )),
        }
    }

    fn detach_shaders(&mut self) {
        self.stages.clear();
    }

    fn link(&mut self) -> BackendResult<()> {
        self.id = None;
        let count = |stage| self.stages.iter().filter(|s| **s == stage).count();
        if count(ShaderStage::Vertex) != 1 || count(ShaderStage::Fragment) != 1 {
            return Err(BackendError::ProgramLinkFailed(format!(
                "expected one vertex and one fragment stage, got {:?}",
                self.stages
            )));
        }
        let id = self.context.next_id();
        self.context.record(|r| r.programs_linked += 1);
        self.id = Some(id);
        Ok(())
    }

    fn use_program(&mut self) {
        self.in_use = self.id.is_some();
    }

    fn set_uniform_buffer(&mut self, name: &str, binding: u32, data: &[u8]) -> BackendResult<()> {
        if self.id.is_none() {
            return Err(BackendError::NoProgramBound);
        }
        let upload = (name.to_string(), binding, data.to_vec());
        self.context.record(|r| r.uniform_uploads.push(upload));
        Ok(())
    }

    fn handle(&self) -> ProgramHandle {
        self.id
            .map(|id| ProgramHandle::Headless { id })
            .unwrap_or_default()
    }

    fn is_valid(&self) -> bool {
        self.id.is_some()
    }
}

/// Mesh buffer that only remembers its vertex count
pub struct HeadlessMeshBuffer {
    context: HeadlessContext,
    id: Option<u64>,
    vertex_count: u32,
    bound: bool,
}

impl HeadlessMeshBuffer {
    pub fn new(context: HeadlessContext) -> Self {
        Self {
            context,
            id: None,
            vertex_count: 0,
            bound: false,
        }
    }
}

impl MeshBuffer for HeadlessMeshBuffer {
    fn create_buffers(&mut self, vertices: &[f32], normals: &[f32]) -> BackendResult<()> {
        if vertices.len() % 3 != 0 || vertices.len() != normals.len() {
            return Err(BackendError::BufferCreationFailed(format!(
                "{} vertex floats, {} normal floats",
                vertices.len(),
                normals.len()
            )));
        }
        self.id = Some(self.context.next_id());
        self.vertex_count = (vertices.len() / 3) as u32;
        self.context.record(|r| r.buffers_created += 1);
        Ok(())
    }

    fn bind(&mut self) {
        self.bound = self.id.is_some();
    }

    fn unbind(&mut self) {
        self.bound = false;
    }

    fn is_bound(&self) -> bool {
        self.bound
    }

    fn handle(&self) -> MeshHandle {
        match self.id {
            Some(id) => MeshHandle::Headless {
                id,
                vertex_count: self.vertex_count,
            },
            None => MeshHandle::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Camera;

    #[test]
    fn lifecycle_requires_context_before_init() {
        let mut backend = DummyBackend::new(GraphicsApi::Vulkan);
        assert_eq!(backend.state(), BackendState::Uninitialized);
        assert!(matches!(
            backend.clear(),
            Err(BackendError::InvalidState { .. })
        ));
    }

    #[test]
    fn camera_sets_clear_color() {
        let mut backend = DummyBackend::headless(GraphicsApi::OpenGl);
        let mut camera = Camera::default();
        camera.set_background_color([1.0, 0.0, 0.0, 1.0]);
        backend.set_camera(&camera);
        backend.clear().unwrap();
        assert_eq!(backend.recorded().clear_colors, vec![[1.0, 0.0, 0.0, 1.0]]);
    }

    #[test]
    fn draw_without_program_is_rejected() {
        let mut backend = DummyBackend::headless(GraphicsApi::OpenGl);
        backend.clear().unwrap();
        let mesh = Mesh::cube();
        assert!(matches!(backend.draw(&mesh), Err(BackendError::NoProgramBound)));
    }

    #[test]
    fn present_requires_a_frame() {
        let mut backend = DummyBackend::headless(GraphicsApi::DirectX12);
        assert!(backend.present().is_err());
        backend.clear().unwrap();
        backend.present().unwrap();
        assert_eq!(backend.recorded().presents, 1);
    }

    #[test]
    fn missing_cubemap_face_returns_no_texture() {
        let mut backend = DummyBackend::headless(GraphicsApi::OpenGl);
        let faces: Vec<PathBuf> = (0..6).map(|i| PathBuf::from(format!("missing{i}.png"))).collect();
        assert_eq!(backend.create_cubemap_texture(&faces), TextureId::NONE);
    }
}
