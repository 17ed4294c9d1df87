//! wgpu backend implementation
//!
//! OpenGL/WebGL and Direct3D12 both run on wgpu, restricted to the matching
//! `wgpu::Backends` set. They share [`WgpuCore`]: device setup, the depth
//! buffer, cubemaps and the buffered render pass that is replayed at present.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use raw_window_handle::RawDisplayHandle;
use web_time::Instant;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{CubemapData, Mesh};
use crate::GraphicsApi;

/// Forwards every `RendererBackend` method of a wrapper type to its `core`
macro_rules! impl_renderer_backend {
    ($backend:ty) => {
        impl $crate::backend::RendererBackend for $backend {
            fn graphics_api(&self) -> $crate::GraphicsApi {
                self.core.api()
            }

            fn state(&self) -> $crate::backend::BackendState {
                self.core.state()
            }

            fn init_window_context(
                &mut self,
                display: raw_window_handle::RawDisplayHandle,
            ) -> $crate::backend::BackendResult<()> {
                self.core.init_window_context(display)
            }

            fn init(
                &mut self,
                window: std::sync::Arc<winit::window::Window>,
            ) -> $crate::backend::BackendResult<()> {
                self.core.init(window)
            }

            fn device_context(&self) -> $crate::backend::DeviceContext {
                self.core.device_context()
            }

            fn resize(&mut self, width: u32, height: u32) -> $crate::backend::BackendResult<()> {
                self.core.resize(width, height)
            }

            fn clear(&mut self) -> $crate::backend::BackendResult<()> {
                self.core.clear()
            }

            fn draw(&mut self, mesh: &$crate::resources::Mesh) -> $crate::backend::BackendResult<()> {
                self.core.draw(mesh)
            }

            fn set_uniforms(
                &mut self,
                program: &mut dyn $crate::backend::ShaderProgram,
            ) -> $crate::backend::BackendResult<()> {
                self.core.set_uniforms(program)
            }

            fn create_cubemap_texture(
                &mut self,
                faces: &[std::path::PathBuf],
            ) -> $crate::backend::TextureId {
                self.core.create_cubemap_texture(faces)
            }

            fn delete_cubemap_texture(&mut self, texture: $crate::backend::TextureId) {
                self.core.delete_cubemap_texture(texture)
            }

            fn render_skybox(
                &mut self,
                mesh: &$crate::resources::Mesh,
                program: &mut dyn $crate::backend::ShaderProgram,
                texture: $crate::backend::TextureId,
            ) -> $crate::backend::BackendResult<()> {
                let mut guard = $crate::backend::DepthCompareGuard::new(
                    self,
                    $crate::backend::CompareFunction::LessEqual,
                );
                guard.core.draw_skybox(mesh, program, texture)
            }

            fn present(&mut self) -> $crate::backend::BackendResult<()> {
                self.core.present()
            }

            fn depth_compare(&self) -> $crate::backend::CompareFunction {
                self.core.depth_compare
            }

            fn set_depth_compare(&mut self, compare: $crate::backend::CompareFunction) {
                self.core.depth_compare = compare;
            }

            fn frame_state(&self) -> &$crate::backend::FrameState {
                &self.core.frame
            }

            fn frame_state_mut(&mut self) -> &mut $crate::backend::FrameState {
                &mut self.core.frame
            }

            fn on_camera_set(&mut self) {
                self.core.on_camera_set()
            }
        }
    };
}

mod d3d12;
mod mesh_buffer;
mod opengl;
pub mod reflect;
mod shader;

pub use d3d12::D3D12Backend;
pub use mesh_buffer::WgpuMeshBuffer;
pub use opengl::OpenGlBackend;
pub use reflect::{ReflectedBinding, ResourceKind, ShaderReflection};
pub use shader::{BytecodeShaderCompiler, GlslShaderCompiler, WgpuShaderProgram};

pub(crate) const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Device handles shared with compilers, programs and mesh buffers
#[derive(Clone)]
pub struct WgpuContext {
    pub(crate) api: GraphicsApi,
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
    pub(crate) color_format: wgpu::TextureFormat,
    pub(crate) depth_format: wgpu::TextureFormat,
    /// Backend-owned constant buffers for slots 0..3 (Direct3D12 only)
    pub(crate) shared_constants: Option<[Arc<wgpu::Buffer>; UNIFORM_SLOT_COUNT]>,
}

impl WgpuContext {
    pub fn api(&self) -> GraphicsApi {
        self.api
    }
}

/// A compiled stage plus its reflected resources
#[derive(Clone)]
pub struct WgpuShaderModule {
    pub stage: ShaderStage,
    pub(crate) entry_point: String,
    pub(crate) module: Arc<wgpu::ShaderModule>,
    pub(crate) reflection: Arc<ShaderReflection>,
}

/// Linked pipeline pair and the uniform buffers bound to it
#[derive(Clone, Debug)]
pub struct WgpuProgramHandle {
    pub(crate) pipeline: Arc<wgpu::RenderPipeline>,
    /// `LessEqual` depth, no culling
    pub(crate) skybox_pipeline: Arc<wgpu::RenderPipeline>,
    pub(crate) layouts: Arc<Vec<wgpu::BindGroupLayout>>,
    pub(crate) reflection: Arc<ShaderReflection>,
    pub(crate) uniforms: Vec<(u32, Arc<wgpu::Buffer>)>,
}

/// What differs between the APIs served by wgpu
#[derive(Debug, Clone, Copy)]
pub(crate) struct Flavor {
    backends: wgpu::Backends,
    webgl: bool,
    shared_constants: bool,
    /// Submit after every draw and wait for the GPU after present
    serialize: bool,
}

impl Flavor {
    pub(crate) fn opengl(api: GraphicsApi) -> Self {
        Self {
            backends: wgpu::Backends::GL,
            webgl: api == GraphicsApi::WebGl,
            shared_constants: false,
            serialize: false,
        }
    }

    pub(crate) fn d3d12() -> Self {
        Self {
            backends: wgpu::Backends::DX12,
            webgl: false,
            shared_constants: true,
            serialize: true,
        }
    }

    fn required_limits(&self, adapter: &wgpu::Adapter) -> wgpu::Limits {
        let base = if self.webgl {
            wgpu::Limits::downlevel_webgl2_defaults()
        } else if self.backends == wgpu::Backends::GL {
            wgpu::Limits::downlevel_defaults()
        } else {
            wgpu::Limits::default()
        };
        base.using_resolution(adapter.limits())
    }
}

/// Buffered render pass command
enum RenderCommand {
    SetPipeline(Arc<wgpu::RenderPipeline>),
    SetBindGroup {
        index: u32,
        bind_group: Arc<wgpu::BindGroup>,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: Arc<wgpu::Buffer>,
    },
    Draw {
        vertices: Range<u32>,
    },
}

/// Frame in progress: the acquired image and the commands recorded against it
struct PendingRenderPass {
    frame: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    commands: Vec<RenderCommand>,
    /// A pass already ran this frame, so later passes load instead of clear
    cleared: bool,
}

struct GpuCubemap {
    _texture: wgpu::Texture,
    view: Arc<wgpu::TextureView>,
}

/// Everything that exists once `init` succeeded
struct GpuState {
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    context: WgpuContext,
    depth_view: wgpu::TextureView,
    sampler: Arc<wgpu::Sampler>,
    fallback_cube: Arc<wgpu::TextureView>,
    fallback_uniforms: HashMap<u64, Arc<wgpu::Buffer>>,
}

impl GpuState {
    fn device(&self) -> &wgpu::Device {
        &self.context.device
    }

    /// Zeroed buffer for uniform bindings a program never uploaded
    fn fallback_uniform(&mut self, size: u64) -> Arc<wgpu::Buffer> {
        let size = size.max(16).next_multiple_of(16);
        let device = &self.context.device;
        self.fallback_uniforms
            .entry(size)
            .or_insert_with(|| {
                Arc::new(device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Fallback Uniform Buffer"),
                    size,
                    usage: wgpu::BufferUsages::UNIFORM,
                    mapped_at_creation: false,
                }))
            })
            .clone()
    }
}

enum BoundResource {
    Buffer(Arc<wgpu::Buffer>),
    Texture(Arc<wgpu::TextureView>),
    Sampler(Arc<wgpu::Sampler>),
}

/// Shared state machine of the wgpu-based backends
pub(crate) struct WgpuCore {
    api: GraphicsApi,
    flavor: Flavor,
    vsync: bool,
    state: BackendState,
    instance: Option<wgpu::Instance>,
    gpu: Option<GpuState>,
    pending: Option<PendingRenderPass>,
    program_bound: bool,
    clear_color: wgpu::Color,
    cubemaps: HashMap<u32, GpuCubemap>,
    next_texture: u32,
    started: Instant,
    pub(crate) frame: FrameState,
    pub(crate) depth_compare: CompareFunction,
}

impl WgpuCore {
    pub(crate) fn new(api: GraphicsApi, vsync: bool, flavor: Flavor) -> Self {
        Self {
            api,
            flavor,
            vsync,
            state: BackendState::Uninitialized,
            instance: None,
            gpu: None,
            pending: None,
            program_bound: false,
            clear_color: wgpu::Color::BLACK,
            cubemaps: HashMap::new(),
            next_texture: 1,
            started: Instant::now(),
            frame: FrameState::default(),
            depth_compare: CompareFunction::Less,
        }
    }

    pub(crate) fn api(&self) -> GraphicsApi {
        self.api
    }

    pub(crate) fn state(&self) -> BackendState {
        self.state
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

    pub(crate) fn init_window_context(&mut self, display: RawDisplayHandle) -> BackendResult<()> {
        self.require_state(BackendState::Uninitialized)?;
        log::debug!("Creating {} instance for {:?}", self.api, display);

        let gles_minor_version = if self.flavor.webgl {
            wgpu::Gles3MinorVersion::Version0
        } else {
            wgpu::Gles3MinorVersion::Automatic
        };
        self.instance = Some(wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: self.flavor.backends,
            gles_minor_version,
            ..Default::default()
        }));
        self.state = BackendState::ContextReady;
        Ok(())
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub(crate) fn init(&mut self, window: Arc<winit::window::Window>) -> BackendResult<()> {
        pollster::block_on(self.init_async(window))
    }

    #[cfg(target_arch = "wasm32")]
    pub(crate) fn init(&mut self, _window: Arc<winit::window::Window>) -> BackendResult<()> {
        // On web, use init_async instead
        Err(BackendError::InitializationFailed(
            "use init_async() on the web platform".into(),
        ))
    }

    pub(crate) async fn init_async(
        &mut self,
        window: Arc<winit::window::Window>,
    ) -> BackendResult<()> {
        self.require_state(BackendState::ContextReady)?;
        let instance = self.instance.as_ref().ok_or(BackendError::NotInitialized)?;

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| {
                BackendError::InitializationFailed(format!("No {} adapter found", self.api))
            })?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Scene Renderer Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: self.flavor.required_limits(&adapter),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        let caps = surface.get_capabilities(&adapter);
        let color_format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| {
                BackendError::SurfaceCreationFailed("surface reports no formats".into())
            })?;

        let size = window.inner_size();
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: color_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: if self.vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            desired_maximum_frame_latency: 2,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };
        surface.configure(&device, &surface_config);

        let shared_constants = self.flavor.shared_constants.then(|| {
            const LABELS: [&str; UNIFORM_SLOT_COUNT] =
                ["Constant Buffer b0", "Constant Buffer b1", "Constant Buffer b2"];
            LABELS.map(|label| {
                Arc::new(device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(label),
                    size: UNIFORM_SLOT_STRIDE,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }))
            })
        });

        let depth_view = create_depth_view(&device, surface_config.width, surface_config.height);
        let sampler = Arc::new(device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Cubemap Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        }));
        let (fallback_texture, fallback_view) = create_cube_texture(&device, 1, "Fallback Cubemap");
        // The view keeps the texture alive
        drop(fallback_texture);

        log::info!(
            "{} device ready: {}x{} {:?}",
            self.api,
            surface_config.width,
            surface_config.height,
            color_format
        );

        self.gpu = Some(GpuState {
            surface,
            surface_config,
            context: WgpuContext {
                api: self.api,
                device: Arc::new(device),
                queue: Arc::new(queue),
                color_format,
                depth_format: DEPTH_FORMAT,
                shared_constants,
            },
            depth_view,
            sampler,
            fallback_cube: Arc::new(fallback_view),
            fallback_uniforms: HashMap::new(),
        });
        self.state = BackendState::Ready;
        Ok(())
    }

    pub(crate) fn device_context(&self) -> DeviceContext {
        match &self.gpu {
            Some(gpu) => DeviceContext::Wgpu(gpu.context.clone()),
            None => DeviceContext::Uninitialized,
        }
    }

    pub(crate) fn resize(&mut self, width: u32, height: u32) -> BackendResult<()> {
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(());
        };
        if width == 0 || height == 0 {
            return Ok(());
        }

        // Clamp to device limits while maintaining aspect ratio
        let max_size = gpu.device().limits().max_texture_dimension_2d;
        let (width, height) = if width > max_size || height > max_size {
            let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
            (
                ((width as f32 * scale) as u32).max(1),
                ((height as f32 * scale) as u32).max(1),
            )
        } else {
            (width, height)
        };

        gpu.surface_config.width = width;
        gpu.surface_config.height = height;
        gpu.surface.configure(&gpu.context.device, &gpu.surface_config);
        gpu.depth_view = create_depth_view(&gpu.context.device, width, height);
        Ok(())
    }

    pub(crate) fn clear(&mut self) -> BackendResult<()> {
        self.require_state(BackendState::Ready)?;
        let gpu = self.gpu.as_ref().ok_or(BackendError::NotInitialized)?;
        if self.pending.take().is_some() {
            log::warn!("Previous frame was never presented; discarding it");
        }

        let frame = match gpu.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                gpu.surface.configure(&gpu.context.device, &gpu.surface_config);
                gpu.surface
                    .get_current_texture()
                    .map_err(|e| BackendError::SwapchainFailed(e.to_string()))?
            }
            Err(e) => return Err(BackendError::SwapchainFailed(e.to_string())),
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.pending = Some(PendingRenderPass {
            frame,
            view,
            commands: Vec::new(),
            cleared: false,
        });
        self.program_bound = false;
        Ok(())
    }

    fn pending_mut(&mut self) -> BackendResult<&mut PendingRenderPass> {
        self.pending
            .as_mut()
            .ok_or_else(|| BackendError::CommandFailed("no frame in progress".into()))
    }

    fn camera_state(&self) -> BackendResult<crate::scene::CameraState> {
        self.frame
            .camera
            .ok_or_else(|| BackendError::CommandFailed("no camera bound".into()))
    }

    pub(crate) fn draw(&mut self, mesh: &Mesh) -> BackendResult<()> {
        self.pending_mut()?;
        if !self.program_bound {
            return Err(BackendError::NoProgramBound);
        }
        self.record_draw(mesh)
    }

    fn record_draw(&mut self, mesh: &Mesh) -> BackendResult<()> {
        let MeshHandle::Wgpu {
            positions,
            normals,
            vertex_count,
        } = mesh.handle()
        else {
            return Err(BackendError::CommandFailed(
                "mesh is not uploaded to this device".into(),
            ));
        };

        let pending = self.pending_mut()?;
        pending.commands.push(RenderCommand::SetVertexBuffer {
            slot: 0,
            buffer: positions,
        });
        pending.commands.push(RenderCommand::SetVertexBuffer {
            slot: 1,
            buffer: normals,
        });
        pending.commands.push(RenderCommand::Draw {
            vertices: 0..vertex_count,
        });

        if self.flavor.serialize {
            self.flush_pass()?;
        }
        Ok(())
    }

    pub(crate) fn set_uniforms(&mut self, program: &mut dyn ShaderProgram) -> BackendResult<()> {
        self.pending_mut()?;
        let camera = self.camera_state()?;
        let matrices = MatricesUniform::for_camera(&camera, self.started.elapsed().as_secs_f32());
        program.set_uniform_buffer(MATRICES_BLOCK, MATRICES_SLOT, bytemuck::bytes_of(&matrices))?;

        let handle = wgpu_handle(program)?;
        self.bind_program(&handle, None)?;
        self.program_bound = true;
        Ok(())
    }

    pub(crate) fn draw_skybox(
        &mut self,
        mesh: &Mesh,
        program: &mut dyn ShaderProgram,
        texture: TextureId,
    ) -> BackendResult<()> {
        self.pending_mut()?;
        let view = self
            .cubemaps
            .get(&texture.0)
            .map(|cubemap| cubemap.view.clone())
            .ok_or_else(|| {
                BackendError::TextureCreationFailed(format!("unknown cubemap {}", texture.0))
            })?;
        if !program.is_valid() {
            return Err(BackendError::NoProgramBound);
        }

        let camera = self.camera_state()?;
        let matrices = MatricesUniform::for_skybox(&camera);
        program.set_uniform_buffer(MATRICES_BLOCK, MATRICES_SLOT, bytemuck::bytes_of(&matrices))?;

        let handle = wgpu_handle(program)?;
        self.bind_program(&handle, Some(view))?;
        self.record_draw(mesh)
    }

    /// Record pipeline and bind groups for a program.
    ///
    /// Bindings the program never uploaded get zeroed buffers; texture slots
    /// get `cubemap` or a blank cube.
    fn bind_program(
        &mut self,
        handle: &WgpuProgramHandle,
        cubemap: Option<Arc<wgpu::TextureView>>,
    ) -> BackendResult<()> {
        let gpu = self.gpu.as_mut().ok_or(BackendError::NotInitialized)?;

        let pipeline = match self.depth_compare {
            CompareFunction::Less => handle.pipeline.clone(),
            _ => handle.skybox_pipeline.clone(),
        };
        let mut commands = vec![RenderCommand::SetPipeline(pipeline)];

        for (index, layout) in handle.layouts.iter().enumerate() {
            let group = index as u32;
            let resources: Vec<(u32, BoundResource)> = handle
                .reflection
                .group(group)
                .map(|binding| {
                    let resource = match binding.kind {
                        ResourceKind::Uniform { size } => BoundResource::Buffer(
                            handle
                                .uniforms
                                .iter()
                                .find(|(slot, _)| *slot == binding.binding)
                                .map(|(_, buffer)| buffer.clone())
                                .unwrap_or_else(|| gpu.fallback_uniform(size)),
                        ),
                        ResourceKind::Texture { .. } => BoundResource::Texture(
                            cubemap.clone().unwrap_or_else(|| gpu.fallback_cube.clone()),
                        ),
                        ResourceKind::Sampler => BoundResource::Sampler(gpu.sampler.clone()),
                    };
                    (binding.binding, resource)
                })
                .collect();

            let entries: Vec<wgpu::BindGroupEntry> = resources
                .iter()
                .map(|(binding, resource)| wgpu::BindGroupEntry {
                    binding: *binding,
                    resource: match resource {
                        BoundResource::Buffer(buffer) => buffer.as_entire_binding(),
                        BoundResource::Texture(view) => wgpu::BindingResource::TextureView(view),
                        BoundResource::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
                    },
                })
                .collect();

            let bind_group = gpu.device().create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Program Bind Group"),
                layout,
                entries: &entries,
            });
            commands.push(RenderCommand::SetBindGroup {
                index: group,
                bind_group: Arc::new(bind_group),
            });
        }

        self.pending_mut()?.commands.extend(commands);
        Ok(())
    }

    /// Encode the buffered commands into one render pass and submit it
    fn flush_pass(&mut self) -> BackendResult<()> {
        let gpu = self.gpu.as_ref().ok_or(BackendError::NotInitialized)?;
        let pending = self
            .pending
            .as_mut()
            .ok_or_else(|| BackendError::CommandFailed("no frame in progress".into()))?;

        let mut encoder = gpu
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        let (color_load, depth_load) = if pending.cleared {
            (wgpu::LoadOp::Load, wgpu::LoadOp::Load)
        } else {
            (
                wgpu::LoadOp::Clear(self.clear_color),
                wgpu::LoadOp::Clear(1.0),
            )
        };

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Scene Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &pending.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &gpu.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for cmd in &pending.commands {
                match cmd {
                    RenderCommand::SetPipeline(pipeline) => render_pass.set_pipeline(pipeline),
                    RenderCommand::SetBindGroup { index, bind_group } => {
                        render_pass.set_bind_group(*index, bind_group, &[]);
                    }
                    RenderCommand::SetVertexBuffer { slot, buffer } => {
                        render_pass.set_vertex_buffer(*slot, buffer.slice(..));
                    }
                    RenderCommand::Draw { vertices } => render_pass.draw(vertices.clone(), 0..1),
                }
            }
            // render_pass is dropped here, ending the pass
        }

        pending.commands.clear();
        pending.cleared = true;
        gpu.context.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    pub(crate) fn present(&mut self) -> BackendResult<()> {
        if self.pending.as_ref().is_some_and(|p| !p.commands.is_empty() || !p.cleared) {
            self.flush_pass()?;
        }
        let pending = self
            .pending
            .take()
            .ok_or_else(|| BackendError::CommandFailed("no frame in progress".into()))?;
        pending.frame.present();
        self.program_bound = false;

        if self.flavor.serialize {
            if let Some(gpu) = &self.gpu {
                gpu.device().poll(wgpu::Maintain::Wait);
            }
        }
        Ok(())
    }

    pub(crate) fn create_cubemap_texture(&mut self, faces: &[std::path::PathBuf]) -> TextureId {
        let Some(gpu) = self.gpu.as_ref() else {
            log::error!("Cannot create a cubemap before the {} device exists", self.api);
            return TextureId::NONE;
        };
        let cubemap = match CubemapData::load(faces) {
            Ok(cubemap) => cubemap,
            Err(e) => {
                log::error!("Failed to load cubemap: {e}");
                return TextureId::NONE;
            }
        };

        let (texture, view) = create_cube_texture(gpu.device(), cubemap.size, "Skybox Cubemap");
        for (layer, face) in cubemap.faces.iter().enumerate() {
            gpu.context.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: layer as u32,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                &face.data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * cubemap.size),
                    rows_per_image: Some(cubemap.size),
                },
                wgpu::Extent3d {
                    width: cubemap.size,
                    height: cubemap.size,
                    depth_or_array_layers: 1,
                },
            );
        }

        let id = self.next_texture;
        self.next_texture += 1;
        self.cubemaps.insert(
            id,
            GpuCubemap {
                _texture: texture,
                view: Arc::new(view),
            },
        );
        log::debug!("Created cubemap {} ({}px faces)", id, cubemap.size);
        TextureId(id)
    }

    pub(crate) fn delete_cubemap_texture(&mut self, texture: TextureId) {
        if self.cubemaps.remove(&texture.0).is_some() {
            log::debug!("Deleted cubemap {}", texture.0);
        }
    }

    pub(crate) fn on_camera_set(&mut self) {
        if let Some(camera) = &self.frame.camera {
            let [r, g, b, a] = camera.background_color.map(f64::from);
            self.clear_color = wgpu::Color { r, g, b, a };
        }
    }
}

fn wgpu_handle(program: &dyn ShaderProgram) -> BackendResult<WgpuProgramHandle> {
    match program.handle() {
        ProgramHandle::Wgpu(handle) => Ok(handle),
        ProgramHandle::None => Err(BackendError::NoProgramBound),
        _ => Err(BackendError::CommandFailed(
            "program was linked for another device".into(),
        )),
    }
}

fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    device
        .create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default())
}

fn create_cube_texture(
    device: &wgpu::Device,
    size: u32,
    label: &str,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: CUBEMAP_LAYERS,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(label),
        dimension: Some(wgpu::TextureViewDimension::Cube),
        ..Default::default()
    });
    (texture, view)
}

const CUBEMAP_LAYERS: u32 = crate::resources::CUBEMAP_FACES as u32;

/// Run a device call inside a validation error scope and report what it raised
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn validated<T>(
    device: &wgpu::Device,
    f: impl FnOnce() -> T,
) -> Result<T, String> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => Err(error.to_string()),
        None => Ok(value),
    }
}

/// On the web errors reach the device's uncaptured error handler instead
#[cfg(target_arch = "wasm32")]
pub(crate) fn validated<T>(
    _device: &wgpu::Device,
    f: impl FnOnce() -> T,
) -> Result<T, String> {
    Ok(f())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::opengl(OpenGlBackend::new(GraphicsApi::OpenGl, true), GraphicsApi::OpenGl)]
    #[case::webgl(OpenGlBackend::new(GraphicsApi::WebGl, true), GraphicsApi::WebGl)]
    fn opengl_backend_reports_its_api(#[case] backend: OpenGlBackend, #[case] api: GraphicsApi) {
        assert_eq!(backend.graphics_api(), api);
        assert_eq!(backend.state(), BackendState::Uninitialized);
        assert!(matches!(backend.device_context(), DeviceContext::Uninitialized));
    }

    #[test]
    fn frame_calls_need_a_device() {
        let mut backend = D3D12Backend::new(false);
        assert_eq!(backend.graphics_api(), GraphicsApi::DirectX12);
        assert!(matches!(
            backend.clear(),
            Err(BackendError::InvalidState { .. })
        ));
        assert!(backend.present().is_err());
        assert!(backend.resize(640, 480).is_ok());
    }

    #[test]
    fn cubemap_before_init_is_none() {
        let mut backend = OpenGlBackend::new(GraphicsApi::OpenGl, true);
        let faces: Vec<std::path::PathBuf> = Vec::new();
        assert_eq!(backend.create_cubemap_texture(&faces), TextureId::NONE);
    }

    #[test]
    fn skybox_without_frame_restores_depth_compare() {
        let mut backend = OpenGlBackend::new(GraphicsApi::OpenGl, true);
        let mesh = Mesh::cube();
        let mut program = crate::backend::dummy::HeadlessShaderProgram::new(
            crate::backend::dummy::HeadlessContext::new(GraphicsApi::OpenGl),
        );
        assert!(backend
            .render_skybox(&mesh, &mut program, TextureId(1))
            .is_err());
        assert_eq!(backend.depth_compare(), CompareFunction::Less);
    }
}
