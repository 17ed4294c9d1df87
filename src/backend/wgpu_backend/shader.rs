//! Shader compilers and programs for the wgpu-based backends

use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::path::Path;
use std::sync::Arc;

use super::reflect::{ResourceKind, ShaderReflection};
use super::{validated, WgpuContext, WgpuProgramHandle, WgpuShaderModule};
use crate::backend::traits::*;
use crate::backend::types::*;

const SPIRV_MAGIC: u32 = 0x0723_0203;

fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    }
}

/// Validate a parsed module, then hand its SPIR-V to the device
fn create_module(
    context: &WgpuContext,
    path: &Path,
    stage: ShaderStage,
    module: &naga::Module,
    words: Option<Vec<u32>>,
) -> BackendResult<CompiledShader> {
    let entry_point = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == naga_stage(stage))
        .map(|ep| ep.name.clone())
        .ok_or_else(|| BackendError::compile(path, format!("no {stage} entry point")))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let info = validator
        .validate(module)
        .map_err(|e| BackendError::compile(path, format!("Validation error: {e}")))?;

    let words = match words {
        Some(words) => words,
        None => {
            let options = naga::back::spv::Options {
                // wgpu applies its own coordinate conventions
                flags: naga::back::spv::WriterFlags::empty(),
                ..Default::default()
            };
            let pipeline_options = naga::back::spv::PipelineOptions {
                shader_stage: naga_stage(stage),
                entry_point: entry_point.clone(),
            };
            naga::back::spv::write_vec(module, &info, &options, Some(&pipeline_options)).map_err(
                |e| BackendError::compile(path, format!("SPIR-V generation error: {e}")),
            )?
        }
    };

    let label = path.display().to_string();
    let shader_module = validated(&context.device, || {
        context
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&label),
                source: wgpu::ShaderSource::SpirV(words.into()),
            })
    })
    .map_err(|e| BackendError::compile(path, e))?;

    log::debug!("Compiled {} shader {}", stage, path.display());
    Ok(CompiledShader::Wgpu(WgpuShaderModule {
        stage,
        entry_point,
        module: Arc::new(shader_module),
        reflection: Arc::new(ShaderReflection::from_module(module)),
    }))
}

/// Compiles GLSL source at runtime (OpenGL / WebGL)
pub struct GlslShaderCompiler {
    context: WgpuContext,
}

impl GlslShaderCompiler {
    pub fn new(context: WgpuContext) -> Self {
        Self { context }
    }
}

impl ShaderCompiler for GlslShaderCompiler {
    fn compile(&self, path: &Path, stage: ShaderStage) -> BackendResult<CompiledShader> {
        let source = std::fs::read_to_string(path).map_err(|e| BackendError::io(path, e))?;

        let options = naga::front::glsl::Options::from(naga_stage(stage));
        let module = naga::front::glsl::Frontend::default()
            .parse(&options, &source)
            .map_err(|errors| BackendError::compile(path, format!("GLSL parse error:\n{errors}")))?;

        create_module(&self.context, path, stage, &module, None)
    }
}

/// Loads precompiled shader bytecode (Direct3D12 `.cso`).
///
/// wgpu takes SPIR-V, as emitted by `dxc -spirv`. A DXBC/DXIL container is
/// replaced by its sibling `.spv` or `.glsl` file when one exists.
pub struct BytecodeShaderCompiler {
    context: WgpuContext,
}

impl BytecodeShaderCompiler {
    pub fn new(context: WgpuContext) -> Self {
        Self { context }
    }

    fn compile_spirv(
        &self,
        path: &Path,
        stage: ShaderStage,
        bytes: &[u8],
    ) -> BackendResult<CompiledShader> {
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            return Err(BackendError::compile(
                path,
                format!("bytecode length {} is not a multiple of 4", bytes.len()),
            ));
        }

        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
            .collect();
        if words[0] != SPIRV_MAGIC {
            return Err(BackendError::compile(
                path,
                format!("bad bytecode magic {:#010x}", words[0]),
            ));
        }

        let module = naga::front::spv::parse_u8_slice(bytes, &naga::front::spv::Options::default())
            .map_err(|e| BackendError::compile(path, format!("SPIR-V parse error: {e}")))?;

        create_module(&self.context, path, stage, &module, Some(words))
    }
}

impl ShaderCompiler for BytecodeShaderCompiler {
    fn compile(&self, path: &Path, stage: ShaderStage) -> BackendResult<CompiledShader> {
        let bytes = std::fs::read(path).map_err(|e| BackendError::io(path, e))?;
        if !bytes.starts_with(DXBC_MAGIC) {
            return self.compile_spirv(path, stage, &bytes);
        }

        let substitute = dxbc_substitute(path).ok_or_else(|| {
            BackendError::compile(
                path,
                "DXBC/DXIL bytecode needs a sibling .spv or .glsl file (or compile with -spirv)",
            )
        })?;
        log::warn!(
            "{} is DXBC/DXIL, loading {} instead",
            path.display(),
            substitute.display()
        );
        if substitute.extension().is_some_and(|ext| ext == "glsl") {
            return GlslShaderCompiler::new(self.context.clone()).compile(&substitute, stage);
        }
        let bytes = std::fs::read(&substitute).map_err(|e| BackendError::io(&substitute, e))?;
        self.compile_spirv(&substitute, stage, &bytes)
    }
}

/// Program made of one vertex and one fragment module, linked into a
/// normal pipeline and a skybox pipeline.
///
/// On OpenGL each uniform binding gets its own buffer, created on first
/// upload. On Direct3D12 uploads go to the backend's shared constant buffers.
pub struct WgpuShaderProgram {
    context: WgpuContext,
    attached: Vec<WgpuShaderModule>,
    linked: Option<WgpuProgramHandle>,
    uniforms: BTreeMap<u32, Arc<wgpu::Buffer>>,
    in_use: bool,
}

impl WgpuShaderProgram {
    pub fn new(context: WgpuContext) -> Self {
        Self {
            context,
            attached: Vec::new(),
            linked: None,
            uniforms: BTreeMap::new(),
            in_use: false,
        }
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }

    fn stage(&self, stage: ShaderStage) -> BackendResult<&WgpuShaderModule> {
        let mut modules = self.attached.iter().filter(|m| m.stage == stage);
        match (modules.next(), modules.next()) {
            (Some(module), None) => Ok(module),
            (None, _) => Err(BackendError::ProgramLinkFailed(format!(
                "no {stage} shader attached"
            ))),
            (Some(_), Some(_)) => Err(BackendError::ProgramLinkFailed(format!(
                "more than one {stage} shader attached"
            ))),
        }
    }

    fn bind_group_layouts(&self, reflection: &ShaderReflection) -> Vec<wgpu::BindGroupLayout> {
        (0..reflection.group_count())
            .map(|group| {
                let entries: Vec<wgpu::BindGroupLayoutEntry> = reflection
                    .group(group)
                    .map(|binding| wgpu::BindGroupLayoutEntry {
                        binding: binding.binding,
                        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                        ty: match binding.kind {
                            ResourceKind::Uniform { size } => wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: NonZeroU64::new(size),
                            },
                            ResourceKind::Texture { cube } => wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                                view_dimension: if cube {
                                    wgpu::TextureViewDimension::Cube
                                } else {
                                    wgpu::TextureViewDimension::D2
                                },
                                multisampled: false,
                            },
                            ResourceKind::Sampler => {
                                wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
                            }
                        },
                        count: None,
                    })
                    .collect();
                self.context
                    .device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some("Program Bind Group Layout"),
                        entries: &entries,
                    })
            })
            .collect()
    }

    fn create_pipeline(
        &self,
        layout: &wgpu::PipelineLayout,
        vertex: &WgpuShaderModule,
        fragment: &WgpuShaderModule,
        compare: wgpu::CompareFunction,
        cull_mode: Option<wgpu::Face>,
    ) -> wgpu::RenderPipeline {
        const POSITION: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
        const NORMAL: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x3];
        let stride = (3 * std::mem::size_of::<f32>()) as wgpu::BufferAddress;

        self.context
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Program Pipeline"),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: &vertex.module,
                    entry_point: &vertex.entry_point,
                    compilation_options: Default::default(),
                    buffers: &[
                        wgpu::VertexBufferLayout {
                            array_stride: stride,
                            step_mode: wgpu::VertexStepMode::Vertex,
                            attributes: &POSITION,
                        },
                        wgpu::VertexBufferLayout {
                            array_stride: stride,
                            step_mode: wgpu::VertexStepMode::Vertex,
                            attributes: &NORMAL,
                        },
                    ],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fragment.module,
                    entry_point: &fragment.entry_point,
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.context.color_format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: self.context.depth_format,
                    depth_write_enabled: true,
                    depth_compare: compare,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            })
    }

    /// Buffer backing a uniform slot, created on first use
    fn uniform_buffer(&mut self, binding: u32, size: u64) -> BackendResult<Arc<wgpu::Buffer>> {
        if let Some(shared) = &self.context.shared_constants {
            return shared
                .get(binding as usize)
                .cloned()
                .ok_or_else(|| {
                    BackendError::BufferCreationFailed(format!(
                        "no constant buffer for register b{binding}"
                    ))
                });
        }

        let device = self.context.device.clone();
        let buffer = self.uniforms.entry(binding).or_insert_with(|| {
            log::debug!("Creating uniform buffer for binding {binding}");
            Arc::new(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Uniform Buffer"),
                size: size.max(16).next_multiple_of(16),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }))
        });
        Ok(buffer.clone())
    }
}

impl ShaderProgram for WgpuShaderProgram {
    fn attach_shader(&mut self, shader: &CompiledShader) -> BackendResult<()> {
        match shader {
            CompiledShader::Wgpu(module) => {
                self.attached.push(module.clone());
                Ok(())
            }
            _ => Err(BackendError::ProgramLinkFailed(
                "shader was compiled for another device".into(),
            )),
        }
    }

    fn detach_shaders(&mut self) {
        self.attached.clear();
    }

    fn link(&mut self) -> BackendResult<()> {
        self.linked = None;
        let vertex = self.stage(ShaderStage::Vertex)?;
        let fragment = self.stage(ShaderStage::Fragment)?;
        let reflection = vertex.reflection.merge(&fragment.reflection);

        let layouts = self.bind_group_layouts(&reflection);
        let layout_refs: Vec<&wgpu::BindGroupLayout> = layouts.iter().collect();
        let device = &self.context.device;

        let (pipeline, skybox_pipeline) = validated(device, || {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Program Pipeline Layout"),
                bind_group_layouts: &layout_refs,
                push_constant_ranges: &[],
            });
            (
                self.create_pipeline(
                    &pipeline_layout,
                    vertex,
                    fragment,
                    wgpu::CompareFunction::Less,
                    Some(wgpu::Face::Back),
                ),
                self.create_pipeline(
                    &pipeline_layout,
                    vertex,
                    fragment,
                    wgpu::CompareFunction::LessEqual,
                    None,
                ),
            )
        })
        .map_err(BackendError::ProgramLinkFailed)?;

        self.linked = Some(WgpuProgramHandle {
            pipeline: Arc::new(pipeline),
            skybox_pipeline: Arc::new(skybox_pipeline),
            layouts: Arc::new(layouts),
            reflection: Arc::new(reflection),
            uniforms: Vec::new(),
        });
        Ok(())
    }

    fn use_program(&mut self) {
        self.in_use = self.linked.is_some();
    }

    fn set_uniform_buffer(&mut self, name: &str, binding: u32, data: &[u8]) -> BackendResult<()> {
        let reflection = match &self.linked {
            Some(linked) => linked.reflection.clone(),
            None => return Err(BackendError::NoProgramBound),
        };

        let slot = match reflection.uniform_binding(name) {
            Some(slot) => slot,
            None if reflection.has_uniform_binding(binding) => binding,
            None => {
                log::warn!("Uniform block {name} not found in program, skipping upload");
                return Ok(());
            }
        };

        let size = reflection
            .bindings
            .iter()
            .find(|b| b.binding == slot)
            .and_then(|b| match b.kind {
                ResourceKind::Uniform { size } => Some(size),
                _ => None,
            })
            .unwrap_or(data.len() as u64)
            .max(data.len() as u64);

        let buffer = self.uniform_buffer(slot, size)?;
        if data.len() as u64 > buffer.size() {
            return Err(BackendError::BufferCreationFailed(format!(
                "{name}: {} bytes do not fit a {} byte buffer",
                data.len(),
                buffer.size()
            )));
        }
        self.context.queue.write_buffer(&buffer, 0, data);
        Ok(())
    }

    fn handle(&self) -> ProgramHandle {
        let Some(linked) = &self.linked else {
            return ProgramHandle::None;
        };
        let mut handle = linked.clone();
        handle.uniforms = match &self.context.shared_constants {
            Some(shared) => shared
                .iter()
                .enumerate()
                .map(|(slot, buffer)| (slot as u32, buffer.clone()))
                .collect(),
            None => self
                .uniforms
                .iter()
                .map(|(slot, buffer)| (*slot, buffer.clone()))
                .collect(),
        };
        ProgramHandle::Wgpu(handle)
    }

    fn is_valid(&self) -> bool {
        self.linked.is_some()
    }
}
