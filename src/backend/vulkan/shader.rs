//! SPIR-V shader modules and graphics-pipeline programs

use std::ffi::CStr;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;

use super::resources::GpuBuffer;
use super::{VulkanContext, VulkanDevice};
use crate::backend::traits::*;
use crate::backend::types::*;

const SPIRV_MAGIC: u32 = 0x0723_0203;
const ENTRY_POINT: &CStr = c"main";

struct ModuleOwner {
    device: Arc<VulkanDevice>,
    module: vk::ShaderModule,
}

impl Drop for ModuleOwner {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}

/// A `vk::ShaderModule`, destroyed when the last clone drops
#[derive(Clone)]
pub struct VulkanShaderModule {
    pub stage: ShaderStage,
    pub module: vk::ShaderModule,
    _owner: Arc<ModuleOwner>,
}

/// Loads precompiled SPIR-V (`.spv`) into shader modules
pub struct VulkanShaderCompiler {
    context: VulkanContext,
}

impl VulkanShaderCompiler {
    pub fn new(context: VulkanContext) -> Self {
        Self { context }
    }
}

impl ShaderCompiler for VulkanShaderCompiler {
    fn compile(&self, path: &Path, stage: ShaderStage) -> BackendResult<CompiledShader> {
        let bytes = std::fs::read(path).map_err(|e| BackendError::io(path, e))?;
        let code = ash::util::read_spv(&mut std::io::Cursor::new(&bytes))
            .map_err(|e| BackendError::compile(path, format!("invalid SPIR-V: {e}")))?;
        if code.first() != Some(&SPIRV_MAGIC) {
            return Err(BackendError::compile(path, "missing SPIR-V magic number"));
        }

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let device = &self.context.device;
        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .map_err(|e| BackendError::compile(path, format!("vkCreateShaderModule: {e}")))?;

        log::debug!("Loaded {} shader {}", stage, path.display());
        Ok(CompiledShader::Vulkan(VulkanShaderModule {
            stage,
            module,
            _owner: Arc::new(ModuleOwner {
                device: Arc::clone(device),
                module,
            }),
        }))
    }
}

/// Native handles of a linked program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VulkanProgramHandle {
    pub pipeline: vk::Pipeline,
    /// `LESS_OR_EQUAL` depth, no culling
    pub skybox_pipeline: vk::Pipeline,
    /// Set 0: the program's three uniform slots
    pub descriptor_set: vk::DescriptorSet,
}

/// Graphics pipeline pair with its own mapped uniform slots.
///
/// Slot `n` lives at `n * stride` in one host-visible buffer that descriptor
/// set 0 points at, so uploads are plain memory writes.
pub struct VulkanShaderProgram {
    attached: Vec<VulkanShaderModule>,
    pipelines: Option<(vk::Pipeline, vk::Pipeline)>,
    descriptor_set: vk::DescriptorSet,
    uniforms: GpuBuffer,
    stride: u64,
    in_use: bool,
    context: VulkanContext,
}

impl VulkanShaderProgram {
    pub fn new(context: VulkanContext) -> BackendResult<Self> {
        let device = &context.device;
        let stride = device.uniform_stride();
        let uniforms = GpuBuffer::new(
            device,
            "Program Uniforms",
            stride * UNIFORM_SLOT_COUNT as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;

        let layouts = [device.uniform_set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(device.descriptor_pool)
            .set_layouts(&layouts);
        let descriptor_set = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| BackendError::BufferCreationFailed(format!("descriptor set: {e}")))?[0];

        let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = (0..UNIFORM_SLOT_COUNT as u64)
            .map(|slot| {
                [vk::DescriptorBufferInfo::default()
                    .buffer(uniforms.buffer)
                    .offset(slot * stride)
                    .range(stride)]
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = buffer_infos
            .iter()
            .enumerate()
            .map(|(slot, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(slot as u32)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(info)
            })
            .collect();
        unsafe { device.device.update_descriptor_sets(&writes, &[]) };

        Ok(Self {
            attached: Vec::new(),
            pipelines: None,
            descriptor_set,
            uniforms,
            stride,
            in_use: false,
            context,
        })
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }

    fn stage(&self, stage: ShaderStage) -> BackendResult<vk::ShaderModule> {
        let mut modules = self.attached.iter().filter(|m| m.stage == stage);
        match (modules.next(), modules.next()) {
            (Some(module), None) => Ok(module.module),
            (None, _) => Err(BackendError::ProgramLinkFailed(format!(
                "no {stage} shader attached"
            ))),
            (Some(_), Some(_)) => Err(BackendError::ProgramLinkFailed(format!(
                "more than one {stage} shader attached"
            ))),
        }
    }

    fn destroy_pipelines(&mut self) {
        if let Some((pipeline, skybox_pipeline)) = self.pipelines.take() {
            self.context.wait_idle();
            unsafe {
                self.context.device.device.destroy_pipeline(pipeline, None);
                self.context.device.device.destroy_pipeline(skybox_pipeline, None);
            }
        }
    }
}

impl ShaderProgram for VulkanShaderProgram {
    fn attach_shader(&mut self, shader: &CompiledShader) -> BackendResult<()> {
        match shader {
            CompiledShader::Vulkan(module) => {
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
        self.destroy_pipelines();
        let vertex = self.stage(ShaderStage::Vertex)?;
        let fragment = self.stage(ShaderStage::Fragment)?;

        let pipelines = create_pipelines(
            &self.context.device,
            vertex,
            fragment,
            &[
                (vk::CompareOp::LESS, vk::CullModeFlags::BACK),
                (vk::CompareOp::LESS_OR_EQUAL, vk::CullModeFlags::NONE),
            ],
        )?;
        self.pipelines = Some((pipelines[0], pipelines[1]));
        Ok(())
    }

    fn use_program(&mut self) {
        self.in_use = self.pipelines.is_some();
    }

    /// Slots are fixed on Vulkan, so `name` only shows up in diagnostics
    fn set_uniform_buffer(&mut self, name: &str, binding: u32, data: &[u8]) -> BackendResult<()> {
        if binding as usize >= UNIFORM_SLOT_COUNT {
            log::warn!("Uniform block {name} targets unknown slot {binding}, skipping upload");
            return Ok(());
        }
        if data.len() as u64 > self.stride {
            return Err(BackendError::BufferCreationFailed(format!(
                "{name}: {} bytes do not fit a {} byte slot",
                data.len(),
                self.stride
            )));
        }
        self.uniforms.write(binding as u64 * self.stride, data)
    }

    fn handle(&self) -> ProgramHandle {
        match self.pipelines {
            Some((pipeline, skybox_pipeline)) => ProgramHandle::Vulkan(VulkanProgramHandle {
                pipeline,
                skybox_pipeline,
                descriptor_set: self.descriptor_set,
            }),
            None => ProgramHandle::None,
        }
    }

    fn is_valid(&self) -> bool {
        self.pipelines.is_some()
    }
}

impl Drop for VulkanShaderProgram {
    fn drop(&mut self) {
        self.destroy_pipelines();
        let device = &self.context.device;
        unsafe {
            let _ = device
                .device
                .free_descriptor_sets(device.descriptor_pool, &[self.descriptor_set]);
        }
    }
}

/// Build one pipeline per (depth compare, cull mode) variant against the
/// shared render pass and pipeline layout
pub(crate) fn create_pipelines(
    device: &VulkanDevice,
    vertex: vk::ShaderModule,
    fragment: vk::ShaderModule,
    variants: &[(vk::CompareOp, vk::CullModeFlags)],
) -> BackendResult<Vec<vk::Pipeline>> {
    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex)
            .name(ENTRY_POINT),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment)
            .name(ENTRY_POINT),
    ];

    // Positions at location 0 and normals at location 1, three floats each
    let stride = (3 * std::mem::size_of::<f32>()) as u32;
    let bindings = [
        vk::VertexInputBindingDescription {
            binding: 0,
            stride,
            input_rate: vk::VertexInputRate::VERTEX,
        },
        vk::VertexInputBindingDescription {
            binding: 1,
            stride,
            input_rate: vk::VertexInputRate::VERTEX,
        },
    ];
    let attributes = [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 1,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        },
    ];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
    let viewport = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);
    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)];
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let rasterizers: Vec<vk::PipelineRasterizationStateCreateInfo> = variants
        .iter()
        .map(|(_, cull)| {
            // Projection Y is flipped, so counter-clockwise stays front-facing
            vk::PipelineRasterizationStateCreateInfo::default()
                .polygon_mode(vk::PolygonMode::FILL)
                .cull_mode(*cull)
                .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
                .line_width(1.0)
        })
        .collect();
    let depth_states: Vec<vk::PipelineDepthStencilStateCreateInfo> = variants
        .iter()
        .map(|(compare, _)| {
            vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(true)
                .depth_write_enable(true)
                .depth_compare_op(*compare)
        })
        .collect();

    let create_infos: Vec<vk::GraphicsPipelineCreateInfo> = rasterizers
        .iter()
        .zip(&depth_states)
        .map(|(rasterizer, depth)| {
            vk::GraphicsPipelineCreateInfo::default()
                .stages(&stages)
                .vertex_input_state(&vertex_input)
                .input_assembly_state(&input_assembly)
                .viewport_state(&viewport)
                .rasterization_state(rasterizer)
                .multisample_state(&multisample)
                .depth_stencil_state(depth)
                .color_blend_state(&color_blend)
                .dynamic_state(&dynamic)
                .layout(device.pipeline_layout)
                .render_pass(device.render_pass)
                .subpass(0)
        })
        .collect();

    unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &create_infos, None)
    }
    .map_err(|(pipelines, e)| {
        for pipeline in pipelines {
            if pipeline != vk::Pipeline::null() {
                unsafe { device.device.destroy_pipeline(pipeline, None) };
            }
        }
        BackendError::ProgramLinkFailed(format!("vkCreateGraphicsPipelines: {e}"))
    })
}
