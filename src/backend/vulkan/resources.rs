//! Buffers and images allocated through gpu-allocator

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use super::{VulkanContext, VulkanDevice};
use crate::backend::traits::*;
use crate::backend::types::*;

/// A buffer and its memory. Freed on drop.
pub(crate) struct GpuBuffer {
    device: ash::Device,
    allocator: Arc<Mutex<Allocator>>,
    pub(crate) buffer: vk::Buffer,
    allocation: Option<Allocation>,
    pub(crate) size: u64,
}

impl GpuBuffer {
    pub(crate) fn new(
        device: &VulkanDevice,
        name: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> BackendResult<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .map_err(|e| BackendError::BufferCreationFailed(format!("{name}: {e}")))?;
        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(BackendError::BufferCreationFailed(format!("{name}: {e}")));
            }
        };

        let mut gpu_buffer = Self {
            device: device.device.clone(),
            allocator: Arc::clone(&device.allocator),
            buffer,
            allocation: None,
            size,
        };
        let bound = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        gpu_buffer.allocation = Some(allocation);
        bound.map_err(|e| BackendError::BufferCreationFailed(format!("{name}: {e}")))?;
        Ok(gpu_buffer)
    }

    /// Copy bytes into a host-visible buffer
    pub(crate) fn write(&mut self, offset: u64, data: &[u8]) -> BackendResult<()> {
        let end = offset as usize + data.len();
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or_else(|| BackendError::BufferCreationFailed("buffer is not host visible".into()))?;
        if end > mapped.len() {
            return Err(BackendError::BufferCreationFailed(format!(
                "write of {} bytes at {} overflows a {} byte buffer",
                data.len(),
                offset,
                mapped.len()
            )));
        }
        mapped[offset as usize..end].copy_from_slice(data);
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe { self.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            let _ = self.allocator.lock().free(allocation);
        }
    }
}

/// An image, its memory and one view. Freed on drop.
pub(crate) struct GpuImage {
    device: ash::Device,
    allocator: Arc<Mutex<Allocator>>,
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    allocation: Option<Allocation>,
}

pub(crate) struct ImageDesc<'a> {
    pub name: &'a str,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub layers: u32,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub cube: bool,
}

impl GpuImage {
    pub(crate) fn new(device: &VulkanDevice, desc: &ImageDesc) -> BackendResult<Self> {
        let flags = if desc.cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(desc.layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .map_err(|e| BackendError::TextureCreationFailed(format!("{}: {e}", desc.name)))?;

        let mut gpu_image = Self {
            device: device.device.clone(),
            allocator: Arc::clone(&device.allocator),
            image,
            view: vk::ImageView::null(),
            allocation: None,
        };

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let allocation = device
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: desc.name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| BackendError::TextureCreationFailed(format!("{}: {e}", desc.name)))?;
        let bound = unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        gpu_image.allocation = Some(allocation);
        bound.map_err(|e| BackendError::TextureCreationFailed(format!("{}: {e}", desc.name)))?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(if desc.cube {
                vk::ImageViewType::CUBE
            } else {
                vk::ImageViewType::TYPE_2D
            })
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: desc.layers,
            });
        gpu_image.view = unsafe { device.device.create_image_view(&view_info, None) }
            .map_err(|e| BackendError::TextureCreationFailed(format!("{}: {e}", desc.name)))?;

        Ok(gpu_image)
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            let _ = self.allocator.lock().free(allocation);
        }
    }
}

/// Record commands into a throwaway command buffer and wait for them to finish
pub(crate) fn submit_once(
    device: &VulkanDevice,
    record: impl FnOnce(vk::CommandBuffer),
) -> BackendResult<()> {
    let failed = |e: vk::Result| BackendError::CommandFailed(format!("one-time submit: {e}"));
    unsafe {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(device.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = device
            .device
            .allocate_command_buffers(&alloc_info)
            .map_err(failed)?[0];

        let result = (|| {
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.device.begin_command_buffer(cmd, &begin_info)?;
            record(cmd);
            device.device.end_command_buffer(cmd)?;

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            device
                .device
                .queue_submit(device.queue, &[submit_info], vk::Fence::null())?;
            device.device.queue_wait_idle(device.queue)
        })();

        device
            .device
            .free_command_buffers(device.command_pool, &[cmd]);
        result.map_err(failed)
    }
}

/// Upload packed faces into a six-layer cube image, leaving it shader-readable
pub(crate) fn upload_cubemap(
    device: &VulkanDevice,
    size: u32,
    pixels: &[u8],
) -> BackendResult<GpuImage> {
    let mut staging = GpuBuffer::new(
        device,
        "Cubemap Staging",
        pixels.len() as u64,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
    )?;
    staging.write(0, pixels)?;

    let layers = crate::resources::CUBEMAP_FACES as u32;
    let image = GpuImage::new(
        device,
        &ImageDesc {
            name: "Skybox Cubemap",
            format: vk::Format::R8G8B8A8_SRGB,
            extent: vk::Extent2D {
                width: size,
                height: size,
            },
            layers,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
            cube: true,
        },
    )?;

    let range = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: layers,
    };

    submit_once(device, |cmd| unsafe {
        let to_transfer = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image.image)
            .subresource_range(range)
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);
        device.device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[to_transfer],
        );

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: layers,
            })
            .image_extent(vk::Extent3D {
                width: size,
                height: size,
                depth: 1,
            });
        device.device.cmd_copy_buffer_to_image(
            cmd,
            staging.buffer,
            image.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );

        let to_shader = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image.image)
            .subresource_range(range)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);
        device.device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[to_shader],
        );
    })?;

    Ok(image)
}

/// Host-visible position and normal buffers
pub struct VulkanMeshBuffer {
    buffers: Option<(GpuBuffer, GpuBuffer)>,
    vertex_count: u32,
    bound: bool,
    context: VulkanContext,
}

impl VulkanMeshBuffer {
    pub fn new(context: VulkanContext) -> Self {
        Self {
            buffers: None,
            vertex_count: 0,
            bound: false,
            context,
        }
    }

    fn upload(&self, name: &str, data: &[f32]) -> BackendResult<GpuBuffer> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = GpuBuffer::new(
            &self.context.device,
            name,
            bytes.len() as u64,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;
        buffer.write(0, bytes)?;
        Ok(buffer)
    }
}

impl MeshBuffer for VulkanMeshBuffer {
    fn create_buffers(&mut self, vertices: &[f32], normals: &[f32]) -> BackendResult<()> {
        if vertices.is_empty() || vertices.len() % 3 != 0 || vertices.len() != normals.len() {
            return Err(BackendError::BufferCreationFailed(format!(
                "{} vertex floats, {} normal floats",
                vertices.len(),
                normals.len()
            )));
        }
        let positions = self.upload("Mesh Positions", vertices)?;
        let normals = self.upload("Mesh Normals", normals)?;
        self.context.wait_idle();
        self.buffers = Some((positions, normals));
        self.vertex_count = (vertices.len() / 3) as u32;
        self.bound = false;
        Ok(())
    }

    fn bind(&mut self) {
        self.bound = self.buffers.is_some();
    }

    fn unbind(&mut self) {
        self.bound = false;
    }

    fn is_bound(&self) -> bool {
        self.bound
    }

    fn handle(&self) -> MeshHandle {
        match &self.buffers {
            Some((positions, normals)) => MeshHandle::Vulkan {
                positions: positions.buffer,
                normals: normals.buffer,
                vertex_count: self.vertex_count,
            },
            None => MeshHandle::None,
        }
    }
}

impl Drop for VulkanMeshBuffer {
    fn drop(&mut self) {
        if self.buffers.is_some() {
            // A frame in flight may still read these
            self.context.wait_idle();
        }
    }
}
