//! Vulkan backend implementation using ash
//!
//! Initialization runs as a strict sequence, each step consuming the previous
//! one's output: instance, physical device, logical device, swapchain, image
//! views, render pass, depth buffer, framebuffers, command pool, descriptor
//! set layouts, descriptor pool, default pipeline, command buffers and the
//! frame synchronization objects.
//!
//! A single fence and semaphore pair keeps exactly one frame in flight: the
//! CPU waits in `clear` until the GPU has finished the previous frame.

mod resources;
mod shader;

pub use resources::VulkanMeshBuffer;
pub use shader::{
    VulkanProgramHandle, VulkanShaderCompiler, VulkanShaderModule, VulkanShaderProgram,
};

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;
use std::path::PathBuf;
use std::sync::Arc;

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use web_time::Instant;

use self::resources::{upload_cubemap, GpuImage, ImageDesc};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{CubemapData, Mesh};
use crate::scene::format::{MAX_COMPONENTS, MAX_TABLE_ENTRIES};
use crate::scene::CameraState;
use crate::{GraphicsApi, RendererConfig};

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";
const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
/// Sets one scene needs at the format caps: a program per mesh-renderer
/// component, then the skybox program and its cubemap
const SCENE_DESCRIPTOR_SETS: u32 = (MAX_TABLE_ENTRIES * MAX_COMPONENTS) as u32 + 2;
/// Two scenes alive at once (the outgoing and the incoming) plus the default program
const MAX_DESCRIPTOR_SETS: u32 = 2 * SCENE_DESCRIPTOR_SETS + 1;

fn vk_error(context: &str) -> impl Fn(vk::Result) -> BackendError + '_ {
    move |e| BackendError::InitializationFailed(format!("{context}: {e}"))
}

/// Instance-level objects, created by `init_window_context`
pub(crate) struct VulkanInstance {
    entry: ash::Entry,
    instance: ash::Instance,
    surface_fn: surface::Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    fn new(display: RawDisplayHandle, validation: bool, app_name: &str) -> BackendResult<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| BackendError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let validation_available = validation && has_validation_layer(&entry);
        if validation && !validation_available {
            log::warn!("Validation layers requested but not available");
        }

        let app_name = CString::new(app_name).unwrap_or_default();
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"scene-renderer")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions = ash_window::enumerate_required_extensions(display)
            .map_err(vk_error("Failed to query surface extensions"))?
            .to_vec();
        if validation_available {
            extensions.push(debug_utils::NAME.as_ptr());
        }

        #[allow(unused_mut)]
        let mut create_flags = vk::InstanceCreateFlags::empty();
        #[cfg(target_os = "macos")]
        {
            extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
            create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        let layer_names: Vec<*const std::ffi::c_char> = if validation_available {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .flags(create_flags)
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(vk_error("Failed to create Vulkan instance"))?;

        let debug = if validation_available {
            let loader = debug_utils::Instance::new(&entry, &instance);
            match create_debug_messenger(&loader) {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    log::warn!("Failed to create debug messenger: {e}");
                    None
                }
            }
        } else {
            None
        };

        let surface_fn = surface::Instance::new(&entry, &instance);
        Ok(Self {
            entry,
            instance,
            surface_fn,
            debug,
        })
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn has_validation_layer(entry: &ash::Entry) -> bool {
    let Ok(layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };
    layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER_NAME
    })
}

fn create_debug_messenger(
    loader: &debug_utils::Instance,
) -> Result<vk::DebugUtilsMessengerEXT, vk::Result> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));
    unsafe { loader.create_debug_utils_messenger(&create_info, None) }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    // SAFETY: the driver passes either null or valid callback data
    let message = match unsafe { callback_data.as_ref() } {
        Some(data) if !data.p_message.is_null() => {
            // SAFETY: p_message is a NUL-terminated string owned by the driver
            unsafe { CStr::from_ptr(data.p_message) }.to_string_lossy()
        }
        _ => "(no message)".into(),
    };

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[Vulkan] {message}");
    } else {
        log::warn!("[Vulkan] {message}");
    }
    vk::FALSE
}

/// Device-level objects shared by the backend and every object created
/// through its [`VulkanContext`]. Dropped when the last user goes away.
pub(crate) struct VulkanDevice {
    instance: Arc<VulkanInstance>,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    min_uniform_alignment: u64,
    pub(crate) device: ash::Device,
    pub(crate) queue: vk::Queue,
    queue_family: u32,
    pub(crate) allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
    pub(crate) render_pass: vk::RenderPass,
    pub(crate) command_pool: vk::CommandPool,
    /// Set 0: uniform slots 0, 1 and 2
    pub(crate) uniform_set_layout: vk::DescriptorSetLayout,
    /// Set 1: cubemap sampler at binding 0
    pub(crate) cubemap_set_layout: vk::DescriptorSetLayout,
    pub(crate) pipeline_layout: vk::PipelineLayout,
    pub(crate) descriptor_pool: vk::DescriptorPool,
    pub(crate) sampler: vk::Sampler,
}

impl VulkanDevice {
    /// Steps 2 and 3: pick a physical device that can present to the
    /// window, then create the logical device, its queue and the allocator
    fn new(
        instance: Arc<VulkanInstance>,
        window: &winit::window::Window,
    ) -> BackendResult<Self> {
        let display = window
            .display_handle()
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;
        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        match Self::create_device(&instance, surface) {
            Ok((physical_device, queue_family, min_uniform_alignment, device, allocator)) => {
                let queue = unsafe { device.get_device_queue(queue_family, 0) };
                Ok(Self {
                    instance,
                    surface,
                    physical_device,
                    min_uniform_alignment,
                    device,
                    queue,
                    queue_family,
                    allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
                    render_pass: vk::RenderPass::null(),
                    command_pool: vk::CommandPool::null(),
                    uniform_set_layout: vk::DescriptorSetLayout::null(),
                    cubemap_set_layout: vk::DescriptorSetLayout::null(),
                    pipeline_layout: vk::PipelineLayout::null(),
                    descriptor_pool: vk::DescriptorPool::null(),
                    sampler: vk::Sampler::null(),
                })
            }
            Err(e) => {
                unsafe { instance.surface_fn.destroy_surface(surface, None) };
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn create_device(
        instance: &VulkanInstance,
        surface: vk::SurfaceKHR,
    ) -> BackendResult<(vk::PhysicalDevice, u32, u64, ash::Device, Allocator)> {
        let physical_devices = unsafe { instance.instance.enumerate_physical_devices() }
            .map_err(vk_error("Failed to enumerate physical devices"))?;

        // Prefer discrete GPUs over integrated ones
        let (physical_device, queue_family) = physical_devices
            .iter()
            .filter_map(|&pd| {
                find_queue_family(instance, pd, surface).map(|family| (pd, family))
            })
            .max_by_key(|(pd, _)| {
                let properties = unsafe { instance.instance.get_physical_device_properties(*pd) };
                match properties.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 2,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                    _ => 0,
                }
            })
            .ok_or_else(|| {
                BackendError::InitializationFailed("No Vulkan device can present to the window".into())
            })?;

        let properties =
            unsafe { instance.instance.get_physical_device_properties(physical_device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!("Selected GPU: {:?} (Vulkan backend)", device_name);

        let queue_priorities = [1.0f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)];
        let device_extensions = [swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .instance
                .create_device(physical_device, &create_info, None)
        }
        .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        match allocator {
            Ok(allocator) => Ok((
                physical_device,
                queue_family,
                properties.limits.min_uniform_buffer_offset_alignment,
                device,
                allocator,
            )),
            Err(e) => {
                unsafe { device.destroy_device(None) };
                Err(BackendError::DeviceCreationFailed(e.to_string()))
            }
        }
    }

    /// Step 6: one color and one depth attachment, single subpass
    fn create_render_pass(&mut self, color_format: vk::Format) -> BackendResult<()> {
        let attachments = [
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::AttachmentDescription::default()
                .format(DEPTH_FORMAT)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        ];
        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)];

        // Color and depth writes wait until the acquired image is available
        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .dst_stage_mask(stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        self.render_pass = unsafe { self.device.create_render_pass(&create_info, None) }
            .map_err(vk_error("Failed to create render pass"))?;
        Ok(())
    }

    /// Step 9
    fn create_command_pool(&mut self) -> BackendResult<()> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        self.command_pool = unsafe { self.device.create_command_pool(&create_info, None) }
            .map_err(vk_error("Failed to create command pool"))?;
        Ok(())
    }

    /// Step 10: set 0 carries the uniform slots, set 1 the skybox cubemap
    fn create_descriptor_set_layouts(&mut self) -> BackendResult<()> {
        let uniform_bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..UNIFORM_SLOT_COUNT as u32)
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&uniform_bindings);
        self.uniform_set_layout =
            unsafe { self.device.create_descriptor_set_layout(&create_info, None) }
                .map_err(vk_error("Failed to create uniform set layout"))?;

        let cubemap_bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)];
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&cubemap_bindings);
        self.cubemap_set_layout =
            unsafe { self.device.create_descriptor_set_layout(&create_info, None) }
                .map_err(vk_error("Failed to create cubemap set layout"))?;

        let set_layouts = [self.uniform_set_layout, self.cubemap_set_layout];
        let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        self.pipeline_layout = unsafe { self.device.create_pipeline_layout(&create_info, None) }
            .map_err(vk_error("Failed to create pipeline layout"))?;
        Ok(())
    }

    /// Step 12: pool for program and cubemap sets, plus the cubemap sampler
    fn create_descriptor_pool(&mut self) -> BackendResult<()> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: MAX_DESCRIPTOR_SETS * UNIFORM_SLOT_COUNT as u32,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: MAX_DESCRIPTOR_SETS,
            },
        ];
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(MAX_DESCRIPTOR_SETS)
            .pool_sizes(&pool_sizes);
        self.descriptor_pool = unsafe { self.device.create_descriptor_pool(&create_info, None) }
            .map_err(vk_error("Failed to create descriptor pool"))?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(1.0);
        self.sampler = unsafe { self.device.create_sampler(&sampler_info, None) }
            .map_err(vk_error("Failed to create sampler"))?;
        Ok(())
    }

    /// Distance between uniform slots in a program's buffer
    pub(crate) fn uniform_stride(&self) -> u64 {
        slot_stride(self.min_uniform_alignment)
    }

    fn wait_idle(&self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::error!("vkDeviceWaitIdle failed: {e}");
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        // Destroying a null handle is a no-op, so a partial init cleans up too
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.cubemap_set_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.uniform_set_layout, None);
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_render_pass(self.render_pass, None);

            // The allocator must go before the device it allocates from
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.instance.surface_fn.destroy_surface(self.surface, None);
        }
    }
}

fn find_queue_family(
    instance: &VulkanInstance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Option<u32> {
    let families = unsafe {
        instance
            .instance
            .get_physical_device_queue_family_properties(physical_device)
    };
    families.iter().enumerate().find_map(|(index, family)| {
        let index = index as u32;
        let supports_surface = unsafe {
            instance
                .surface_fn
                .get_physical_device_surface_support(physical_device, index, surface)
                .unwrap_or(false)
        };
        (family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && supports_surface)
            .then_some(index)
    })
}

/// Mutable access to a device nothing else holds yet
fn unique(device: &mut Arc<VulkanDevice>) -> BackendResult<&mut VulkanDevice> {
    Arc::get_mut(device)
        .ok_or_else(|| BackendError::InitializationFailed("device is already shared".into()))
}

/// Slot stride: at least `UNIFORM_SLOT_STRIDE`, rounded up to the device's
/// uniform offset alignment
fn slot_stride(min_alignment: u64) -> u64 {
    UNIFORM_SLOT_STRIDE.next_multiple_of(min_alignment.max(1))
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Device handles given to compilers, programs and mesh buffers
#[derive(Clone)]
pub struct VulkanContext {
    pub(crate) device: Arc<VulkanDevice>,
}

impl VulkanContext {
    pub(crate) fn wait_idle(&self) {
        self.device.wait_idle();
    }
}

/// Swapchain and everything sized by it (steps 4, 5, 7 and 8)
struct Presenter {
    device: ash::Device,
    swapchain_fn: swapchain::Device,
    vsync: bool,
    swapchain: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    image_views: Vec<vk::ImageView>,
    depth: Option<GpuImage>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl Presenter {
    fn new(device: &VulkanDevice, vsync: bool) -> Self {
        Self {
            device: device.device.clone(),
            swapchain_fn: swapchain::Device::new(&device.instance.instance, &device.device),
            vsync,
            swapchain: vk::SwapchainKHR::null(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            image_views: Vec::new(),
            depth: None,
            framebuffers: Vec::new(),
        }
    }

    fn create_swapchain(&mut self, device: &VulkanDevice, width: u32, height: u32) -> BackendResult<()> {
        let surface_fn = &device.instance.surface_fn;
        let swapchain_error = |e: vk::Result| BackendError::SwapchainFailed(e.to_string());

        let capabilities = unsafe {
            surface_fn.get_physical_device_surface_capabilities(device.physical_device, device.surface)
        }
        .map_err(swapchain_error)?;
        let formats = unsafe {
            surface_fn.get_physical_device_surface_formats(device.physical_device, device.surface)
        }
        .map_err(swapchain_error)?;
        let present_modes = unsafe {
            surface_fn
                .get_physical_device_surface_present_modes(device.physical_device, device.surface)
        }
        .map_err(swapchain_error)?;

        // Prefer SRGB
        let format = formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first())
            .copied()
            .ok_or_else(|| BackendError::SwapchainFailed("surface reports no formats".into()))?;

        let present_mode = if self.vsync {
            vk::PresentModeKHR::FIFO
        } else {
            present_modes
                .iter()
                .copied()
                .find(|&m| m == vk::PresentModeKHR::MAILBOX)
                .unwrap_or(vk::PresentModeKHR::FIFO)
        };

        let extent = choose_extent(&capabilities, width, height);
        let image_count = if capabilities.max_image_count > 0 {
            (capabilities.min_image_count + 1).min(capabilities.max_image_count)
        } else {
            capabilities.min_image_count + 1
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        self.swapchain = unsafe { self.swapchain_fn.create_swapchain(&create_info, None) }
            .map_err(swapchain_error)?;
        self.format = format.format;
        self.extent = extent;
        log::debug!(
            "Swapchain {}x{} {:?} {:?}",
            extent.width,
            extent.height,
            format.format,
            present_mode
        );
        Ok(())
    }

    fn create_image_views(&mut self) -> BackendResult<()> {
        let images = unsafe { self.swapchain_fn.get_swapchain_images(self.swapchain) }
            .map_err(|e| BackendError::SwapchainFailed(e.to_string()))?;
        for image in images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { self.device.create_image_view(&view_info, None) }
                .map_err(|e| BackendError::SwapchainFailed(e.to_string()))?;
            self.image_views.push(view);
        }
        Ok(())
    }

    fn create_depth(&mut self, device: &VulkanDevice) -> BackendResult<()> {
        self.depth = Some(GpuImage::new(
            device,
            &ImageDesc {
                name: "Depth Buffer",
                format: DEPTH_FORMAT,
                extent: self.extent,
                layers: 1,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                aspect: vk::ImageAspectFlags::DEPTH,
                cube: false,
            },
        )?);
        Ok(())
    }

    fn create_framebuffers(&mut self, render_pass: vk::RenderPass) -> BackendResult<()> {
        let depth_view = self
            .depth
            .as_ref()
            .map(|depth| depth.view)
            .ok_or_else(|| BackendError::SwapchainFailed("depth buffer missing".into()))?;
        for &view in &self.image_views {
            let attachments = [view, depth_view];
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            let framebuffer = unsafe { self.device.create_framebuffer(&create_info, None) }
                .map_err(|e| BackendError::SwapchainFailed(e.to_string()))?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    fn destroy(&mut self) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            self.depth = None;
            for view in self.image_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            self.swapchain_fn.destroy_swapchain(self.swapchain, None);
            self.swapchain = vk::SwapchainKHR::null();
        }
    }

    /// Tear down and rebuild steps 4, 5, 7 and 8 at a new size
    fn recreate(&mut self, device: &VulkanDevice, width: u32, height: u32) -> BackendResult<()> {
        device.wait_idle();
        self.destroy();
        self.create_swapchain(device, width, height)?;
        self.create_image_views()?;
        self.create_depth(device)?;
        self.create_framebuffers(device.render_pass)
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Command buffers and the single fence/semaphore pair (steps 14 and 15)
struct FrameSync {
    device: ash::Device,
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
}

impl FrameSync {
    fn new(device: &VulkanDevice, framebuffer_count: usize) -> BackendResult<Self> {
        let mut sync = Self {
            device: device.device.clone(),
            command_pool: device.command_pool,
            command_buffers: Vec::new(),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
        };
        sync.allocate_command_buffers(framebuffer_count)?;

        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Signaled so the first frame does not wait
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        unsafe {
            sync.image_available = sync
                .device
                .create_semaphore(&semaphore_info, None)
                .map_err(vk_error("Failed to create semaphore"))?;
            sync.render_finished = sync
                .device
                .create_semaphore(&semaphore_info, None)
                .map_err(vk_error("Failed to create semaphore"))?;
            sync.in_flight = sync
                .device
                .create_fence(&fence_info, None)
                .map_err(vk_error("Failed to create fence"))?;
        }
        Ok(sync)
    }

    fn allocate_command_buffers(&mut self, count: usize) -> BackendResult<()> {
        unsafe {
            if !self.command_buffers.is_empty() {
                self.device
                    .free_command_buffers(self.command_pool, &self.command_buffers);
                self.command_buffers.clear();
            }
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(count as u32);
            self.command_buffers = self
                .device
                .allocate_command_buffers(&alloc_info)
                .map_err(vk_error("Failed to allocate command buffers"))?;
        }
        Ok(())
    }

    /// Signal the fence with an empty submit so the next wait cannot hang
    fn resignal(&self, queue: vk::Queue) {
        if let Err(e) = unsafe { self.device.queue_submit(queue, &[], self.in_flight) } {
            log::error!("Failed to re-signal frame fence: {e}");
        }
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.in_flight, None);
            self.device.destroy_semaphore(self.render_finished, None);
            self.device.destroy_semaphore(self.image_available, None);
            if !self.command_buffers.is_empty() {
                self.device
                    .free_command_buffers(self.command_pool, &self.command_buffers);
            }
        }
    }
}

/// Cubemap image plus the set 1 descriptor that samples it
struct GpuCubemap {
    descriptor_set: vk::DescriptorSet,
    _image: GpuImage,
    device: Arc<VulkanDevice>,
}

impl Drop for GpuCubemap {
    fn drop(&mut self) {
        self.device.wait_idle();
        unsafe {
            let _ = self
                .device
                .device
                .free_descriptor_sets(self.device.descriptor_pool, &[self.descriptor_set]);
        }
    }
}

/// Frame being recorded
struct Recording {
    image_index: u32,
    command_buffer: vk::CommandBuffer,
}

/// Vulkan renderer backend
pub struct VulkanBackend {
    config: RendererConfig,
    state: BackendState,
    frame: FrameState,
    depth_compare: CompareFunction,
    clear_color: [f32; 4],
    recording: Option<Recording>,
    program_bound: bool,
    pending_size: Option<(u32, u32)>,
    window: Option<Arc<winit::window::Window>>,
    next_texture: u32,
    started: Instant,

    // GPU objects, dropped in declaration order
    cubemaps: HashMap<u32, GpuCubemap>,
    default_program: Option<VulkanShaderProgram>,
    sync: Option<FrameSync>,
    presenter: Option<Presenter>,
    device: Option<Arc<VulkanDevice>>,
    instance: Option<Arc<VulkanInstance>>,
}

impl VulkanBackend {
    /// Stores the configuration only; no Vulkan call happens here
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            state: BackendState::Uninitialized,
            frame: FrameState::default(),
            depth_compare: CompareFunction::Less,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            recording: None,
            program_bound: false,
            pending_size: None,
            window: None,
            next_texture: 1,
            started: Instant::now(),
            cubemaps: HashMap::new(),
            default_program: None,
            sync: None,
            presenter: None,
            device: None,
            instance: None,
        }
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

    fn camera_state(&self) -> BackendResult<CameraState> {
        self.frame
            .camera
            .ok_or_else(|| BackendError::CommandFailed("no camera bound".into()))
    }

    fn recording(&self) -> BackendResult<&Recording> {
        self.recording
            .as_ref()
            .ok_or_else(|| BackendError::CommandFailed("no frame in progress".into()))
    }

    fn gpu(&self) -> BackendResult<(&Arc<VulkanDevice>, &Presenter, &FrameSync)> {
        match (&self.device, &self.presenter, &self.sync) {
            (Some(device), Some(presenter), Some(sync)) => Ok((device, presenter, sync)),
            _ => Err(BackendError::NotInitialized),
        }
    }

    /// Steps 11 to 13: the fixed pipeline bound at the start of every frame
    fn create_default_program(&self, context: &VulkanContext) -> BackendResult<VulkanShaderProgram> {
        let compiler = VulkanShaderCompiler::new(context.clone());
        let vertex = compiler.compile(&self.config.vertex_shader_path, ShaderStage::Vertex)?;
        let fragment = compiler.compile(&self.config.fragment_shader_path, ShaderStage::Fragment)?;

        let mut program = VulkanShaderProgram::new(context.clone())?;
        program.attach_shader(&vertex)?;
        program.attach_shader(&fragment)?;
        program.link()?;
        Ok(program)
    }

    fn recreate_swapchain(&mut self) -> BackendResult<()> {
        let (width, height) = self
            .pending_size
            .take()
            .or_else(|| {
                self.window
                    .as_ref()
                    .map(|w| (w.inner_size().width, w.inner_size().height))
            })
            .unwrap_or((self.config.width, self.config.height));
        if width == 0 || height == 0 {
            return Ok(());
        }

        let (Some(device), Some(presenter), Some(sync)) =
            (&self.device, self.presenter.as_mut(), self.sync.as_mut())
        else {
            return Err(BackendError::NotInitialized);
        };
        presenter.recreate(device, width, height)?;
        if sync.command_buffers.len() != presenter.framebuffers.len() {
            sync.allocate_command_buffers(presenter.framebuffers.len())?;
        }
        log::info!("Swapchain recreated at {width}x{height}");
        Ok(())
    }

    fn bind_program(&mut self, program: &dyn ShaderProgram, cubemap: Option<vk::DescriptorSet>) -> BackendResult<()> {
        let handle = match program.handle() {
            ProgramHandle::Vulkan(handle) => handle,
            ProgramHandle::None => return Err(BackendError::NoProgramBound),
            _ => {
                return Err(BackendError::CommandFailed(
                    "program was linked for another device".into(),
                ))
            }
        };
        let cmd = self.recording()?.command_buffer;
        let (device, _, _) = self.gpu()?;

        let pipeline = match self.depth_compare {
            CompareFunction::Less => handle.pipeline,
            _ => handle.skybox_pipeline,
        };
        let mut sets = vec![handle.descriptor_set];
        sets.extend(cubemap);
        unsafe {
            device
                .device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            device.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                device.pipeline_layout,
                0,
                &sets,
                &[],
            );
        }
        self.program_bound = true;
        Ok(())
    }

    fn record_draw(&self, mesh: &Mesh) -> BackendResult<()> {
        let MeshHandle::Vulkan {
            positions,
            normals,
            vertex_count,
        } = mesh.handle()
        else {
            return Err(BackendError::CommandFailed(
                "mesh is not uploaded to this device".into(),
            ));
        };
        let cmd = self.recording()?.command_buffer;
        let (device, _, _) = self.gpu()?;
        unsafe {
            device
                .device
                .cmd_bind_vertex_buffers(cmd, 0, &[positions, normals], &[0, 0]);
            device.device.cmd_draw(cmd, vertex_count, 1, 0, 0);
        }
        Ok(())
    }

    fn draw_skybox(
        &mut self,
        mesh: &Mesh,
        program: &mut dyn ShaderProgram,
        texture: TextureId,
    ) -> BackendResult<()> {
        self.recording()?;
        let cubemap_set = self
            .cubemaps
            .get(&texture.0)
            .map(|cubemap| cubemap.descriptor_set)
            .ok_or_else(|| {
                BackendError::TextureCreationFailed(format!("unknown cubemap {}", texture.0))
            })?;
        if !program.is_valid() {
            return Err(BackendError::NoProgramBound);
        }

        let camera = self.camera_state()?;
        let matrices = MatricesUniform::for_skybox(&camera).flip_y();
        program.set_uniform_buffer(MATRICES_BLOCK, MATRICES_SLOT, bytemuck::bytes_of(&matrices))?;
        self.bind_program(program, Some(cubemap_set))?;
        self.record_draw(mesh)
    }
}

impl RendererBackend for VulkanBackend {
    fn graphics_api(&self) -> GraphicsApi {
        GraphicsApi::Vulkan
    }

    fn state(&self) -> BackendState {
        self.state
    }

    /// Step 1: load Vulkan and create the instance with the surface
    /// extensions the display needs
    fn init_window_context(&mut self, display: RawDisplayHandle) -> BackendResult<()> {
        self.require_state(BackendState::Uninitialized)?;
        let instance = VulkanInstance::new(display, self.config.validation, &self.config.title)?;
        log::info!("Vulkan instance created");
        self.instance = Some(Arc::new(instance));
        self.state = BackendState::ContextReady;
        Ok(())
    }

    fn init(&mut self, window: Arc<winit::window::Window>) -> BackendResult<()> {
        self.require_state(BackendState::ContextReady)?;
        let instance = self.instance.clone().ok_or(BackendError::NotInitialized)?;
        let size = window.inner_size();
        let (width, height) = (size.width.max(1), size.height.max(1));

        let mut device = Arc::new(VulkanDevice::new(instance, &window)?);

        let mut presenter = Presenter::new(&device, self.config.vsync);
        presenter.create_swapchain(&device, width, height)?;
        presenter.create_image_views()?;
        unique(&mut device)?.create_render_pass(presenter.format)?;
        presenter.create_depth(&device)?;
        presenter.create_framebuffers(device.render_pass)?;
        unique(&mut device)?.create_command_pool()?;
        unique(&mut device)?.create_descriptor_set_layouts()?;
        unique(&mut device)?.create_descriptor_pool()?;

        let context = VulkanContext {
            device: Arc::clone(&device),
        };
        let default_program = self.create_default_program(&context)?;
        let sync = FrameSync::new(&device, presenter.framebuffers.len())?;

        log::info!(
            "Vulkan device ready: {}x{} {:?}, {} framebuffers",
            presenter.extent.width,
            presenter.extent.height,
            presenter.format,
            presenter.framebuffers.len()
        );

        self.default_program = Some(default_program);
        self.sync = Some(sync);
        self.presenter = Some(presenter);
        self.device = Some(device);
        self.window = Some(window);
        self.state = BackendState::Ready;
        Ok(())
    }

    fn device_context(&self) -> DeviceContext {
        match &self.device {
            Some(device) => DeviceContext::Vulkan(VulkanContext {
                device: Arc::clone(device),
            }),
            None => DeviceContext::Uninitialized,
        }
    }

    fn resize(&mut self, width: u32, height: u32) -> BackendResult<()> {
        if self.state != BackendState::Ready || width == 0 || height == 0 {
            return Ok(());
        }
        self.pending_size = Some((width, height));
        if self.recording.is_none() {
            self.recreate_swapchain()?;
        }
        Ok(())
    }

    fn clear(&mut self) -> BackendResult<()> {
        self.require_state(BackendState::Ready)?;
        if self.recording.is_some() {
            log::warn!("Previous frame was never presented; presenting it now");
            self.present()?;
        }
        if self.pending_size.is_some() {
            self.recreate_swapchain()?;
        }

        let (device, presenter, sync) = self.gpu()?;
        unsafe {
            device
                .device
                .wait_for_fences(&[sync.in_flight], true, u64::MAX)
                .map_err(|e| BackendError::SwapchainFailed(e.to_string()))?;
            device
                .device
                .reset_fences(&[sync.in_flight])
                .map_err(|e| BackendError::SwapchainFailed(e.to_string()))?;
        }

        let acquired = unsafe {
            presenter.swapchain_fn.acquire_next_image(
                presenter.swapchain,
                u64::MAX,
                sync.image_available,
                vk::Fence::null(),
            )
        };
        let mut resize_to = None;
        let image_index = match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    resize_to = Some((presenter.extent.width, presenter.extent.height));
                }
                index
            }
            Err(e) => {
                // The fence was reset but nothing will signal it
                sync.resignal(device.queue);
                if e == vk::Result::ERROR_OUT_OF_DATE_KHR {
                    self.pending_size = self
                        .window
                        .as_ref()
                        .map(|w| (w.inner_size().width, w.inner_size().height));
                }
                return Err(BackendError::SwapchainFailed(format!(
                    "Failed to acquire swapchain image: {e}"
                )));
            }
        };

        let cmd = sync.command_buffers[image_index as usize];
        let [r, g, b, a] = self.clear_color;
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [r, g, b, a],
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: presenter.extent,
        };

        unsafe {
            let begin = device
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .and_then(|_| {
                    device
                        .device
                        .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())
                });
            if let Err(e) = begin {
                sync.resignal(device.queue);
                return Err(BackendError::CommandFailed(e.to_string()));
            }

            let pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(device.render_pass)
                .framebuffer(presenter.framebuffers[image_index as usize])
                .render_area(render_area)
                .clear_values(&clear_values);
            device
                .device
                .cmd_begin_render_pass(cmd, &pass_info, vk::SubpassContents::INLINE);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: presenter.extent.width as f32,
                height: presenter.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.device.cmd_set_scissor(cmd, 0, &[render_area]);
        }

        if resize_to.is_some() {
            self.pending_size = resize_to;
        }
        self.recording = Some(Recording {
            image_index,
            command_buffer: cmd,
        });
        self.program_bound = false;

        if let Some(ProgramHandle::Vulkan(handle)) = self.default_program.as_ref().map(|p| p.handle()) {
            let (device, _, _) = self.gpu()?;
            unsafe {
                device
                    .device
                    .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, handle.pipeline);
                device.device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    device.pipeline_layout,
                    0,
                    &[handle.descriptor_set],
                    &[],
                );
            }
            self.program_bound = true;
        }
        Ok(())
    }

    fn draw(&mut self, mesh: &Mesh) -> BackendResult<()> {
        self.recording()?;
        if !self.program_bound {
            return Err(BackendError::NoProgramBound);
        }
        self.record_draw(mesh)
    }

    fn set_uniforms(&mut self, program: &mut dyn ShaderProgram) -> BackendResult<()> {
        self.recording()?;
        let camera = self.camera_state()?;
        let elapsed = self.started.elapsed().as_secs_f32();
        let matrices = MatricesUniform::for_camera(&camera, elapsed).flip_y();
        program.set_uniform_buffer(MATRICES_BLOCK, MATRICES_SLOT, bytemuck::bytes_of(&matrices))?;
        self.bind_program(program, None)
    }

    fn create_cubemap_texture(&mut self, faces: &[PathBuf]) -> TextureId {
        let Some(device) = self.device.clone() else {
            log::error!("Cannot create a cubemap before the Vulkan device exists");
            return TextureId::NONE;
        };
        let cubemap = match CubemapData::load(faces) {
            Ok(cubemap) => cubemap,
            Err(e) => {
                log::error!("Failed to load cubemap: {e}");
                return TextureId::NONE;
            }
        };
        let image = match upload_cubemap(&device, cubemap.size, &cubemap.packed()) {
            Ok(image) => image,
            Err(e) => {
                log::error!("Failed to upload cubemap: {e}");
                return TextureId::NONE;
            }
        };

        let layouts = [device.cubemap_set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(device.descriptor_pool)
            .set_layouts(&layouts);
        let descriptor_set = match unsafe { device.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets[0],
            Err(e) => {
                log::error!("Failed to allocate cubemap descriptor set: {e}");
                return TextureId::NONE;
            }
        };
        let image_infos = [vk::DescriptorImageInfo::default()
            .sampler(device.sampler)
            .image_view(image.view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        let writes = [vk::WriteDescriptorSet::default()
            .dst_set(descriptor_set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_infos)];
        unsafe { device.device.update_descriptor_sets(&writes, &[]) };

        let id = self.next_texture;
        self.next_texture += 1;
        self.cubemaps.insert(
            id,
            GpuCubemap {
                descriptor_set,
                _image: image,
                device,
            },
        );
        log::debug!("Created cubemap {} ({}px faces)", id, cubemap.size);
        TextureId(id)
    }

    fn delete_cubemap_texture(&mut self, texture: TextureId) {
        if self.cubemaps.remove(&texture.0).is_some() {
            log::debug!("Deleted cubemap {}", texture.0);
        }
    }

    fn render_skybox(
        &mut self,
        mesh: &Mesh,
        program: &mut dyn ShaderProgram,
        texture: TextureId,
    ) -> BackendResult<()> {
        let mut guard = DepthCompareGuard::new(self, CompareFunction::LessEqual);
        guard.draw_skybox(mesh, program, texture)
    }

    fn present(&mut self) -> BackendResult<()> {
        let recording = self
            .recording
            .take()
            .ok_or_else(|| BackendError::CommandFailed("no frame in progress".into()))?;
        self.program_bound = false;
        let (device, presenter, sync) = self.gpu()?;
        let cmd = recording.command_buffer;

        let submitted = unsafe {
            device.device.cmd_end_render_pass(cmd);
            device.device.end_command_buffer(cmd).and_then(|_| {
                let wait_semaphores = [sync.image_available];
                let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
                let signal_semaphores = [sync.render_finished];
                let command_buffers = [cmd];
                let submit_info = vk::SubmitInfo::default()
                    .wait_semaphores(&wait_semaphores)
                    .wait_dst_stage_mask(&wait_stages)
                    .command_buffers(&command_buffers)
                    .signal_semaphores(&signal_semaphores);
                device
                    .device
                    .queue_submit(device.queue, &[submit_info], sync.in_flight)
            })
        };
        if let Err(e) = submitted {
            sync.resignal(device.queue);
            return Err(BackendError::CommandFailed(format!("Failed to submit frame: {e}")));
        }

        let wait_semaphores = [sync.render_finished];
        let swapchains = [presenter.swapchain];
        let image_indices = [recording.image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let presented = unsafe {
            presenter
                .swapchain_fn
                .queue_present(device.queue, &present_info)
        };
        let extent = presenter.extent;
        match presented {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.pending_size = Some((extent.width, extent.height));
                Ok(())
            }
            Err(e) => Err(BackendError::SwapchainFailed(format!("Failed to present: {e}"))),
        }
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

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Some(device) = &self.device {
            device.wait_idle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::small_alignment(64, 256)]
    #[case::exact_alignment(256, 256)]
    #[case::large_alignment(1024, 1024)]
    #[case::zero_alignment(0, 256)]
    fn slot_stride_respects_alignment(#[case] alignment: u64, #[case] expected: u64) {
        assert_eq!(slot_stride(alignment), expected);
    }

    #[test]
    fn descriptor_pool_holds_two_full_scenes() {
        let full_scene = (MAX_TABLE_ENTRIES * MAX_COMPONENTS) as u32 + 2;
        assert!(MAX_DESCRIPTOR_SETS > 2 * full_scene);
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1024,
                height: 768,
            },
            ..Default::default()
        };
        assert_eq!(choose_extent(&capabilities, 10, 10).width, 1024);
    }

    #[test]
    fn extent_is_clamped_when_surface_defers() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 8000, 600);
        assert_eq!((extent.width, extent.height), (4096, 600));
    }

    #[test]
    fn constructor_does_no_gpu_work() {
        let backend = VulkanBackend::new(RendererConfig::default());
        assert_eq!(backend.graphics_api(), GraphicsApi::Vulkan);
        assert_eq!(backend.state(), BackendState::Uninitialized);
        assert!(matches!(backend.device_context(), DeviceContext::Uninitialized));
    }

    #[test]
    fn frame_calls_before_init_fail() {
        let mut backend = VulkanBackend::new(RendererConfig::default());
        assert!(matches!(
            backend.clear(),
            Err(BackendError::InvalidState { .. })
        ));
        assert!(backend.present().is_err());
        assert!(backend.resize(100, 100).is_ok());
        assert_eq!(
            backend.create_cubemap_texture(&[]),
            TextureId::NONE
        );
    }

    #[test]
    fn skybox_failure_restores_depth_compare() {
        let mut backend = VulkanBackend::new(RendererConfig::default());
        let mesh = Mesh::cube();
        let mut program = crate::backend::dummy::HeadlessShaderProgram::new(
            crate::backend::dummy::HeadlessContext::new(GraphicsApi::Vulkan),
        );
        assert!(backend
            .render_skybox(&mesh, &mut program, TextureId(3))
            .is_err());
        assert_eq!(backend.depth_compare(), CompareFunction::Less);
    }
}
