//! Runtime selection of concrete backend types
//!
//! Every factory matches on the requested [`GraphicsApi`] and, for device
//! objects, on the [`DeviceContext`] the active backend hands out. A headless
//! context serves every API so all variants can be exercised without a GPU.

use crate::backend::dummy::{HeadlessMeshBuffer, HeadlessShaderCompiler, HeadlessShaderProgram};
#[cfg(not(target_arch = "wasm32"))]
use crate::backend::vulkan::{
    VulkanBackend, VulkanMeshBuffer, VulkanShaderCompiler, VulkanShaderProgram,
};
use crate::backend::wgpu_backend::{
    BytecodeShaderCompiler, D3D12Backend, GlslShaderCompiler, OpenGlBackend, WgpuMeshBuffer,
    WgpuShaderProgram,
};
use crate::backend::{
    BackendError, BackendResult, DeviceContext, MeshBuffer, RendererBackend, ShaderCompiler,
    ShaderProgram,
};
use crate::{GraphicsApi, RendererConfig};

fn unsupported(api: GraphicsApi, context: &DeviceContext) -> BackendError {
    BackendError::UnsupportedApi {
        api,
        context: context.name(),
    }
}

/// Creates the backend for an API. No GPU work happens until `init_window_context`.
pub struct RendererFactory;

impl RendererFactory {
    pub fn create(
        api: GraphicsApi,
        config: &RendererConfig,
    ) -> BackendResult<Box<dyn RendererBackend>> {
        log::info!("Creating {api} renderer backend");
        match api {
            GraphicsApi::OpenGl | GraphicsApi::WebGl => {
                Ok(Box::new(OpenGlBackend::new(api, config.vsync)))
            }
            #[cfg(not(target_arch = "wasm32"))]
            GraphicsApi::Vulkan => Ok(Box::new(VulkanBackend::new(config.clone()))),
            #[cfg(target_arch = "wasm32")]
            GraphicsApi::Vulkan => Err(BackendError::UnsupportedApi {
                api,
                context: "wasm32",
            }),
            GraphicsApi::DirectX12 => Ok(Box::new(D3D12Backend::new(config.vsync))),
        }
    }
}

/// Creates the shader compiler matching an API
pub struct ShaderCompilerFactory;

impl ShaderCompilerFactory {
    pub fn create(
        api: GraphicsApi,
        context: &DeviceContext,
    ) -> BackendResult<Box<dyn ShaderCompiler>> {
        match (api, context) {
            (_, DeviceContext::Uninitialized) => Err(BackendError::NotInitialized),
            (_, DeviceContext::Headless(ctx)) => {
                Ok(Box::new(HeadlessShaderCompiler::new(api, ctx.clone())))
            }
            #[cfg(not(target_arch = "wasm32"))]
            (GraphicsApi::Vulkan, DeviceContext::Vulkan(ctx)) => {
                Ok(Box::new(VulkanShaderCompiler::new(ctx.clone())))
            }
            (GraphicsApi::OpenGl | GraphicsApi::WebGl, DeviceContext::Wgpu(ctx)) => {
                Ok(Box::new(GlslShaderCompiler::new(ctx.clone())))
            }
            (GraphicsApi::DirectX12, DeviceContext::Wgpu(ctx)) => {
                Ok(Box::new(BytecodeShaderCompiler::new(ctx.clone())))
            }
            _ => Err(unsupported(api, context)),
        }
    }
}

/// Creates the shader program matching an API
pub struct ShaderProgramFactory;

impl ShaderProgramFactory {
    pub fn create(
        api: GraphicsApi,
        context: &DeviceContext,
    ) -> BackendResult<Box<dyn ShaderProgram>> {
        match (api, context) {
            (_, DeviceContext::Uninitialized) => Err(BackendError::NotInitialized),
            (_, DeviceContext::Headless(ctx)) => Ok(Box::new(HeadlessShaderProgram::new(ctx.clone()))),
            #[cfg(not(target_arch = "wasm32"))]
            (GraphicsApi::Vulkan, DeviceContext::Vulkan(ctx)) => {
                Ok(Box::new(VulkanShaderProgram::new(ctx.clone())?))
            }
            (
                GraphicsApi::OpenGl | GraphicsApi::WebGl | GraphicsApi::DirectX12,
                DeviceContext::Wgpu(ctx),
            ) => Ok(Box::new(WgpuShaderProgram::new(ctx.clone()))),
            _ => Err(unsupported(api, context)),
        }
    }
}

/// Creates the mesh buffer matching an API
pub struct MeshBufferFactory;

impl MeshBufferFactory {
    pub fn create(api: GraphicsApi, context: &DeviceContext) -> BackendResult<Box<dyn MeshBuffer>> {
        match (api, context) {
            (_, DeviceContext::Uninitialized) => Err(BackendError::NotInitialized),
            (_, DeviceContext::Headless(ctx)) => Ok(Box::new(HeadlessMeshBuffer::new(ctx.clone()))),
            #[cfg(not(target_arch = "wasm32"))]
            (GraphicsApi::Vulkan, DeviceContext::Vulkan(ctx)) => {
                Ok(Box::new(VulkanMeshBuffer::new(ctx.clone())))
            }
            (
                GraphicsApi::OpenGl | GraphicsApi::WebGl | GraphicsApi::DirectX12,
                DeviceContext::Wgpu(ctx),
            ) => Ok(Box::new(WgpuMeshBuffer::new(ctx.clone()))),
            _ => Err(unsupported(api, context)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::HeadlessContext;
    use rstest::rstest;

    #[rstest]
    #[case::opengl(GraphicsApi::OpenGl)]
    #[case::webgl(GraphicsApi::WebGl)]
    #[case::vulkan(GraphicsApi::Vulkan)]
    #[case::directx12(GraphicsApi::DirectX12)]
    fn headless_context_serves_every_api(#[case] api: GraphicsApi) {
        let ctx = DeviceContext::Headless(HeadlessContext::new(api));
        assert!(ShaderCompilerFactory::create(api, &ctx).is_ok());
        assert!(ShaderProgramFactory::create(api, &ctx).is_ok());
        assert!(MeshBufferFactory::create(api, &ctx).is_ok());
    }

    #[rstest]
    #[case::opengl(GraphicsApi::OpenGl)]
    #[case::webgl(GraphicsApi::WebGl)]
    #[case::vulkan(GraphicsApi::Vulkan)]
    #[case::directx12(GraphicsApi::DirectX12)]
    fn renderer_factory_keeps_requested_api(#[case] api: GraphicsApi) {
        let backend = RendererFactory::create(api, &RendererConfig::default()).unwrap();
        assert_eq!(backend.graphics_api(), api);
        assert_eq!(backend.state(), crate::backend::BackendState::Uninitialized);
    }

    #[test]
    fn uninitialized_context_creates_nothing() {
        let ctx = DeviceContext::Uninitialized;
        assert!(matches!(
            MeshBufferFactory::create(GraphicsApi::Vulkan, &ctx),
            Err(BackendError::NotInitialized)
        ));
        assert!(matches!(
            ShaderCompilerFactory::create(GraphicsApi::OpenGl, &ctx),
            Err(BackendError::NotInitialized)
        ));
    }
}
