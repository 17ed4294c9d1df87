//! Scene Renderer - one scene description, several graphics APIs
//!
//! A compiled binary scene is loaded into API-agnostic objects (camera, meshes,
//! materials, lights, skybox) that delegate all GPU work to the active backend:
//! - **OpenGL / WebGL**: GLSL compiled at runtime, running on wgpu's GL backend
//! - **Vulkan**: precompiled SPIR-V driven directly through ash
//! - **Direct3D12**: precompiled bytecode running on wgpu's DX12 backend
//!
//! All backends coexist in one build and are selected at runtime through
//! [`GraphicsApi`] and the factories in [`backend::factory`].

pub mod backend;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod window;

pub use backend::factory::{
    MeshBufferFactory, RendererFactory, ShaderCompilerFactory, ShaderProgramFactory,
};
pub use backend::{BackendError, BackendResult, RendererBackend};
pub use renderer::{FrameStats, Renderer};
pub use scene::{Scene, SceneLoader, SceneManager};
pub use window::Window;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Graphics API selection for the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GraphicsApi {
    /// Desktop OpenGL, runtime-compiled GLSL
    #[default]
    OpenGl,
    /// WebGL 2 limits, runtime-compiled GLSL
    WebGl,
    /// Vulkan via ash, precompiled SPIR-V (native only)
    Vulkan,
    /// Direct3D12, precompiled bytecode
    DirectX12,
}

impl GraphicsApi {
    /// Every supported variant
    pub const ALL: [GraphicsApi; 4] = [
        GraphicsApi::OpenGl,
        GraphicsApi::WebGl,
        GraphicsApi::Vulkan,
        GraphicsApi::DirectX12,
    ];

    /// File extension appended to shader base paths stored in compiled scenes
    pub fn shader_extension(&self) -> &'static str {
        match self {
            GraphicsApi::OpenGl | GraphicsApi::WebGl => ".glsl",
            GraphicsApi::Vulkan => ".spv",
            GraphicsApi::DirectX12 => ".cso",
        }
    }

    /// Whether shaders are compiled from text at runtime rather than loaded as bytecode
    pub fn compiles_source(&self) -> bool {
        matches!(self, GraphicsApi::OpenGl | GraphicsApi::WebGl)
    }
}

impl fmt::Display for GraphicsApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GraphicsApi::OpenGl => "OpenGL",
            GraphicsApi::WebGl => "WebGL",
            GraphicsApi::Vulkan => "Vulkan",
            GraphicsApi::DirectX12 => "DirectX12",
        };
        f.write_str(name)
    }
}

/// Error returned when parsing an unknown API name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown graphics API '{0}' (expected opengl, webgl, vulkan or directx12)")]
pub struct UnknownGraphicsApi(pub String);

impl FromStr for GraphicsApi {
    type Err = UnknownGraphicsApi;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opengl" | "gl" => Ok(GraphicsApi::OpenGl),
            "webgl" => Ok(GraphicsApi::WebGl),
            "vulkan" | "vk" => Ok(GraphicsApi::Vulkan),
            "directx12" | "d3d12" | "dx12" => Ok(GraphicsApi::DirectX12),
            _ => Err(UnknownGraphicsApi(s.to_string())),
        }
    }
}

/// What the loader does with scene tables that exceed the fixed format capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapacityPolicy {
    /// Clamp counts to the table size and log a warning
    #[default]
    Truncate,
    /// Refuse to load the file
    Reject,
}

/// Configuration for initializing the renderer
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Which graphics API to drive
    pub graphics_api: GraphicsApi,
    /// Enable vsync
    pub vsync: bool,
    /// Enable API validation layers where available
    pub validation: bool,
    /// Vertex bytecode for the fixed Vulkan pipeline
    pub vertex_shader_path: PathBuf,
    /// Fragment bytecode for the fixed Vulkan pipeline
    pub fragment_shader_path: PathBuf,
    /// Handling of over-capacity scene tables
    pub capacity_policy: CapacityPolicy,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            title: "Scene Renderer".to_string(),
            width: 800,
            height: 600,
            graphics_api: GraphicsApi::OpenGl,
            vsync: true,
            validation: false,
            vertex_shader_path: PathBuf::from("shaders/unlit.vxs.spv"),
            fragment_shader_path: PathBuf::from("shaders/unlit.pxs.spv"),
            capacity_policy: CapacityPolicy::Truncate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::opengl(GraphicsApi::OpenGl, ".glsl")]
    #[case::webgl(GraphicsApi::WebGl, ".glsl")]
    #[case::vulkan(GraphicsApi::Vulkan, ".spv")]
    #[case::directx12(GraphicsApi::DirectX12, ".cso")]
    fn shader_extension_per_api(#[case] api: GraphicsApi, #[case] ext: &str) {
        assert_eq!(api.shader_extension(), ext);
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for api in GraphicsApi::ALL {
            let parsed: GraphicsApi = api.to_string().parse().unwrap();
            assert_eq!(parsed, api);
        }
    }

    #[rstest]
    #[case::short_vulkan("vk", GraphicsApi::Vulkan)]
    #[case::d3d12("D3D12", GraphicsApi::DirectX12)]
    #[case::gl("gl", GraphicsApi::OpenGl)]
    fn aliases_parse(#[case] name: &str, #[case] expected: GraphicsApi) {
        assert_eq!(name.parse::<GraphicsApi>().unwrap(), expected);
    }

    #[test]
    fn unknown_api_is_rejected() {
        let err = "metal".parse::<GraphicsApi>().unwrap_err();
        assert_eq!(err, UnknownGraphicsApi("metal".to_string()));
    }

    #[test]
    fn default_config() {
        let config = RendererConfig::default();
        assert_eq!((config.width, config.height), (800, 600));
        assert_eq!(config.capacity_policy, CapacityPolicy::Truncate);
        assert!(config.vertex_shader_path.ends_with("unlit.vxs.spv"));
    }
}
