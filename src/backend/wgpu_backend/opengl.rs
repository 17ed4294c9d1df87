//! OpenGL and WebGL backend
//!
//! Runs wgpu restricted to its GL backend. WebGL additionally asks for
//! WebGL2 downlevel limits and an ES 3.0 context.

use std::sync::Arc;

use super::{Flavor, WgpuCore};
use crate::backend::BackendResult;
use crate::GraphicsApi;

/// Renderer backend for `GraphicsApi::OpenGl` and `GraphicsApi::WebGl`
pub struct OpenGlBackend {
    core: WgpuCore,
}

impl OpenGlBackend {
    pub fn new(api: GraphicsApi, vsync: bool) -> Self {
        Self {
            core: WgpuCore::new(api, vsync, Flavor::opengl(api)),
        }
    }

    /// Async device setup, required on the web where blocking is not allowed
    pub async fn init_async(&mut self, window: Arc<winit::window::Window>) -> BackendResult<()> {
        self.core.init_async(window).await
    }
}

impl_renderer_backend!(OpenGlBackend);
