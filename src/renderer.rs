//! Per-frame driver
//!
//! The [`Renderer`] owns the active backend and walks a [`Scene`] once per
//! frame: bind camera, clear, upload lights, draw every renderable game
//! object, then the skybox. Objects that cannot be drawn are skipped with a
//! warning and never abort the frame.

use std::sync::Arc;

use raw_window_handle::RawDisplayHandle;
use thiserror::Error;

use crate::backend::factory::RendererFactory;
use crate::backend::{BackendError, BackendResult, RendererBackend};
use crate::scene::{GameObject, Light, Scene};
use crate::{GraphicsApi, RendererConfig};

/// What happened during one `render` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Game objects drawn
    pub drawn: usize,
    /// Game objects omitted from the frame
    pub skipped: usize,
    pub skybox_drawn: bool,
}

/// Why a game object was left out of a frame
#[derive(Debug, Error)]
enum SkipReason {
    #[error("no mesh")]
    NoMesh,
    #[error("mesh is not uploaded to the device")]
    MeshNotConfigured,
    #[error("no mesh renderer")]
    NoMeshRenderer,
    #[error("no material")]
    NoMaterial,
    #[error("material has no valid shader program")]
    InvalidMaterial,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub struct Renderer {
    backend: Box<dyn RendererBackend>,
    frames: u64,
}

impl Renderer {
    pub fn new(backend: Box<dyn RendererBackend>) -> Self {
        Self { backend, frames: 0 }
    }

    /// Create the backend for `api` through [`RendererFactory`]
    pub fn init_backend(api: GraphicsApi, config: &RendererConfig) -> BackendResult<Self> {
        RendererFactory::create(api, config).map(Self::new)
    }

    pub fn graphics_api(&self) -> GraphicsApi {
        self.backend.graphics_api()
    }

    pub fn backend(&self) -> &dyn RendererBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn RendererBackend {
        self.backend.as_mut()
    }

    /// Number of frames rendered so far
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    pub fn init_window_context(&mut self, display: RawDisplayHandle) -> BackendResult<()> {
        self.backend.init_window_context(display)
    }

    pub fn init(&mut self, window: Arc<winit::window::Window>) -> BackendResult<()> {
        self.backend.init(window)
    }

    pub fn resize(&mut self, width: u32, height: u32) -> BackendResult<()> {
        self.backend.resize(width, height)
    }

    /// Record one frame of `scene`.
    ///
    /// Only failures to start the frame are returned; per-object and skybox
    /// failures are logged and counted.
    pub fn render(&mut self, scene: &mut Scene) -> BackendResult<FrameStats> {
        let mut stats = FrameStats::default();
        let (camera, objects, lights) = scene.parts_mut();
        let Some(camera) = camera else {
            log::warn!("Scene has no camera, nothing to render");
            return Ok(stats);
        };

        self.backend.set_camera(camera);
        self.backend.clear()?;
        self.backend.set_lights(lights);
        let light = lights.first().copied();

        for (index, object) in objects.iter_mut().enumerate() {
            match draw_object(self.backend.as_mut(), object, light.as_ref()) {
                Ok(()) => stats.drawn += 1,
                Err(reason) => {
                    log::warn!("Skipping game object {index}: {reason}");
                    stats.skipped += 1;
                }
            }
        }

        if let Some(skybox) = camera.skybox_mut() {
            if skybox.is_renderable() {
                match skybox.render(self.backend.as_mut()) {
                    Ok(()) => stats.skybox_drawn = true,
                    Err(e) => log::warn!("Skybox not drawn: {e}"),
                }
            }
        }

        self.frames += 1;
        log::trace!(
            "Frame {}: {} drawn, {} skipped",
            self.frames,
            stats.drawn,
            stats.skipped
        );
        Ok(stats)
    }

    pub fn present(&mut self) -> BackendResult<()> {
        self.backend.present()
    }
}

fn draw_object(
    backend: &mut dyn RendererBackend,
    object: &mut GameObject,
    light: Option<&Light>,
) -> Result<(), SkipReason> {
    let (mesh, renderer) = object.parts_mut();
    let mesh = mesh.ok_or(SkipReason::NoMesh)?;
    if !mesh.is_configured() {
        return Err(SkipReason::MeshNotConfigured);
    }
    let material = renderer
        .ok_or(SkipReason::NoMeshRenderer)?
        .material_mut()
        .ok_or(SkipReason::NoMaterial)?;
    if !material.is_valid() {
        return Err(SkipReason::InvalidMaterial);
    }

    material.use_program()?;
    if let Some(light) = light {
        material.apply_light(light)?;
    }
    backend.set_uniforms(material.program_mut())?;

    mesh.bind();
    let drawn = backend.draw(mesh);
    mesh.unbind();
    drawn.map_err(SkipReason::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::resources::Mesh;
    use crate::scene::{Camera, MeshRenderer};

    fn renderer() -> Renderer {
        Renderer::new(Box::new(DummyBackend::headless(GraphicsApi::OpenGl)))
    }

    #[test]
    fn scene_without_camera_draws_nothing() {
        let mut renderer = renderer();
        let mut scene = Scene::new();
        scene.add_game_object(GameObject::new());

        let stats = renderer.render(&mut scene).unwrap();
        assert_eq!(stats, FrameStats::default());
        assert_eq!(renderer.frame_count(), 0);
    }

    #[test]
    fn incomplete_objects_are_skipped() {
        let mut renderer = renderer();
        let mut scene = Scene::new();
        scene.set_camera(Camera::new());
        scene.add_game_object(GameObject::new());

        let mut unconfigured = GameObject::new();
        unconfigured.set_mesh(Mesh::cube());
        scene.add_game_object(unconfigured);

        let mut configured = Mesh::cube();
        configured.configure(renderer.backend()).unwrap();
        scene.add_game_object(GameObject::with_mesh(configured, MeshRenderer::default()));

        let stats = renderer.render(&mut scene).unwrap();
        assert_eq!(stats.drawn, 0);
        assert_eq!(stats.skipped, 3);
        assert!(!stats.skybox_drawn);
        renderer.present().unwrap();
    }

    #[test]
    fn render_before_init_fails_at_clear() {
        let mut renderer = Renderer::new(Box::new(DummyBackend::new(GraphicsApi::Vulkan)));
        let mut scene = Scene::new();
        scene.set_camera(Camera::new());
        assert!(matches!(
            renderer.render(&mut scene),
            Err(BackendError::InvalidState { .. })
        ));
    }

    #[test]
    fn init_backend_reports_requested_api() {
        let renderer = Renderer::init_backend(GraphicsApi::DirectX12, &RendererConfig::default()).unwrap();
        assert_eq!(renderer.graphics_api(), GraphicsApi::DirectX12);
    }
}
