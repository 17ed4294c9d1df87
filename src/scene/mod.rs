//! Scene management
//!
//! A [`Scene`] exclusively owns its camera, game objects and lights. Scenes are
//! built from compiled scene files by the [`SceneLoader`] and swapped by the
//! [`SceneManager`].

mod camera;
pub mod format;
mod game_object;
mod light;
mod loader;
mod manager;
mod skybox;

pub use camera::*;
pub use game_object::*;
pub use light::*;
pub use loader::*;
pub use manager::*;
pub use skybox::*;

use crate::backend::RendererBackend;

/// The scene containing all renderable content
#[derive(Debug, Default)]
pub struct Scene {
    camera: Option<Camera>,
    game_objects: Vec<GameObject>,
    lights: Vec<Light>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    pub fn camera_mut(&mut self) -> Option<&mut Camera> {
        self.camera.as_mut()
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = Some(camera);
    }

    pub fn game_objects(&self) -> &[GameObject] {
        &self.game_objects
    }

    pub fn game_objects_mut(&mut self) -> &mut [GameObject] {
        &mut self.game_objects
    }

    pub fn set_game_objects(&mut self, objects: Vec<GameObject>) {
        self.game_objects = objects;
    }

    pub fn add_game_object(&mut self, object: GameObject) -> usize {
        self.game_objects.push(object);
        self.game_objects.len() - 1
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn set_lights(&mut self, lights: Vec<Light>) {
        self.lights = lights;
    }

    pub fn add_light(&mut self, light: Light) {
        self.lights.push(light);
    }

    /// Split borrow for the renderer: camera, objects and lights at once
    pub fn parts_mut(&mut self) -> (Option<&mut Camera>, &mut [GameObject], &[Light]) {
        (self.camera.as_mut(), &mut self.game_objects, &self.lights)
    }

    /// Return backend-owned textures before the scene is dropped
    pub fn release(&mut self, backend: &mut dyn RendererBackend) {
        if let Some(skybox) = self.camera.as_mut().and_then(Camera::skybox_mut) {
            skybox.release(backend);
        }
    }
}
