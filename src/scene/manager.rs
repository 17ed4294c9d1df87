//! Named scene registry with a single active scene

use super::{LoadError, Scene, SceneLoader};
use crate::backend::RendererBackend;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Registry of compiled scene files; loading one replaces the active scene
#[derive(Debug, Default)]
pub struct SceneManager {
    registry: HashMap<String, PathBuf>,
    active: Option<(String, Scene)>,
    loader: SceneLoader,
}

impl SceneManager {
    pub fn new(loader: SceneLoader) -> Self {
        Self {
            registry: HashMap::new(),
            active: None,
            loader,
        }
    }

    pub fn add_scene(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.registry.insert(name.into(), path.into());
    }

    pub fn scene_path(&self, name: &str) -> Option<&Path> {
        self.registry.get(name).map(PathBuf::as_path)
    }

    /// Registered names in sorted order
    pub fn scene_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.registry.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Load a registered scene and make it active.
    ///
    /// The previous scene is released and dropped first. On error no scene is active.
    pub fn load_scene(
        &mut self,
        name: &str,
        backend: &mut dyn RendererBackend,
    ) -> Result<&mut Scene, LoadError> {
        let path = self
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::UnknownScene(name.to_string()))?;

        self.unload(backend);
        let scene = self.loader.load(&path, backend)?;
        let (_, scene) = self.active.insert((name.to_string(), scene));
        Ok(scene)
    }

    /// Release and drop the active scene
    pub fn unload(&mut self, backend: &mut dyn RendererBackend) {
        if let Some((name, mut scene)) = self.active.take() {
            log::debug!("Unloading scene {name}");
            scene.release(backend);
        }
    }

    pub fn active_scene(&self) -> Option<&Scene> {
        self.active.as_ref().map(|(_, scene)| scene)
    }

    pub fn active_scene_mut(&mut self) -> Option<&mut Scene> {
        self.active.as_mut().map(|(_, scene)| scene)
    }

    pub fn active_scene_name(&self) -> Option<&str> {
        self.active.as_ref().map(|(name, _)| name.as_str())
    }
}
