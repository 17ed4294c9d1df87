//! Skybox: a cubemap drawn behind all geometry

use crate::backend::{BackendResult, RendererBackend, TextureId};
use crate::resources::{Material, Mesh};

/// Environment background owned by a camera
#[derive(Debug)]
pub struct Skybox {
    material: Option<Material>,
    texture: TextureId,
    mesh: Mesh,
}

impl Default for Skybox {
    fn default() -> Self {
        Self::new()
    }
}

impl Skybox {
    pub fn new() -> Self {
        Self {
            material: None,
            texture: TextureId::NONE,
            mesh: Mesh::cube(),
        }
    }

    pub fn set_material(&mut self, material: Material) {
        self.material = Some(material);
    }

    pub fn material(&self) -> Option<&Material> {
        self.material.as_ref()
    }

    pub fn set_texture(&mut self, texture: TextureId) {
        self.texture = texture;
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Upload the cube geometry
    pub fn init(&mut self, backend: &dyn RendererBackend) -> BackendResult<()> {
        self.mesh.configure(backend)
    }

    /// Drawable only with a configured cube, a valid material and a real texture
    pub fn is_renderable(&self) -> bool {
        self.mesh.is_configured()
            && !self.texture.is_none()
            && self.material.as_ref().is_some_and(Material::is_valid)
    }

    /// Draw through the backend's relaxed-depth skybox path
    pub fn render(&mut self, backend: &mut dyn RendererBackend) -> BackendResult<()> {
        let texture = self.texture;
        match self.material.as_mut() {
            Some(material) => {
                material.use_program()?;
                backend.render_skybox(&self.mesh, material.program_mut(), texture)
            }
            None => Err(crate::backend::BackendError::NoProgramBound),
        }
    }

    /// Return the cubemap to the backend
    pub fn release(&mut self, backend: &mut dyn RendererBackend) {
        if !self.texture.is_none() {
            backend.delete_cubemap_texture(self.texture);
            self.texture = TextureId::NONE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_skybox_holds_the_cube() {
        let skybox = Skybox::default();
        assert_eq!(skybox.mesh().vertex_count(), Mesh::cube().vertex_count());
        assert!(skybox.texture().is_none());
        assert!(skybox.material().is_none());
        assert!(!skybox.is_renderable());
    }
}
