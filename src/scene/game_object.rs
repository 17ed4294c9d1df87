//! Game objects and their renderer component

use crate::resources::{Material, Mesh};

/// Holds the material used to draw a game object's mesh
#[derive(Debug, Default)]
pub struct MeshRenderer {
    material: Option<Material>,
}

impl MeshRenderer {
    pub fn new(material: Material) -> Self {
        Self {
            material: Some(material),
        }
    }

    pub fn material(&self) -> Option<&Material> {
        self.material.as_ref()
    }

    pub fn material_mut(&mut self) -> Option<&mut Material> {
        self.material.as_mut()
    }

    pub fn set_material(&mut self, material: Material) {
        self.material = Some(material);
    }
}

/// A scene entry; exclusively owns its mesh and renderer
#[derive(Debug, Default)]
pub struct GameObject {
    mesh: Option<Mesh>,
    mesh_renderer: Option<MeshRenderer>,
}

impl GameObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mesh(mesh: Mesh, renderer: MeshRenderer) -> Self {
        Self {
            mesh: Some(mesh),
            mesh_renderer: Some(renderer),
        }
    }

    pub fn mesh(&self) -> Option<&Mesh> {
        self.mesh.as_ref()
    }

    pub fn mesh_mut(&mut self) -> Option<&mut Mesh> {
        self.mesh.as_mut()
    }

    pub fn set_mesh(&mut self, mesh: Mesh) {
        self.mesh = Some(mesh);
    }

    pub fn mesh_renderer(&self) -> Option<&MeshRenderer> {
        self.mesh_renderer.as_ref()
    }

    pub fn mesh_renderer_mut(&mut self) -> Option<&mut MeshRenderer> {
        self.mesh_renderer.as_mut()
    }

    pub fn set_mesh_renderer(&mut self, renderer: MeshRenderer) {
        self.mesh_renderer = Some(renderer);
    }

    /// Split borrow of mesh and renderer
    pub fn parts_mut(&mut self) -> (Option<&mut Mesh>, Option<&mut MeshRenderer>) {
        (self.mesh.as_mut(), self.mesh_renderer.as_mut())
    }
}
