//! Mesh data structures and generation

use crate::backend::factory::MeshBufferFactory;
use crate::backend::{BackendError, BackendResult, MeshBuffer, MeshHandle, RendererBackend};
use std::fmt;

/// CPU-side triangle list geometry plus its GPU buffer.
///
/// Positions and normals are flat `xyz` float arrays of equal length.
/// `configure` must succeed before the mesh can be drawn.
#[derive(Default)]
pub struct Mesh {
    vertices: Vec<f32>,
    normals: Vec<f32>,
    buffer: Option<Box<dyn MeshBuffer>>,
}

impl Mesh {
    pub fn new(vertices: Vec<f32>, normals: Vec<f32>) -> Self {
        Self {
            vertices,
            normals,
            buffer: None,
        }
    }

    /// Unit cube as 36 inward-visible vertices, used for skyboxes
    pub fn cube() -> Self {
        #[rustfmt::skip]
        const FACES: [[f32; 3]; 36] = [
            // -Z
            [-1.0,  1.0, -1.0], [-1.0, -1.0, -1.0], [ 1.0, -1.0, -1.0],
            [ 1.0, -1.0, -1.0], [ 1.0,  1.0, -1.0], [-1.0,  1.0, -1.0],
            // -X
            [-1.0, -1.0,  1.0], [-1.0, -1.0, -1.0], [-1.0,  1.0, -1.0],
            [-1.0,  1.0, -1.0], [-1.0,  1.0,  1.0], [-1.0, -1.0,  1.0],
            // +X
            [ 1.0, -1.0, -1.0], [ 1.0, -1.0,  1.0], [ 1.0,  1.0,  1.0],
            [ 1.0,  1.0,  1.0], [ 1.0,  1.0, -1.0], [ 1.0, -1.0, -1.0],
            // +Z
            [-1.0, -1.0,  1.0], [-1.0,  1.0,  1.0], [ 1.0,  1.0,  1.0],
            [ 1.0,  1.0,  1.0], [ 1.0, -1.0,  1.0], [-1.0, -1.0,  1.0],
            // +Y
            [-1.0,  1.0, -1.0], [ 1.0,  1.0, -1.0], [ 1.0,  1.0,  1.0],
            [ 1.0,  1.0,  1.0], [-1.0,  1.0,  1.0], [-1.0,  1.0, -1.0],
            // -Y
            [-1.0, -1.0, -1.0], [-1.0, -1.0,  1.0], [ 1.0, -1.0, -1.0],
            [ 1.0, -1.0, -1.0], [-1.0, -1.0,  1.0], [ 1.0, -1.0,  1.0],
        ];

        let vertices: Vec<f32> = FACES.iter().flatten().copied().collect();
        // Each face is the axis all three corners share; normals point inward
        let normals = FACES
            .chunks(3)
            .flat_map(|tri| {
                let axis = (0..3)
                    .find(|&a| tri[0][a] == tri[1][a] && tri[1][a] == tri[2][a])
                    .unwrap_or(0);
                let mut n = [0.0f32; 3];
                n[axis] = -tri[0][axis];
                [n, n, n]
            })
            .flatten()
            .collect();
        Self::new(vertices, normals)
    }

    pub fn vertices(&self) -> &[f32] {
        &self.vertices
    }

    pub fn normals(&self) -> &[f32] {
        &self.normals
    }

    /// Replace the positions; the GPU buffer must be reconfigured
    pub fn set_vertices(&mut self, vertices: Vec<f32>) {
        self.vertices = vertices;
        self.buffer = None;
    }

    /// Replace the normals; the GPU buffer must be reconfigured
    pub fn set_normals(&mut self, normals: Vec<f32>) {
        self.normals = normals;
        self.buffer = None;
    }

    /// Number of vertices (not floats)
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.vertex_count() / 3
    }

    /// Check the layout invariants a GPU upload relies on
    pub fn validate(&self) -> BackendResult<()> {
        if self.vertices.is_empty() {
            return Err(BackendError::BufferCreationFailed("mesh has no vertices".into()));
        }
        if self.vertices.len() % 3 != 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "vertex array length {} is not a multiple of 3",
                self.vertices.len()
            )));
        }
        if self.vertices.len() != self.normals.len() {
            return Err(BackendError::BufferCreationFailed(format!(
                "{} vertex floats but {} normal floats",
                self.vertices.len(),
                self.normals.len()
            )));
        }
        Ok(())
    }

    /// Create the GPU buffers on the backend's device
    pub fn configure(&mut self, backend: &dyn RendererBackend) -> BackendResult<()> {
        self.validate()?;
        let mut buffer =
            MeshBufferFactory::create(backend.graphics_api(), &backend.device_context())?;
        buffer.create_buffers(&self.vertices, &self.normals)?;
        self.buffer = Some(buffer);
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn bind(&mut self) {
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.bind();
        }
    }

    pub fn unbind(&mut self) {
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.unbind();
        }
    }

    pub fn is_bound(&self) -> bool {
        self.buffer.as_ref().is_some_and(|b| b.is_bound())
    }

    /// Native handle, `MeshHandle::None` until configured
    pub fn handle(&self) -> MeshHandle {
        self.buffer
            .as_ref()
            .map(|b| b.handle())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mesh")
            .field("vertex_count", &self.vertex_count())
            .field("configured", &self.is_configured())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_layout() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertex_count(), 36);
        assert_eq!(cube.triangle_count(), 12);
        assert_eq!(cube.vertices().len(), cube.normals().len());
        assert!(cube.validate().is_ok());
    }

    #[test]
    fn cube_normals_are_unit_axes() {
        let cube = Mesh::cube();
        for n in cube.normals().chunks(3) {
            let len: f32 = n.iter().map(|c| c * c).sum();
            assert_eq!(len, 1.0);
        }
    }

    #[test]
    fn validation_rejects_bad_layouts() {
        assert!(Mesh::new(vec![], vec![]).validate().is_err());
        assert!(Mesh::new(vec![0.0; 4], vec![0.0; 4]).validate().is_err());
        assert!(Mesh::new(vec![0.0; 9], vec![0.0; 6]).validate().is_err());
    }

    #[test]
    fn replacing_vertices_drops_configuration() {
        let mut mesh = Mesh::new(vec![0.0; 9], vec![0.0; 9]);
        mesh.set_vertices(vec![1.0; 9]);
        assert!(!mesh.is_configured());
        assert_eq!(mesh.handle().vertex_count(), 0);
    }
}
