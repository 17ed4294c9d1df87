use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::WgpuContext;
use crate::backend::traits::*;
use crate::backend::types::*;

/// Separate position and normal vertex buffers (slots 0 and 1)
pub struct WgpuMeshBuffer {
    context: WgpuContext,
    buffers: Option<(Arc<wgpu::Buffer>, Arc<wgpu::Buffer>)>,
    vertex_count: u32,
    bound: bool,
}

impl WgpuMeshBuffer {
    pub fn new(context: WgpuContext) -> Self {
        Self {
            context,
            buffers: None,
            vertex_count: 0,
            bound: false,
        }
    }

    fn upload(&self, label: &str, data: &[f32]) -> Arc<wgpu::Buffer> {
        Arc::new(
            self.context
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(data),
                    usage: wgpu::BufferUsages::VERTEX,
                }),
        )
    }
}

impl MeshBuffer for WgpuMeshBuffer {
    fn create_buffers(&mut self, vertices: &[f32], normals: &[f32]) -> BackendResult<()> {
        if vertices.is_empty() || vertices.len() % 3 != 0 || vertices.len() != normals.len() {
            return Err(BackendError::BufferCreationFailed(format!(
                "{} vertex floats, {} normal floats",
                vertices.len(),
                normals.len()
            )));
        }

        let positions = self.upload("Mesh Positions", vertices);
        let normals = self.upload("Mesh Normals", normals);
        self.buffers = Some((positions, normals));
        self.vertex_count = (vertices.len() / 3) as u32;
        self.bound = false;
        Ok(())
    }

    fn bind(&mut self) {
        self.bound = self.buffers.is_some();
    }

    fn unbind(&mut self) {
        self.bound = false;
    }

    fn is_bound(&self) -> bool {
        self.bound
    }

    fn handle(&self) -> MeshHandle {
        match &self.buffers {
            Some((positions, normals)) => MeshHandle::Wgpu {
                positions: positions.clone(),
                normals: normals.clone(),
                vertex_count: self.vertex_count,
            },
            None => MeshHandle::None,
        }
    }
}
