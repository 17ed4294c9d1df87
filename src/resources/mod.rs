//! Resource management
//!
//! API-agnostic meshes, materials, shader assets and textures. All GPU work is
//! delegated to the active backend through the factories.

mod material;
mod mesh;
mod shader;
mod texture;

pub use material::*;
pub use mesh::*;
pub use shader::*;
pub use texture::*;
