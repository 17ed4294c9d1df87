//! Backend abstraction layer
//!
//! Provides the common traits every per-API backend implements, the factories
//! that pick a concrete type from a [`GraphicsApi`](crate::GraphicsApi) at
//! runtime, and the backends themselves.

pub mod dummy;
pub mod factory;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

// Vulkan backend is only available on native platforms
#[cfg(not(target_arch = "wasm32"))]
pub mod vulkan;

pub use traits::*;
pub use types::*;
