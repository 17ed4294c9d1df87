//! Material system

use crate::backend::factory::ShaderProgramFactory;
use crate::backend::{
    BackendError, BackendResult, MaterialUniform, RendererBackend, ShaderProgram, LIGHT_BLOCK,
    LIGHT_SLOT, MATERIAL_BLOCK, MATERIAL_SLOT,
};
use crate::resources::ShaderAsset;
use crate::scene::{Light, LightType};
use std::fmt;

/// Shading state for one mesh: a vertex/fragment pair, the program linking
/// them, and a base color.
pub struct Material {
    base_color: [f32; 4],
    vertex_shader: Option<ShaderAsset>,
    fragment_shader: Option<ShaderAsset>,
    program: Box<dyn ShaderProgram>,
    initialized: bool,
}

impl Material {
    /// Create a material whose program targets the backend's API and device
    pub fn new(backend: &dyn RendererBackend) -> BackendResult<Self> {
        let program =
            ShaderProgramFactory::create(backend.graphics_api(), &backend.device_context())?;
        Ok(Self::with_program(program))
    }

    pub fn with_program(program: Box<dyn ShaderProgram>) -> Self {
        Self {
            base_color: [1.0, 1.0, 1.0, 1.0],
            vertex_shader: None,
            fragment_shader: None,
            program,
            initialized: false,
        }
    }

    pub fn set_vertex_shader(&mut self, shader: ShaderAsset) {
        self.vertex_shader = Some(shader);
        self.initialized = false;
    }

    pub fn set_fragment_shader(&mut self, shader: ShaderAsset) {
        self.fragment_shader = Some(shader);
        self.initialized = false;
    }

    pub fn vertex_shader(&self) -> Option<&ShaderAsset> {
        self.vertex_shader.as_ref()
    }

    pub fn fragment_shader(&self) -> Option<&ShaderAsset> {
        self.fragment_shader.as_ref()
    }

    pub fn base_color(&self) -> [f32; 4] {
        self.base_color
    }

    /// Set the base color; uploaded to slot 1 immediately once initialized
    pub fn set_base_color(&mut self, color: [f32; 4]) -> BackendResult<()> {
        self.base_color = color;
        if self.initialized {
            self.upload_base_color()?;
        }
        Ok(())
    }

    /// Compile both shaders, attach and link them, then upload the base color.
    ///
    /// On error the material stays invalid and must not be drawn.
    pub fn init(&mut self) -> BackendResult<()> {
        self.initialized = false;

        let vertex = self
            .vertex_shader
            .as_mut()
            .ok_or_else(|| BackendError::ProgramLinkFailed("material has no vertex shader".into()))?;
        vertex.load()?;

        let fragment = self.fragment_shader.as_mut().ok_or_else(|| {
            BackendError::ProgramLinkFailed("material has no fragment shader".into())
        })?;
        fragment.load()?;

        self.program.detach_shaders();
        if let (Some(vertex), Some(fragment)) = (&self.vertex_shader, &self.fragment_shader) {
            self.program.attach_shader(vertex.compiled()?)?;
            self.program.attach_shader(fragment.compiled()?)?;
        }
        self.program.link()?;

        self.upload_base_color()?;
        self.initialized = true;
        Ok(())
    }

    /// True only after a successful `init` with a valid linked program
    pub fn is_valid(&self) -> bool {
        self.initialized && self.program.is_valid()
    }

    /// Make the program current and upload this material's base color.
    ///
    /// The color goes out on every use because slot 1 may be a buffer shared
    /// between programs (the Direct3D12 constant buffers).
    pub fn use_program(&mut self) -> BackendResult<()> {
        self.program.use_program();
        self.upload_base_color()
    }

    /// Upload a directional light to slot 2. Other light types are not shaded.
    pub fn apply_light(&mut self, light: &Light) -> BackendResult<()> {
        if light.light_type != LightType::Directional {
            log::debug!("Skipping {:?} light, only directional lights are shaded", light.light_type);
            return Ok(());
        }
        let uniform = light.to_uniform();
        self.program
            .set_uniform_buffer(LIGHT_BLOCK, LIGHT_SLOT, bytemuck::bytes_of(&uniform))
    }

    pub fn program(&self) -> &dyn ShaderProgram {
        self.program.as_ref()
    }

    pub fn program_mut(&mut self) -> &mut dyn ShaderProgram {
        self.program.as_mut()
    }

    fn upload_base_color(&mut self) -> BackendResult<()> {
        let uniform = MaterialUniform {
            color: self.base_color,
        };
        self.program
            .set_uniform_buffer(MATERIAL_BLOCK, MATERIAL_SLOT, bytemuck::bytes_of(&uniform))
    }
}

impl fmt::Debug for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Material")
            .field("base_color", &self.base_color)
            .field("vertex_shader", &self.vertex_shader)
            .field("fragment_shader", &self.fragment_shader)
            .field("valid", &self.is_valid())
            .finish()
    }
}
