//! Shader assets on disk

use crate::backend::factory::ShaderCompilerFactory;
use crate::backend::{
    BackendError, BackendResult, CompiledShader, RendererBackend, ShaderCompiler, ShaderStage,
};
use std::fmt;
use std::path::{Path, PathBuf};

/// A shader file plus the compiler of the active API.
///
/// The native handle exists only between `load` and `unload` (or drop).
pub struct ShaderAsset {
    path: PathBuf,
    stage: ShaderStage,
    compiler: Box<dyn ShaderCompiler>,
    compiled: Option<CompiledShader>,
}

impl ShaderAsset {
    pub fn new(
        path: impl Into<PathBuf>,
        stage: ShaderStage,
        backend: &dyn RendererBackend,
    ) -> BackendResult<Self> {
        let compiler =
            ShaderCompilerFactory::create(backend.graphics_api(), &backend.device_context())?;
        Ok(Self::with_compiler(path, stage, compiler))
    }

    pub fn with_compiler(
        path: impl Into<PathBuf>,
        stage: ShaderStage,
        compiler: Box<dyn ShaderCompiler>,
    ) -> Self {
        Self {
            path: path.into(),
            stage,
            compiler,
            compiled: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Compile the file. Reloading replaces the previous handle.
    pub fn load(&mut self) -> BackendResult<()> {
        self.compiled = None;
        let compiled = self.compiler.compile(&self.path, self.stage)?;
        log::debug!("Compiled {} shader {}", self.stage, self.path.display());
        self.compiled = Some(compiled);
        Ok(())
    }

    pub fn unload(&mut self) {
        self.compiled = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.compiled.is_some()
    }

    pub fn compiled(&self) -> BackendResult<&CompiledShader> {
        self.compiled.as_ref().ok_or_else(|| {
            BackendError::compile(&self.path, "shader has not been loaded")
        })
    }
}

impl fmt::Debug for ShaderAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderAsset")
            .field("path", &self.path)
            .field("stage", &self.stage)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
