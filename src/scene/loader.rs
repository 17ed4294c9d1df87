//! Builds live scene objects from compiled scene files

use crate::backend::{BackendError, BackendResult, RendererBackend, ShaderStage};
use crate::resources::{Material, Mesh, ShaderAsset};
use crate::scene::format::{
    CompiledScene, ComponentData, FormatError, LightData, MaterialData, MeshData, SceneCameraData,
    SceneTable,
};
use crate::scene::{Camera, GameObject, Light, MeshRenderer, Scene, Skybox};
use crate::{CapacityPolicy, GraphicsApi};
use glam::{DVec3, Vec3};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that abort a whole load. Per-entry failures are logged and skipped instead.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Failed to load OBJ {path}: {reason}")]
    Obj { path: PathBuf, reason: String },
    #[error("No scene registered as '{0}'")]
    UnknownScene(String),
}

/// Reconstructs cameras, game objects and lights bound to a backend
#[derive(Debug, Clone, Default)]
pub struct SceneLoader {
    policy: CapacityPolicy,
}

impl SceneLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: CapacityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> CapacityPolicy {
        self.policy
    }

    /// Shader base path plus the API's file extension
    pub fn shader_path(base: &str, api: GraphicsApi) -> PathBuf {
        PathBuf::from(format!("{}{}", base, api.shader_extension()))
    }

    /// Load a whole scene from a compiled scene file
    pub fn load(
        &self,
        path: impl AsRef<Path>,
        backend: &mut dyn RendererBackend,
    ) -> Result<Scene, LoadError> {
        let path = path.as_ref();
        log::info!("Loading scene {}", path.display());
        let compiled = CompiledScene::read(path, self.policy)?;
        Ok(self.build_scene(&compiled, backend))
    }

    /// Load a whole scene from an in-memory compiled scene
    pub fn load_bytes(
        &self,
        bytes: &[u8],
        backend: &mut dyn RendererBackend,
    ) -> Result<Scene, LoadError> {
        let compiled = CompiledScene::decode(bytes, self.policy)?;
        Ok(self.build_scene(&compiled, backend))
    }

    pub fn load_camera(
        &self,
        path: impl AsRef<Path>,
        backend: &mut dyn RendererBackend,
    ) -> Result<Camera, LoadError> {
        let compiled = CompiledScene::read(path, self.policy)?;
        Ok(self.build_camera(&compiled.camera, backend))
    }

    pub fn load_game_objects(
        &self,
        path: impl AsRef<Path>,
        backend: &mut dyn RendererBackend,
    ) -> Result<Vec<GameObject>, LoadError> {
        let compiled = CompiledScene::read(path, self.policy)?;
        Ok(self.build_game_objects(&compiled.table, backend))
    }

    pub fn load_lights(&self, path: impl AsRef<Path>) -> Result<Vec<Light>, LoadError> {
        let compiled = CompiledScene::read(path, self.policy)?;
        Ok(Self::build_lights(&compiled.lights))
    }

    pub fn build_scene(&self, compiled: &CompiledScene, backend: &mut dyn RendererBackend) -> Scene {
        let mut scene = Scene::new();
        scene.set_camera(self.build_camera(&compiled.camera, backend));
        scene.set_lights(Self::build_lights(&compiled.lights));
        scene.set_game_objects(self.build_game_objects(&compiled.table, backend));
        log::info!(
            "Scene loaded: {} game objects, {} lights",
            scene.game_objects().len(),
            scene.lights().len()
        );
        scene
    }

    /// Copy camera optics verbatim; build a skybox only when the file declares one
    pub fn build_camera(&self, data: &SceneCameraData, backend: &mut dyn RendererBackend) -> Camera {
        let mut camera = Camera::new();
        camera.set_background_color(data.background_color);
        camera.set_fov(data.fov);
        camera.set_view_rect(data.view_rect[0], data.view_rect[1]);
        camera.set_position(DVec3::from_array(data.position));

        if let Some(skybox_data) = &data.skybox {
            let material = match build_material(&skybox_data.material, backend) {
                Ok(material) => material,
                Err(e) => {
                    log::error!("Skybox material failed, skybox dropped: {e}");
                    return camera;
                }
            };

            let faces: Vec<PathBuf> = skybox_data
                .cube_map_textures
                .iter()
                .map(PathBuf::from)
                .collect();
            let texture = backend.create_cubemap_texture(&faces);
            if texture.is_none() {
                log::error!("Skybox cubemap failed to load, skybox will not be drawn");
            }

            let mut skybox = Skybox::new();
            skybox.set_material(material);
            skybox.set_texture(texture);
            match skybox.init(backend) {
                Ok(()) => camera.set_skybox(skybox),
                Err(e) => {
                    log::error!("Skybox mesh failed, skybox dropped: {e}");
                    skybox.release(backend);
                }
            }
        }

        camera
    }

    /// Build game objects; a bad entry is logged and never aborts the load
    pub fn build_game_objects(
        &self,
        table: &SceneTable,
        backend: &mut dyn RendererBackend,
    ) -> Vec<GameObject> {
        match table {
            SceneTable::Meshes(meshes) => meshes
                .iter()
                .filter_map(|entry| match build_mesh_entry(entry, backend) {
                    Ok(object) => Some(object),
                    Err(e) => {
                        log::error!("Skipping mesh {}: {e}", entry.obj_path);
                        None
                    }
                })
                .collect(),
            SceneTable::GameObjects(objects) => objects
                .iter()
                .map(|data| {
                    let mut object = GameObject::new();
                    for component in &data.components {
                        match component {
                            ComponentData::MeshRenderer(renderer) => {
                                match build_renderable(
                                    &renderer.obj_path,
                                    renderer.shade_smooth,
                                    &renderer.material,
                                    backend,
                                ) {
                                    Ok((mesh, mesh_renderer)) => {
                                        object.set_mesh(mesh);
                                        object.set_mesh_renderer(mesh_renderer);
                                    }
                                    Err(e) => {
                                        log::error!("Failed to load mesh {}: {e}", renderer.obj_path)
                                    }
                                }
                            }
                            ComponentData::SpriteRenderer(sprite) => {
                                log::warn!(
                                    "Sprite renderer components are not supported, skipping {}",
                                    sprite.texture_path
                                );
                            }
                        }
                    }
                    object
                })
                .collect(),
        }
    }

    /// Copy the light table 1:1
    pub fn build_lights(lights: &[LightData]) -> Vec<Light> {
        lights
            .iter()
            .map(|data| Light::new(data.light_type, Vec3::from_array(data.direction)))
            .collect()
    }
}

fn build_mesh_entry(
    entry: &MeshData,
    backend: &mut dyn RendererBackend,
) -> Result<GameObject, LoadError> {
    let (mesh, renderer) = build_renderable(&entry.obj_path, false, &entry.material, backend)?;
    Ok(GameObject::with_mesh(mesh, renderer))
}

fn build_renderable(
    obj_path: &str,
    shade_smooth: bool,
    material: &MaterialData,
    backend: &mut dyn RendererBackend,
) -> Result<(Mesh, MeshRenderer), LoadError> {
    let mut mesh = load_obj_mesh(obj_path, shade_smooth)?;
    mesh.configure(backend)?;
    let material = build_material(material, backend)?;
    Ok((mesh, MeshRenderer::new(material)))
}

fn build_material(data: &MaterialData, backend: &dyn RendererBackend) -> BackendResult<Material> {
    let api = backend.graphics_api();
    let vertex = ShaderAsset::new(
        SceneLoader::shader_path(&data.vertex_shader_path, api),
        ShaderStage::Vertex,
        backend,
    )?;
    let fragment = ShaderAsset::new(
        SceneLoader::shader_path(&data.fragment_shader_path, api),
        ShaderStage::Fragment,
        backend,
    )?;

    let mut material = Material::new(backend)?;
    material.set_vertex_shader(vertex);
    material.set_fragment_shader(fragment);
    material.set_base_color(data.color)?;
    material.init()?;
    Ok(material)
}

/// Parse an OBJ file into an unconfigured triangle-list mesh.
///
/// Normals come from the file when `shade_smooth` is set and the file has
/// them; otherwise every triangle gets its flat face normal.
pub fn load_obj_mesh(path: impl AsRef<Path>, shade_smooth: bool) -> Result<Mesh, LoadError> {
    let path = path.as_ref();
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .map_err(|e| LoadError::Obj {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut vertices = Vec::new();
    let mut file_normals = Vec::new();
    let mut has_file_normals = true;

    for model in &models {
        let mesh = &model.mesh;
        let with_normals = mesh.normals.len() == mesh.positions.len();
        has_file_normals &= with_normals;
        for &index in &mesh.indices {
            let i = 3 * index as usize;
            let position = mesh.positions.get(i..i + 3).ok_or_else(|| LoadError::Obj {
                path: path.to_path_buf(),
                reason: format!("vertex index {index} out of range"),
            })?;
            vertices.extend_from_slice(position);
            if with_normals {
                file_normals.extend_from_slice(&mesh.normals[i..i + 3]);
            }
        }
    }

    if vertices.is_empty() {
        return Err(LoadError::Obj {
            path: path.to_path_buf(),
            reason: "no triangles".into(),
        });
    }

    let normals = if shade_smooth && has_file_normals {
        file_normals
    } else {
        if shade_smooth {
            log::debug!("{} has no normals, using flat shading", path.display());
        }
        flat_normals(&vertices)
    };

    Ok(Mesh::new(vertices, normals))
}

/// One normalized face normal per triangle, repeated for its three vertices
pub fn flat_normals(vertices: &[f32]) -> Vec<f32> {
    let mut normals = Vec::with_capacity(vertices.len());
    for triangle in vertices.chunks_exact(9) {
        let v0 = Vec3::from_slice(&triangle[0..3]);
        let v1 = Vec3::from_slice(&triangle[3..6]);
        let v2 = Vec3::from_slice(&triangle[6..9]);
        let normal = (v1 - v0).cross(v2 - v0);
        let length = normal.length();
        let normal = if length > 0.0 { normal / length } else { normal };
        for _ in 0..3 {
            normals.extend_from_slice(&normal.to_array());
        }
    }
    normals
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE_WITH_NORMALS: &str = "\
v 0 0 0
v 1 0 0
v 0 1 0
vn 0.6 0 0.8
f 1//1 2//1 3//1
";

    const QUAD: &str = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
f 1 2 3 4
";

    fn write_obj(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("mesh.obj");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn shader_paths_get_api_extension() {
        assert_eq!(
            SceneLoader::shader_path("shaders/unlit", GraphicsApi::Vulkan),
            PathBuf::from("shaders/unlit.spv")
        );
        assert_eq!(
            SceneLoader::shader_path("shaders/unlit", GraphicsApi::WebGl),
            PathBuf::from("shaders/unlit.glsl")
        );
    }

    #[test]
    fn quads_are_triangulated_with_flat_normals() {
        let dir = tempfile::tempdir().unwrap();
        let mesh = load_obj_mesh(write_obj(dir.path(), QUAD), false).unwrap();
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(mesh.vertices().len(), mesh.normals().len());
        for n in mesh.normals().chunks(3) {
            assert_eq!(n, [0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn smooth_shading_uses_file_normals() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_obj(dir.path(), TRIANGLE_WITH_NORMALS);
        let smooth = load_obj_mesh(&path, true).unwrap();
        assert_eq!(&smooth.normals()[..3], &[0.6, 0.0, 0.8]);

        let flat = load_obj_mesh(&path, false).unwrap();
        assert_eq!(&flat.normals()[..3], &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn smooth_shading_without_file_normals_falls_back_to_flat() {
        let dir = tempfile::tempdir().unwrap();
        let mesh = load_obj_mesh(write_obj(dir.path(), QUAD), true).unwrap();
        assert_eq!(&mesh.normals()[..3], &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn missing_obj_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_obj_mesh(dir.path().join("nope.obj"), false),
            Err(LoadError::Obj { .. })
        ));
    }

    #[test]
    fn degenerate_triangles_keep_zero_normals() {
        let normals = flat_normals(&[0.0; 9]);
        assert_eq!(normals, vec![0.0; 9]);
    }
}
