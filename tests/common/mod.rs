//! Shared fixtures for the integration tests.
//!
//! Everything is written into a temporary directory: OBJ meshes, shader files
//! in the format each API expects, cubemap faces and compiled scenes. No GPU
//! is needed; tests drive the headless `DummyBackend`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use scene_renderer::backend::dummy::{DummyBackend, HeadlessRecorder};
use scene_renderer::backend::DeviceContext;
use scene_renderer::scene::format::{
    CompiledScene, LightData, MaterialData, MeshData, SceneCameraData, SceneTable, SkyboxData,
};
use scene_renderer::scene::LightType;
use scene_renderer::{GraphicsApi, Renderer};
use tempfile::TempDir;

/// One triangle in the XY plane
pub const TRIANGLE_OBJ: &str = "\
v 0 0 0
v 1 0 0
v 0 1 0
f 1 2 3
";

/// Unit quad, triangulated into two triangles by the loader
pub const QUAD_OBJ: &str = "\
v -1 -1 0
v 1 -1 0
v 1 1 0
v -1 1 0
f 1 2 3 4
";

pub const SHADER_BASE: &str = "unlit";

/// Temporary asset directory
pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn path_string(&self, name: &str) -> String {
        self.file(name).to_string_lossy().into_owned()
    }

    pub fn write(&self, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
        let path = self.file(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn write_obj(&self, name: &str, contents: &str) -> String {
        self.write(name, contents);
        self.path_string(name)
    }

    /// Vertex and fragment shaders for every API under `<base>.vxs` / `<base>.pxs`
    pub fn write_shaders(&self, base: &str) -> (String, String) {
        for stage in ["vxs", "pxs"] {
            self.write(&format!("{base}.{stage}.glsl"), "#version 450\nvoid main() {}\n");
            // SPIR-V magic plus one word
            let bytecode = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];
            self.write(&format!("{base}.{stage}.spv"), bytecode);
            self.write(&format!("{base}.{stage}.cso"), bytecode);
        }
        (
            self.path_string(&format!("{base}.vxs")),
            self.path_string(&format!("{base}.pxs")),
        )
    }

    /// Material whose shaders exist for every API
    pub fn material(&self, color: [f32; 4]) -> MaterialData {
        let (vertex, fragment) = self.write_shaders(SHADER_BASE);
        MaterialData {
            vertex_shader_path: vertex,
            fragment_shader_path: fragment,
            color,
        }
    }

    /// Six solid 4x4 PNG faces
    pub fn write_cubemap_faces(&self) -> [String; 6] {
        std::array::from_fn(|i| {
            let name = format!("face{i}.png");
            let shade = (i * 40) as u8;
            image::RgbaImage::from_pixel(4, 4, image::Rgba([shade, shade, 255, 255]))
                .save(self.file(&name))
                .unwrap();
            self.path_string(&name)
        })
    }

    pub fn skybox(&self) -> SkyboxData {
        SkyboxData {
            cube_map_textures: self.write_cubemap_faces(),
            material: self.material([1.0; 4]),
        }
    }

    /// Write a compiled scene and return its path
    pub fn write_scene(&self, name: &str, scene: &CompiledScene) -> PathBuf {
        let path = self.file(name);
        scene.write(&path).unwrap();
        path
    }
}

/// Camera looking at the origin with a 45 degree field of view
pub fn camera_45() -> SceneCameraData {
    SceneCameraData {
        background_color: [0.1, 0.2, 0.3, 1.0],
        fov: 45.0,
        view_rect: [800.0, 600.0],
        position: [0.0, 2.0, 5.0],
        skybox: None,
    }
}

pub fn directional_lights(count: usize) -> Vec<LightData> {
    (0..count)
        .map(|i| LightData {
            light_type: LightType::Directional,
            direction: [0.0, -1.0, i as f32],
        })
        .collect()
}

/// Scene with one triangle mesh entry and one directional light
pub fn triangle_scene(fixture: &Fixture) -> CompiledScene {
    CompiledScene {
        camera: camera_45(),
        table: SceneTable::Meshes(vec![MeshData {
            obj_path: fixture.write_obj("triangle.obj", TRIANGLE_OBJ),
            material: fixture.material([1.0, 0.0, 0.0, 1.0]),
        }]),
        lights: directional_lights(1),
    }
}

/// Headless backend that is already `Ready`
pub fn ready_backend(api: GraphicsApi) -> DummyBackend {
    DummyBackend::headless(api)
}

/// Calls recorded by the headless device behind a renderer
pub fn recorded(renderer: &Renderer) -> HeadlessRecorder {
    match renderer.backend().device_context() {
        DeviceContext::Headless(context) => context.recorded(),
        other => panic!("expected a headless device, got {other:?}"),
    }
}
