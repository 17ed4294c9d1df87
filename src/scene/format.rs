//! Compiled scene binary format
//!
//! A compiled scene is the fixed-size, little-endian image of a C struct with
//! natural alignment:
//!
//! ```text
//! CompiledScene {
//!     u32 magic;                 // 0x53434E45
//!     SceneCameraData camera;    // 8-byte aligned (contains doubles)
//!     u32 count;                 // meshCount or gameObjectCount
//!     MeshData meshes[32] | GameObjectData gameObjects[32];
//!     u32 lightCount;
//!     LightData lights[32];
//! }
//! ```
//!
//! The two table variants have different total sizes, which is how the reader
//! tells them apart. Counts may exceed the table capacity (the offline compiler
//! writes the authored count but only the first 32 entries); see
//! [`CapacityPolicy`] for how that is handled.

use crate::scene::LightType;
use crate::CapacityPolicy;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Format identifier in the first four bytes
pub const SCENE_MAGIC: u32 = 0x53434E45;
/// Size of every fixed string field, including the NUL terminator
pub const PATH_LEN: usize = 256;
/// Mesh / game-object table capacity
pub const MAX_TABLE_ENTRIES: usize = 32;
pub const MAX_LIGHTS: usize = 32;
pub const MAX_COMPONENTS: usize = 8;
pub const CUBEMAP_FACE_COUNT: usize = 6;

/// Sizes and offsets of every struct in the format
pub mod layout {
    use super::{CUBEMAP_FACE_COUNT, MAX_COMPONENTS, MAX_LIGHTS, MAX_TABLE_ENTRIES, PATH_LEN};

    // MaterialData
    pub const MATERIAL_VERTEX_PATH: usize = 0;
    pub const MATERIAL_FRAGMENT_PATH: usize = PATH_LEN;
    pub const MATERIAL_COLOR: usize = 2 * PATH_LEN;
    pub const MATERIAL_SIZE: usize = MATERIAL_COLOR + 16;

    // SkyboxData
    pub const SKYBOX_FACES: usize = 0;
    pub const SKYBOX_MATERIAL: usize = CUBEMAP_FACE_COUNT * PATH_LEN;
    pub const SKYBOX_SIZE: usize = SKYBOX_MATERIAL + MATERIAL_SIZE;

    // SceneCameraData
    pub const CAMERA_BACKGROUND: usize = 0;
    pub const CAMERA_FOV: usize = 16;
    pub const CAMERA_VIEW_RECT: usize = 20;
    pub const CAMERA_POSITION: usize = 32;
    pub const CAMERA_HAS_SKYBOX: usize = 56;
    pub const CAMERA_SKYBOX: usize = 60;
    pub const CAMERA_SIZE: usize = 2128;

    // LightData
    pub const LIGHT_TYPE: usize = 0;
    pub const LIGHT_DIRECTION: usize = 4;
    pub const LIGHT_SIZE: usize = 16;

    // MeshData
    pub const MESH_OBJ_PATH: usize = 0;
    pub const MESH_MATERIAL: usize = PATH_LEN;
    pub const MESH_SIZE: usize = MESH_MATERIAL + MATERIAL_SIZE;

    // MeshRendererData
    pub const MESH_RENDERER_OBJ_PATH: usize = 0;
    pub const MESH_RENDERER_SHADE_SMOOTH: usize = PATH_LEN;
    pub const MESH_RENDERER_MATERIAL: usize = PATH_LEN + 4;
    pub const MESH_RENDERER_SIZE: usize = MESH_RENDERER_MATERIAL + MATERIAL_SIZE;

    // SpriteRendererData
    pub const SPRITE_TEXTURE_PATH: usize = 0;
    pub const SPRITE_MATERIAL: usize = PATH_LEN;
    pub const SPRITE_WIDTH: usize = SPRITE_MATERIAL + MATERIAL_SIZE;
    pub const SPRITE_HEIGHT: usize = SPRITE_WIDTH + 4;
    pub const SPRITE_SIZE: usize = SPRITE_HEIGHT + 4;

    // Component: u32 tag followed by a union of the renderer structs
    pub const COMPONENT_TYPE: usize = 0;
    pub const COMPONENT_DATA: usize = 4;
    pub const COMPONENT_SIZE: usize = COMPONENT_DATA + SPRITE_SIZE;

    // GameObjectData
    pub const GAME_OBJECT_COMPONENT_COUNT: usize = 0;
    pub const GAME_OBJECT_COMPONENTS: usize = 4;
    pub const GAME_OBJECT_SIZE: usize = GAME_OBJECT_COMPONENTS + MAX_COMPONENTS * COMPONENT_SIZE;

    // CompiledScene header, shared by both variants
    pub const SCENE_MAGIC_OFFSET: usize = 0;
    pub const SCENE_CAMERA: usize = 8;
    pub const SCENE_TABLE_COUNT: usize = SCENE_CAMERA + CAMERA_SIZE;
    pub const SCENE_TABLE: usize = SCENE_TABLE_COUNT + 4;

    // Mesh-table variant
    pub const MESH_SCENE_LIGHT_COUNT: usize = SCENE_TABLE + MAX_TABLE_ENTRIES * MESH_SIZE;
    pub const MESH_SCENE_LIGHTS: usize = MESH_SCENE_LIGHT_COUNT + 4;
    pub const MESH_SCENE_SIZE: usize = MESH_SCENE_LIGHTS + MAX_LIGHTS * LIGHT_SIZE;

    // Game-object-table variant
    pub const GAME_OBJECT_SCENE_LIGHT_COUNT: usize =
        SCENE_TABLE + MAX_TABLE_ENTRIES * GAME_OBJECT_SIZE;
    pub const GAME_OBJECT_SCENE_LIGHTS: usize = GAME_OBJECT_SCENE_LIGHT_COUNT + 4;
    pub const GAME_OBJECT_SCENE_SIZE: usize = GAME_OBJECT_SCENE_LIGHTS + MAX_LIGHTS * LIGHT_SIZE;
}

use layout::*;

/// Errors produced while reading or writing compiled scenes
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Compiled scene is {actual} bytes, expected at least {expected}")]
    TooShort { expected: usize, actual: usize },
    #[error("Bad magic {found:#010x}, expected {:#010x}", SCENE_MAGIC)]
    BadMagic { found: u32 },
    #[error("Unrecognized compiled scene size: {0} bytes")]
    UnknownLayout(usize),
    #[error("String field at offset {offset} is not NUL-terminated UTF-8")]
    InvalidString { offset: usize },
    #[error("Path '{path}' does not fit in {} bytes", PATH_LEN - 1)]
    PathTooLong { path: String },
    #[error("Unknown light type {0}")]
    UnknownLightType(u8),
    #[error("Unknown component type {0}")]
    UnknownComponentType(u32),
    #[error("{table} count {count} exceeds capacity {capacity}")]
    CapacityExceeded {
        table: &'static str,
        count: usize,
        capacity: usize,
    },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type FormatResult<T> = Result<T, FormatError>;

/// Component type tags
pub const COMPONENT_MESH_RENDERER: u32 = 0;
pub const COMPONENT_SPRITE_RENDERER: u32 = 1;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MaterialData {
    /// Shader base path without API extension
    pub vertex_shader_path: String,
    pub fragment_shader_path: String,
    pub color: [f32; 4],
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SkyboxData {
    /// Face image paths ordered +X, -X, +Y, -Y, +Z, -Z
    pub cube_map_textures: [String; CUBEMAP_FACE_COUNT],
    pub material: MaterialData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneCameraData {
    pub background_color: [f32; 4],
    pub fov: f32,
    pub view_rect: [f32; 2],
    pub position: [f64; 3],
    /// Present iff the hasSkybox flag is set
    pub skybox: Option<SkyboxData>,
}

impl SceneCameraData {
    pub fn has_skybox(&self) -> bool {
        self.skybox.is_some()
    }
}

impl Default for SceneCameraData {
    fn default() -> Self {
        Self {
            background_color: [0.2, 0.3, 0.3, 1.0],
            fov: 45.0,
            view_rect: [800.0, 600.0],
            position: [0.0, 2.0, 2.0],
            skybox: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LightData {
    pub light_type: LightType,
    pub direction: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshData {
    pub obj_path: String,
    pub material: MaterialData,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshRendererData {
    pub obj_path: String,
    pub shade_smooth: bool,
    pub material: MaterialData,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpriteRendererData {
    pub texture_path: String,
    pub material: MaterialData,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComponentData {
    MeshRenderer(MeshRendererData),
    SpriteRenderer(SpriteRendererData),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GameObjectData {
    pub components: Vec<ComponentData>,
}

/// The table following the camera; which one a file carries depends on its size
#[derive(Debug, Clone, PartialEq)]
pub enum SceneTable {
    Meshes(Vec<MeshData>),
    GameObjects(Vec<GameObjectData>),
}

impl SceneTable {
    pub fn len(&self) -> usize {
        match self {
            SceneTable::Meshes(meshes) => meshes.len(),
            SceneTable::GameObjects(objects) => objects.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SceneTable {
    fn default() -> Self {
        SceneTable::GameObjects(Vec::new())
    }
}

/// Decoded compiled scene
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledScene {
    pub camera: SceneCameraData,
    pub table: SceneTable,
    pub lights: Vec<LightData>,
}

impl CompiledScene {
    /// Read and decode a compiled scene file
    pub fn read(path: impl AsRef<Path>, policy: CapacityPolicy) -> FormatResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| FormatError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::decode(&bytes, policy)
    }

    /// Decode a compiled scene blob
    pub fn decode(bytes: &[u8], policy: CapacityPolicy) -> FormatResult<Self> {
        let reader = Reader { bytes };
        if bytes.len() < SCENE_TABLE {
            return Err(FormatError::TooShort {
                expected: MESH_SCENE_SIZE,
                actual: bytes.len(),
            });
        }

        let magic = reader.u32(SCENE_MAGIC_OFFSET);
        if magic != SCENE_MAGIC {
            return Err(FormatError::BadMagic { found: magic });
        }

        let camera = decode_camera(&reader, SCENE_CAMERA)?;
        let stored_count = reader.u32(SCENE_TABLE_COUNT) as usize;

        let (table, light_count_offset, lights_offset) = match bytes.len() {
            MESH_SCENE_SIZE => {
                let count = clamp_count("mesh", stored_count, MAX_TABLE_ENTRIES, policy)?;
                let meshes = (0..count)
                    .map(|i| decode_mesh(&reader, SCENE_TABLE + i * MESH_SIZE))
                    .collect::<FormatResult<Vec<_>>>()?;
                (SceneTable::Meshes(meshes), MESH_SCENE_LIGHT_COUNT, MESH_SCENE_LIGHTS)
            }
            GAME_OBJECT_SCENE_SIZE => {
                let count = clamp_count("game object", stored_count, MAX_TABLE_ENTRIES, policy)?;
                let objects = (0..count)
                    .map(|i| decode_game_object(&reader, SCENE_TABLE + i * GAME_OBJECT_SIZE, policy))
                    .collect::<FormatResult<Vec<_>>>()?;
                (
                    SceneTable::GameObjects(objects),
                    GAME_OBJECT_SCENE_LIGHT_COUNT,
                    GAME_OBJECT_SCENE_LIGHTS,
                )
            }
            other => return Err(FormatError::UnknownLayout(other)),
        };

        let light_count = clamp_count(
            "light",
            reader.u32(light_count_offset) as usize,
            MAX_LIGHTS,
            policy,
        )?;
        let lights = (0..light_count)
            .map(|i| decode_light(&reader, lights_offset + i * LIGHT_SIZE))
            .collect::<FormatResult<Vec<_>>>()?;

        Ok(Self {
            camera,
            table,
            lights,
        })
    }

    /// Encode, refusing tables larger than the format capacity
    pub fn encode(&self) -> FormatResult<Vec<u8>> {
        self.encode_with(CapacityPolicy::Reject)
    }

    /// Encode with an explicit capacity policy.
    ///
    /// `Truncate` behaves like the offline scene compiler: the authored count is
    /// stored as-is and only the entries that fit are written.
    pub fn encode_with(&self, policy: CapacityPolicy) -> FormatResult<Vec<u8>> {
        if policy == CapacityPolicy::Reject {
            check_capacity("table", self.table.len(), MAX_TABLE_ENTRIES)?;
            check_capacity("light", self.lights.len(), MAX_LIGHTS)?;
            if let SceneTable::GameObjects(objects) = &self.table {
                for object in objects {
                    check_capacity("component", object.components.len(), MAX_COMPONENTS)?;
                }
            }
        }

        let (size, light_count_offset, lights_offset) = match self.table {
            SceneTable::Meshes(_) => (MESH_SCENE_SIZE, MESH_SCENE_LIGHT_COUNT, MESH_SCENE_LIGHTS),
            SceneTable::GameObjects(_) => (
                GAME_OBJECT_SCENE_SIZE,
                GAME_OBJECT_SCENE_LIGHT_COUNT,
                GAME_OBJECT_SCENE_LIGHTS,
            ),
        };

        let mut writer = Writer {
            bytes: vec![0; size],
        };
        writer.u32(SCENE_MAGIC_OFFSET, SCENE_MAGIC);
        encode_camera(&mut writer, SCENE_CAMERA, &self.camera)?;

        writer.u32(SCENE_TABLE_COUNT, self.table.len() as u32);
        match &self.table {
            SceneTable::Meshes(meshes) => {
                for (i, mesh) in meshes.iter().take(MAX_TABLE_ENTRIES).enumerate() {
                    encode_mesh(&mut writer, SCENE_TABLE + i * MESH_SIZE, mesh)?;
                }
            }
            SceneTable::GameObjects(objects) => {
                for (i, object) in objects.iter().take(MAX_TABLE_ENTRIES).enumerate() {
                    encode_game_object(&mut writer, SCENE_TABLE + i * GAME_OBJECT_SIZE, object)?;
                }
            }
        }

        writer.u32(light_count_offset, self.lights.len() as u32);
        for (i, light) in self.lights.iter().take(MAX_LIGHTS).enumerate() {
            let base = lights_offset + i * LIGHT_SIZE;
            writer.u8(base + LIGHT_TYPE, light.light_type as u8);
            writer.f32s(base + LIGHT_DIRECTION, &light.direction);
        }

        Ok(writer.bytes)
    }

    /// Encode and write to a file
    pub fn write(&self, path: impl AsRef<Path>) -> FormatResult<()> {
        let path = path.as_ref();
        let bytes = self.encode()?;
        std::fs::write(path, bytes).map_err(|source| FormatError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn clamp_count(
    table: &'static str,
    count: usize,
    capacity: usize,
    policy: CapacityPolicy,
) -> FormatResult<usize> {
    if count <= capacity {
        return Ok(count);
    }
    match policy {
        CapacityPolicy::Truncate => {
            log::warn!(
                "Compiled scene declares {count} {table} entries, only the first {capacity} are stored"
            );
            Ok(capacity)
        }
        CapacityPolicy::Reject => Err(FormatError::CapacityExceeded {
            table,
            count,
            capacity,
        }),
    }
}

fn check_capacity(table: &'static str, count: usize, capacity: usize) -> FormatResult<()> {
    if count > capacity {
        return Err(FormatError::CapacityExceeded {
            table,
            count,
            capacity,
        });
    }
    Ok(())
}

// Decoding

struct Reader<'a> {
    bytes: &'a [u8],
}

impl Reader<'_> {
    fn array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[offset..offset + N]);
        out
    }

    fn u8(&self, offset: usize) -> u8 {
        self.bytes[offset]
    }

    fn u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.array(offset))
    }

    fn f32(&self, offset: usize) -> f32 {
        f32::from_le_bytes(self.array(offset))
    }

    fn f64(&self, offset: usize) -> f64 {
        f64::from_le_bytes(self.array(offset))
    }

    fn f32s<const N: usize>(&self, offset: usize) -> [f32; N] {
        std::array::from_fn(|i| self.f32(offset + i * 4))
    }

    fn bool(&self, offset: usize) -> bool {
        self.u8(offset) != 0
    }

    /// NUL-terminated string in a `PATH_LEN` field
    fn string(&self, offset: usize) -> FormatResult<String> {
        let field = &self.bytes[offset..offset + PATH_LEN];
        let end = field
            .iter()
            .position(|&b| b == 0)
            .ok_or(FormatError::InvalidString { offset })?;
        std::str::from_utf8(&field[..end])
            .map(str::to_owned)
            .map_err(|_| FormatError::InvalidString { offset })
    }
}

fn decode_material(reader: &Reader<'_>, base: usize) -> FormatResult<MaterialData> {
    Ok(MaterialData {
        vertex_shader_path: reader.string(base + MATERIAL_VERTEX_PATH)?,
        fragment_shader_path: reader.string(base + MATERIAL_FRAGMENT_PATH)?,
        color: reader.f32s(base + MATERIAL_COLOR),
    })
}

fn decode_camera(reader: &Reader<'_>, base: usize) -> FormatResult<SceneCameraData> {
    let skybox = if reader.bool(base + CAMERA_HAS_SKYBOX) {
        let skybox_base = base + CAMERA_SKYBOX;
        let mut faces: [String; CUBEMAP_FACE_COUNT] = Default::default();
        for (i, face) in faces.iter_mut().enumerate() {
            *face = reader.string(skybox_base + SKYBOX_FACES + i * PATH_LEN)?;
        }
        Some(SkyboxData {
            cube_map_textures: faces,
            material: decode_material(reader, skybox_base + SKYBOX_MATERIAL)?,
        })
    } else {
        None
    };

    Ok(SceneCameraData {
        background_color: reader.f32s(base + CAMERA_BACKGROUND),
        fov: reader.f32(base + CAMERA_FOV),
        view_rect: reader.f32s(base + CAMERA_VIEW_RECT),
        position: std::array::from_fn(|i| reader.f64(base + CAMERA_POSITION + i * 8)),
        skybox,
    })
}

fn decode_mesh(reader: &Reader<'_>, base: usize) -> FormatResult<MeshData> {
    Ok(MeshData {
        obj_path: reader.string(base + MESH_OBJ_PATH)?,
        material: decode_material(reader, base + MESH_MATERIAL)?,
    })
}

fn decode_game_object(
    reader: &Reader<'_>,
    base: usize,
    policy: CapacityPolicy,
) -> FormatResult<GameObjectData> {
    let count = clamp_count(
        "component",
        reader.u32(base + GAME_OBJECT_COMPONENT_COUNT) as usize,
        MAX_COMPONENTS,
        policy,
    )?;

    let components = (0..count)
        .map(|i| decode_component(reader, base + GAME_OBJECT_COMPONENTS + i * COMPONENT_SIZE))
        .collect::<FormatResult<Vec<_>>>()?;
    Ok(GameObjectData { components })
}

fn decode_component(reader: &Reader<'_>, base: usize) -> FormatResult<ComponentData> {
    let data = base + COMPONENT_DATA;
    match reader.u32(base + COMPONENT_TYPE) {
        COMPONENT_MESH_RENDERER => Ok(ComponentData::MeshRenderer(MeshRendererData {
            obj_path: reader.string(data + MESH_RENDERER_OBJ_PATH)?,
            shade_smooth: reader.bool(data + MESH_RENDERER_SHADE_SMOOTH),
            material: decode_material(reader, data + MESH_RENDERER_MATERIAL)?,
        })),
        COMPONENT_SPRITE_RENDERER => Ok(ComponentData::SpriteRenderer(SpriteRendererData {
            texture_path: reader.string(data + SPRITE_TEXTURE_PATH)?,
            material: decode_material(reader, data + SPRITE_MATERIAL)?,
            width: reader.f32(data + SPRITE_WIDTH),
            height: reader.f32(data + SPRITE_HEIGHT),
        })),
        other => Err(FormatError::UnknownComponentType(other)),
    }
}

fn decode_light(reader: &Reader<'_>, base: usize) -> FormatResult<LightData> {
    let tag = reader.u8(base + LIGHT_TYPE);
    Ok(LightData {
        light_type: LightType::try_from(tag).map_err(FormatError::UnknownLightType)?,
        direction: reader.f32s(base + LIGHT_DIRECTION),
    })
}

// Encoding

struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn put(&mut self, offset: usize, data: &[u8]) {
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    fn u8(&mut self, offset: usize, value: u8) {
        self.bytes[offset] = value;
    }

    fn u32(&mut self, offset: usize, value: u32) {
        self.put(offset, &value.to_le_bytes());
    }

    fn f32s(&mut self, offset: usize, values: &[f32]) {
        for (i, value) in values.iter().enumerate() {
            self.put(offset + i * 4, &value.to_le_bytes());
        }
    }

    fn string(&mut self, offset: usize, value: &str) -> FormatResult<()> {
        if value.len() >= PATH_LEN || value.as_bytes().contains(&0) {
            return Err(FormatError::PathTooLong {
                path: value.to_string(),
            });
        }
        self.put(offset, value.as_bytes());
        Ok(())
    }
}

fn encode_material(writer: &mut Writer, base: usize, material: &MaterialData) -> FormatResult<()> {
    writer.string(base + MATERIAL_VERTEX_PATH, &material.vertex_shader_path)?;
    writer.string(base + MATERIAL_FRAGMENT_PATH, &material.fragment_shader_path)?;
    writer.f32s(base + MATERIAL_COLOR, &material.color);
    Ok(())
}

fn encode_camera(writer: &mut Writer, base: usize, camera: &SceneCameraData) -> FormatResult<()> {
    writer.f32s(base + CAMERA_BACKGROUND, &camera.background_color);
    writer.f32s(base + CAMERA_FOV, &[camera.fov]);
    writer.f32s(base + CAMERA_VIEW_RECT, &camera.view_rect);
    for (i, value) in camera.position.iter().enumerate() {
        writer.put(base + CAMERA_POSITION + i * 8, &value.to_le_bytes());
    }
    if let Some(skybox) = &camera.skybox {
        writer.u8(base + CAMERA_HAS_SKYBOX, 1);
        let skybox_base = base + CAMERA_SKYBOX;
        for (i, face) in skybox.cube_map_textures.iter().enumerate() {
            writer.string(skybox_base + SKYBOX_FACES + i * PATH_LEN, face)?;
        }
        encode_material(writer, skybox_base + SKYBOX_MATERIAL, &skybox.material)?;
    }
    Ok(())
}

fn encode_mesh(writer: &mut Writer, base: usize, mesh: &MeshData) -> FormatResult<()> {
    writer.string(base + MESH_OBJ_PATH, &mesh.obj_path)?;
    encode_material(writer, base + MESH_MATERIAL, &mesh.material)
}

fn encode_game_object(
    writer: &mut Writer,
    base: usize,
    object: &GameObjectData,
) -> FormatResult<()> {
    writer.u32(base + GAME_OBJECT_COMPONENT_COUNT, object.components.len() as u32);
    for (i, component) in object.components.iter().take(MAX_COMPONENTS).enumerate() {
        let component_base = base + GAME_OBJECT_COMPONENTS + i * COMPONENT_SIZE;
        let data = component_base + COMPONENT_DATA;
        match component {
            ComponentData::MeshRenderer(renderer) => {
                writer.u32(component_base + COMPONENT_TYPE, COMPONENT_MESH_RENDERER);
                writer.string(data + MESH_RENDERER_OBJ_PATH, &renderer.obj_path)?;
                writer.u8(data + MESH_RENDERER_SHADE_SMOOTH, renderer.shade_smooth as u8);
                encode_material(writer, data + MESH_RENDERER_MATERIAL, &renderer.material)?;
            }
            ComponentData::SpriteRenderer(sprite) => {
                writer.u32(component_base + COMPONENT_TYPE, COMPONENT_SPRITE_RENDERER);
                writer.string(data + SPRITE_TEXTURE_PATH, &sprite.texture_path)?;
                encode_material(writer, data + SPRITE_MATERIAL, &sprite.material)?;
                writer.f32s(data + SPRITE_WIDTH, &[sprite.width, sprite.height]);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material(name: &str) -> MaterialData {
        MaterialData {
            vertex_shader_path: format!("shaders/{name}.vert"),
            fragment_shader_path: format!("shaders/{name}.frag"),
            color: [1.0, 0.5, 0.25, 1.0],
        }
    }

    fn lights(n: usize) -> Vec<LightData> {
        (0..n)
            .map(|i| LightData {
                light_type: LightType::Directional,
                direction: [i as f32, -1.0, 0.0],
            })
            .collect()
    }

    #[test]
    fn struct_sizes_match_c_layout() {
        assert_eq!(MATERIAL_SIZE, 528);
        assert_eq!(SKYBOX_SIZE, 2064);
        assert_eq!(CAMERA_SKYBOX + SKYBOX_SIZE, 2124);
        assert_eq!(CAMERA_SIZE, 2128);
        assert_eq!(MESH_SIZE, 784);
        assert_eq!(MESH_RENDERER_SIZE, 788);
        assert_eq!(SPRITE_SIZE, 792);
        assert_eq!(COMPONENT_SIZE, 796);
        assert_eq!(GAME_OBJECT_SIZE, 6372);
        assert_eq!(SCENE_TABLE_COUNT, 2136);
        assert_eq!(MESH_SCENE_LIGHT_COUNT, 27228);
        assert_eq!(MESH_SCENE_SIZE, 27744);
        assert_eq!(GAME_OBJECT_SCENE_SIZE, 206560);
        // Both variants end 8-byte aligned, like the C struct
        assert_eq!(MESH_SCENE_SIZE % 8, 0);
        assert_eq!(GAME_OBJECT_SCENE_SIZE % 8, 0);
    }

    #[test]
    fn camera_fields_survive_exactly() {
        let scene = CompiledScene {
            camera: SceneCameraData {
                background_color: [0.2, 0.3, 0.3, 1.0],
                fov: 45.0,
                view_rect: [1024.0, 768.0],
                position: [0.1, 2.000000001, -3.3],
                skybox: Some(SkyboxData {
                    cube_map_textures: std::array::from_fn(|i| format!("sky/face{i}.png")),
                    material: material("skybox"),
                }),
            },
            table: SceneTable::Meshes(vec![MeshData {
                obj_path: "models/cube.obj".into(),
                material: material("unlit"),
            }]),
            lights: lights(2),
        };

        let bytes = scene.encode().unwrap();
        assert_eq!(bytes.len(), MESH_SCENE_SIZE);
        let decoded = CompiledScene::decode(&bytes, CapacityPolicy::Truncate).unwrap();
        assert_eq!(decoded, scene);
    }

    #[test]
    fn field_offsets_in_encoded_bytes() {
        let scene = CompiledScene {
            camera: SceneCameraData {
                fov: 60.0,
                position: [1.5, 0.0, 0.0],
                ..Default::default()
            },
            table: SceneTable::GameObjects(vec![GameObjectData {
                components: vec![ComponentData::MeshRenderer(MeshRendererData {
                    obj_path: "a.obj".into(),
                    shade_smooth: true,
                    material: material("lit"),
                })],
            }]),
            lights: lights(1),
        };
        let bytes = scene.encode().unwrap();

        assert_eq!(&bytes[0..4], &SCENE_MAGIC.to_le_bytes());
        assert_eq!(&bytes[SCENE_CAMERA + CAMERA_FOV..][..4], &60.0f32.to_le_bytes());
        assert_eq!(&bytes[SCENE_CAMERA + CAMERA_POSITION..][..8], &1.5f64.to_le_bytes());
        assert_eq!(bytes[SCENE_CAMERA + CAMERA_HAS_SKYBOX], 0);
        assert_eq!(&bytes[SCENE_TABLE_COUNT..][..4], &1u32.to_le_bytes());

        let component = SCENE_TABLE + GAME_OBJECT_COMPONENTS;
        assert_eq!(&bytes[component..][..4], &COMPONENT_MESH_RENDERER.to_le_bytes());
        assert_eq!(&bytes[component + COMPONENT_DATA..][..6], b"a.obj\0");
        assert_eq!(bytes[component + COMPONENT_DATA + MESH_RENDERER_SHADE_SMOOTH], 1);
        assert_eq!(&bytes[GAME_OBJECT_SCENE_LIGHT_COUNT..][..4], &1u32.to_le_bytes());
    }

    #[test]
    fn sprite_components_decode() {
        let sprite = ComponentData::SpriteRenderer(SpriteRendererData {
            texture_path: "sprites/ship.png".into(),
            material: material("sprite"),
            width: 2.0,
            height: 3.0,
        });
        let scene = CompiledScene {
            table: SceneTable::GameObjects(vec![GameObjectData {
                components: vec![sprite.clone()],
            }]),
            ..Default::default()
        };
        let decoded =
            CompiledScene::decode(&scene.encode().unwrap(), CapacityPolicy::Truncate).unwrap();
        assert_eq!(
            decoded.table,
            SceneTable::GameObjects(vec![GameObjectData {
                components: vec![sprite]
            }])
        );
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = CompiledScene::default().encode().unwrap();
        bytes[0] ^= 0xff;
        assert!(matches!(
            CompiledScene::decode(&bytes, CapacityPolicy::Truncate),
            Err(FormatError::BadMagic { .. })
        ));
    }

    #[test]
    fn unknown_sizes_are_rejected() {
        let mut bytes = CompiledScene::default().encode().unwrap();
        bytes.push(0);
        assert!(matches!(
            CompiledScene::decode(&bytes, CapacityPolicy::Truncate),
            Err(FormatError::UnknownLayout(_))
        ));
        assert!(matches!(
            CompiledScene::decode(&bytes[..100], CapacityPolicy::Truncate),
            Err(FormatError::TooShort { .. })
        ));
    }

    #[test]
    fn over_capacity_lights_follow_policy() {
        let scene = CompiledScene {
            lights: lights(40),
            ..Default::default()
        };
        assert!(matches!(
            scene.encode(),
            Err(FormatError::CapacityExceeded { count: 40, .. })
        ));

        let bytes = scene.encode_with(CapacityPolicy::Truncate).unwrap();
        let truncated = CompiledScene::decode(&bytes, CapacityPolicy::Truncate).unwrap();
        assert_eq!(truncated.lights.len(), MAX_LIGHTS);
        assert_eq!(truncated.lights[31].direction[0], 31.0);

        assert!(matches!(
            CompiledScene::decode(&bytes, CapacityPolicy::Reject),
            Err(FormatError::CapacityExceeded { table: "light", .. })
        ));
    }

    #[test]
    fn unknown_light_type_is_an_error() {
        let scene = CompiledScene {
            lights: lights(1),
            ..Default::default()
        };
        let mut bytes = scene.encode().unwrap();
        bytes[GAME_OBJECT_SCENE_LIGHTS + LIGHT_TYPE] = 7;
        assert!(matches!(
            CompiledScene::decode(&bytes, CapacityPolicy::Truncate),
            Err(FormatError::UnknownLightType(7))
        ));
    }

    #[test]
    fn long_paths_are_rejected_on_encode() {
        let scene = CompiledScene {
            table: SceneTable::Meshes(vec![MeshData {
                obj_path: "x".repeat(PATH_LEN),
                material: material("unlit"),
            }]),
            ..Default::default()
        };
        assert!(matches!(scene.encode(), Err(FormatError::PathTooLong { .. })));
    }
}
