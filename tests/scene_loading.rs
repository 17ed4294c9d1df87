//! Loading compiled scenes into live objects and rendering them headlessly.

mod common;

use common::{
    camera_45, directional_lights, ready_backend, triangle_scene, Fixture, QUAD_OBJ, TRIANGLE_OBJ,
};
use rstest::rstest;
use scene_renderer::backend::{CompareFunction, RendererBackend, TextureId};
use scene_renderer::scene::format::{
    CompiledScene, ComponentData, FormatError, GameObjectData, MeshRendererData, SceneTable,
    SpriteRendererData,
};
use scene_renderer::scene::{LoadError, SceneLoader, SceneManager};
use scene_renderer::{CapacityPolicy, GraphicsApi, Renderer};

#[test]
fn end_to_end_45_degree_scene() {
    let fixture = Fixture::new();
    let path = fixture.write_scene("scene.bin", &triangle_scene(&fixture));

    let mut renderer = Renderer::new(Box::new(ready_backend(GraphicsApi::OpenGl)));
    let mut scene = SceneLoader::new()
        .load(&path, renderer.backend_mut())
        .unwrap();

    let camera = scene.camera().unwrap();
    assert_eq!(camera.fov(), 45.0);
    assert_eq!(camera.view_rect(), (800.0, 600.0));
    assert!((camera.aspect_ratio() - 800.0 / 600.0).abs() < 1e-6);
    assert!(camera.skybox().is_none());

    assert_eq!(scene.game_objects().len(), 1);
    let object = &scene.game_objects()[0];
    let mesh = object.mesh().unwrap();
    assert!(mesh.is_configured());
    assert_eq!(mesh.vertex_count(), 3);
    let material = object.mesh_renderer().unwrap().material().unwrap();
    assert!(material.is_valid());
    assert_eq!(material.base_color(), [1.0, 0.0, 0.0, 1.0]);
    assert_eq!(scene.lights().len(), 1);

    let stats = renderer.render(&mut scene).unwrap();
    assert_eq!(stats.drawn, 1);
    assert_eq!(stats.skipped, 0);
    assert!(!stats.skybox_drawn);
    renderer.present().unwrap();
}

#[test]
fn end_to_end_records_the_frame() {
    let fixture = Fixture::new();
    let compiled = triangle_scene(&fixture);
    let mut renderer = Renderer::new(Box::new(ready_backend(GraphicsApi::DirectX12)));
    let mut scene = SceneLoader::new()
        .load_bytes(&compiled.encode().unwrap(), renderer.backend_mut())
        .unwrap();
    renderer.render(&mut scene).unwrap();
    renderer.present().unwrap();

    let recorded = DeviceRecord::of(&renderer).0;

    assert_eq!(recorded.clear_colors, vec![[0.1, 0.2, 0.3, 1.0]]);
    assert_eq!(recorded.draws, vec![3]);
    assert_eq!(recorded.presents, 1);
    assert_eq!(recorded.uploads_to(0), 1);
    // Base color goes out at material init and again for the draw
    assert_eq!(recorded.uploads_to(1), 2);
    assert_eq!(recorded.uploads_to(2), 1);
}

/// Calls recorded by the headless device behind a renderer
struct DeviceRecord(scene_renderer::backend::dummy::HeadlessRecorder);

impl DeviceRecord {
    fn of(renderer: &Renderer) -> Self {
        match renderer.backend().device_context() {
            scene_renderer::backend::DeviceContext::Headless(context) => Self(context.recorded()),
            other => panic!("expected a headless device, got {other:?}"),
        }
    }
}

#[test]
fn camera_fields_survive_the_file() {
    let fixture = Fixture::new();
    let mut compiled = triangle_scene(&fixture);
    compiled.camera.background_color = [0.5, 0.25, 0.125, 1.0];
    compiled.camera.fov = 60.0;
    compiled.camera.view_rect = [1280.0, 720.0];
    compiled.camera.position = [1.5, -2.0, 3.25];
    let path = fixture.write_scene("camera.bin", &compiled);

    let mut backend = ready_backend(GraphicsApi::OpenGl);
    let camera = SceneLoader::new().load_camera(&path, &mut backend).unwrap();
    assert_eq!(camera.background_color(), [0.5, 0.25, 0.125, 1.0]);
    assert_eq!(camera.fov(), 60.0);
    assert_eq!(camera.view_rect(), (1280.0, 720.0));
    assert_eq!(camera.position().to_array(), [1.5, -2.0, 3.25]);
}

#[test]
fn scene_without_skybox_draws_no_skybox() {
    let fixture = Fixture::new();
    let compiled = triangle_scene(&fixture);
    assert!(!compiled.camera.has_skybox());

    let mut renderer = Renderer::new(Box::new(ready_backend(GraphicsApi::Vulkan)));
    let mut scene = SceneLoader::new()
        .load_bytes(&compiled.encode().unwrap(), renderer.backend_mut())
        .unwrap();
    let stats = renderer.render(&mut scene).unwrap();

    assert!(!stats.skybox_drawn);
    assert_eq!(DeviceRecord::of(&renderer).0.skybox_draws, 0);
}

#[test]
fn skybox_is_drawn_last_with_relaxed_depth() {
    let fixture = Fixture::new();
    let mut compiled = triangle_scene(&fixture);
    compiled.camera.skybox = Some(fixture.skybox());

    let mut renderer = Renderer::new(Box::new(ready_backend(GraphicsApi::OpenGl)));
    let mut scene = SceneLoader::new()
        .load_bytes(&compiled.encode().unwrap(), renderer.backend_mut())
        .unwrap();
    let skybox = scene.camera().unwrap().skybox().unwrap();
    assert!(!skybox.texture().is_none());
    assert!(skybox.is_renderable());

    let stats = renderer.render(&mut scene).unwrap();
    assert!(stats.skybox_drawn);
    assert_eq!(renderer.backend().depth_compare(), CompareFunction::Less);

    let recorded = DeviceRecord::of(&renderer).0;
    assert_eq!(recorded.skybox_draws, 1);
    assert_eq!(recorded.skybox_depth, vec![CompareFunction::LessEqual]);
    // Triangle first, then the 36-vertex cube
    assert_eq!(recorded.draws, vec![3, 36]);
}

#[test]
fn missing_cubemap_face_keeps_skybox_but_skips_it() {
    let fixture = Fixture::new();
    let mut compiled = triangle_scene(&fixture);
    let mut skybox = fixture.skybox();
    skybox.cube_map_textures[4] = fixture.path_string("missing.png");
    compiled.camera.skybox = Some(skybox);

    let mut renderer = Renderer::new(Box::new(ready_backend(GraphicsApi::OpenGl)));
    let mut scene = SceneLoader::new()
        .load_bytes(&compiled.encode().unwrap(), renderer.backend_mut())
        .unwrap();
    let skybox = scene.camera().unwrap().skybox().unwrap();
    assert_eq!(skybox.texture(), TextureId::NONE);
    assert!(!skybox.is_renderable());

    let stats = renderer.render(&mut scene).unwrap();
    assert!(!stats.skybox_drawn);
    assert_eq!(stats.drawn, 1);
}

#[test]
fn failed_skybox_material_drops_the_skybox() {
    let fixture = Fixture::new();
    let mut compiled = triangle_scene(&fixture);
    let mut skybox = fixture.skybox();
    skybox.material.fragment_shader_path = fixture.path_string("nowhere");
    compiled.camera.skybox = Some(skybox);

    let mut backend = ready_backend(GraphicsApi::OpenGl);
    let scene = SceneLoader::new()
        .load_bytes(&compiled.encode().unwrap(), &mut backend)
        .unwrap();
    assert!(scene.camera().unwrap().skybox().is_none());
    assert_eq!(scene.game_objects().len(), 1);
}

#[rstest]
#[case::under_capacity(5, 5)]
#[case::at_capacity(32, 32)]
#[case::over_capacity(40, 32)]
fn light_list_is_capped(#[case] authored: usize, #[case] expected: usize) {
    let fixture = Fixture::new();
    let mut compiled = triangle_scene(&fixture);
    compiled.lights = directional_lights(authored);
    let bytes = compiled.encode_with(CapacityPolicy::Truncate).unwrap();

    let mut backend = ready_backend(GraphicsApi::OpenGl);
    let scene = SceneLoader::new().load_bytes(&bytes, &mut backend).unwrap();
    assert_eq!(scene.lights().len(), expected);
    assert_eq!(scene.lights()[0].direction.to_array(), [0.0, -1.0, 0.0]);
}

#[test]
fn reject_policy_refuses_oversized_light_table() {
    let fixture = Fixture::new();
    let mut compiled = triangle_scene(&fixture);
    compiled.lights = directional_lights(40);
    assert!(matches!(
        compiled.encode(),
        Err(FormatError::CapacityExceeded { .. })
    ));

    let bytes = compiled.encode_with(CapacityPolicy::Truncate).unwrap();
    let mut backend = ready_backend(GraphicsApi::OpenGl);
    let result = SceneLoader::with_policy(CapacityPolicy::Reject).load_bytes(&bytes, &mut backend);
    assert!(matches!(
        result,
        Err(LoadError::Format(FormatError::CapacityExceeded { .. }))
    ));
}

#[test]
fn game_object_table_builds_components() {
    let fixture = Fixture::new();
    let material = fixture.material([0.0, 1.0, 0.0, 1.0]);
    let mesh_renderer = |obj_path: String, shade_smooth| {
        ComponentData::MeshRenderer(MeshRendererData {
            obj_path,
            shade_smooth,
            material: material.clone(),
        })
    };
    let sprite = ComponentData::SpriteRenderer(SpriteRendererData {
        texture_path: fixture.path_string("sprite.png"),
        material: material.clone(),
        width: 1.0,
        height: 1.0,
    });

    let compiled = CompiledScene {
        camera: camera_45(),
        table: SceneTable::GameObjects(vec![
            GameObjectData {
                components: vec![mesh_renderer(fixture.write_obj("quad.obj", QUAD_OBJ), true)],
            },
            GameObjectData {
                components: vec![sprite],
            },
            GameObjectData {
                components: vec![mesh_renderer(fixture.path_string("missing.obj"), false)],
            },
        ]),
        lights: directional_lights(1),
    };

    let mut renderer = Renderer::new(Box::new(ready_backend(GraphicsApi::OpenGl)));
    let mut scene = SceneLoader::new()
        .load_bytes(&compiled.encode().unwrap(), renderer.backend_mut())
        .unwrap();

    let objects = scene.game_objects();
    assert_eq!(objects.len(), 3);
    assert_eq!(objects[0].mesh().unwrap().vertex_count(), 6);
    assert!(objects[1].mesh().is_none());
    assert!(objects[2].mesh().is_none());
    assert!(objects[2].mesh_renderer().is_none());

    let stats = renderer.render(&mut scene).unwrap();
    assert_eq!(stats.drawn, 1);
    assert_eq!(stats.skipped, 2);
}

#[test]
fn bad_mesh_entry_is_skipped() {
    let fixture = Fixture::new();
    let mut compiled = triangle_scene(&fixture);
    if let SceneTable::Meshes(meshes) = &mut compiled.table {
        let mut broken = meshes[0].clone();
        broken.obj_path = fixture.path_string("absent.obj");
        meshes.push(broken);
    }

    let mut backend = ready_backend(GraphicsApi::OpenGl);
    let objects = SceneLoader::new()
        .load_game_objects(fixture.write_scene("meshes.bin", &compiled), &mut backend)
        .unwrap();
    assert_eq!(objects.len(), 1);
}

#[test]
fn lights_load_without_a_backend() {
    let fixture = Fixture::new();
    let mut compiled = triangle_scene(&fixture);
    compiled.lights = directional_lights(3);
    let lights = SceneLoader::new()
        .load_lights(fixture.write_scene("lights.bin", &compiled))
        .unwrap();
    assert_eq!(lights.len(), 3);
    assert_eq!(lights[2].direction.to_array(), [0.0, -1.0, 2.0]);
}

#[test]
fn corrupt_file_is_rejected() {
    let fixture = Fixture::new();
    let mut bytes = triangle_scene(&fixture).encode().unwrap();
    bytes[0] ^= 0xFF;
    let mut backend = ready_backend(GraphicsApi::OpenGl);
    assert!(matches!(
        SceneLoader::new().load_bytes(&bytes, &mut backend),
        Err(LoadError::Format(FormatError::BadMagic { .. }))
    ));
}

#[test]
fn scene_manager_replaces_the_active_scene() {
    let fixture = Fixture::new();
    let mut with_skybox = triangle_scene(&fixture);
    with_skybox.camera.skybox = Some(fixture.skybox());
    let first = fixture.write_scene("first.bin", &with_skybox);

    let mut second = triangle_scene(&fixture);
    if let SceneTable::Meshes(meshes) = &mut second.table {
        meshes[0].obj_path = fixture.write_obj("quad.obj", QUAD_OBJ);
    }
    let second = fixture.write_scene("second.bin", &second);

    let mut backend = ready_backend(GraphicsApi::OpenGl);
    let mut manager = SceneManager::new(SceneLoader::new());
    manager.add_scene("first", &first);
    manager.add_scene("second", &second);
    assert_eq!(manager.scene_names(), vec!["first", "second"]);

    manager.load_scene("first", &mut backend).unwrap();
    assert_eq!(manager.active_scene_name(), Some("first"));
    assert_eq!(backend.recorded().cubemaps_created, 1);

    let scene = manager.load_scene("second", &mut backend).unwrap();
    assert_eq!(scene.game_objects()[0].mesh().unwrap().vertex_count(), 6);
    assert_eq!(manager.active_scene_name(), Some("second"));
    assert_eq!(backend.recorded().cubemaps_deleted, 1);

    assert!(matches!(
        manager.load_scene("third", &mut backend),
        Err(LoadError::UnknownScene(_))
    ));
    assert_eq!(manager.active_scene_name(), Some("second"));
}

#[test]
fn triangle_fixture_uses_flat_normals() {
    let fixture = Fixture::new();
    let path = fixture.write_obj("triangle.obj", TRIANGLE_OBJ);
    let mesh = scene_renderer::scene::load_obj_mesh(path, false).unwrap();
    assert_eq!(mesh.normals(), &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
}
