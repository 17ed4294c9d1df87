//! Backend contracts that hold for every API: identity, depth compare
//! restoration around skyboxes, material and mesh validation.

mod common;

use common::{
    camera_45, directional_lights, ready_backend, recorded, Fixture, SHADER_BASE, TRIANGLE_OBJ,
};
use rstest::rstest;
use scene_renderer::backend::dummy::{DummyBackend, HeadlessContext, HeadlessShaderProgram};
use scene_renderer::backend::{
    BackendError, BackendState, CompareFunction, RendererBackend, ShaderProgram, ShaderStage,
    TextureId,
};
use scene_renderer::resources::{Material, Mesh, ShaderAsset};
use scene_renderer::scene::format::{CompiledScene, MeshData, SceneTable};
use scene_renderer::scene::{Camera, GameObject, MeshRenderer, Scene, SceneLoader};
use scene_renderer::{GraphicsApi, Renderer, RendererConfig, RendererFactory};

#[rstest]
#[case::opengl(GraphicsApi::OpenGl)]
#[case::webgl(GraphicsApi::WebGl)]
#[case::vulkan(GraphicsApi::Vulkan)]
#[case::directx12(GraphicsApi::DirectX12)]
fn backends_report_the_api_they_were_built_for(#[case] api: GraphicsApi) {
    let backend = RendererFactory::create(api, &RendererConfig::default()).unwrap();
    assert_eq!(backend.graphics_api(), api);
    assert_eq!(DummyBackend::new(api).graphics_api(), api);
    assert_eq!(Renderer::new(backend).graphics_api(), api);
}

#[rstest]
#[case::opengl(GraphicsApi::OpenGl)]
#[case::vulkan(GraphicsApi::Vulkan)]
#[case::directx12(GraphicsApi::DirectX12)]
fn real_backends_start_uninitialized(#[case] api: GraphicsApi) {
    let mut backend = RendererFactory::create(api, &RendererConfig::default()).unwrap();
    assert_eq!(backend.state(), BackendState::Uninitialized);
    assert!(matches!(
        backend.clear(),
        Err(BackendError::InvalidState { .. })
    ));
    assert_eq!(backend.depth_compare(), CompareFunction::Less);
}

fn linked_program(backend: &DummyBackend) -> HeadlessShaderProgram {
    let context = match backend.device_context() {
        scene_renderer::backend::DeviceContext::Headless(context) => context,
        other => panic!("unexpected device {other:?}"),
    };
    let fixture = Fixture::new();
    let (vertex, fragment) = fixture.write_shaders(SHADER_BASE);
    let mut program = HeadlessShaderProgram::new(context);
    for (base, stage) in [(vertex, ShaderStage::Vertex), (fragment, ShaderStage::Fragment)] {
        let mut asset = ShaderAsset::new(
            SceneLoader::shader_path(&base, backend.graphics_api()),
            stage,
            backend,
        )
        .unwrap();
        asset.load().unwrap();
        program.attach_shader(asset.compiled().unwrap()).unwrap();
    }
    program.link().unwrap();
    program
}

/// Which part of the skybox draw is broken
#[derive(Debug, Clone, Copy)]
enum SkyboxPath {
    Drawn,
    NoFrame,
    UnknownTexture,
    InvalidProgram,
    NoCamera,
}

#[rstest]
#[case::drawn(SkyboxPath::Drawn, true)]
#[case::no_frame(SkyboxPath::NoFrame, false)]
#[case::unknown_texture(SkyboxPath::UnknownTexture, false)]
#[case::invalid_program(SkyboxPath::InvalidProgram, false)]
#[case::no_camera(SkyboxPath::NoCamera, false)]
fn depth_compare_is_restored_after_skybox(#[case] path: SkyboxPath, #[case] succeeds: bool) {
    let fixture = Fixture::new();
    let mut backend = ready_backend(GraphicsApi::OpenGl);
    let texture = match path {
        SkyboxPath::UnknownTexture => TextureId(99),
        _ => backend.create_cubemap_texture(
            &fixture.write_cubemap_faces().map(std::path::PathBuf::from),
        ),
    };
    assert!(!texture.is_none());

    let mut program = match path {
        SkyboxPath::InvalidProgram => HeadlessShaderProgram::new(HeadlessContext::new(GraphicsApi::OpenGl)),
        _ => linked_program(&backend),
    };
    let mut mesh = Mesh::cube();
    mesh.configure(&backend).unwrap();

    if !matches!(path, SkyboxPath::NoCamera) {
        backend.set_camera(&Camera::new());
    }
    if !matches!(path, SkyboxPath::NoFrame) {
        backend.clear().unwrap();
    }

    let result = backend.render_skybox(&mesh, &mut program, texture);
    assert_eq!(result.is_ok(), succeeds, "{result:?}");
    assert_eq!(backend.depth_compare(), CompareFunction::Less);
    assert_eq!(
        backend.recorded().skybox_depth,
        vec![CompareFunction::LessEqual]
    );
}

#[test]
fn material_without_shaders_is_invalid() {
    let backend = ready_backend(GraphicsApi::OpenGl);
    let mut material = Material::new(&backend).unwrap();
    assert!(matches!(
        material.init(),
        Err(BackendError::ProgramLinkFailed(_))
    ));
    assert!(!material.is_valid());
}

#[rstest]
#[case::missing_file(GraphicsApi::OpenGl, None)]
#[case::empty_source(GraphicsApi::OpenGl, Some(&b""[..]))]
#[case::not_utf8(GraphicsApi::WebGl, Some(&[0xff, 0xfe, 0x00][..]))]
#[case::truncated_spirv(GraphicsApi::Vulkan, Some(&[0x03, 0x02, 0x23, 0x07, 0x00, 0x00][..]))]
#[case::truncated_bytecode(GraphicsApi::DirectX12, Some(&[0x01, 0x02, 0x03][..]))]
fn material_with_bad_fragment_shader_fails(
    #[case] api: GraphicsApi,
    #[case] fragment: Option<&[u8]>,
) {
    let fixture = Fixture::new();
    let (vertex, _) = fixture.write_shaders(SHADER_BASE);
    let fragment_base = fixture.path_string("broken.pxs");
    if let Some(bytes) = fragment {
        fixture.write(&format!("broken.pxs{}", api.shader_extension()), bytes);
    }

    let backend = ready_backend(api);
    let mut material = Material::new(&backend).unwrap();
    material.set_vertex_shader(
        ShaderAsset::new(SceneLoader::shader_path(&vertex, api), ShaderStage::Vertex, &backend)
            .unwrap(),
    );
    material.set_fragment_shader(
        ShaderAsset::new(
            SceneLoader::shader_path(&fragment_base, api),
            ShaderStage::Fragment,
            &backend,
        )
        .unwrap(),
    );

    assert!(material.init().is_err());
    assert!(!material.is_valid());
}

#[rstest]
#[case::spirv_sibling(&["spv", "glsl"], true)]
#[case::glsl_sibling(&["glsl"], true)]
#[case::no_sibling(&[], false)]
fn dxbc_fragment_falls_back_to_a_sibling(#[case] keep: &[&str], #[case] loads: bool) {
    let fixture = Fixture::new();
    let backend = ready_backend(GraphicsApi::DirectX12);
    let mut material = unlit_material(&fixture, &backend, SHADER_BASE);

    fixture.write("unlit.pxs.cso", b"DXBC\x00\x00\x00\x00");
    for ext in ["spv", "glsl"] {
        if !keep.contains(&ext) {
            std::fs::remove_file(fixture.file(&format!("unlit.pxs.{ext}"))).unwrap();
        }
    }

    assert_eq!(material.init().is_ok(), loads);
    assert_eq!(material.is_valid(), loads);
}

#[test]
fn material_with_two_vertex_stages_fails_to_link() {
    let fixture = Fixture::new();
    let (vertex, _) = fixture.write_shaders(SHADER_BASE);
    let backend = ready_backend(GraphicsApi::OpenGl);
    let path = SceneLoader::shader_path(&vertex, GraphicsApi::OpenGl);

    let mut material = Material::new(&backend).unwrap();
    material.set_vertex_shader(ShaderAsset::new(&path, ShaderStage::Vertex, &backend).unwrap());
    material.set_fragment_shader(ShaderAsset::new(&path, ShaderStage::Vertex, &backend).unwrap());
    assert!(matches!(
        material.init(),
        Err(BackendError::ProgramLinkFailed(_))
    ));
    assert!(!material.is_valid());
}

#[test]
fn valid_material_uploads_color_changes() {
    let fixture = Fixture::new();
    let (vertex, fragment) = fixture.write_shaders(SHADER_BASE);
    let backend = ready_backend(GraphicsApi::OpenGl);
    let api = backend.graphics_api();

    let mut material = Material::new(&backend).unwrap();
    material.set_vertex_shader(
        ShaderAsset::new(SceneLoader::shader_path(&vertex, api), ShaderStage::Vertex, &backend)
            .unwrap(),
    );
    material.set_fragment_shader(
        ShaderAsset::new(SceneLoader::shader_path(&fragment, api), ShaderStage::Fragment, &backend)
            .unwrap(),
    );
    material.init().unwrap();
    assert!(material.is_valid());
    assert_eq!(backend.recorded().uploads_to(1), 1);

    material.set_base_color([0.0, 0.0, 1.0, 1.0]).unwrap();
    assert_eq!(backend.recorded().uploads_to(1), 2);
}

fn unlit_material(fixture: &Fixture, backend: &DummyBackend, base: &str) -> Material {
    let api = backend.graphics_api();
    let (vertex, fragment) = fixture.write_shaders(base);
    let mut material = Material::new(backend).unwrap();
    material.set_vertex_shader(
        ShaderAsset::new(SceneLoader::shader_path(&vertex, api), ShaderStage::Vertex, backend)
            .unwrap(),
    );
    material.set_fragment_shader(
        ShaderAsset::new(SceneLoader::shader_path(&fragment, api), ShaderStage::Fragment, backend)
            .unwrap(),
    );
    material
}

#[rstest]
#[case::opengl(GraphicsApi::OpenGl)]
#[case::vulkan(GraphicsApi::Vulkan)]
#[case::directx12(GraphicsApi::DirectX12)]
fn material_relinks_after_shader_swap(#[case] api: GraphicsApi) {
    let fixture = Fixture::new();
    let backend = ready_backend(api);
    let mut material = unlit_material(&fixture, &backend, SHADER_BASE);
    material.init().unwrap();
    assert!(material.is_valid());

    // Same material, initialized again without changes
    material.init().unwrap();
    assert!(material.is_valid());

    let (vertex, _) = fixture.write_shaders("lit");
    material.set_vertex_shader(
        ShaderAsset::new(SceneLoader::shader_path(&vertex, api), ShaderStage::Vertex, &backend)
            .unwrap(),
    );
    assert!(!material.is_valid());
    material.init().unwrap();
    assert!(material.is_valid());
    assert_eq!(backend.recorded().programs_linked, 3);
}

#[test]
fn failed_init_does_not_poison_the_next_one() {
    let fixture = Fixture::new();
    let backend = ready_backend(GraphicsApi::OpenGl);
    let mut material = unlit_material(&fixture, &backend, SHADER_BASE);
    let path = SceneLoader::shader_path(&fixture.path_string("unlit.vxs"), GraphicsApi::OpenGl);

    material.set_fragment_shader(ShaderAsset::new(&path, ShaderStage::Vertex, &backend).unwrap());
    assert!(material.init().is_err());

    let (_, fragment) = fixture.write_shaders(SHADER_BASE);
    material.set_fragment_shader(
        ShaderAsset::new(
            SceneLoader::shader_path(&fragment, GraphicsApi::OpenGl),
            ShaderStage::Fragment,
            &backend,
        )
        .unwrap(),
    );
    material.init().unwrap();
    assert!(material.is_valid());
}

#[rstest]
#[case::opengl(GraphicsApi::OpenGl)]
#[case::vulkan(GraphicsApi::Vulkan)]
#[case::directx12(GraphicsApi::DirectX12)]
fn every_draw_uploads_its_own_base_color(#[case] api: GraphicsApi) {
    const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
    const BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];

    let fixture = Fixture::new();
    let obj_path = fixture.write_obj("triangle.obj", TRIANGLE_OBJ);
    let compiled = CompiledScene {
        camera: camera_45(),
        table: SceneTable::Meshes(
            [RED, BLUE]
                .into_iter()
                .map(|color| MeshData {
                    obj_path: obj_path.clone(),
                    material: fixture.material(color),
                })
                .collect(),
        ),
        lights: directional_lights(1),
    };

    let mut renderer = Renderer::new(Box::new(ready_backend(api)));
    let mut scene = SceneLoader::new()
        .load_bytes(&compiled.encode().unwrap(), renderer.backend_mut())
        .unwrap();
    // Blue was initialized last
    assert_eq!(recorded(&renderer).material_colors(), vec![RED, BLUE]);

    for _ in 0..2 {
        let before = recorded(&renderer).material_colors().len();
        let stats = renderer.render(&mut scene).unwrap();
        renderer.present().unwrap();
        assert_eq!(stats.drawn, 2);
        let colors = recorded(&renderer).material_colors();
        assert_eq!(&colors[before..], &[RED, BLUE]);
    }
}

#[rstest]
#[case::cube(Mesh::cube(), 36)]
#[case::triangle(Mesh::new(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]), 3)]
fn meshes_hold_whole_vertices(#[case] mut mesh: Mesh, #[case] vertices: usize) {
    assert_eq!(mesh.vertices().len() % 3, 0);
    assert_eq!(mesh.vertices().len(), mesh.normals().len());
    assert_eq!(mesh.vertex_count(), vertices);
    assert!(mesh.validate().is_ok());

    let backend = ready_backend(GraphicsApi::Vulkan);
    assert!(!mesh.is_configured());
    mesh.configure(&backend).unwrap();
    assert!(mesh.is_configured());
    assert_eq!(mesh.handle().vertex_count() as usize, vertices);
}

#[rstest]
#[case::ragged(vec![0.0; 7], vec![0.0; 7])]
#[case::mismatched(vec![0.0; 9], vec![0.0; 6])]
#[case::empty(Vec::new(), Vec::new())]
fn malformed_meshes_are_rejected(#[case] vertices: Vec<f32>, #[case] normals: Vec<f32>) {
    let mut mesh = Mesh::new(vertices, normals);
    assert!(mesh.validate().is_err());
    let backend = ready_backend(GraphicsApi::OpenGl);
    assert!(mesh.configure(&backend).is_err());
    assert!(!mesh.is_configured());
}

#[test]
fn objects_without_mesh_are_skipped_every_frame() {
    let mut renderer = Renderer::new(Box::new(ready_backend(GraphicsApi::OpenGl)));
    let mut scene = Scene::new();
    scene.set_camera(Camera::new());
    scene.add_game_object(GameObject::new());

    let mut orphan_renderer = GameObject::new();
    orphan_renderer.set_mesh_renderer(MeshRenderer::default());
    scene.add_game_object(orphan_renderer);

    for _ in 0..2 {
        let stats = renderer.render(&mut scene).unwrap();
        assert_eq!((stats.drawn, stats.skipped), (0, 2));
        renderer.present().unwrap();
    }
    assert_eq!(renderer.frame_count(), 2);
}

#[test]
fn camera_background_becomes_clear_color() {
    let backend = ready_backend(GraphicsApi::Vulkan);
    let mut renderer = Renderer::new(Box::new(backend));
    let mut camera = Camera::new();
    camera.set_background_color([0.9, 0.1, 0.1, 1.0]);
    let mut scene = Scene::new();
    scene.set_camera(camera);

    renderer.render(&mut scene).unwrap();
    let state = renderer.backend().camera().copied().unwrap();
    assert_eq!(state.background_color, [0.9, 0.1, 0.1, 1.0]);
}
