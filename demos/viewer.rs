//! # Scene Viewer
//!
//! Opens a window, loads a compiled scene and renders it with the chosen API.
//!
//! ```text
//! cargo run --example viewer -- --api vulkan --scene assets/scene.bin
//! ```

use std::path::PathBuf;

use clap::Parser;
use scene_renderer::window::{self, Window};
use scene_renderer::{
    CapacityPolicy, GraphicsApi, Renderer, RendererConfig, SceneLoader, SceneManager,
};
use winit::event_loop::EventLoop;

#[derive(Parser, Debug)]
#[command(name = "viewer", about = "Render a compiled scene")]
struct Args {
    /// Graphics API: opengl, webgl, vulkan or directx12
    #[arg(long, default_value = "opengl")]
    api: GraphicsApi,

    /// Compiled scene file
    #[arg(long, default_value = "assets/scene.bin")]
    scene: PathBuf,

    /// Enable Vulkan validation layers
    #[arg(long)]
    validation: bool,

    #[arg(long)]
    no_vsync: bool,

    /// Refuse scenes whose tables exceed the format capacity instead of truncating
    #[arg(long)]
    strict: bool,

    /// Exit after this many frames
    #[arg(long)]
    frames: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = RendererConfig {
        graphics_api: args.api,
        vsync: !args.no_vsync,
        validation: args.validation,
        capacity_policy: if args.strict {
            CapacityPolicy::Reject
        } else {
            CapacityPolicy::Truncate
        },
        ..RendererConfig::default()
    };

    let event_loop = EventLoop::new()?;
    let window = Window::new(&event_loop, &config)?;

    let mut renderer = Renderer::init_backend(config.graphics_api, &config)?;
    renderer.init_window_context(window.display_handle()?)?;
    renderer.init(window.window_arc())?;

    let mut scenes = SceneManager::new(SceneLoader::with_policy(config.capacity_policy));
    scenes.add_scene("main", &args.scene);
    scenes.load_scene("main", renderer.backend_mut())?;

    let frame_limit = args.frames;
    window::run(event_loop, window, move |window| {
        if let Some((width, height)) = window.take_resize() {
            if let Err(e) = renderer.resize(width, height) {
                log::error!("Resize failed: {e}");
            }
            if let Some(camera) = scenes.active_scene_mut().and_then(|s| s.camera_mut()) {
                camera.set_view_rect(width as f32, height as f32);
            }
        }

        let Some(scene) = scenes.active_scene_mut() else {
            return false;
        };
        match renderer.render(scene) {
            Ok(_) => {
                if let Err(e) = renderer.present() {
                    log::warn!("Present failed: {e}");
                }
            }
            Err(e) => log::warn!("Frame skipped: {e}"),
        }

        let keep_running = frame_limit.map_or(true, |limit| renderer.frame_count() < limit);
        if !keep_running {
            scenes.unload(renderer.backend_mut());
        }
        keep_running
    })?;
    Ok(())
}
