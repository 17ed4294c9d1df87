//! Window management using winit

use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, RawDisplayHandle};
use thiserror::Error;
use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    window::{Window as WinitWindow, WindowBuilder},
};

use crate::RendererConfig;

#[derive(Error, Debug)]
pub enum WindowError {
    #[error("Event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("Failed to create window: {0}")]
    Os(#[from] winit::error::OsError),
    #[error("Window handle unavailable: {0}")]
    Handle(#[from] raw_window_handle::HandleError),
}

/// Wrapper around winit window with resize and close tracking
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
}

impl Window {
    /// Create a window sized and titled from the renderer configuration
    pub fn new(event_loop: &EventLoop<()>, config: &RendererConfig) -> Result<Self, WindowError> {
        let window = WindowBuilder::new()
            .with_title(format!("{} ({})", config.title, config.graphics_api))
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .build(event_loop)?;

        Ok(Self {
            window: Arc::new(window),
            width: config.width,
            height: config.height,
            resized: false,
            close_requested: false,
        })
    }

    pub fn window(&self) -> &WinitWindow {
        &self.window
    }

    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    /// Display handle for `RendererBackend::init_window_context`
    pub fn display_handle(&self) -> Result<RawDisplayHandle, WindowError> {
        Ok(self.window.display_handle()?.as_raw())
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// New size if the window was resized since the last call
    pub fn take_resize(&mut self) -> Option<(u32, u32)> {
        std::mem::take(&mut self.resized).then_some((self.width, self.height))
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            _ => {}
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

/// Drive the event loop, calling `frame` once per iteration until the window
/// closes or `frame` returns `false`
pub fn run<F>(event_loop: EventLoop<()>, mut window: Window, mut frame: F) -> Result<(), WindowError>
where
    F: FnMut(&mut Window) -> bool + 'static,
{
    event_loop.run(move |event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => {
                window.handle_event(&event);
                if window.should_close() {
                    elwt.exit();
                }
            }
            Event::AboutToWait => {
                if !frame(&mut window) {
                    elwt.exit();
                }
                window.request_redraw();
            }
            _ => {}
        }
    })?;
    Ok(())
}
