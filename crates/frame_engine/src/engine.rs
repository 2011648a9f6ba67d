//! Core engine implementation

use crate::config::ConfigError;
use crate::core::config::EngineConfig;
use crate::render::backends::vulkan::{
    FrameCounters, FrameOutcome, Mesh, TextureData, VulkanError, VulkanRenderer, Window, WindowError, WindowSignal,
};
use thiserror::Error;

const DEFAULT_TEXTURE_SIZE: u32 = 64;
const DEFAULT_TEXTURE_CELL: u32 = 8;

/// Main engine struct
///
/// Owns the window and the renderer and drives one frame per loop iteration.
pub struct Engine {
    // Declared first so the GPU objects go before the window's surface owner.
    renderer: VulkanRenderer,
    window: Window,
}

impl Engine {
    /// Create a window and a renderer drawing `mesh` with a checkerboard texture
    pub fn new(config: EngineConfig, mesh: &Mesh) -> Result<Self, EngineError> {
        let texture = TextureData::checkerboard(
            DEFAULT_TEXTURE_SIZE,
            DEFAULT_TEXTURE_CELL,
            [255, 255, 255, 255],
            [96, 96, 96, 255],
        );
        Self::with_texture(config, mesh, &texture)
    }

    /// Create a window and a renderer drawing `mesh` with `texture`
    pub fn with_texture(config: EngineConfig, mesh: &Mesh, texture: &TextureData) -> Result<Self, EngineError> {
        log::info!("Initializing engine...");
        config.validate()?;

        let window = Window::new(&config.window)?;
        let renderer = VulkanRenderer::new(&window, &config.renderer, mesh, texture)?;

        Ok(Self { renderer, window })
    }

    /// Run until the window is closed, then wait for the GPU to go idle
    ///
    /// Frame errors are logged and the loop carries on; only the final idle
    /// wait can fail the call.
    pub fn run(&mut self) -> Result<FrameCounters, EngineError> {
        log::info!("Starting main loop...");

        while !self.window.should_close() {
            self.window.poll_events();
            self.handle_signals();
            if self.window.should_close() {
                break;
            }

            let extent = self.window.framebuffer_extent();
            if extent.width == 0 || extent.height == 0 {
                // Minimized: nothing can be presented until the window has area again.
                self.window.wait_events();
                continue;
            }

            match self.renderer.draw_frame(extent) {
                Ok(FrameOutcome::Skipped) => log::trace!("Frame skipped"),
                Ok(FrameOutcome::Presented { .. }) => {}
                Err(e) => log::error!("Frame failed: {e}"),
            }
        }

        self.renderer.wait_idle()?;

        let counters = self.renderer.scheduler().counters();
        log::info!(
            "Engine shutdown complete: {} frames presented, {} skipped, {} swapchain rebuilds",
            counters.frames_presented,
            counters.frames_skipped,
            counters.recreations
        );
        Ok(counters)
    }

    fn handle_signals(&mut self) {
        for signal in self.window.drain_signals() {
            match signal {
                WindowSignal::FramebufferResized { width, height } => {
                    log::debug!("Framebuffer resized to {width}x{height}");
                    self.renderer.mark_framebuffer_resized();
                }
                WindowSignal::CloseRequested => self.window.set_should_close(true),
            }
        }
    }

    /// The renderer
    pub fn renderer(&self) -> &VulkanRenderer {
        &self.renderer
    }

    /// The window
    pub fn window(&self) -> &Window {
        &self.window
    }
}

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Vulkan failure during setup or teardown
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),

    /// Window creation failure
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
