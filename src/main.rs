// =============================================================================
// VULKAN ENGINE DEMO - compute-shaded frame presented through the engine
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop                                               │
// │    └── LayerStack<VulkanRenderer>                               │
// │          ├── SceneLayer     (begin_frame, clear, dispatch)      │
// │          └── PresentOverlay (end_frame, FPS)                    │
// │  VulkanDevice + Swapchain (created once, window not resizable)  │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW (per RedrawRequested):
// 1. Wait for this slot's previous frame (fence)
// 2. Acquire swapchain image
// 3. Record: clear + compute dispatch into the HDR render target
// 4. Blit render target -> swapchain image, transition to PRESENT
// 5. Submit, present, advance slot
//
// Any failure in setup or in a frame is fatal: logged, then abort.
//
// =============================================================================

mod demo;

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

use demo::{PresentOverlay, SceneLayer};
use vulkan_engine::backend::{Swapchain, VulkanDevice};
use vulkan_engine::config::Config;
use vulkan_engine::error::fatal;
use vulkan_engine::layer::LayerStack;
use vulkan_engine::{Renderer, VulkanRenderer};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let (config, source) = Config::load();

    // Initialize logging, then report how the config was found
    init_logging(&config)?;
    log::info!("Starting Vulkan engine");
    source.log(&config);
    log::info!(
        "Window: {}x{}, present mode: {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Initialize logging. The config level is the default filter; RUST_LOG
/// overrides it. With `log_to_file`, output goes to the log file instead
/// of stderr.
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Env, Target};

    let mut builder =
        Builder::from_env(Env::default().default_filter_or(config.debug.log_level.as_str()));

    if config.debug.log_to_file {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
            .with_context(|| format!("Failed to open log file {}", config.debug.log_file))?;

        writeln!(file, "=== Vulkan Engine Log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
        writeln!(file)?;

        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Window plus engine. Nothing here destroys GPU objects on drop: the
/// device's teardown stack does that in `exiting`.
struct App {
    config: Config,
    window: Option<Arc<Window>>,
    engine: Option<Engine>,
}

/// Everything that exists once Vulkan is up.
struct Engine {
    renderer: VulkanRenderer,
    layers: LayerStack<VulkanRenderer>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            engine: None,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Bring up device, swapchain, renderer and layers for `window`.
    fn init_engine(&self, window: &Arc<Window>) -> Result<Engine> {
        log::info!("Initializing Vulkan...");

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Device (instance, surface, GPU, allocator)
        // ─────────────────────────────────────────────────────────────────────
        // Enable validation layers based on config (and debug build)
        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let device = VulkanDevice::new(&self.config.window.title, enable_validation, &**window)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Swapchain
        // ─────────────────────────────────────────────────────────────────────
        let size = window.inner_size();
        let swapchain = Swapchain::new(
            device.clone(),
            size.width,
            size.height,
            self.config.get_present_mode(),
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Renderer (render target, frame slots, per-image semaphores)
        // ─────────────────────────────────────────────────────────────────────
        let mut renderer = Renderer::init(device, swapchain, self.config.renderer_settings())
            .context("Failed to initialize renderer")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Layers (scene attach builds the pipeline and ends init)
        // ─────────────────────────────────────────────────────────────────────
        let mut layers: LayerStack<VulkanRenderer> = LayerStack::new();
        layers.push_layer(
            Box::new(SceneLayer::new(
                self.config.graphics.shader.clone(),
                self.config.clear_color(),
            )),
            &mut renderer,
        )?;
        layers.push_overlay(
            Box::new(PresentOverlay::new(
                window.clone(),
                self.config.window.title.clone(),
                self.config.debug.show_fps,
            )),
            &mut renderer,
        )?;

        log::info!("Vulkan initialized successfully!");
        Ok(Engine { renderer, layers })
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn render_frame(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        if let Err(e) = engine.layers.update_all(&mut engine.renderer) {
            fatal(&e.context(format!("Frame {} failed", engine.renderer.frame_count())));
        }
    }

    // =========================================================================
    // CLEANUP
    // =========================================================================

    fn shutdown(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.layers.detach_all(&mut engine.renderer);
            log::info!("Rendered {} frames", engine.renderer.frame_count());

            // First pending action is the device-idle wait pushed by end_init
            engine.renderer.device().shutdown();
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Surface invalidation isn't handled, so the size is fixed
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match self.init_engine(&window) {
            Ok(engine) => self.engine = Some(engine),
            Err(e) => fatal(&e.context("Failed to initialize Vulkan")),
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => {
                self.render_frame();
            }

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Called when the event loop is about to block waiting for events.
    /// We use this to request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}
