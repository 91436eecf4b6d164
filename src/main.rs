// =============================================================================
// vk-quad - a single mesh rendered with Vulkan
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit EventLoop (window, input)                                │
// │    └── FrameCycle (fence, acquire, record, submit, present)     │
// │          └── Renderer (swapchain, pipeline, mesh, sync)         │
// │                └── VulkanDevice (selected adapter + queues)     │
// └─────────────────────────────────────────────────────────────────┘
//
// Exits with -1 on any setup failure, 0 after the window is closed.
// =============================================================================

mod backend;
mod config;
mod frame;
mod mesh;
mod renderer;

use anyhow::{Context, Result};
use config::{Config, CONFIG_PATH};
use frame::FrameCycle;
use renderer::Renderer;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() {
    if let Err(e) = run() {
        if log::log_enabled!(log::Level::Error) {
            log::error!("{:?}", e);
        } else {
            eprintln!("{:?}", e);
        }
        std::process::exit(-1);
    }
}

fn run() -> Result<()> {
    // Logging needs the config, so a bad file is only reported afterwards
    let (config, config_error) = match Config::load_from_path(CONFIG_PATH) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    init_logging(&config).context("Failed to initialise logging")?;
    if let Some(e) = config_error {
        log::warn!("{:?}. Using defaults.", e);
    }

    log::info!("Starting vk-quad");
    log::info!(
        "Window: {}x{}, present mode: {}, mesh: {:?}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode,
        config.graphics.mesh
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    // Render continuously, never block waiting for events
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// env_logger at Info by default, RUST_LOG overrides. Optionally into a file.
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    if config.debug.log_to_file {
        let mut file = File::create(&config.debug.log_file)
            .with_context(|| format!("Failed to create log file {:?}", config.debug.log_file))?;
        writeln!(file, "=== vk-quad log ===")?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    Ok(())
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    cycle: Option<FrameCycle<Renderer>>,
    /// First fatal error, returned from `run` once the loop has stopped
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            cycle: None,
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window_attributes = Window::default_attributes()
            .with_title(&self.config.window.title)
            .with_inner_size(PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .context("Failed to create window")?,
        );

        let renderer = Renderer::new(&self.config, window)?;
        self.cycle = Some(FrameCycle::new(renderer));
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.cycle.is_some() {
            return;
        }

        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(cycle) = self.cycle.as_mut() else {
                    return;
                };
                if let Err(e) = cycle.draw_frame() {
                    self.fail(event_loop, anyhow::Error::new(e).context("Render error"));
                }
            }

            _ => {}
        }
    }

    /// Keep redrawing as fast as the present mode allows
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(cycle) = &self.cycle {
            cycle.backend().window().request_redraw();
        }
    }

    /// Tear the renderer down while the window system connection is still alive
    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut cycle) = self.cycle.take() {
            if let Err(e) = cycle.shutdown() {
                log::error!("{}", e);
            }
            log::info!("Exited after {} frames", cycle.frames());
        }
    }
}
