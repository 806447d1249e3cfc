// =============================================================================
// WINDOW - winit side of the frame loop
// =============================================================================
//
// The frame loop drives the window, not the other way round: events are
// pumped once per iteration with a zero timeout instead of handing control
// to `EventLoop::run_app`.

use anyhow::{Context, Result};
use ash::vk;
use framechain::config::WindowConfig;
use framechain::frame_loop::{FrameReport, WindowSystem};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

struct WindowApp {
    config: WindowConfig,
    window: Option<Window>,
    close_requested: bool,
    creation_failed: bool,
}

impl ApplicationHandler for WindowApp {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.title)
            .with_resizable(self.config.resizable)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.width,
                self.config.height,
            ));

        match event_loop.create_window(window_attributes) {
            Ok(window) => self.window = Some(window),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.creation_failed = true;
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.close_requested = true;
                }
            }
            _ => {}
        }
    }
}

pub struct DemoWindow {
    event_loop: EventLoop<()>,
    app: WindowApp,
    show_fps: bool,
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl DemoWindow {
    pub fn new(config: &WindowConfig, show_fps: bool) -> Result<Self> {
        let mut event_loop = EventLoop::new().context("Failed to create event loop")?;
        let mut app = WindowApp {
            config: config.clone(),
            window: None,
            close_requested: false,
            creation_failed: false,
        };

        // The window appears in the first `resumed`
        while app.window.is_none() && !app.creation_failed {
            if let PumpStatus::Exit(code) =
                event_loop.pump_app_events(Some(Duration::from_millis(10)), &mut app)
            {
                anyhow::bail!("Event loop exited during startup (code {})", code);
            }
        }
        if app.creation_failed {
            anyhow::bail!("Failed to create window");
        }

        let now = Instant::now();
        Ok(Self {
            event_loop,
            app,
            show_fps,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        })
    }

    fn window(&self) -> Result<&Window> {
        self.app.window.as_ref().context("Window is gone")
    }

    pub fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        let window = self.window()?;
        let display = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();
        Ok((display, handle))
    }

    /// Instance extensions the platform needs to create a surface.
    pub fn required_instance_extensions(&self) -> Result<BTreeSet<String>> {
        let (display, _) = self.raw_handles()?;
        let names = ash_window::enumerate_required_extensions(display)
            .context("Platform has no Vulkan surface support")?;
        Ok(names
            .iter()
            .map(|&name| unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
            .collect())
    }

    fn update_fps(&mut self, report: &FrameReport) {
        if !self.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
            let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.app.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [slot {}]",
                    self.app.config.title,
                    fps,
                    frame_time * 1000.0,
                    report.slot
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

impl WindowSystem for DemoWindow {
    fn poll_events(&mut self) {
        if let PumpStatus::Exit(_) = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.app)
        {
            self.app.close_requested = true;
        }
    }

    fn should_close(&self) -> bool {
        self.app.close_requested
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        match self.app.window {
            Some(ref window) => {
                let size = window.inner_size();
                vk::Extent2D {
                    width: size.width,
                    height: size.height,
                }
            }
            None => vk::Extent2D::default(),
        }
    }

    fn frame_presented(&mut self, report: &FrameReport) {
        self.update_fps(report);
    }
}
