// =============================================================================
// FRAMECHAIN DEMO - one triangle, N swapchain slots, pre-recorded commands
// =============================================================================
//
// SETUP (torn down in reverse):
// ┌─────────────────────────────────────────────────────────────────┐
// │  Window (winit) ── instance extensions                          │
// │    └── Instance ── surface                                      │
// │          └── Device Context (first discrete GPU)                │
// │                └── Swapchain, vertex buffer, pipeline,          │
// │                    command pool with one triple per slot        │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Poll window events
// 2. Present the previous slot, acquire the next one
// 3. Batch: wait acquire -> pre-transition, draw, post-transition -> signal
// 4. Submit to the graphics queue (and wait, unless pipelined)
//
// =============================================================================

mod window;

use anyhow::{Context, Result};
use ash::vk;
use framechain::backend::{select_primary_device, DeviceContext, Instance};
use framechain::config::Config;
use framechain::frame_loop::{FrameLoop, SlotRecorder};
use framechain::scene::{load_triangle_stages, TriangleScene};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use window::DemoWindow;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting framechain demo");
    log::info!(
        "Window: {}x{}, {} frames, present mode {}, {:?} submission",
        config.window.width,
        config.window.height,
        config.swapchain.frame_count,
        config.swapchain.present_mode,
        config.frame_loop.submission
    );

    let mut window = DemoWindow::new(&config.window, config.debug.show_fps)?;

    let mut layers = BTreeSet::new();
    if cfg!(debug_assertions) && config.debug.validation_layers {
        layers.insert(VALIDATION_LAYER.to_string());
    }
    let extensions = window.required_instance_extensions()?;

    let mut instance = Instance::new(&config.window.title, [1, 2, 0], &layers, &extensions)
        .context("Failed to create Vulkan instance")?;

    let result = run_on_instance(&config, &mut window, &mut instance);
    instance.destroy();
    result
}

/// Initialize logging, optionally into the configured log file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== framechain log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Failed to open {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

// =============================================================================
// SETUP & TEARDOWN
// =============================================================================

fn run_on_instance(config: &Config, window: &mut DemoWindow, instance: &mut Instance) -> Result<()> {
    let (display, handle) = window.raw_handles()?;
    let surface = instance
        .create_surface(display, handle)
        .context("Failed to create window surface")?;

    let devices = instance.enumerate_devices()?;
    let device = select_primary_device(&devices).context("Failed to select a GPU")?;
    log::info!(
        "Selected GPU: {} (API {}.{}.{})",
        device.name,
        vk::api_version_major(device.api_version),
        vk::api_version_minor(device.api_version),
        vk::api_version_patch(device.api_version)
    );

    let operations = [
        vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        vk::QueueFlags::TRANSFER,
    ];
    let device_extensions: BTreeSet<String> =
        [ash::khr::swapchain::NAME.to_string_lossy().into_owned()].into();
    let mut context = instance
        .create_context(device, &operations, &BTreeSet::new(), &device_extensions)
        .context("Failed to create device context")?;

    let result = render(config, window, &mut context, surface);

    // Everything the context created goes first, then the surface
    context.destroy();
    instance.destroy_surface(surface);
    result
}

fn render(
    config: &Config,
    window: &mut DemoWindow,
    context: &mut DeviceContext,
    surface: vk::SurfaceKHR,
) -> Result<()> {
    let mut swapchain = context
        .create_swapchain(surface, &config.swapchain_create_info())
        .context("Failed to create swapchain")?;

    let stages = load_triangle_stages(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders"))
        .context("Failed to load shaders (was glslc available at build time?)")?;
    let mut scene = TriangleScene::new(context, stages, config.graphics.clear_color)?;

    let mut pool = context.create_command_pool(vk::QueueFlags::GRAPHICS)?;
    let slots = scene
        .record(context, &mut swapchain, &mut pool)
        .context("Failed to record slot commands")?;

    let mut frame_loop = FrameLoop::new(
        context,
        &swapchain,
        slots,
        config.frame_loop.submission,
        config.frame_loop.on_out_of_date,
    )?;

    let frames = frame_loop.run(window, context, &mut swapchain, &mut pool, &mut scene)?;
    log::info!("Rendered {} frames", frames);
    Ok(())
}
