// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a missing file or a missing section falls
// back to the stock 800x600 triple-buffered FIFO setup.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::Path;

use crate::backend::SwapchainCreateInfo;
use crate::frame_loop::{OutOfDatePolicy, SubmissionPolicy};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub swapchain: SwapchainConfig,
    pub graphics: GraphicsConfig,
    pub frame_loop: FrameLoopConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Window".to_string(),
            width: 800,
            height: 600,
            resizable: false,
        }
    }
}

/// Swapchain settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SwapchainConfig {
    pub frame_count: u32,
    pub frame_rate: f32,
    pub pixel_format: String,
    pub present_mode: String,
    pub clipped: bool,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            frame_count: 3,
            frame_rate: 60.0,
            pixel_format: "b8g8r8a8_unorm".to_string(),
            present_mode: "fifo".to_string(),
            clipped: true,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Frame loop settings
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FrameLoopConfig {
    pub submission: SubmissionPolicy,
    pub on_out_of_date: OutOfDatePolicy,
    /// Unset waits forever for the next image. A timed out acquire skips
    /// the iteration.
    pub acquire_timeout_ms: Option<u64>,
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "framechain.log".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> vk::PresentModeKHR {
        match self.swapchain.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.swapchain.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    pub fn get_pixel_format(&self) -> vk::Format {
        match self.swapchain.pixel_format.to_lowercase().as_str() {
            "b8g8r8a8_unorm" => vk::Format::B8G8R8A8_UNORM,
            "b8g8r8a8_srgb" => vk::Format::B8G8R8A8_SRGB,
            "r8g8b8a8_unorm" => vk::Format::R8G8B8A8_UNORM,
            "r8g8b8a8_srgb" => vk::Format::R8G8B8A8_SRGB,
            _ => {
                log::warn!(
                    "Unknown pixel format '{}', defaulting to B8G8R8A8_UNORM",
                    self.swapchain.pixel_format
                );
                vk::Format::B8G8R8A8_UNORM
            }
        }
    }

    /// Acquire timeout in nanoseconds.
    pub fn acquire_timeout(&self) -> u64 {
        self.frame_loop
            .acquire_timeout_ms
            .map_or(u64::MAX, |ms| ms.saturating_mul(1_000_000))
    }

    pub fn swapchain_create_info(&self) -> SwapchainCreateInfo {
        SwapchainCreateInfo {
            frame_count: self.swapchain.frame_count,
            frame_rate: self.swapchain.frame_rate,
            pixel_format: self.get_pixel_format(),
            present_mode: self.get_present_mode(),
            clipped: self.swapchain.clipped,
            extent: vk::Extent2D {
                width: self.window.width,
                height: self.window.height,
            },
            acquire_timeout: self.acquire_timeout(),
            ..Default::default()
        }
    }
}
