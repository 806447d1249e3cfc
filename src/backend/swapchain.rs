// Swapchain - Window presentation
//
// Owns the ring of presentable images, one acquire/present semaphore pair
// per image, and the cursor pointing at the currently acquired slot.
// Presentation of the previous slot is folded into `next_frame`.

use ash::vk;

use super::context::{DeviceContext, Resource, ResourceKey};
use super::driver::{SurfaceSupport, SwapchainDesc};
use super::sync::SemaphorePair;
use crate::error::{GpuError, Result};

/// Layouts a presentable image cycles through between submissions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageLayout {
    PresentSrc,
    ShaderReadOnly,
}

impl ImageLayout {
    pub fn vk(self) -> vk::ImageLayout {
        match self {
            ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
            ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

/// One presentable color target of the ring.
#[derive(Clone, Debug)]
pub struct SwapchainImage {
    pub raw: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub extent: vk::Extent2D,
    layout: ImageLayout,
}

impl SwapchainImage {
    /// Layout the image is in once every command recorded so far has run.
    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    pub(crate) fn set_layout(&mut self, layout: ImageLayout) {
        self.layout = layout;
    }
}

#[derive(Clone, Debug)]
pub struct SwapchainCreateInfo {
    pub frame_count: u32,
    /// Target refresh rate, informational only with FIFO presentation.
    pub frame_rate: f32,
    pub pixel_format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub image_usage: vk::ImageUsageFlags,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
    pub clipped: bool,
    pub extent: vk::Extent2D,
    /// Nanoseconds `next_frame` may block on the presentation engine.
    pub acquire_timeout: u64,
}

impl Default for SwapchainCreateInfo {
    fn default() -> Self {
        Self {
            frame_count: 3,
            frame_rate: 60.0,
            pixel_format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: vk::PresentModeKHR::FIFO,
            clipped: true,
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            acquire_timeout: u64::MAX,
        }
    }
}

impl SwapchainCreateInfo {
    /// Match the request against what the surface supports.
    pub fn resolve(
        &self,
        surface: vk::SurfaceKHR,
        support: &SurfaceSupport,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<SwapchainDesc> {
        let caps = &support.capabilities;

        // Requested format if advertised, else whatever comes first
        let surface_format = support
            .formats
            .iter()
            .find(|f| f.format == self.pixel_format && f.color_space == self.color_space)
            .or_else(|| support.formats.first())
            .copied()
            .ok_or(GpuError::ResourceCreation {
                kind: "swapchain",
                code: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            })?;
        if surface_format.format != self.pixel_format {
            log::warn!(
                "Surface does not offer {:?}, using {:?}",
                self.pixel_format,
                surface_format.format
            );
        }

        // FIFO is always supported
        let present_mode = if support.present_modes.contains(&self.present_mode) {
            self.present_mode
        } else {
            log::warn!("Present mode {:?} unavailable, using FIFO", self.present_mode);
            vk::PresentModeKHR::FIFO
        };

        let extent = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: self
                    .extent
                    .width
                    .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: self
                    .extent
                    .height
                    .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        };
        if extent.width == 0 || extent.height == 0 {
            return Err(GpuError::InvalidSwapchainExtent(extent));
        }

        let mut image_count = self.frame_count.max(caps.min_image_count);
        if caps.max_image_count > 0 && image_count > caps.max_image_count {
            image_count = caps.max_image_count;
        }

        Ok(SwapchainDesc {
            surface,
            min_image_count: image_count,
            format: surface_format.format,
            color_space: surface_format.color_space,
            extent,
            usage: self.image_usage,
            pre_transform: caps.current_transform,
            composite_alpha: self.composite_alpha,
            present_mode,
            clipped: self.clipped,
            old_swapchain,
        })
    }
}

/// Outcome of a successful `next_frame`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Optimal,
    /// Still usable, but no longer matches the surface exactly.
    Suboptimal,
}

pub struct Swapchain {
    key: ResourceKey,
    raw: vk::SwapchainKHR,
    surface: vk::SurfaceKHR,
    info: SwapchainCreateInfo,
    desc: SwapchainDesc,
    images: Vec<SwapchainImage>,
    pairs: Vec<SemaphorePair>,
    /// Handed to the presentation engine, swapped into the acquired slot.
    spare: vk::Semaphore,
    present_queue: vk::Queue,
    draw_index: Option<usize>,
    pending_present: Option<usize>,
}

impl DeviceContext {
    pub fn create_swapchain(
        &mut self,
        surface: vk::SurfaceKHR,
        info: &SwapchainCreateInfo,
    ) -> Result<Swapchain> {
        Swapchain::build(self, surface, info, vk::SwapchainKHR::null())
    }
}

impl Swapchain {
    fn build(
        context: &mut DeviceContext,
        surface: vk::SurfaceKHR,
        info: &SwapchainCreateInfo,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self> {
        let graphics = context.queue(vk::QueueFlags::GRAPHICS)?;
        if !context.driver().supports_present(graphics.family, surface)? {
            return Err(GpuError::PresentationUnsupported {
                family: graphics.family,
            });
        }

        let support = context.driver().surface_support(surface)?;
        let desc = info.resolve(surface, &support, old_swapchain)?;
        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}",
            desc.extent.width,
            desc.extent.height,
            desc.format,
            desc.present_mode
        );

        let raw = context
            .driver()
            .create_swapchain(&desc)
            .map_err(GpuError::creation("swapchain"))?;
        let key = context.register(None, Resource::Swapchain(raw.handle));

        match Self::build_slots(context, key, &desc, &raw.images) {
            Ok((images, pairs, spare)) => {
                log::info!("Created swapchain with {} images", images.len());
                Ok(Self {
                    key,
                    raw: raw.handle,
                    surface,
                    info: info.clone(),
                    desc,
                    images,
                    pairs,
                    spare,
                    present_queue: graphics.queue,
                    draw_index: None,
                    pending_present: None,
                })
            }
            Err(e) => {
                context.retire(key);
                Err(e)
            }
        }
    }

    fn build_slots(
        context: &mut DeviceContext,
        key: ResourceKey,
        desc: &SwapchainDesc,
        raw_images: &[vk::Image],
    ) -> Result<(Vec<SwapchainImage>, Vec<SemaphorePair>, vk::Semaphore)> {
        let mut images = Vec::with_capacity(raw_images.len());
        for &image in raw_images {
            let view = context
                .driver()
                .create_image_view(image, desc.format)
                .map_err(GpuError::creation("image view"))?;
            context.register(Some(key), Resource::ImageView(view));
            images.push(SwapchainImage {
                raw: image,
                view,
                format: desc.format,
                usage: desc.usage,
                extent: desc.extent,
                layout: ImageLayout::PresentSrc,
            });
        }

        let pairs = (0..images.len())
            .map(|_| SemaphorePair::new(context, key))
            .collect::<Result<Vec<_>>>()?;
        let spare = context.create_owned_semaphore(Some(key))?;

        Ok((images, pairs, spare))
    }

    pub fn raw(&self) -> vk::SwapchainKHR {
        self.raw
    }

    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn frame_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.desc.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    pub fn images(&self) -> &[SwapchainImage] {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut [SwapchainImage] {
        &mut self.images
    }

    /// Slot acquired by the last successful `next_frame`.
    pub fn draw_index(&self) -> Option<usize> {
        self.draw_index
    }

    /// Semaphore pair of the currently acquired slot.
    pub fn get_acquire_present_semaphore_pair(&self) -> Option<SemaphorePair> {
        self.draw_index.map(|slot| self.pairs[slot])
    }

    /// Present the pending slot (if any), then acquire the next image.
    ///
    /// Blocks until the presentation engine hands out an image or the
    /// acquire timeout runs out (`AcquireTimeout`). On any error no slot is
    /// left acquired.
    pub fn next_frame(&mut self, context: &DeviceContext) -> Result<FrameStatus> {
        let mut status = self.present_pending(context)?;

        let result = context.driver().acquire_next_image(
            self.raw,
            self.spare,
            self.info.acquire_timeout,
        );

        match result {
            Ok((index, suboptimal)) => {
                let slot = index as usize;
                let Some(pair) = self.pairs.get_mut(slot) else {
                    self.draw_index = None;
                    return Err(GpuError::Vk(vk::Result::ERROR_UNKNOWN));
                };
                // The spare now holds this slot's signal, the slot's old
                // acquire semaphore becomes the next spare.
                self.spare = std::mem::replace(&mut pair.acquire, self.spare);
                self.draw_index = Some(slot);
                if suboptimal {
                    status = FrameStatus::Suboptimal;
                }
                log::trace!("Acquired swapchain slot {}", slot);
                Ok(status)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.draw_index = None;
                Err(GpuError::SwapchainOutOfDate)
            }
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
                self.draw_index = None;
                Err(GpuError::AcquireTimeout)
            }
            Err(e) => {
                self.draw_index = None;
                Err(e.into())
            }
        }
    }

    /// Mark the acquired slot's work as submitted; the next `next_frame`
    /// presents it once its present semaphore is signaled.
    pub fn finish_frame(&mut self) -> Result<usize> {
        let slot = self.draw_index.ok_or(GpuError::NoAcquiredFrame)?;
        self.pending_present = Some(slot);
        Ok(slot)
    }

    /// Present the slot handed over by `finish_frame`, if it has not been
    /// presented yet.
    pub fn present_pending(&mut self, context: &DeviceContext) -> Result<FrameStatus> {
        let Some(slot) = self.pending_present.take() else {
            return Ok(FrameStatus::Optimal);
        };

        let result = context.driver().queue_present(
            self.present_queue,
            self.raw,
            slot as u32,
            self.pairs[slot].present,
        );

        match result {
            Ok(false) => Ok(FrameStatus::Optimal),
            Ok(true) => Ok(FrameStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.draw_index = None;
                Err(GpuError::SwapchainOutOfDate)
            }
            Err(e) => {
                self.draw_index = None;
                Err(e.into())
            }
        }
    }

    /// Rebuild the ring at `extent`, retiring the old swapchain with its
    /// views and semaphores. Every image starts over in `PresentSrc`.
    pub fn recreate(&mut self, context: &mut DeviceContext, extent: vk::Extent2D) -> Result<()> {
        context.wait_idle()?;

        let mut info = self.info.clone();
        info.extent = extent;
        let rebuilt = Self::build(context, self.surface, &info, self.raw)?;

        let old_key = std::mem::replace(self, rebuilt).key;
        context.retire(old_key);
        Ok(())
    }
}
