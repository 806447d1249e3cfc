// Headless driver - no GPU required
//
// Hands out synthetic handles and records every call in order. A
// `HeadlessProbe` shares the state with the driver so a test can inspect
// the call log and script failures after the driver has been boxed into a
// `DeviceContext`.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::context::DeviceContext;
use super::device::{PhysicalDevice, QueueFamily};
use super::driver::{
    BufferDesc, DrawDesc, Driver, PipelineDesc, RawPipeline, RawSwapchain, SubmitDesc,
    SurfaceSupport, SwapchainDesc,
};
use crate::error::Result;

/// One driver call as seen by the headless backend.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    WaitIdle,
    DestroyDevice,
    CreateSemaphore(vk::Semaphore),
    DestroySemaphore(vk::Semaphore),
    CreateFence { fence: vk::Fence, signaled: bool },
    DestroyFence(vk::Fence),
    WaitForFence(vk::Fence),
    ResetFence(vk::Fence),
    CreateBuffer { buffer: vk::Buffer, size: vk::DeviceSize },
    DestroyBuffer(vk::Buffer),
    CreateCommandPool { pool: vk::CommandPool, family: u32 },
    DestroyCommandPool(vk::CommandPool),
    AllocateCommandBuffer { pool: vk::CommandPool, buffer: vk::CommandBuffer },
    FreeCommandBuffers { pool: vk::CommandPool, buffers: Vec<vk::CommandBuffer> },
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    TransitionImage {
        cmd: vk::CommandBuffer,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    Draw {
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        vertex_count: u32,
    },
    CreatePipeline(RawPipeline),
    DestroyPipeline(RawPipeline),
    CreateFramebuffer { framebuffer: vk::Framebuffer, view: vk::ImageView },
    DestroyFramebuffer(vk::Framebuffer),
    CreateSwapchain {
        swapchain: vk::SwapchainKHR,
        images: Vec<vk::Image>,
        extent: vk::Extent2D,
        old: vk::SwapchainKHR,
    },
    DestroySwapchain(vk::SwapchainKHR),
    CreateImageView { view: vk::ImageView, image: vk::Image },
    DestroyImageView(vk::ImageView),
    AcquireNextImage {
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        result: VkResult<(u32, bool)>,
    },
    QueuePresent {
        swapchain: vk::SwapchainKHR,
        index: u32,
        wait: vk::Semaphore,
        result: VkResult<bool>,
    },
    QueueSubmit {
        queue: vk::Queue,
        submits: Vec<SubmitDesc>,
        fence: vk::Fence,
    },
}

impl Call {
    /// Raw handle of the object this call created, if it created one.
    pub fn created(&self) -> Option<u64> {
        match self {
            Call::CreateSemaphore(s) => Some(s.as_raw()),
            Call::CreateFence { fence, .. } => Some(fence.as_raw()),
            Call::CreateBuffer { buffer, .. } => Some(buffer.as_raw()),
            Call::CreateCommandPool { pool, .. } => Some(pool.as_raw()),
            Call::CreatePipeline(p) => Some(p.pipeline.as_raw()),
            Call::CreateFramebuffer { framebuffer, .. } => Some(framebuffer.as_raw()),
            Call::CreateSwapchain { swapchain, .. } => Some(swapchain.as_raw()),
            Call::CreateImageView { view, .. } => Some(view.as_raw()),
            _ => None,
        }
    }

    /// Raw handle of the object this call destroyed, if it destroyed one.
    pub fn destroyed(&self) -> Option<u64> {
        match self {
            Call::DestroySemaphore(s) => Some(s.as_raw()),
            Call::DestroyFence(f) => Some(f.as_raw()),
            Call::DestroyBuffer(b) => Some(b.as_raw()),
            Call::DestroyCommandPool(p) => Some(p.as_raw()),
            Call::DestroyPipeline(p) => Some(p.pipeline.as_raw()),
            Call::DestroyFramebuffer(f) => Some(f.as_raw()),
            Call::DestroySwapchain(s) => Some(s.as_raw()),
            Call::DestroyImageView(v) => Some(v.as_raw()),
            _ => None,
        }
    }
}

/// Creation calls that can be scripted to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Creation {
    Semaphore,
    Fence,
    Buffer,
    CommandPool,
    CommandBuffer,
    Pipeline,
    Framebuffer,
    Swapchain,
    ImageView,
}

struct SwapchainState {
    image_count: u32,
    cursor: u32,
}

struct State {
    next_handle: u64,
    calls: Vec<Call>,
    failures: HashMap<Creation, vk::Result>,
    acquire_script: VecDeque<VkResult<(u32, bool)>>,
    present_script: VecDeque<VkResult<bool>>,
    swapchains: HashMap<u64, SwapchainState>,
    surface: SurfaceSupport,
    present_supported: bool,
}

impl State {
    fn handle<H: Handle>(&mut self) -> H {
        self.next_handle += 1;
        H::from_raw(self.next_handle)
    }

    fn check(&mut self, creation: Creation) -> VkResult<()> {
        match self.failures.remove(&creation) {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }
}

fn default_surface() -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 8192,
                height: 8192,
            },
            max_image_array_layers: 1,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::SAMPLED,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

pub struct HeadlessDriver {
    state: Arc<Mutex<State>>,
}

/// Test-side view of a `HeadlessDriver`.
#[derive(Clone)]
pub struct HeadlessProbe {
    state: Arc<Mutex<State>>,
}

impl HeadlessDriver {
    pub fn new() -> (Self, HeadlessProbe) {
        let state = Arc::new(Mutex::new(State {
            next_handle: 0x1000,
            calls: Vec::new(),
            failures: HashMap::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            swapchains: HashMap::new(),
            surface: default_surface(),
            present_supported: true,
        }));
        (
            Self {
                state: state.clone(),
            },
            HeadlessProbe { state },
        )
    }

    /// A discrete GPU with one GRAPHICS|COMPUTE|TRANSFER family and one
    /// TRANSFER-only family.
    pub fn physical_device() -> PhysicalDevice {
        PhysicalDevice {
            raw: vk::PhysicalDevice::from_raw(0x10),
            name: "Headless GPU".to_string(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            api_version: vk::make_api_version(0, 1, 2, 0),
            queue_families: vec![
                QueueFamily {
                    index: 0,
                    flags: vk::QueueFlags::GRAPHICS
                        | vk::QueueFlags::COMPUTE
                        | vk::QueueFlags::TRANSFER,
                    count: 1,
                },
                QueueFamily {
                    index: 1,
                    flags: vk::QueueFlags::TRANSFER,
                    count: 1,
                },
            ],
            extensions: [ash::khr::swapchain::NAME.to_string_lossy().into_owned()].into(),
            layers: Default::default(),
        }
    }

    pub fn surface() -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(0x20)
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

/// Context on a fresh headless driver with the queue set the demo requests:
/// GRAPHICS|COMPUTE and TRANSFER, plus `VK_KHR_swapchain`.
pub fn create_headless_context() -> Result<(DeviceContext, HeadlessProbe)> {
    let (driver, probe) = HeadlessDriver::new();
    let context = DeviceContext::new(
        Box::new(driver),
        &HeadlessDriver::physical_device(),
        &[
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            vk::QueueFlags::TRANSFER,
        ],
        &Default::default(),
        &[ash::khr::swapchain::NAME.to_string_lossy().into_owned()].into(),
    )?;
    Ok((context, probe))
}

impl HeadlessProbe {
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Every `vkQueueSubmit` so far with the fence it signals.
    pub fn submissions(&self) -> Vec<(Vec<SubmitDesc>, vk::Fence)> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::QueueSubmit { submits, fence, .. } => Some((submits.clone(), *fence)),
                _ => None,
            })
            .collect()
    }

    /// Fail the next creation of `kind` with `code`.
    pub fn fail_next(&self, kind: Creation, code: vk::Result) {
        self.state.lock().failures.insert(kind, code);
    }

    /// Queue a result for an upcoming `acquire_next_image`, ahead of the
    /// default round-robin index.
    pub fn script_acquire(&self, result: VkResult<(u32, bool)>) {
        self.state.lock().acquire_script.push_back(result);
    }

    pub fn script_present(&self, result: VkResult<bool>) {
        self.state.lock().present_script.push_back(result);
    }

    pub fn set_surface_extent(&self, extent: vk::Extent2D) {
        self.state.lock().surface.capabilities.current_extent = extent;
    }

    pub fn set_present_supported(&self, supported: bool) {
        self.state.lock().present_supported = supported;
    }
}

impl Driver for HeadlessDriver {
    fn name(&self) -> &str {
        "headless"
    }

    fn queue(&self, family: u32, index: u32) -> vk::Queue {
        vk::Queue::from_raw(0x100 + u64::from(family) * 0x10 + u64::from(index))
    }

    fn wait_idle(&self) -> VkResult<()> {
        self.record(Call::WaitIdle);
        Ok(())
    }

    fn destroy_device(&self) {
        self.record(Call::DestroyDevice);
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state.lock();
        state.check(Creation::Semaphore)?;
        let semaphore = state.handle();
        state.calls.push(Call::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.record(Call::DestroySemaphore(semaphore));
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state.lock();
        state.check(Creation::Fence)?;
        let fence = state.handle();
        state.calls.push(Call::CreateFence { fence, signaled });
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.record(Call::DestroyFence(fence));
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        self.record(Call::WaitForFence(fence));
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        self.record(Call::ResetFence(fence));
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferDesc, _data: &[u8]) -> VkResult<vk::Buffer> {
        let mut state = self.state.lock();
        state.check(Creation::Buffer)?;
        let buffer = state.handle();
        state.calls.push(Call::CreateBuffer {
            buffer,
            size: desc.size,
        });
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.record(Call::DestroyBuffer(buffer));
    }

    fn create_command_pool(&self, queue_family: u32) -> VkResult<vk::CommandPool> {
        let mut state = self.state.lock();
        state.check(Creation::CommandPool)?;
        let pool = state.handle();
        state.calls.push(Call::CreateCommandPool {
            pool,
            family: queue_family,
        });
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.record(Call::DestroyCommandPool(pool));
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        let mut state = self.state.lock();
        state.check(Creation::CommandBuffer)?;
        let buffer = state.handle();
        state.calls.push(Call::AllocateCommandBuffer { pool, buffer });
        Ok(buffer)
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        self.record(Call::FreeCommandBuffers {
            pool,
            buffers: buffers.to_vec(),
        });
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.record(Call::BeginCommandBuffer(cmd));
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.record(Call::EndCommandBuffer(cmd));
        Ok(())
    }

    fn cmd_transition_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) {
        self.record(Call::TransitionImage {
            cmd,
            image,
            old,
            new,
        });
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, draw: &DrawDesc<'_>) {
        self.record(Call::Draw {
            cmd,
            framebuffer: draw.framebuffer,
            vertex_count: draw.vertex_count,
        });
    }

    fn create_pipeline(&self, _desc: &PipelineDesc<'_>) -> VkResult<RawPipeline> {
        let mut state = self.state.lock();
        state.check(Creation::Pipeline)?;
        let pipeline = RawPipeline {
            pipeline: state.handle(),
            layout: state.handle(),
            render_pass: state.handle(),
        };
        state.calls.push(Call::CreatePipeline(pipeline));
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: RawPipeline) {
        self.record(Call::DestroyPipeline(pipeline));
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        view: vk::ImageView,
        _extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let mut state = self.state.lock();
        state.check(Creation::Framebuffer)?;
        let framebuffer = state.handle();
        state.calls.push(Call::CreateFramebuffer { framebuffer, view });
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.record(Call::DestroyFramebuffer(framebuffer));
    }

    fn surface_support(&self, _surface: vk::SurfaceKHR) -> VkResult<SurfaceSupport> {
        Ok(self.state.lock().surface.clone())
    }

    fn supports_present(&self, _family: u32, _surface: vk::SurfaceKHR) -> VkResult<bool> {
        Ok(self.state.lock().present_supported)
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<RawSwapchain> {
        let mut state = self.state.lock();
        state.check(Creation::Swapchain)?;
        let handle: vk::SwapchainKHR = state.handle();
        let images: Vec<vk::Image> = (0..desc.min_image_count).map(|_| state.handle()).collect();
        state.swapchains.insert(
            handle.as_raw(),
            SwapchainState {
                image_count: desc.min_image_count,
                cursor: 0,
            },
        );
        state.calls.push(Call::CreateSwapchain {
            swapchain: handle,
            images: images.clone(),
            extent: desc.extent,
            old: desc.old_swapchain,
        });
        Ok(RawSwapchain { handle, images })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        state.swapchains.remove(&swapchain.as_raw());
        state.calls.push(Call::DestroySwapchain(swapchain));
    }

    fn create_image_view(&self, image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
        let mut state = self.state.lock();
        state.check(Creation::ImageView)?;
        let view = state.handle();
        state.calls.push(Call::CreateImageView { view, image });
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.record(Call::DestroyImageView(view));
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        _timeout: u64,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state.lock();
        let result = match state.acquire_script.pop_front() {
            Some(scripted) => scripted,
            None => match state.swapchains.get_mut(&swapchain.as_raw()) {
                Some(chain) => {
                    let index = chain.cursor;
                    chain.cursor = (chain.cursor + 1) % chain.image_count;
                    Ok((index, false))
                }
                None => Err(vk::Result::ERROR_SURFACE_LOST_KHR),
            },
        };
        state.calls.push(Call::AcquireNextImage {
            swapchain,
            semaphore,
            result,
        });
        result
    }

    fn queue_present(
        &self,
        _queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut state = self.state.lock();
        let result = state.present_script.pop_front().unwrap_or(Ok(false));
        state.calls.push(Call::QueuePresent {
            swapchain,
            index: image_index,
            wait,
            result,
        });
        result
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[SubmitDesc],
        fence: vk::Fence,
    ) -> VkResult<()> {
        self.record(Call::QueueSubmit {
            queue,
            submits: submits.to_vec(),
            fence,
        });
        Ok(())
    }
}
