// Driver seam - every call that reaches the GPU goes through here
//
// The protocol types (context, swapchain, command pool, frame loop) only
// deal in raw `vk` handles and plain descriptors. `VulkanDriver` forwards
// them to ash, `HeadlessDriver` records them for inspection.

use ash::prelude::VkResult;
use ash::vk;

use super::shader::ShaderStage;

/// What a surface can do for the selected physical device.
#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Fully resolved swapchain parameters, ready for the driver.
#[derive(Clone, Debug)]
pub struct SwapchainDesc {
    pub surface: vk::SurfaceKHR,
    pub min_image_count: u32,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
    pub clipped: bool,
    pub old_swapchain: vk::SwapchainKHR,
}

#[derive(Clone, Debug)]
pub struct RawSwapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
}

#[derive(Clone, Copy, Debug)]
pub struct BufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub memory: vk::MemoryPropertyFlags,
}

/// Frozen graphics pipeline state handed to the driver.
#[derive(Clone, Debug)]
pub struct PipelineDesc<'a> {
    pub stages: &'a [ShaderStage],
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
    /// One color format per fragment output, ordered by location.
    pub color_formats: Vec<vk::Format>,
    pub extent: vk::Extent2D,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
}

/// One recorded draw of a pipeline into a framebuffer.
#[derive(Clone, Debug)]
pub struct DrawDesc<'a> {
    pub pipeline: RawPipeline,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub vertex_buffers: &'a [vk::Buffer],
    pub vertex_count: u32,
}

/// One `vkQueueSubmit` batch with every handle already resolved.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmitDesc {
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub signal_semaphores: Vec<vk::Semaphore>,
}

pub trait Driver {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    fn queue(&self, family: u32, index: u32) -> vk::Queue;
    fn wait_idle(&self) -> VkResult<()>;
    /// Destroys the logical device. Every resource must already be gone.
    fn destroy_device(&self);

    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;

    /// Creates a buffer and uploads `data` into it (`data` may be empty).
    fn create_buffer(&self, desc: &BufferDesc, data: &[u8]) -> VkResult<vk::Buffer>;
    fn destroy_buffer(&self, buffer: vk::Buffer);

    fn create_command_pool(&self, queue_family: u32) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    fn cmd_transition_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    );
    fn cmd_draw(&self, cmd: vk::CommandBuffer, draw: &DrawDesc<'_>);

    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> VkResult<RawPipeline>;
    fn destroy_pipeline(&self, pipeline: RawPipeline);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    fn surface_support(&self, surface: vk::SurfaceKHR) -> VkResult<SurfaceSupport>;
    fn supports_present(&self, family: u32, surface: vk::SurfaceKHR) -> VkResult<bool>;
    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<RawSwapchain>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout: u64,
    ) -> VkResult<(u32, bool)>;
    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;
    fn queue_submit(&self, queue: vk::Queue, submits: &[SubmitDesc], fence: vk::Fence)
        -> VkResult<()>;
}
