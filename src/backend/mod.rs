// Backend module - GPU abstraction layer
//
// Protocol types (context, swapchain, command pool, pipeline) sit on top of
// the `Driver` seam; `vulkan` talks to the hardware, `headless` records.

pub mod buffer;
pub mod command;
pub mod context;
pub mod device;
pub mod driver;
#[doc(hidden)]
pub mod headless;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

pub use buffer::{Buffer, BufferCreateInfo};
pub use command::{CommandBatch, CommandBuffer, CommandBufferId, CommandBufferState, CommandPool};
pub use context::{DeviceContext, QueueBinding, ResourceKey};
pub use device::{select_primary_device, DevicePlan, PhysicalDevice, QueueFamily};
pub use driver::Driver;
#[doc(hidden)]
pub use headless::{create_headless_context, HeadlessDriver, HeadlessProbe};
pub use instance::Instance;
pub use pipeline::{Pipeline, PipelineState, Rasterizer};
pub use shader::{ShaderKind, ShaderStage};
pub use swapchain::{FrameStatus, ImageLayout, Swapchain, SwapchainCreateInfo, SwapchainImage};
pub use sync::{FenceArena, SemaphorePair};
pub use vulkan::VulkanDriver;
