// Error taxonomy for the frame submission engine
//
// Construction-time failures (instance, device, swapchain, pipeline) abort
// setup. Steady-state failures surface from the frame loop.

use ash::vk;
use thiserror::Error;

use crate::backend::command::{CommandBufferId, CommandBufferState};
use crate::backend::ImageLayout;

/// Reasons a logical device context could not be created.
#[derive(Error, Debug)]
pub enum DeviceCreationError {
    #[error("No discrete GPU found")]
    NoDiscreteGpu,
    #[error("No queue family on {device} supports {operation:?}")]
    UnsupportedOperation {
        device: String,
        operation: vk::QueueFlags,
    },
    #[error("Device extension {0} is not available")]
    MissingExtension(String),
    #[error("Device layer {0} is not available")]
    MissingLayer(String),
    #[error("Vulkan error: {0}")]
    Vk(#[from] vk::Result),
}

#[derive(Error, Debug)]
pub enum GpuError {
    #[error("Failed to load Vulkan entry point: {0}")]
    Loading(#[from] ash::LoadingError),
    #[error("Instance creation failed: {0}")]
    InstanceCreation(String),
    #[error("Device creation failed: {0}")]
    DeviceCreation(#[from] DeviceCreationError),
    #[error("Failed to create {kind}: {code}")]
    ResourceCreation {
        kind: &'static str,
        #[source]
        code: vk::Result,
    },
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(vk::Result),
    #[error("Queue family {family} cannot present to the surface")]
    PresentationUnsupported { family: u32 },
    #[error("Swapchain can't have an extent of 0 on either axis, was: {0:?}")]
    InvalidSwapchainExtent(vk::Extent2D),
    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,
    #[error("No swapchain image has been acquired for this frame")]
    NoAcquiredFrame,
    #[error("No swapchain image became available within the acquire timeout")]
    AcquireTimeout,
    #[error("Pool of queue family {pool} can't be submitted to family {queue}")]
    QueueFamilyMismatch { pool: u32, queue: u32 },
    #[error("No fence for slot {slot}, arena holds {len}")]
    UnknownSlot { slot: usize, len: usize },
    #[error("Command buffer {id:?} is {actual:?}, expected {expected:?}")]
    InvalidCommandBufferState {
        id: CommandBufferId,
        expected: CommandBufferState,
        actual: CommandBufferState,
    },
    #[error("Command buffer {0:?} does not belong to this pool or was freed")]
    UnknownCommandBuffer(CommandBufferId),
    #[error("{semaphores} wait semaphores paired with {stages} wait stages")]
    SynchronizationMismatch { semaphores: usize, stages: usize },
    #[error("Fragment output at location {location} has no attachment")]
    IncompleteAttachment { location: u32 },
    #[error("Invalid vertex input at location {location}: {reason}")]
    InvalidVertexInput { location: u32, reason: &'static str },
    #[error("Image is in {current:?}, can't transition {from:?} -> {to:?}")]
    InvalidLayoutTransition {
        current: ImageLayout,
        from: ImageLayout,
        to: ImageLayout,
    },
    #[error("Render target is in {actual:?}, expected {expected:?}")]
    UnexpectedLayout {
        expected: ImageLayout,
        actual: ImageLayout,
    },
    #[error("Command buffer {0:?} is used by more than one swapchain slot")]
    SharedCommandBuffer(CommandBufferId),
    #[error("{slots} command triples recorded for {frames} swapchain images")]
    SlotMismatch { slots: usize, frames: usize },
    #[error("Vulkan error: {0}")]
    Vk(#[from] vk::Result),
}

impl GpuError {
    /// Wraps a driver error code returned while creating `kind`.
    pub fn creation(kind: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |code| GpuError::ResourceCreation { kind, code }
    }
}

pub type Result<T, E = GpuError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    #[test]
    fn errors_are_send_sync() {
        assert_impl_all!(DeviceCreationError: Send, Sync);
        assert_impl_all!(GpuError: Send, Sync);
    }

    #[test]
    fn creation_error_keeps_driver_code() {
        let err = GpuError::creation("buffer")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        match err {
            GpuError::ResourceCreation { kind, code } => {
                assert_eq!(kind, "buffer");
                assert_eq!(code, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
