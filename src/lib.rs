//! Swapchain-synchronized frame submission.
//!
//! A [`backend::DeviceContext`] creates and owns every GPU resource, a
//! [`backend::Swapchain`] hands out presentable slots with their semaphore
//! pairs, and a [`frame_loop::FrameLoop`] submits one pre-recorded command
//! triple per acquired slot.

pub mod backend;
pub mod config;
pub mod error;
pub mod frame_loop;
pub mod scene;

pub use error::{DeviceCreationError, GpuError, Result};
