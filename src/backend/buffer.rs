// Buffers for vertex and storage data
//
// Buffers are created once with their contents and never written again.

use ash::vk;
use bytemuck::Pod;

use super::context::{DeviceContext, Resource, ResourceKey};
use super::driver::BufferDesc;
use crate::error::{GpuError, Result};

#[derive(Clone, Copy, Debug)]
pub struct BufferCreateInfo {
    pub usage: vk::BufferUsageFlags,
    pub memory: vk::MemoryPropertyFlags,
    /// Number of elements; 0 means "as many as the initial data holds".
    pub element_count: u32,
}

impl Default for BufferCreateInfo {
    fn default() -> Self {
        Self {
            usage: vk::BufferUsageFlags::VERTEX_BUFFER,
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            element_count: 0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Buffer {
    key: ResourceKey,
    raw: vk::Buffer,
    size: vk::DeviceSize,
    element_count: u32,
    usage: vk::BufferUsageFlags,
    memory: vk::MemoryPropertyFlags,
}

impl Buffer {
    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn memory(&self) -> vk::MemoryPropertyFlags {
        self.memory
    }
}

impl DeviceContext {
    /// Create a buffer holding `data`.
    pub fn create_buffer<T: Pod>(&mut self, info: &BufferCreateInfo, data: &[T]) -> Result<Buffer> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if !bytes.is_empty() && !info.memory.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            // Initial contents are written through a host mapping
            return Err(GpuError::ResourceCreation {
                kind: "buffer",
                code: vk::Result::ERROR_MEMORY_MAP_FAILED,
            });
        }

        let element_count = if info.element_count == 0 {
            data.len() as u32
        } else {
            info.element_count
        };
        let size = bytes.len().max(1) as vk::DeviceSize;

        let raw = self
            .driver()
            .create_buffer(
                &BufferDesc {
                    size,
                    usage: info.usage,
                    memory: info.memory,
                },
                bytes,
            )
            .map_err(GpuError::creation("buffer"))?;
        let key = self.register(None, Resource::Buffer(raw));

        log::debug!("Created buffer: {} elements, {} bytes", element_count, size);
        Ok(Buffer {
            key,
            raw,
            size,
            element_count,
            usage: info.usage,
            memory: info.memory,
        })
    }
}
