// Command recording and submission batches
//
// Command buffers live inside their pool. Everything outside the pool holds a
// `CommandBufferId`, which stops resolving once the pool is reset.

use ash::vk;

use super::buffer::Buffer;
use super::context::{DeviceContext, Resource, ResourceKey};
use super::driver::{DrawDesc, SubmitDesc};
use super::pipeline::Pipeline;
use super::swapchain::{ImageLayout, SwapchainImage};
use crate::error::{GpuError, Result};

/// Non-owning reference to a command buffer of one pool generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CommandBufferId {
    pool: u32,
    generation: u32,
    index: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
}

#[derive(Debug)]
pub struct CommandBuffer {
    id: CommandBufferId,
    raw: vk::CommandBuffer,
    state: CommandBufferState,
}

impl CommandBuffer {
    pub fn id(&self) -> CommandBufferId {
        self.id
    }

    pub fn raw(&self) -> vk::CommandBuffer {
        self.raw
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    fn expect_state(&self, expected: CommandBufferState) -> Result<()> {
        if self.state != expected {
            return Err(GpuError::InvalidCommandBufferState {
                id: self.id,
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    pub fn begin(&mut self, context: &DeviceContext) -> Result<()> {
        self.expect_state(CommandBufferState::Initial)?;
        context.driver().begin_command_buffer(self.raw)?;
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    pub fn end(&mut self, context: &DeviceContext) -> Result<()> {
        self.expect_state(CommandBufferState::Recording)?;
        context.driver().end_command_buffer(self.raw)?;
        self.state = CommandBufferState::Executable;
        Ok(())
    }

    /// Record a layout barrier for `image`. The image's recorded layout has
    /// to be `from`; afterwards it is `to`.
    pub fn transition(
        &mut self,
        context: &DeviceContext,
        image: &mut SwapchainImage,
        from: ImageLayout,
        to: ImageLayout,
    ) -> Result<()> {
        self.expect_state(CommandBufferState::Recording)?;
        if image.layout() != from || from == to {
            return Err(GpuError::InvalidLayoutTransition {
                current: image.layout(),
                from,
                to,
            });
        }

        context
            .driver()
            .cmd_transition_image(self.raw, image.raw, from.vk(), to.vk());
        image.set_layout(to);
        Ok(())
    }
}

pub struct CommandPool {
    key: ResourceKey,
    raw: vk::CommandPool,
    id: u32,
    generation: u32,
    operation: vk::QueueFlags,
    family: u32,
    buffers: Vec<CommandBuffer>,
}

impl DeviceContext {
    /// Create a pool for the queue serving `operation`.
    pub fn create_command_pool(&mut self, operation: vk::QueueFlags) -> Result<CommandPool> {
        let binding = self.queue(operation)?;
        let raw = self
            .driver()
            .create_command_pool(binding.family)
            .map_err(GpuError::creation("command pool"))?;
        let key = self.register(None, Resource::CommandPool(raw));

        log::debug!(
            "Created command pool for {:?} on family {}",
            operation,
            binding.family
        );
        Ok(CommandPool {
            key,
            raw,
            id: self.next_pool_id(),
            generation: 0,
            operation,
            family: binding.family,
            buffers: Vec::new(),
        })
    }
}

impl CommandPool {
    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn operation(&self) -> vk::QueueFlags {
        self.operation
    }

    /// Queue family the pool was created for.
    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn create_command_buffer(&mut self, context: &DeviceContext) -> Result<CommandBufferId> {
        let raw = context
            .driver()
            .allocate_command_buffer(self.raw)
            .map_err(GpuError::creation("command buffer"))?;
        let id = CommandBufferId {
            pool: self.id,
            generation: self.generation,
            index: self.buffers.len() as u32,
        };
        self.buffers.push(CommandBuffer {
            id,
            raw,
            state: CommandBufferState::Initial,
        });
        Ok(id)
    }

    fn slot(&self, id: CommandBufferId) -> Result<usize> {
        let index = id.index as usize;
        if id.pool != self.id || id.generation != self.generation || index >= self.buffers.len() {
            return Err(GpuError::UnknownCommandBuffer(id));
        }
        Ok(index)
    }

    pub fn get(&self, id: CommandBufferId) -> Result<&CommandBuffer> {
        let index = self.slot(id)?;
        Ok(&self.buffers[index])
    }

    pub fn get_mut(&mut self, id: CommandBufferId) -> Result<&mut CommandBuffer> {
        let index = self.slot(id)?;
        Ok(&mut self.buffers[index])
    }

    /// Raw handle of an executable buffer, for submission.
    pub(crate) fn resolve_executable(&self, id: CommandBufferId) -> Result<vk::CommandBuffer> {
        let buffer = self.get(id)?;
        buffer.expect_state(CommandBufferState::Executable)?;
        Ok(buffer.raw)
    }

    /// Record one complete draw of `pipeline` into `target` as a new
    /// executable command buffer.
    ///
    /// `target` must already be recorded into `ShaderReadOnly`. The vertex
    /// count is the first buffer's element count.
    pub fn record_rasterization_call(
        &mut self,
        context: &mut DeviceContext,
        pipeline: &Pipeline,
        target: &SwapchainImage,
        vertex_buffers: &[&Buffer],
    ) -> Result<CommandBufferId> {
        if target.layout() != ImageLayout::ShaderReadOnly {
            return Err(GpuError::UnexpectedLayout {
                expected: ImageLayout::ShaderReadOnly,
                actual: target.layout(),
            });
        }

        let framebuffer = context.create_framebuffer(pipeline, target)?;
        let raw_buffers: Vec<vk::Buffer> = vertex_buffers.iter().map(|b| b.raw()).collect();
        let vertex_count = vertex_buffers
            .first()
            .map(|b| b.element_count())
            .unwrap_or(0);

        let id = self.create_command_buffer(context)?;
        let buffer = self.get_mut(id)?;
        buffer.begin(context)?;
        context.driver().cmd_draw(
            buffer.raw,
            &DrawDesc {
                pipeline: pipeline.raw(),
                framebuffer,
                extent: pipeline.state().extent,
                clear_color: pipeline.state().clear_color,
                vertex_buffers: &raw_buffers,
                vertex_count,
            },
        );
        buffer.end(context)?;
        Ok(id)
    }

    /// Free every buffer and start a new generation. Ids handed out before
    /// stop resolving.
    pub fn reset(&mut self, context: &DeviceContext) {
        if !self.buffers.is_empty() {
            let raws: Vec<vk::CommandBuffer> = self.buffers.iter().map(|b| b.raw).collect();
            context.driver().free_command_buffers(self.raw, &raws);
            self.buffers.clear();
        }
        self.generation += 1;
    }

    /// Destroy the pool and with it every buffer it allocated.
    pub fn release(self, context: &mut DeviceContext) {
        context.retire(self.key);
    }
}

/// One unit of submission: buffers run in order after every wait semaphore
/// has been signaled (each gating its paired stage), then the signal list
/// is signaled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandBatch {
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub command_buffers: Vec<CommandBufferId>,
    pub signal_semaphores: Vec<vk::Semaphore>,
}

impl CommandBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wait(&mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags) -> &mut Self {
        self.wait_semaphores.push(semaphore);
        self.wait_stages.push(stage);
        self
    }

    pub fn push(&mut self, command_buffer: CommandBufferId) -> &mut Self {
        self.command_buffers.push(command_buffer);
        self
    }

    pub fn signal(&mut self, semaphore: vk::Semaphore) -> &mut Self {
        self.signal_semaphores.push(semaphore);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.wait_semaphores.len() != self.wait_stages.len() {
            return Err(GpuError::SynchronizationMismatch {
                semaphores: self.wait_semaphores.len(),
                stages: self.wait_stages.len(),
            });
        }
        Ok(())
    }

    /// Validate and swap every id for its raw handle.
    pub(crate) fn resolve(&self, pool: &CommandPool) -> Result<SubmitDesc> {
        self.validate()?;
        let command_buffers = self
            .command_buffers
            .iter()
            .map(|&id| pool.resolve_executable(id))
            .collect::<Result<Vec<_>>>()?;
        Ok(SubmitDesc {
            wait_semaphores: self.wait_semaphores.clone(),
            wait_stages: self.wait_stages.clone(),
            command_buffers,
            signal_semaphores: self.signal_semaphores.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{create_headless_context, Call};
    use ash::vk::Handle;

    #[test]
    fn buffer_state_machine() {
        let (mut context, _probe) = create_headless_context().unwrap();
        let mut pool = context.create_command_pool(vk::QueueFlags::GRAPHICS).unwrap();
        let id = pool.create_command_buffer(&context).unwrap();

        let buffer = pool.get_mut(id).unwrap();
        assert_eq!(buffer.state(), CommandBufferState::Initial);
        assert!(matches!(
            buffer.end(&context),
            Err(GpuError::InvalidCommandBufferState {
                expected: CommandBufferState::Recording,
                actual: CommandBufferState::Initial,
                ..
            })
        ));

        buffer.begin(&context).unwrap();
        assert!(buffer.begin(&context).is_err());
        buffer.end(&context).unwrap();
        assert_eq!(buffer.state(), CommandBufferState::Executable);
        assert!(pool.resolve_executable(id).is_ok());
    }

    #[test]
    fn unfinished_buffer_does_not_resolve_for_submission() {
        let (mut context, _probe) = create_headless_context().unwrap();
        let mut pool = context.create_command_pool(vk::QueueFlags::GRAPHICS).unwrap();
        let id = pool.create_command_buffer(&context).unwrap();
        pool.get_mut(id).unwrap().begin(&context).unwrap();

        assert!(matches!(
            pool.resolve_executable(id),
            Err(GpuError::InvalidCommandBufferState {
                expected: CommandBufferState::Executable,
                actual: CommandBufferState::Recording,
                ..
            })
        ));
    }

    #[test]
    fn reset_invalidates_old_ids() {
        let (mut context, probe) = create_headless_context().unwrap();
        let mut pool = context.create_command_pool(vk::QueueFlags::GRAPHICS).unwrap();
        let stale = pool.create_command_buffer(&context).unwrap();

        pool.reset(&context);
        assert!(pool.is_empty());
        assert!(matches!(pool.get(stale), Err(GpuError::UnknownCommandBuffer(id)) if id == stale));

        let fresh = pool.create_command_buffer(&context).unwrap();
        assert_ne!(fresh, stale);
        assert!(probe
            .calls()
            .iter()
            .any(|call| matches!(call, Call::FreeCommandBuffers { buffers, .. } if buffers.len() == 1)));
    }

    #[test]
    fn ids_do_not_resolve_in_other_pools() {
        let (mut context, _probe) = create_headless_context().unwrap();
        let mut first = context.create_command_pool(vk::QueueFlags::GRAPHICS).unwrap();
        let second = context.create_command_pool(vk::QueueFlags::TRANSFER).unwrap();
        let id = first.create_command_buffer(&context).unwrap();
        assert!(second.get(id).is_err());
    }

    #[test]
    fn batch_validation_checks_stage_pairing() {
        let semaphore = vk::Semaphore::from_raw(7);
        let mut batch = CommandBatch::new();
        batch
            .wait(semaphore, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .signal(semaphore);
        assert!(batch.validate().is_ok());

        batch.wait_stages.clear();
        assert!(matches!(
            batch.validate(),
            Err(GpuError::SynchronizationMismatch {
                semaphores: 1,
                stages: 0
            })
        ));
    }
}
