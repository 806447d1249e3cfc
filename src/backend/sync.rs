// Synchronization primitives
//
// Semaphore pairs for GPU-GPU ordering of one swapchain slot, and the fence
// arena used when more than one frame may be in flight.

use ash::vk;

use super::context::{DeviceContext, ResourceKey};
use crate::error::{GpuError, Result};

/// Acquire/present synchronization for one swapchain slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemaphorePair {
    /// Signaled by the presentation engine once the image is available.
    pub acquire: vk::Semaphore,
    /// Signaled by the GPU once rendering into the image is done.
    pub present: vk::Semaphore,
}

impl SemaphorePair {
    pub(crate) fn new(context: &mut DeviceContext, owner: ResourceKey) -> Result<Self> {
        Ok(Self {
            acquire: context.create_owned_semaphore(Some(owner))?,
            present: context.create_owned_semaphore(Some(owner))?,
        })
    }
}

/// One fence per swapchain slot. A slot's fence is signaled when the last
/// submission that used the slot's command buffers has completed.
#[derive(Debug, Default)]
pub struct FenceArena {
    fences: Vec<vk::Fence>,
}

impl FenceArena {
    pub fn new(context: &mut DeviceContext, slots: usize) -> Result<Self> {
        // Start signaled so the first use of every slot does not block
        let fences = (0..slots)
            .map(|_| context.create_fence(true))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { fences })
    }

    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    pub fn fence(&self, slot: usize) -> Option<vk::Fence> {
        self.fences.get(slot).copied()
    }

    /// Block until the previous submission of `slot` is done, then re-arm.
    pub fn wait_and_reset(
        &self,
        context: &DeviceContext,
        slot: usize,
        timeout: u64,
    ) -> Result<vk::Fence> {
        let fence = self.fence(slot).ok_or(GpuError::UnknownSlot {
            slot,
            len: self.fences.len(),
        })?;
        context.wait_for_fence(fence, timeout)?;
        context.reset_fence(fence)?;
        Ok(fence)
    }

    /// Wait for every slot, e.g. before the arena is rebuilt.
    pub fn wait_all(&self, context: &DeviceContext, timeout: u64) -> Result<()> {
        for &fence in &self.fences {
            context.wait_for_fence(fence, timeout)?;
        }
        Ok(())
    }

    pub fn release(self, context: &mut DeviceContext) {
        for fence in self.fences {
            context.destroy_fence(fence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{create_headless_context, Call};

    #[test]
    fn wait_and_reset_rearms_the_slot_fence() {
        let (mut context, probe) = create_headless_context().unwrap();
        let arena = FenceArena::new(&mut context, 2).unwrap();
        let fence = arena.fence(1).unwrap();

        assert_eq!(arena.wait_and_reset(&context, 1, u64::MAX).unwrap(), fence);
        let calls = probe.calls();
        assert!(calls.ends_with(&[Call::WaitForFence(fence), Call::ResetFence(fence)]));
        arena.release(&mut context);
    }

    #[test]
    fn out_of_range_slot_is_an_error() {
        let (mut context, probe) = create_headless_context().unwrap();
        let arena = FenceArena::new(&mut context, 3).unwrap();
        probe.clear_calls();

        assert!(matches!(
            arena.wait_and_reset(&context, 3, u64::MAX),
            Err(GpuError::UnknownSlot { slot: 3, len: 3 })
        ));
        assert!(probe.calls().is_empty());
        arena.release(&mut context);
    }
}
