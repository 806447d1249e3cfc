// Frame Loop - acquire, assemble, submit
//
// Each slot of the swapchain owns a pre-recorded command triple
// (pre-transition, draw, post-transition). Every iteration acquires a slot,
// wraps its triple in a batch gated by the slot's semaphore pair and submits
// it to the graphics queue. Presentation happens in the next acquisition.

use ash::vk;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::backend::{
    Buffer, CommandBatch, CommandBufferId, CommandPool, DeviceContext, FenceArena, FrameStatus,
    ImageLayout, Pipeline, Swapchain,
};
use crate::error::{GpuError, Result};

/// How many frames may be in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPolicy {
    /// Submit and wait for the GPU every frame.
    #[default]
    Blocking,
    /// One fence per slot; a slot is only re-submitted once its previous
    /// submission has completed.
    Pipelined,
}

/// What `run` does when the swapchain stops matching the surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfDatePolicy {
    #[default]
    Fatal,
    Recreate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Acquiring,
    Assembling,
    Submitting,
}

/// The three command buffers recorded for one swapchain slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotCommands {
    pub pre_transition: CommandBufferId,
    pub draw: CommandBufferId,
    pub post_transition: CommandBufferId,
}

impl SlotCommands {
    pub fn ids(&self) -> [CommandBufferId; 3] {
        [self.pre_transition, self.draw, self.post_transition]
    }
}

/// Result of one submitted frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    pub slot: usize,
    pub status: FrameStatus,
}

/// The windowing side of the loop.
pub trait WindowSystem {
    fn poll_events(&mut self);
    fn should_close(&self) -> bool;
    /// Current drawable size; zero while minimized.
    fn framebuffer_extent(&self) -> vk::Extent2D;
    fn frame_presented(&mut self, _report: &FrameReport) {}
}

/// Records the per-slot command triples, again after every recreation.
pub trait SlotRecorder {
    fn record(
        &mut self,
        context: &mut DeviceContext,
        swapchain: &mut Swapchain,
        pool: &mut CommandPool,
    ) -> Result<Vec<SlotCommands>>;

    /// Drop everything that refers to the current swapchain images.
    fn release(&mut self, _context: &mut DeviceContext) {}
}

/// Record one triple per slot: PRESENT -> SHADER_READ barrier, a draw of
/// `pipeline` into the slot image, SHADER_READ -> PRESENT barrier.
pub fn record_slot_commands(
    context: &mut DeviceContext,
    swapchain: &mut Swapchain,
    pool: &mut CommandPool,
    pipeline: &Pipeline,
    vertex_buffers: &[&Buffer],
) -> Result<Vec<SlotCommands>> {
    swapchain
        .images_mut()
        .iter_mut()
        .map(|image| {
            let pre_transition = pool.create_command_buffer(context)?;
            let cmd = pool.get_mut(pre_transition)?;
            cmd.begin(context)?;
            cmd.transition(context, image, ImageLayout::PresentSrc, ImageLayout::ShaderReadOnly)?;
            cmd.end(context)?;

            let draw = pool.record_rasterization_call(context, pipeline, image, vertex_buffers)?;

            let post_transition = pool.create_command_buffer(context)?;
            let cmd = pool.get_mut(post_transition)?;
            cmd.begin(context)?;
            cmd.transition(context, image, ImageLayout::ShaderReadOnly, ImageLayout::PresentSrc)?;
            cmd.end(context)?;

            Ok(SlotCommands {
                pre_transition,
                draw,
                post_transition,
            })
        })
        .collect()
}

pub struct FrameLoop {
    slots: Vec<SlotCommands>,
    submission: SubmissionPolicy,
    on_out_of_date: OutOfDatePolicy,
    fences: FenceArena,
    state: LoopState,
    frames: u64,
}

impl FrameLoop {
    /// Takes one triple per swapchain slot; no id may appear twice.
    pub fn new(
        context: &mut DeviceContext,
        swapchain: &Swapchain,
        slots: Vec<SlotCommands>,
        submission: SubmissionPolicy,
        on_out_of_date: OutOfDatePolicy,
    ) -> Result<Self> {
        if slots.len() != swapchain.frame_count() {
            return Err(GpuError::SlotMismatch {
                slots: slots.len(),
                frames: swapchain.frame_count(),
            });
        }

        let mut seen = HashSet::new();
        for id in slots.iter().flat_map(SlotCommands::ids) {
            if !seen.insert(id) {
                return Err(GpuError::SharedCommandBuffer(id));
            }
        }

        let fences = match submission {
            SubmissionPolicy::Blocking => FenceArena::default(),
            SubmissionPolicy::Pipelined => FenceArena::new(context, slots.len())?,
        };

        log::info!(
            "Frame loop ready: {} slots, {:?} submission, {:?} on out-of-date",
            slots.len(),
            submission,
            on_out_of_date
        );
        Ok(Self {
            slots,
            submission,
            on_out_of_date,
            fences,
            state: LoopState::Idle,
            frames: 0,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn slots(&self) -> &[SlotCommands] {
        &self.slots
    }

    /// Frames submitted so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Build the batch for the currently acquired slot.
    pub fn assemble(&self, swapchain: &Swapchain) -> Result<(usize, CommandBatch)> {
        let slot = swapchain.draw_index().ok_or(GpuError::NoAcquiredFrame)?;
        let pair = swapchain
            .get_acquire_present_semaphore_pair()
            .ok_or(GpuError::NoAcquiredFrame)?;
        let commands = self.slots.get(slot).ok_or(GpuError::SlotMismatch {
            slots: self.slots.len(),
            frames: swapchain.frame_count(),
        })?;

        let mut batch = CommandBatch::new();
        batch
            .wait(pair.acquire, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .push(commands.pre_transition)
            .push(commands.draw)
            .push(commands.post_transition)
            .signal(pair.present);
        Ok((slot, batch))
    }

    /// Run one iteration. Nothing is submitted if acquisition fails.
    pub fn step(
        &mut self,
        context: &DeviceContext,
        swapchain: &mut Swapchain,
        pool: &CommandPool,
    ) -> Result<FrameReport> {
        let result = self.advance(context, swapchain, pool);
        self.state = LoopState::Idle;
        result
    }

    fn advance(
        &mut self,
        context: &DeviceContext,
        swapchain: &mut Swapchain,
        pool: &CommandPool,
    ) -> Result<FrameReport> {
        self.state = LoopState::Acquiring;
        let status = swapchain.next_frame(context)?;

        self.state = LoopState::Assembling;
        let (slot, batch) = self.assemble(swapchain)?;

        self.state = LoopState::Submitting;
        match self.submission {
            SubmissionPolicy::Blocking => {
                context.execute_and_wait(vk::QueueFlags::GRAPHICS, pool, &[batch])?;
            }
            SubmissionPolicy::Pipelined => {
                // Resolve first so a bad batch never leaves the fence unsignaled
                batch.resolve(pool)?;
                let fence = self.fences.wait_and_reset(context, slot, u64::MAX)?;
                context.execute(vk::QueueFlags::GRAPHICS, pool, &[batch], fence)?;
            }
        }
        swapchain.finish_frame()?;

        let report = FrameReport {
            frame: self.frames,
            slot,
            status,
        };
        self.frames += 1;
        log::debug!("Frame {} submitted on slot {} ({:?})", report.frame, slot, status);
        Ok(report)
    }

    /// Loop until the window asks to close. Returns the number of frames
    /// submitted.
    pub fn run<W: WindowSystem, R: SlotRecorder>(
        &mut self,
        window: &mut W,
        context: &mut DeviceContext,
        swapchain: &mut Swapchain,
        pool: &mut CommandPool,
        recorder: &mut R,
    ) -> Result<u64> {
        while !window.should_close() {
            window.poll_events();

            match self.step(context, swapchain, pool) {
                Ok(report) => window.frame_presented(&report),
                Err(GpuError::AcquireTimeout) => {
                    log::debug!("No swapchain image within the acquire timeout, skipping");
                }
                Err(GpuError::SwapchainOutOfDate)
                    if self.on_out_of_date == OutOfDatePolicy::Recreate =>
                {
                    self.recover(window, context, swapchain, pool, recorder)?;
                }
                Err(e) => return Err(e),
            }
        }

        self.finish(context, swapchain)?;
        log::info!("Frame loop finished after {} frames", self.frames);
        Ok(self.frames)
    }

    /// Rebuild the swapchain and every triple after an out-of-date error.
    pub fn recover<W: WindowSystem, R: SlotRecorder>(
        &mut self,
        window: &mut W,
        context: &mut DeviceContext,
        swapchain: &mut Swapchain,
        pool: &mut CommandPool,
        recorder: &mut R,
    ) -> Result<()> {
        log::warn!("Swapchain out of date, recreating");
        context.wait_idle()?;

        // Nothing can be created for a minimized window
        let mut extent = window.framebuffer_extent();
        while extent.width == 0 || extent.height == 0 {
            if window.should_close() {
                return Ok(());
            }
            window.poll_events();
            extent = window.framebuffer_extent();
        }

        pool.reset(context);
        recorder.release(context);
        swapchain.recreate(context, extent)?;
        let slots = recorder.record(context, swapchain, pool)?;

        std::mem::take(&mut self.fences).release(context);
        let frames = self.frames;
        *self = Self::new(context, swapchain, slots, self.submission, self.on_out_of_date)?;
        self.frames = frames;
        Ok(())
    }

    /// Present the last submitted frame and wait for the device.
    pub fn finish(&mut self, context: &mut DeviceContext, swapchain: &mut Swapchain) -> Result<()> {
        match swapchain.present_pending(context) {
            Ok(_) | Err(GpuError::SwapchainOutOfDate) => {}
            Err(e) => return Err(e),
        }
        context.wait_idle()?;
        std::mem::take(&mut self.fences).release(context);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::create_headless_context;
    use crate::backend::{HeadlessDriver, SwapchainCreateInfo};

    fn triples(
        context: &DeviceContext,
        pool: &mut CommandPool,
        count: usize,
    ) -> Vec<SlotCommands> {
        (0..count)
            .map(|_| SlotCommands {
                pre_transition: pool.create_command_buffer(context).unwrap(),
                draw: pool.create_command_buffer(context).unwrap(),
                post_transition: pool.create_command_buffer(context).unwrap(),
            })
            .collect()
    }

    #[test]
    fn policies_parse_from_snake_case() {
        #[derive(Deserialize)]
        struct Policies {
            submission: SubmissionPolicy,
            on_out_of_date: OutOfDatePolicy,
        }
        let parsed: Policies =
            toml::from_str("submission = \"pipelined\"\non_out_of_date = \"recreate\"").unwrap();
        assert_eq!(parsed.submission, SubmissionPolicy::Pipelined);
        assert_eq!(parsed.on_out_of_date, OutOfDatePolicy::Recreate);
    }

    #[test]
    fn requires_one_triple_per_slot() {
        let (mut context, _probe) = create_headless_context().unwrap();
        let swapchain = context
            .create_swapchain(HeadlessDriver::surface(), &SwapchainCreateInfo::default())
            .unwrap();
        let mut pool = context.create_command_pool(vk::QueueFlags::GRAPHICS).unwrap();
        let slots = triples(&context, &mut pool, 2);

        assert!(matches!(
            FrameLoop::new(
                &mut context,
                &swapchain,
                slots,
                SubmissionPolicy::Blocking,
                OutOfDatePolicy::Fatal
            ),
            Err(GpuError::SlotMismatch {
                slots: 2,
                frames: 3
            })
        ));
    }

    #[test]
    fn rejects_shared_command_buffers() {
        let (mut context, _probe) = create_headless_context().unwrap();
        let swapchain = context
            .create_swapchain(HeadlessDriver::surface(), &SwapchainCreateInfo::default())
            .unwrap();
        let mut pool = context.create_command_pool(vk::QueueFlags::GRAPHICS).unwrap();
        let mut slots = triples(&context, &mut pool, 3);
        slots[2].draw = slots[0].draw;

        assert!(matches!(
            FrameLoop::new(
                &mut context,
                &swapchain,
                slots.clone(),
                SubmissionPolicy::Blocking,
                OutOfDatePolicy::Fatal
            ),
            Err(GpuError::SharedCommandBuffer(id)) if id == slots[0].draw
        ));
    }

    #[test]
    fn assemble_needs_an_acquired_slot() {
        let (mut context, _probe) = create_headless_context().unwrap();
        let mut swapchain = context
            .create_swapchain(HeadlessDriver::surface(), &SwapchainCreateInfo::default())
            .unwrap();
        let mut pool = context.create_command_pool(vk::QueueFlags::GRAPHICS).unwrap();
        let slots = triples(&context, &mut pool, 3);
        let frame_loop = FrameLoop::new(
            &mut context,
            &swapchain,
            slots.clone(),
            SubmissionPolicy::Blocking,
            OutOfDatePolicy::Fatal,
        )
        .unwrap();

        assert!(matches!(
            frame_loop.assemble(&swapchain),
            Err(GpuError::NoAcquiredFrame)
        ));

        swapchain.next_frame(&context).unwrap();
        let (slot, batch) = frame_loop.assemble(&swapchain).unwrap();
        let pair = swapchain.get_acquire_present_semaphore_pair().unwrap();
        assert_eq!(slot, 0);
        assert_eq!(batch.command_buffers, slots[0].ids().to_vec());
        assert_eq!(batch.wait_semaphores, vec![pair.acquire]);
        assert_eq!(
            batch.wait_stages,
            vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT]
        );
        assert_eq!(batch.signal_semaphores, vec![pair.present]);
    }
}
