#![allow(dead_code)]

use ash::vk;
use framechain::backend::{
    create_headless_context, CommandPool, DeviceContext, HeadlessDriver, HeadlessProbe,
    ShaderStage, Swapchain, SwapchainCreateInfo,
};
use framechain::frame_loop::{
    FrameLoop, FrameReport, OutOfDatePolicy, SlotCommands, SlotRecorder, SubmissionPolicy,
    WindowSystem,
};
use framechain::scene::{triangle_stages, TriangleScene};
use framechain::Result;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Triangle stages with placeholder code; the headless driver never looks
/// at the words.
pub fn stages() -> Vec<ShaderStage> {
    triangle_stages(vec![SPIRV_MAGIC], vec![SPIRV_MAGIC])
}

/// Everything the demo builds, on a headless context.
pub struct Harness {
    pub context: DeviceContext,
    pub probe: HeadlessProbe,
    pub swapchain: Swapchain,
    pub pool: CommandPool,
    pub scene: TriangleScene,
    pub frame_loop: FrameLoop,
}

impl Harness {
    pub fn new(
        frame_count: u32,
        submission: SubmissionPolicy,
        on_out_of_date: OutOfDatePolicy,
    ) -> Self {
        let (mut context, probe) = create_headless_context().unwrap();
        let info = SwapchainCreateInfo {
            frame_count,
            ..Default::default()
        };
        let mut swapchain = context
            .create_swapchain(HeadlessDriver::surface(), &info)
            .unwrap();
        let mut scene = TriangleScene::new(&mut context, stages(), [0.0, 0.0, 0.0, 1.0]).unwrap();
        let mut pool = context.create_command_pool(vk::QueueFlags::GRAPHICS).unwrap();
        let slots = scene.record(&mut context, &mut swapchain, &mut pool).unwrap();
        let frame_loop =
            FrameLoop::new(&mut context, &swapchain, slots, submission, on_out_of_date).unwrap();

        Self {
            context,
            probe,
            swapchain,
            pool,
            scene,
            frame_loop,
        }
    }

    pub fn blocking(frame_count: u32) -> Self {
        Self::new(frame_count, SubmissionPolicy::Blocking, OutOfDatePolicy::Fatal)
    }

    pub fn step(&mut self) -> Result<FrameReport> {
        self.frame_loop
            .step(&self.context, &mut self.swapchain, &self.pool)
    }

    /// Raw handles of one slot's triple, in submission order.
    pub fn raw_triple(&self, commands: &SlotCommands) -> Vec<vk::CommandBuffer> {
        commands
            .ids()
            .iter()
            .map(|&id| self.pool.get(id).unwrap().raw())
            .collect()
    }

    pub fn raw_slots(&self) -> Vec<Vec<vk::CommandBuffer>> {
        self.frame_loop
            .slots()
            .iter()
            .map(|commands| self.raw_triple(commands))
            .collect()
    }
}

/// Scripted window: closes after `close_after` polls and can run a hook
/// on a given poll.
pub struct ScriptedWindow<F: FnMut(usize)> {
    pub polls: usize,
    pub close_after: usize,
    pub extent: vk::Extent2D,
    pub on_poll: F,
    pub presented: Vec<FrameReport>,
}

impl<F: FnMut(usize)> ScriptedWindow<F> {
    pub fn new(close_after: usize, extent: vk::Extent2D, on_poll: F) -> Self {
        Self {
            polls: 0,
            close_after,
            extent,
            on_poll,
            presented: Vec::new(),
        }
    }
}

impl<F: FnMut(usize)> WindowSystem for ScriptedWindow<F> {
    fn poll_events(&mut self) {
        self.polls += 1;
        (self.on_poll)(self.polls);
    }

    fn should_close(&self) -> bool {
        self.polls >= self.close_after
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn frame_presented(&mut self, report: &FrameReport) {
        self.presented.push(*report);
    }
}
