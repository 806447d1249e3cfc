mod common;

use ash::vk;
use common::{stages, Harness};
use framechain::backend::headless::Call;
use framechain::backend::{
    create_headless_context, CommandBatch, DeviceContext, FrameStatus, HeadlessDriver, Rasterizer,
    SwapchainCreateInfo,
};
use framechain::frame_loop::LoopState;
use framechain::GpuError;
use std::collections::HashSet;

#[test]
fn first_frame_submits_slot_zero() {
    let mut harness = Harness::blocking(3);
    assert_eq!(harness.swapchain.frame_count(), 3);
    assert_eq!(
        harness.swapchain.extent(),
        vk::Extent2D {
            width: 800,
            height: 600
        }
    );
    harness.probe.clear_calls();

    let report = harness.step().unwrap();
    assert_eq!(report.slot, 0);
    assert_eq!(report.frame, 0);
    assert_eq!(harness.frame_loop.state(), LoopState::Idle);

    let submissions = harness.probe.submissions();
    assert_eq!(submissions.len(), 1);
    let (submits, _) = &submissions[0];
    assert_eq!(submits.len(), 1);
    let expected = harness.raw_triple(&harness.frame_loop.slots()[0]);
    assert_eq!(submits[0].command_buffers, expected);

    // Gated by the slot's pair
    let pair = harness.swapchain.get_acquire_present_semaphore_pair().unwrap();
    assert_eq!(submits[0].wait_semaphores, vec![pair.acquire]);
    assert_eq!(submits[0].signal_semaphores, vec![pair.present]);
}

#[test]
fn missing_attachment_fails_before_recording() {
    let (mut context, probe) = create_headless_context().unwrap();
    let _swapchain = context
        .create_swapchain(HeadlessDriver::surface(), &SwapchainCreateInfo::default())
        .unwrap();

    let mut rasterizer = Rasterizer::new(stages());
    rasterizer
        .bind(0, 28, 0, 0, vk::VertexInputRate::VERTEX)
        .bind(0, 28, 1, 12, vk::VertexInputRate::VERTEX);

    assert!(matches!(
        context.create_pipeline(&rasterizer),
        Err(GpuError::IncompleteAttachment { location: 0 })
    ));
    assert!(!probe
        .calls()
        .iter()
        .any(|call| matches!(call, Call::AllocateCommandBuffer { .. } | Call::CreatePipeline(_))));
}

#[test]
fn out_of_date_acquire_submits_nothing() {
    let mut harness = Harness::blocking(3);
    harness.step().unwrap();
    let submitted = harness.probe.submissions().len();

    harness
        .probe
        .script_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
    assert!(matches!(harness.step(), Err(GpuError::SwapchainOutOfDate)));

    assert_eq!(harness.probe.submissions().len(), submitted);
    assert_eq!(harness.swapchain.draw_index(), None);
    assert_eq!(harness.frame_loop.state(), LoopState::Idle);
    assert_eq!(harness.frame_loop.frames(), 1);
}

#[test]
fn out_of_date_present_submits_nothing() {
    let mut harness = Harness::blocking(3);
    harness.step().unwrap();
    let submitted = harness.probe.submissions().len();

    harness
        .probe
        .script_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
    assert!(matches!(harness.step(), Err(GpuError::SwapchainOutOfDate)));

    assert_eq!(harness.probe.submissions().len(), submitted);
    assert_eq!(harness.swapchain.draw_index(), None);
    assert_eq!(harness.swapchain.get_acquire_present_semaphore_pair(), None);
    // Presentation failed, so no new image was requested
    assert!(!matches!(
        harness.probe.calls().last(),
        Some(Call::AcquireNextImage { .. })
    ));
}

#[test]
fn failed_present_leaves_no_slot_acquired() {
    let mut harness = Harness::blocking(3);
    harness.step().unwrap();
    assert_eq!(harness.swapchain.draw_index(), Some(0));

    harness
        .probe
        .script_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR));
    assert!(matches!(
        harness.step(),
        Err(GpuError::Vk(vk::Result::ERROR_SURFACE_LOST_KHR))
    ));
    assert_eq!(harness.swapchain.draw_index(), None);
    assert!(matches!(
        harness.frame_loop.assemble(&harness.swapchain),
        Err(GpuError::NoAcquiredFrame)
    ));
}

#[test]
fn suboptimal_acquire_or_present_is_reported() {
    let mut harness = Harness::blocking(3);
    assert_eq!(harness.step().unwrap().status, FrameStatus::Optimal);

    harness.probe.script_acquire(Ok((1, true)));
    let report = harness.step().unwrap();
    assert_eq!(report.slot, 1);
    assert_eq!(report.status, FrameStatus::Suboptimal);

    harness.probe.script_present(Ok(true));
    assert_eq!(harness.step().unwrap().status, FrameStatus::Suboptimal);

    assert_eq!(harness.step().unwrap().status, FrameStatus::Optimal);
    assert_eq!(harness.probe.submissions().len(), 4);
}

#[test]
fn acquire_timeout_leaves_no_slot_acquired() {
    let mut harness = Harness::blocking(3);
    harness.step().unwrap();
    let submitted = harness.probe.submissions().len();

    harness.probe.script_acquire(Err(vk::Result::TIMEOUT));
    assert!(matches!(harness.step(), Err(GpuError::AcquireTimeout)));
    assert_eq!(harness.swapchain.draw_index(), None);
    assert_eq!(harness.probe.submissions().len(), submitted);

    harness.probe.script_acquire(Err(vk::Result::NOT_READY));
    assert!(matches!(harness.step(), Err(GpuError::AcquireTimeout)));

    let report = harness.step().unwrap();
    assert_eq!(report.frame, 1);
}

#[test]
fn pool_from_another_family_is_rejected() {
    // TRANSFER-only family first, so TRANSFER and GRAPHICS land apart
    let mut device = HeadlessDriver::physical_device();
    device.queue_families.reverse();
    let (driver, probe) = HeadlessDriver::new();
    let mut context = DeviceContext::new(
        Box::new(driver),
        &device,
        &[vk::QueueFlags::GRAPHICS, vk::QueueFlags::TRANSFER],
        &Default::default(),
        &Default::default(),
    )
    .unwrap();

    let mut pool = context.create_command_pool(vk::QueueFlags::TRANSFER).unwrap();
    let graphics = context.queue(vk::QueueFlags::GRAPHICS).unwrap().family;
    assert_ne!(pool.family(), graphics);

    let id = pool.create_command_buffer(&context).unwrap();
    let buffer = pool.get_mut(id).unwrap();
    buffer.begin(&context).unwrap();
    buffer.end(&context).unwrap();
    let mut batch = CommandBatch::new();
    batch.push(id);

    assert!(matches!(
        context.execute(vk::QueueFlags::GRAPHICS, &pool, &[batch.clone()], vk::Fence::null()),
        Err(GpuError::QueueFamilyMismatch { pool: 1, queue: 0 })
    ));
    assert!(probe.submissions().is_empty());

    context
        .execute_and_wait(vk::QueueFlags::TRANSFER, &pool, &[batch])
        .unwrap();
    assert_eq!(probe.submissions().len(), 1);
}

#[test]
fn every_slot_owns_one_distinct_triple() {
    for frame_count in 2..=5u32 {
        let mut harness = Harness::blocking(frame_count);
        let slots = harness.raw_slots();
        assert_eq!(slots.len(), frame_count as usize);

        let distinct: HashSet<vk::CommandBuffer> = slots.iter().flatten().copied().collect();
        assert_eq!(distinct.len(), 3 * frame_count as usize);

        let mut used = HashSet::new();
        for _ in 0..(2 * frame_count) {
            let report = harness.step().unwrap();
            let (submits, _) = harness.probe.submissions().pop().unwrap();
            let submitted = &submits[0].command_buffers;

            let owners: Vec<usize> = slots
                .iter()
                .enumerate()
                .filter(|(_, triple)| triple == &submitted)
                .map(|(slot, _)| slot)
                .collect();
            assert_eq!(owners, vec![report.slot]);
            used.insert(report.slot);
        }
        assert_eq!(used.len(), frame_count as usize);
    }
}

#[test]
fn post_transition_never_precedes_pre_transition() {
    let mut harness = Harness::blocking(3);
    let slots = harness.frame_loop.slots().to_vec();
    for _ in 0..6 {
        harness.step().unwrap();
    }

    for (submits, _) in harness.probe.submissions() {
        for submit in submits {
            for commands in &slots {
                let pre = harness.pool.get(commands.pre_transition).unwrap().raw();
                let post = harness.pool.get(commands.post_transition).unwrap().raw();
                let position = |raw| submit.command_buffers.iter().position(|&c| c == raw);
                if let (Some(pre), Some(post)) = (position(pre), position(post)) {
                    assert!(pre < post);
                }
            }
        }
    }
}

#[test]
fn submitted_batches_pair_waits_with_stages() {
    let mut harness = Harness::blocking(3);
    for _ in 0..4 {
        harness.step().unwrap();
    }
    for (submits, _) in harness.probe.submissions() {
        for submit in submits {
            assert_eq!(submit.wait_semaphores.len(), submit.wait_stages.len());
        }
    }
}

#[test]
fn mismatched_batch_is_rejected_whole() {
    let harness = Harness::blocking(3);
    let commands = harness.frame_loop.slots()[0];

    let mut good = CommandBatch::new();
    for id in commands.ids() {
        good.push(id);
    }
    let mut bad = good.clone();
    bad.wait_semaphores.push(vk::Semaphore::null());

    let before = harness.probe.submissions().len();
    assert!(matches!(
        harness
            .context
            .execute(vk::QueueFlags::GRAPHICS, &harness.pool, &[good, bad], vk::Fence::null()),
        Err(GpuError::SynchronizationMismatch {
            semaphores: 1,
            stages: 0
        })
    ));
    assert_eq!(harness.probe.submissions().len(), before);
}

#[test]
fn contexts_from_identical_inputs_are_independent() {
    let (mut first, first_probe) = create_headless_context().unwrap();
    let (mut second, second_probe) = create_headless_context().unwrap();
    let baseline = second.resource_count();

    let _swapchain = first
        .create_swapchain(HeadlessDriver::surface(), &SwapchainCreateInfo::default())
        .unwrap();
    assert!(first.resource_count() > baseline);
    assert_eq!(second.resource_count(), baseline);

    second_probe.clear_calls();
    first.destroy();
    assert!(first_probe.calls().contains(&Call::DestroyDevice));
    assert!(second_probe.calls().is_empty());

    let pool = second.create_command_pool(vk::QueueFlags::GRAPHICS).unwrap();
    assert_eq!(second.resource_count(), baseline + 1);
    pool.release(&mut second);
    assert_eq!(second.resource_count(), baseline);
}
