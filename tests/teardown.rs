mod common;

use ash::vk;
use common::{Harness, ScriptedWindow};
use framechain::backend::headless::{Call, Creation};
use framechain::backend::{create_headless_context, HeadlessDriver, SwapchainCreateInfo};
use framechain::frame_loop::{OutOfDatePolicy, SubmissionPolicy};
use framechain::GpuError;

#[test]
fn destroys_in_reverse_creation_order_then_the_device() {
    let harness = Harness::blocking(3);
    let Harness { context, probe, .. } = harness;

    let created: Vec<u64> = probe.calls().iter().filter_map(Call::created).collect();
    probe.clear_calls();
    context.destroy();

    let calls = probe.calls();
    assert_eq!(calls.first(), Some(&Call::WaitIdle));
    assert_eq!(calls.last(), Some(&Call::DestroyDevice));

    let destroyed: Vec<u64> = calls.iter().filter_map(Call::destroyed).collect();
    let expected: Vec<u64> = created.into_iter().rev().collect();
    assert_eq!(destroyed, expected);
}

#[test]
fn every_handle_is_destroyed_exactly_once_across_recreation() {
    let mut harness = Harness::new(3, SubmissionPolicy::Pipelined, OutOfDatePolicy::Recreate);
    let probe = harness.probe.clone();
    let script = probe.clone();
    let mut window = ScriptedWindow::new(
        6,
        vk::Extent2D {
            width: 640,
            height: 480,
        },
        move |poll| {
            if poll == 2 || poll == 4 {
                script.script_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
            }
        },
    );
    harness
        .frame_loop
        .run(
            &mut window,
            &mut harness.context,
            &mut harness.swapchain,
            &mut harness.pool,
            &mut harness.scene,
        )
        .unwrap();

    let Harness { context, .. } = harness;
    context.destroy();

    let calls = probe.calls();
    let mut created: Vec<u64> = calls.iter().filter_map(Call::created).collect();
    let mut destroyed: Vec<u64> = calls.iter().filter_map(Call::destroyed).collect();
    created.sort_unstable();
    destroyed.sort_unstable();
    assert_eq!(created, destroyed);
    assert_eq!(calls.last(), Some(&Call::DestroyDevice));
}

#[test]
fn dropping_the_context_tears_down_too() {
    let (mut context, probe) = create_headless_context().unwrap();
    context
        .create_swapchain(HeadlessDriver::surface(), &SwapchainCreateInfo::default())
        .unwrap();
    drop(context);

    let calls = probe.calls();
    assert_eq!(calls.last(), Some(&Call::DestroyDevice));
    assert!(calls
        .iter()
        .any(|call| matches!(call, Call::DestroySwapchain(_))));
}

#[test]
fn failed_swapchain_construction_leaves_nothing_behind() {
    let (mut context, probe) = create_headless_context().unwrap();
    let baseline = context.resource_count();

    probe.fail_next(Creation::Semaphore, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
    let result =
        context.create_swapchain(HeadlessDriver::surface(), &SwapchainCreateInfo::default());

    assert!(matches!(
        result,
        Err(GpuError::ResourceCreation {
            kind: "semaphore",
            code: vk::Result::ERROR_OUT_OF_HOST_MEMORY
        })
    ));
    assert_eq!(context.resource_count(), baseline);

    let calls = probe.calls();
    let views_created = calls
        .iter()
        .filter(|call| matches!(call, Call::CreateImageView { .. }))
        .count();
    let views_destroyed = calls
        .iter()
        .filter(|call| matches!(call, Call::DestroyImageView(_)))
        .count();
    assert_eq!(views_created, 3);
    assert_eq!(views_destroyed, 3);
    assert!(calls
        .iter()
        .any(|call| matches!(call, Call::DestroySwapchain(_))));
}

#[test]
fn presentation_needs_a_capable_graphics_family() {
    let (mut context, probe) = create_headless_context().unwrap();
    probe.set_present_supported(false);

    assert!(matches!(
        context.create_swapchain(HeadlessDriver::surface(), &SwapchainCreateInfo::default()),
        Err(GpuError::PresentationUnsupported { family: 0 })
    ));
    assert!(!probe
        .calls()
        .iter()
        .any(|call| matches!(call, Call::CreateSwapchain { .. })));
}
