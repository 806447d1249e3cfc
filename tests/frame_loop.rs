mod common;

use ash::vk;
use common::{Harness, ScriptedWindow};
use framechain::backend::headless::Call;
use framechain::frame_loop::{OutOfDatePolicy, SubmissionPolicy};
use framechain::GpuError;
use std::collections::{HashMap, HashSet};

const WINDOW: vk::Extent2D = vk::Extent2D {
    width: 800,
    height: 600,
};

#[test]
fn run_stops_when_the_window_closes() {
    let mut harness = Harness::blocking(3);
    let mut window = ScriptedWindow::new(4, WINDOW, |_| {});

    let frames = harness
        .frame_loop
        .run(
            &mut window,
            &mut harness.context,
            &mut harness.swapchain,
            &mut harness.pool,
            &mut harness.scene,
        )
        .unwrap();

    assert_eq!(frames, 4);
    let slots: Vec<usize> = window.presented.iter().map(|report| report.slot).collect();
    assert_eq!(slots, vec![0, 1, 2, 0]);

    // The last frame is presented on the way out
    let presents = harness
        .probe
        .calls()
        .iter()
        .filter(|call| matches!(call, Call::QueuePresent { .. }))
        .count();
    assert_eq!(presents, 4);
}

#[test]
fn fatal_policy_surfaces_out_of_date() {
    let mut harness = Harness::blocking(3);
    let probe = harness.probe.clone();
    let mut window = ScriptedWindow::new(10, WINDOW, move |poll| {
        if poll == 2 {
            probe.script_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        }
    });

    let result = harness.frame_loop.run(
        &mut window,
        &mut harness.context,
        &mut harness.swapchain,
        &mut harness.pool,
        &mut harness.scene,
    );

    assert!(matches!(result, Err(GpuError::SwapchainOutOfDate)));
    assert_eq!(harness.probe.submissions().len(), 1);
    assert_eq!(window.presented.len(), 1);
}

#[test]
fn recreate_policy_rebuilds_and_keeps_looping() {
    let mut harness = Harness::new(3, SubmissionPolicy::Blocking, OutOfDatePolicy::Recreate);
    let old_swapchain = harness.swapchain.raw();
    let old_slots = harness.raw_slots();
    let resized = vk::Extent2D {
        width: 1024,
        height: 768,
    };

    let probe = harness.probe.clone();
    let mut window = ScriptedWindow::new(5, resized, move |poll| {
        if poll == 3 {
            probe.script_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        }
    });

    let frames = harness
        .frame_loop
        .run(
            &mut window,
            &mut harness.context,
            &mut harness.swapchain,
            &mut harness.pool,
            &mut harness.scene,
        )
        .unwrap();

    // Two frames before the resize, two after
    assert_eq!(frames, 4);
    assert_eq!(harness.frame_loop.frames(), 4);
    assert_eq!(harness.swapchain.extent(), resized);
    assert_ne!(harness.swapchain.raw(), old_swapchain);
    assert_eq!(
        harness.scene.pipeline().unwrap().state().extent,
        resized
    );

    let calls = harness.probe.calls();
    assert!(calls.iter().any(|call| matches!(
        call,
        Call::CreateSwapchain { old, extent, .. } if *old == old_swapchain && *extent == resized
    )));
    assert!(calls.contains(&Call::DestroySwapchain(old_swapchain)));
    let pipelines_destroyed = calls
        .iter()
        .filter(|call| matches!(call, Call::DestroyPipeline(_)))
        .count();
    assert_eq!(pipelines_destroyed, 1);

    // Frames after recovery run the re-recorded triples
    let new_slots = harness.raw_slots();
    assert_eq!(new_slots.len(), 3);
    let submissions = harness.probe.submissions();
    assert_eq!(submissions.len(), 4);
    for (submits, _) in &submissions[2..] {
        let submitted = &submits[0].command_buffers;
        assert!(new_slots.contains(submitted));
        assert!(!old_slots.contains(submitted));
    }
}

#[test]
fn recreate_policy_recovers_from_out_of_date_present() {
    let mut harness = Harness::new(3, SubmissionPolicy::Blocking, OutOfDatePolicy::Recreate);
    let old_swapchain = harness.swapchain.raw();
    let old_slots = harness.raw_slots();
    let resized = vk::Extent2D {
        width: 1280,
        height: 720,
    };

    let probe = harness.probe.clone();
    let mut window = ScriptedWindow::new(5, resized, move |poll| {
        if poll == 3 {
            probe.script_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        }
    });

    let frames = harness
        .frame_loop
        .run(
            &mut window,
            &mut harness.context,
            &mut harness.swapchain,
            &mut harness.pool,
            &mut harness.scene,
        )
        .unwrap();

    assert_eq!(frames, 4);
    assert_eq!(harness.swapchain.extent(), resized);
    let calls = harness.probe.calls();
    assert!(calls.iter().any(|call| matches!(
        call,
        Call::CreateSwapchain { old, extent, .. } if *old == old_swapchain && *extent == resized
    )));
    assert!(calls.contains(&Call::DestroySwapchain(old_swapchain)));

    let new_slots = harness.raw_slots();
    let submissions = harness.probe.submissions();
    assert_eq!(submissions.len(), 4);
    for (submits, _) in &submissions[2..] {
        let submitted = &submits[0].command_buffers;
        assert!(new_slots.contains(submitted));
        assert!(!old_slots.contains(submitted));
    }
}

#[test]
fn timed_out_acquire_skips_the_iteration() {
    let mut harness = Harness::blocking(3);
    let probe = harness.probe.clone();
    let mut window = ScriptedWindow::new(4, WINDOW, move |poll| {
        if poll == 2 {
            probe.script_acquire(Err(vk::Result::TIMEOUT));
        }
    });

    let frames = harness
        .frame_loop
        .run(
            &mut window,
            &mut harness.context,
            &mut harness.swapchain,
            &mut harness.pool,
            &mut harness.scene,
        )
        .unwrap();

    assert_eq!(frames, 3);
    let slots: Vec<usize> = window.presented.iter().map(|report| report.slot).collect();
    assert_eq!(slots, vec![0, 1, 2]);
    assert_eq!(harness.probe.submissions().len(), 3);
}

#[test]
fn minimized_window_closing_during_recovery_ends_cleanly() {
    let mut harness = Harness::new(3, SubmissionPolicy::Blocking, OutOfDatePolicy::Recreate);
    let probe = harness.probe.clone();
    let mut window = ScriptedWindow::new(4, vk::Extent2D::default(), move |poll| {
        if poll == 2 {
            probe.script_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        }
    });

    let frames = harness
        .frame_loop
        .run(
            &mut window,
            &mut harness.context,
            &mut harness.swapchain,
            &mut harness.pool,
            &mut harness.scene,
        )
        .unwrap();

    assert_eq!(frames, 1);
    let swapchains_created = harness
        .probe
        .calls()
        .iter()
        .filter(|call| matches!(call, Call::CreateSwapchain { .. }))
        .count();
    assert_eq!(swapchains_created, 1);
}

#[test]
fn pipelined_policy_waits_on_the_slot_fence_before_resubmitting() {
    let mut harness = Harness::new(3, SubmissionPolicy::Pipelined, OutOfDatePolicy::Fatal);
    for _ in 0..7 {
        harness.step().unwrap();
    }

    let calls = harness.probe.calls();
    let mut last_submit: HashMap<vk::Fence, usize> = HashMap::new();
    let mut fences = Vec::new();
    for (index, call) in calls.iter().enumerate() {
        let Call::QueueSubmit { fence, .. } = call else {
            continue;
        };
        assert_ne!(*fence, vk::Fence::null());

        let since = last_submit.get(fence).map_or(0, |&previous| previous + 1);
        let window = &calls[since..index];
        assert!(window.contains(&Call::WaitForFence(*fence)));
        assert!(window.contains(&Call::ResetFence(*fence)));

        last_submit.insert(*fence, index);
        fences.push(*fence);
    }

    assert_eq!(fences.len(), 7);
    let distinct: HashSet<vk::Fence> = fences.iter().copied().collect();
    assert_eq!(distinct.len(), 3);
    // One fence per slot, reused in slot order
    assert_eq!(fences[0], fences[3]);
    assert_eq!(fences[1], fences[4]);
    assert_eq!(fences[2], fences[5]);
}

#[test]
fn pipelined_run_releases_its_fences() {
    let mut harness = Harness::new(3, SubmissionPolicy::Pipelined, OutOfDatePolicy::Fatal);
    let before = harness.context.resource_count();
    let mut window = ScriptedWindow::new(3, WINDOW, |_| {});

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

    assert_eq!(harness.context.resource_count(), before - 3);
    let destroyed = harness
        .probe
        .calls()
        .iter()
        .filter(|call| matches!(call, Call::DestroyFence(_)))
        .count();
    assert_eq!(destroyed, 3);
}
