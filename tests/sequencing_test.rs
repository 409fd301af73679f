//! Burst fusion, frame attribution and hardware diffing against the mock
//! microscope.

mod common;

use common::{axis_index, engine_for, run_events};
use rust_acqeng::acquisition::Acquisition;
use rust_acqeng::error::AcqError;
use rust_acqeng::event::{AcquisitionEvent, CaptureEvent};
use rust_acqeng::hardware::mock::MockCore;
use rust_acqeng::hooks::{FnHook, HookPoint};
use rust_acqeng::metadata::keys;
use rust_acqeng::sink::MemorySink;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn z_slices(n: i64) -> Vec<CaptureEvent> {
    (0..n)
        .map(|i| CaptureEvent::new().with_z(Some(i), i as f64))
        .collect()
}

#[tokio::test]
async fn test_exposure_change_fuses_until_config_changes() {
    let core = Arc::new(MockCore::new().with_exposure_sequencing("Camera", 10));
    let engine = engine_for(&core);
    let sink = Arc::new(MemorySink::new());
    let acquisition = Acquisition::new(&engine, sink.clone());

    let events = vec![
        CaptureEvent::new()
            .with_axis("time", 0i64)
            .with_config("Channel", "DAPI")
            .with_exposure(10.0),
        CaptureEvent::new()
            .with_axis("time", 1i64)
            .with_config("Channel", "DAPI")
            .with_exposure(20.0),
        CaptureEvent::new()
            .with_axis("time", 2i64)
            .with_config("Channel", "FITC")
            .with_exposure(20.0),
    ];
    let (submitted, completed) = run_events(&acquisition, events).await;
    submitted.unwrap();
    completed.unwrap();

    assert_eq!(core.command_count("start_sequence_acquisition Camera 2"), 1);
    assert_eq!(core.command_count("start_sequence_acquisition"), 1);
    assert_eq!(core.command_count("load_exposure_sequence Camera [10.0, 20.0]"), 1);
    assert_eq!(core.command_count("snap_image"), 1);
    assert_eq!(core.command_count("set_config Channel DAPI"), 1);
    assert_eq!(core.command_count("set_config Channel FITC"), 1);
    // The snap after the burst already sits at 20 ms
    assert_eq!(core.command_count("set_exposure"), 0);

    let order: Vec<_> = sink
        .images()
        .iter()
        .map(|image| axis_index(image, "time"))
        .collect();
    assert_eq!(order, vec![Some(0), Some(1), Some(2)]);
}

#[tokio::test]
async fn test_z_stack_runs_as_one_burst() {
    let core = Arc::new(MockCore::new().with_stage_sequencing("Z", 100));
    let engine = engine_for(&core);
    let sink = Arc::new(MemorySink::new());
    let acquisition = Acquisition::new(&engine, sink.clone());

    let exposures = Arc::new(AtomicUsize::new(0));
    let sequences = Arc::new(AtomicUsize::new(0));
    let per_exposure = Arc::clone(&exposures);
    let per_sequence = Arc::clone(&sequences);
    acquisition
        .add_hook(
            HookPoint::AfterExposure,
            Arc::new(FnHook::observer(move |event| {
                if !matches!(event, AcquisitionEvent::Finished) {
                    per_exposure.fetch_add(1, Ordering::SeqCst);
                }
            })),
        )
        .unwrap();
    acquisition
        .add_hook(
            HookPoint::AfterSequence,
            Arc::new(FnHook::observer(move |event| {
                if !matches!(event, AcquisitionEvent::Finished) {
                    per_sequence.fetch_add(1, Ordering::SeqCst);
                }
            })),
        )
        .unwrap();

    let (submitted, completed) = run_events(&acquisition, z_slices(5)).await;
    submitted.unwrap();
    completed.unwrap();

    assert_eq!(
        core.command_count("load_stage_sequence Z [0.0, 1.0, 2.0, 3.0, 4.0]"),
        1
    );
    assert_eq!(core.command_count("start_sequence_acquisition Camera 5"), 1);
    assert_eq!(core.command_count("set_position"), 0);
    assert_eq!(core.command_count("snap_image"), 0);
    assert_eq!(core.command_count("stop_stage_sequence Z"), 1);

    let slices: Vec<_> = sink
        .images()
        .iter()
        .map(|image| axis_index(image, "z"))
        .collect();
    assert_eq!(slices, (0..5).map(Some).collect::<Vec<_>>());
    assert_eq!(exposures.load(Ordering::SeqCst), 5);
    assert_eq!(sequences.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unsequenceable_z_moves_every_step() {
    let core = Arc::new(MockCore::new());
    let engine = engine_for(&core);
    let sink = Arc::new(MemorySink::new());
    let acquisition = Acquisition::new(&engine, sink.clone());

    let (_, completed) = run_events(&acquisition, z_slices(3)).await;
    completed.unwrap();

    assert_eq!(core.command_count("set_position Z"), 3);
    assert_eq!(core.command_count("snap_image"), 3);
    assert_eq!(core.command_count("start_sequence_acquisition"), 0);
    assert_eq!(core.position("Z"), Some(2.0));
    assert_eq!(sink.len(), 3);
}

#[tokio::test]
async fn test_frame_timeout_abandons_only_that_burst() {
    let core = Arc::new(MockCore::new().with_stage_sequencing("Z", 10));
    core.drop_frames(1, 4);
    let engine = engine_for(&core);
    let sink = Arc::new(MemorySink::new());
    let acquisition = Acquisition::new(&engine, sink.clone());

    let mut events: Vec<_> = z_slices(5)
        .into_iter()
        .map(|event| event.with_timeout_ms(50.0))
        .collect();
    // Property changes are never fused, so this runs on its own
    events.push(
        CaptureEvent::new()
            .with_axis("time", 1i64)
            .with_property("Shutter", "State", "Open"),
    );

    let (submitted, completed) = run_events(&acquisition, events).await;
    submitted.expect("a frame timeout is not fatal");
    completed.expect("a frame timeout is not fatal");
    assert!(!acquisition.is_abort_requested());

    assert_eq!(core.command_count("start_sequence_acquisition Camera 5"), 1);
    assert_eq!(core.command_count("stop_sequence_acquisition"), 1);
    assert_eq!(core.command_count("clear_circular_buffer"), 1);
    assert_eq!(core.command_count("set_property Shutter State Open"), 1);
    assert_eq!(core.command_count("snap_image"), 1);

    let images = sink.images();
    assert_eq!(images.len(), 2);
    assert_eq!(axis_index(&images[0], "z"), Some(0));
    assert_eq!(axis_index(&images[1], "time"), Some(1));
}

#[tokio::test]
async fn test_diffing_resets_between_acquisitions() {
    let core = Arc::new(MockCore::new());
    let engine = engine_for(&core);
    let event = || vec![CaptureEvent::new().with_z(Some(0), 1.0)];

    for _ in 0..2 {
        let sink = Arc::new(MemorySink::new());
        let acquisition = Acquisition::new(&engine, sink.clone());
        let (_, completed) = run_events(&acquisition, event()).await;
        completed.unwrap();
        assert_eq!(sink.len(), 1);
    }
    assert_eq!(core.command_count("set_position Z 1"), 2);
}

#[tokio::test]
async fn test_repeated_targets_are_not_reissued() {
    let core = Arc::new(MockCore::new());
    let engine = engine_for(&core);
    let sink = Arc::new(MemorySink::new());
    let acquisition = Acquisition::new(&engine, sink.clone());

    // Start times keep these from fusing
    let events = (0..3)
        .map(|t| {
            CaptureEvent::new()
                .with_axis("time", t as i64)
                .with_config("Channel", "Cy5")
                .with_z(Some(0), 2.5)
                .with_min_start_time_ms(t)
        })
        .collect();
    let (_, completed) = run_events(&acquisition, events).await;
    completed.unwrap();

    assert_eq!(core.command_count("set_config Channel Cy5"), 1);
    assert_eq!(core.command_count("set_position Z"), 1);
    assert_eq!(core.command_count("snap_image"), 3);
    assert_eq!(core.property("Laser", "Power").as_deref(), Some("30"));
}

#[tokio::test]
async fn test_ring_overflow_is_fatal() {
    let core = Arc::new(
        MockCore::new()
            .with_ring_capacity(2)
            .with_stage_sequencing("Z", 10),
    );
    let engine = engine_for(&core);
    let sink = Arc::new(MemorySink::new());
    let acquisition = Acquisition::new(&engine, sink.clone());

    let closes = Arc::new(AtomicUsize::new(0));
    let on_close = Arc::clone(&closes);
    acquisition
        .add_hook(
            HookPoint::AfterExposure,
            Arc::new(FnHook::observer(|_| {}).on_close(move || {
                on_close.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

    let (submitted, completed) = run_events(&acquisition, z_slices(5)).await;
    assert!(matches!(*submitted.unwrap_err(), AcqError::BufferOverflow));
    assert!(matches!(*completed.unwrap_err(), AcqError::BufferOverflow));

    assert!(acquisition.is_abort_requested());
    assert_eq!(core.command_count("stop_stage_sequence Z"), 1);
    assert_eq!(core.command_count("stop_sequence_acquisition Camera"), 1);
    assert_eq!(sink.finish_calls(), 1);
    assert_eq!(sink.len(), 0);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_burst_frames_follow_their_camera() {
    let core = Arc::new(
        MockCore::new()
            .with_camera("Right")
            .with_stage_sequencing("Z", 10),
    );
    let engine = engine_for(&core);
    let sink = Arc::new(MemorySink::new());
    let acquisition = Acquisition::new(&engine, sink.clone());

    let events = z_slices(4)
        .into_iter()
        .enumerate()
        .map(|(i, event)| event.with_camera(if i % 2 == 0 { "Camera" } else { "Right" }))
        .collect();
    let (submitted, completed) = run_events(&acquisition, events).await;
    submitted.unwrap();
    completed.unwrap();

    assert_eq!(core.command_count("start_sequence_acquisition Camera 2"), 1);
    assert_eq!(core.command_count("start_sequence_acquisition Right 2"), 1);
    let frames: Vec<_> = sink
        .images()
        .iter()
        .map(|image| {
            let camera = image
                .tag(keys::CAMERA)
                .and_then(|v| v.as_str())
                .map(str::to_string);
            (camera, axis_index(image, "z"))
        })
        .collect();
    let expected: Vec<(Option<String>, Option<i64>)> =
        [("Camera", 0), ("Camera", 2), ("Right", 1), ("Right", 3)]
            .into_iter()
            .map(|(camera, z)| (Some(camera.to_string()), Some(z)))
            .collect();
    assert_eq!(frames, expected);
}

#[tokio::test]
async fn test_multichannel_burst_waits_for_every_channel() {
    let core = Arc::new(
        MockCore::new()
            .with_camera_channels(2)
            .with_stage_sequencing("Z", 10),
    );
    let engine = engine_for(&core);
    let sink = Arc::new(MemorySink::new());
    let acquisition = Acquisition::new(&engine, sink.clone());

    let exposures = Arc::new(AtomicUsize::new(0));
    let per_exposure = Arc::clone(&exposures);
    acquisition
        .add_hook(
            HookPoint::AfterExposure,
            Arc::new(FnHook::observer(move |event| {
                if !matches!(event, AcquisitionEvent::Finished) {
                    per_exposure.fetch_add(1, Ordering::SeqCst);
                }
            })),
        )
        .unwrap();

    let (submitted, completed) = run_events(&acquisition, z_slices(3)).await;
    submitted.unwrap();
    completed.unwrap();

    assert_eq!(core.command_count("start_sequence_acquisition Camera 3"), 1);
    let slices: Vec<_> = sink
        .images()
        .iter()
        .map(|image| axis_index(image, "z"))
        .collect();
    assert_eq!(slices, vec![Some(0), Some(0), Some(1), Some(1), Some(2), Some(2)]);
    assert_eq!(exposures.load(Ordering::SeqCst), 3);
}
