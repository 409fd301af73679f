//! Deciding when capture steps can be fused into one hardware burst.
//!
//! The hardware-control worker grows a buffer of pending steps. Each new
//! step is compared against the *last* buffered step with the length the
//! burst would have after adding it. Because every device limit is checked
//! against that prospective length, a rejection for `n` steps is also a
//! rejection for `n + 1`: once a pair fails, the buffer is flushed.

use crate::error::AcqResult;
use crate::event::{AcquisitionEvent, CaptureEvent, ConfigPreset};
use crate::hardware::HardwareCore;
use anyhow::Result;

/// True if `next` can join a burst that currently ends with `previous`.
///
/// Markers are never sequenceable. For every device class whose target
/// differs between the two steps, the device must support native
/// sequencing with a maximum length of at least `new_seq_length`.
pub async fn is_sequencable(
    core: &dyn HardwareCore,
    previous: &CaptureEvent,
    next: &AcquisitionEvent,
    new_seq_length: usize,
) -> Result<bool> {
    match next {
        AcquisitionEvent::Capture(next) => can_extend(core, previous, next, new_seq_length).await,
        _ => Ok(false),
    }
}

/// [`is_sequencable`] for a capture step known not to be a marker.
pub(crate) async fn can_extend(
    core: &dyn HardwareCore,
    previous: &CaptureEvent,
    next: &CaptureEvent,
    new_seq_length: usize,
) -> Result<bool> {
    if !config_compatible(core, previous.config.as_ref(), next.config.as_ref(), new_seq_length)
        .await?
    {
        return Ok(false);
    }

    if differs(previous.z, next.z) {
        let Some(focus) = core.focus_device().await? else {
            return Ok(false);
        };
        if !core.is_stage_sequenceable(&focus).await?
            || new_seq_length > core.stage_sequence_max_length(&focus).await?
        {
            return Ok(false);
        }
    }

    // Other single-axis stages are never sequenced
    if previous.stage_positions != next.stage_positions {
        return Ok(false);
    }

    if differs(previous.x, next.x) || differs(previous.y, next.y) {
        let Some(xy) = core.xy_stage_device().await? else {
            return Ok(false);
        };
        if !core.is_xy_stage_sequenceable(&xy).await?
            || new_seq_length > core.xy_stage_sequence_max_length(&xy).await?
        {
            return Ok(false);
        }
    }

    if differs(previous.exposure_ms, next.exposure_ms) {
        let camera = match &previous.camera {
            Some(camera) => camera.clone(),
            None => core.camera_device().await?,
        };
        if !core.is_exposure_sequenceable(&camera).await?
            || new_seq_length > core.exposure_sequence_max_length(&camera).await?
        {
            return Ok(false);
        }
    }

    if previous.slm_pattern != next.slm_pattern || previous.properties != next.properties {
        return Ok(false);
    }

    // A burst cannot wait between frames
    if differs(previous.min_start_time_ms, next.min_start_time_ms) {
        return Ok(false);
    }

    Ok(true)
}

/// Both defined and unequal. An unset target leaves the device where it is.
fn differs<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a != b)
}

async fn config_compatible(
    core: &dyn HardwareCore,
    previous: Option<&ConfigPreset>,
    next: Option<&ConfigPreset>,
    new_seq_length: usize,
) -> Result<bool> {
    let (Some(previous), Some(next)) = (previous, next) else {
        return Ok(true);
    };
    if previous == next {
        return Ok(true);
    }
    if previous.group != next.group {
        return Ok(false);
    }
    let before = core.config_data(&previous.group, &previous.preset).await?;
    let after = core.config_data(&next.group, &next.preset).await?;
    for setting in &before {
        let target = after
            .iter()
            .find(|s| s.device == setting.device && s.property == setting.property);
        if target.map(|s| &s.value) == Some(&setting.value) {
            continue;
        }
        if target.is_none() {
            return Ok(false);
        }
        if !core
            .is_property_sequenceable(&setting.device, &setting.property)
            .await?
            || new_seq_length
                > core
                    .property_sequence_max_length(&setting.device, &setting.property)
                    .await?
        {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Fuses buffered steps into one dispatch unit.
pub fn merge_sequence(buffer: Vec<CaptureEvent>) -> AcqResult<AcquisitionEvent> {
    AcquisitionEvent::fused(buffer)
}

/// Fills gaps in a per-child value list.
///
/// Unset entries repeat the previous value; leading gaps take the first
/// defined value. `None` if nothing is defined.
pub(crate) fn fill_sequence<T: Clone>(values: Vec<Option<T>>) -> Option<Vec<T>> {
    let first = values.iter().flatten().next()?.clone();
    let mut last = first;
    Some(
        values
            .into_iter()
            .map(|v| {
                if let Some(v) = v {
                    last = v;
                }
                last.clone()
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockCore;

    fn exposure_event(exposure_ms: f64) -> CaptureEvent {
        CaptureEvent::new().with_exposure(exposure_ms)
    }

    #[tokio::test]
    async fn test_exposure_sequencing_requires_capability() {
        let previous = exposure_event(10.0);
        let next: AcquisitionEvent = exposure_event(20.0).into();

        let plain = MockCore::new();
        assert!(!is_sequencable(&plain, &previous, &next, 2).await.unwrap());

        let capable = MockCore::new().with_exposure_sequencing("Camera", 2);
        assert!(is_sequencable(&capable, &previous, &next, 2).await.unwrap());
        assert!(!is_sequencable(&capable, &previous, &next, 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_identical_events_always_fuse() {
        let core = MockCore::new();
        let event = CaptureEvent::new().with_config("Channel", "DAPI").with_z(None, 1.0);
        assert!(is_sequencable(&core, &event, &event.clone().into(), 50)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_markers_never_fuse() {
        let core = MockCore::new();
        let previous = CaptureEvent::new();
        for marker in [AcquisitionEvent::Finished, AcquisitionEvent::SequenceEnd] {
            assert!(!is_sequencable(&core, &previous, &marker, 2).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_z_needs_sequenceable_focus() {
        let previous = CaptureEvent::new().with_z(Some(0), 0.0);
        let next: AcquisitionEvent = CaptureEvent::new().with_z(Some(1), 1.0).into();

        assert!(!is_sequencable(&MockCore::new(), &previous, &next, 2)
            .await
            .unwrap());
        let core = MockCore::new().with_stage_sequencing("Z", 100);
        assert!(is_sequencable(&core, &previous, &next, 2).await.unwrap());
        assert!(!is_sequencable(&core, &previous, &next, 101).await.unwrap());
        let no_focus = MockCore::new().without_focus();
        assert!(!is_sequencable(&no_focus, &previous, &next, 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_config_change_checks_each_property() {
        let previous = CaptureEvent::new().with_config("Channel", "DAPI");
        let next: AcquisitionEvent = CaptureEvent::new().with_config("Channel", "FITC").into();

        let wheel_only = MockCore::new().with_property_sequencing("Wheel", "Label", 10);
        assert!(!is_sequencable(&wheel_only, &previous, &next, 2)
            .await
            .unwrap());

        let both = MockCore::new()
            .with_property_sequencing("Wheel", "Label", 10)
            .with_property_sequencing("Laser", "Power", 10);
        assert!(is_sequencable(&both, &previous, &next, 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_distinct_start_times_never_fuse() {
        let core = MockCore::new();
        let previous = CaptureEvent::new().with_min_start_time_ms(0);
        let next: AcquisitionEvent = CaptureEvent::new().with_min_start_time_ms(1000).into();
        assert!(!is_sequencable(&core, &previous, &next, 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_stage_and_property_differences_never_fuse() {
        let core = MockCore::new().with_stage("Piezo");
        let mut previous = CaptureEvent::new();
        previous.set_stage_coordinate("Piezo", 1.0, None);
        let mut next = CaptureEvent::new();
        next.set_stage_coordinate("Piezo", 2.0, None);
        assert!(!is_sequencable(&core, &previous, &next.into(), 2)
            .await
            .unwrap());

        let previous = CaptureEvent::new().with_property("Shutter", "State", "Open");
        let next = CaptureEvent::new().with_property("Shutter", "State", "Closed");
        assert!(!is_sequencable(&core, &previous, &next.into(), 2)
            .await
            .unwrap());
    }

    #[test]
    fn test_fill_sequence() {
        assert_eq!(
            fill_sequence(vec![None, Some(2.0), None, Some(4.0)]),
            Some(vec![2.0, 2.0, 2.0, 4.0])
        );
        assert_eq!(fill_sequence::<f64>(vec![None, None]), None);
    }

    #[test]
    fn test_merge_sequence_lengths() {
        assert!(merge_sequence(Vec::new()).is_err());
        let single = merge_sequence(vec![CaptureEvent::new()]).unwrap();
        assert!(single.as_capture().is_some());
        let burst = merge_sequence(vec![exposure_event(1.0), exposure_event(2.0)]).unwrap();
        assert_eq!(burst.children().len(), 2);
        assert!(burst.sequenced().exposure);
    }
}
