//! Lazy, composable event generators.
//!
//! Each [`EventModule`] expands one event into a lazy series of events
//! (time points, z slices, channels, ...). [`multi_d_events`] nests modules,
//! first module outermost, to build the usual multi-dimensional acquisition:
//!
//! ```
//! use rust_acqeng::event::generators::{channels, multi_d_events, timelapse, z_stack, ChannelSetting};
//! use rust_acqeng::event::CaptureEvent;
//!
//! let events: Vec<_> = multi_d_events(
//!     CaptureEvent::new(),
//!     vec![
//!         timelapse(2, 1000.0),
//!         channels(vec![ChannelSetting::new("Channel", "DAPI", 10.0)]),
//!         z_stack(0, 3, 1.0, 0.0),
//!     ],
//! )
//! .collect();
//! assert_eq!(events.len(), 6);
//! ```

use super::{axes, CaptureEvent};
use std::iter;
use std::sync::Arc;

type Expansion = Box<dyn Iterator<Item = CaptureEvent> + Send>;

/// Expands one event into a lazy series of derived events.
#[derive(Clone)]
pub struct EventModule {
    name: &'static str,
    expand: Arc<dyn Fn(CaptureEvent) -> Expansion + Send + Sync>,
}

impl EventModule {
    /// Wraps an expansion function under a name used in logs.
    pub fn new<F>(name: &'static str, expand: F) -> Self
    where
        F: Fn(CaptureEvent) -> Expansion + Send + Sync + 'static,
    {
        Self {
            name,
            expand: Arc::new(expand),
        }
    }

    /// Name given at construction.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Expands `event` into its derived events.
    pub fn apply(&self, event: CaptureEvent) -> Expansion {
        (self.expand)(event)
    }
}

impl std::fmt::Debug for EventModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventModule").field("name", &self.name).finish()
    }
}

/// `n` time points spaced `interval_ms` apart. Always yields at least one.
pub fn timelapse(num_time_points: usize, interval_ms: f64) -> EventModule {
    EventModule::new("timelapse", move |event| {
        Box::new((0..num_time_points.max(1)).map(move |index| {
            let mut point = event.clone();
            point.min_start_time_ms = Some((interval_ms * index as f64).max(0.0) as u64);
            point.set_time_index(index as i64);
            point
        }))
    })
}

/// Slices `start..stop` at `index * step + origin`, added to any z the
/// event already carries (e.g. a channel focus offset).
pub fn z_stack(start_index: i64, stop_index: i64, step_um: f64, origin_um: f64) -> EventModule {
    EventModule::new("z_stack", move |event| {
        Box::new((start_index..stop_index).map(move |index| {
            let mut slice = event.clone();
            let base = slice.z.unwrap_or(0.0);
            slice.set_z(Some(index), Some(base + index as f64 * step_um + origin_um));
            slice
        }))
    })
}

/// Same as [`z_stack`] for an arbitrary single-axis stage. The axis index is
/// recorded under the device name.
pub fn move_stage(
    device: impl Into<String>,
    start_index: i64,
    stop_index: i64,
    step: f64,
    origin: f64,
) -> EventModule {
    let device: String = device.into();
    EventModule::new("move_stage", move |event| {
        let device = device.clone();
        Box::new((start_index..stop_index).map(move |index| {
            let mut slice = event.clone();
            let base = slice.stage_position(&device).unwrap_or(0.0);
            let axis_name = slice
                .stage_positions
                .get(&device)
                .map(|c| c.axis_name.clone());
            slice.set_stage_coordinate(&device, base + index as f64 * step + origin, axis_name);
            let axis = slice
                .stage_positions
                .get(&device)
                .map(|c| c.axis_name.clone())
                .unwrap_or_else(|| device.clone());
            slice.axes.insert(axis, index.into());
            slice
        }))
    })
}

/// One channel of a [`channels`] module.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelSetting {
    /// Config group holding the channel presets
    pub group: String,
    /// Preset for this channel
    pub preset: String,
    /// Exposure for this channel, in ms
    pub exposure_ms: f64,
    /// Focus offset added to the event's z, in µm.
    pub z_offset_um: f64,
}

impl ChannelSetting {
    /// Channel with no focus offset.
    pub fn new(group: impl Into<String>, preset: impl Into<String>, exposure_ms: f64) -> Self {
        Self {
            group: group.into(),
            preset: preset.into(),
            exposure_ms,
            z_offset_um: 0.0,
        }
    }

    /// Sets the focus offset, in µm.
    pub fn with_z_offset(mut self, offset_um: f64) -> Self {
        self.z_offset_um = offset_um;
        self
    }
}

/// One event per channel: sets the preset, the channel axis and exposure.
///
/// Offsets only apply to events that already carry a z position; the
/// generator never queries hardware for the current focus.
pub fn channels(settings: Vec<ChannelSetting>) -> EventModule {
    let settings = Arc::new(settings);
    EventModule::new("channels", move |event| {
        let settings = Arc::clone(&settings);
        let count = settings.len();
        Box::new((0..count).filter_map(move |index| {
            let channel = settings.get(index)?;
            let mut channel_event = event.clone().with_config(&channel.group, &channel.preset);
            channel_event.set_channel_name(channel.preset.clone());
            if let Some(z) = channel_event.z {
                channel_event.z = Some(z + channel.z_offset_um);
            }
            channel_event.exposure_ms = Some(channel.exposure_ms);
            Some(channel_event)
        }))
    })
}

/// An XY stage position, optionally placed on a tile grid.
#[derive(Clone, Debug, PartialEq)]
pub struct XyPosition {
    /// Stage x, in µm
    pub x: f64,
    /// Stage y, in µm
    pub y: f64,
    /// Tile row and column
    pub grid: Option<(i64, i64)>,
    /// Label recorded on the position axis
    pub name: Option<String>,
}

impl XyPosition {
    /// Position off any grid.
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            grid: None,
            name: None,
        }
    }

    /// Places the position on tile (`row`, `col`).
    pub fn on_grid(mut self, row: i64, col: i64) -> Self {
        self.grid = Some((row, col));
        self
    }

    /// Labels the position.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// One event per position. Grid positions get row/column axes; others get a
/// position axis holding the name, or the list index.
pub fn positions(list: Vec<XyPosition>) -> EventModule {
    let list = Arc::new(list);
    EventModule::new("positions", move |event| {
        let list = Arc::clone(&list);
        let count = list.len();
        Box::new((0..count).filter_map(move |index| {
            let position = list.get(index)?;
            let mut pos_event = event.clone().with_xy(position.x, position.y);
            match (&position.grid, &position.name) {
                (Some((row, col)), _) => {
                    pos_event.axes.insert(axes::GRID_ROW.to_string(), (*row).into());
                    pos_event.axes.insert(axes::GRID_COL.to_string(), (*col).into());
                }
                (None, Some(name)) => {
                    pos_event
                        .axes
                        .insert(axes::POSITION.to_string(), name.as_str().into());
                }
                (None, None) => {
                    pos_event.axes.insert(axes::POSITION.to_string(), index.into());
                }
            }
            Some(pos_event)
        }))
    })
}

/// Nests `modules` around `base`, first module outermost.
pub fn multi_d_events(
    base: CaptureEvent,
    modules: Vec<EventModule>,
) -> impl Iterator<Item = CaptureEvent> + Send {
    expand(base, &modules)
}

fn expand(event: CaptureEvent, modules: &[EventModule]) -> Expansion {
    match modules.split_first() {
        None => Box::new(iter::once(event)),
        Some((outer, rest)) => {
            let rest = rest.to_vec();
            Box::new(outer.apply(event).flat_map(move |e| expand(e, &rest)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AxisValue;

    #[test]
    fn test_timelapse_sets_time_and_start() {
        let events: Vec<_> = timelapse(3, 500.0).apply(CaptureEvent::new()).collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].time_index(), Some(2));
        assert_eq!(events[2].min_start_time_ms, Some(1000));
        assert_eq!(timelapse(0, 10.0).apply(CaptureEvent::new()).count(), 1);
    }

    #[test]
    fn test_z_stack_adds_to_existing_offset() {
        let base = CaptureEvent {
            z: Some(0.5),
            ..CaptureEvent::new()
        };
        let slices: Vec<_> = z_stack(0, 3, 2.0, 10.0).apply(base).collect();
        let z: Vec<_> = slices.iter().filter_map(|e| e.z).collect();
        assert_eq!(z, vec![10.5, 12.5, 14.5]);
        assert_eq!(slices[1].z_index(), Some(1));
    }

    #[test]
    fn test_channels_apply_offsets_only_with_z() {
        let settings = vec![
            ChannelSetting::new("Channel", "DAPI", 10.0),
            ChannelSetting::new("Channel", "FITC", 20.0).with_z_offset(1.5),
        ];
        let with_z: Vec<_> = channels(settings.clone())
            .apply(CaptureEvent::new().with_z(None, 3.0))
            .collect();
        assert_eq!(with_z[1].z, Some(4.5));
        assert_eq!(with_z[1].exposure_ms, Some(20.0));
        assert_eq!(
            with_z[1].axis(axes::CHANNEL),
            Some(&AxisValue::Str("FITC".to_string()))
        );

        let without_z: Vec<_> = channels(settings).apply(CaptureEvent::new()).collect();
        assert_eq!(without_z[1].z, None);
    }

    #[test]
    fn test_positions_and_stage_modules() {
        let list = vec![
            XyPosition::new(0.0, 0.0).on_grid(0, 1),
            XyPosition::new(5.0, 5.0).named("Well-A1"),
        ];
        let events: Vec<_> = positions(list).apply(CaptureEvent::new()).collect();
        assert_eq!(events[0].axis(axes::GRID_COL), Some(&AxisValue::Int(1)));
        assert_eq!(events[1].position_name(), Some("Well-A1"));
        assert_eq!(events[1].x, Some(5.0));

        let stage: Vec<_> = move_stage("Piezo", 0, 2, 1.0, 0.0)
            .apply(CaptureEvent::new())
            .collect();
        assert_eq!(stage[1].stage_position("Piezo"), Some(1.0));
        assert_eq!(stage[1].axis("Piezo"), Some(&AxisValue::Int(1)));
    }

    #[test]
    fn test_multi_d_order_is_outermost_first() {
        let events: Vec<_> = multi_d_events(
            CaptureEvent::new(),
            vec![timelapse(2, 0.0), z_stack(0, 2, 1.0, 0.0)],
        )
        .collect();
        let order: Vec<_> = events
            .iter()
            .map(|e| (e.time_index(), e.z_index()))
            .collect();
        assert_eq!(
            order,
            vec![
                (Some(0), Some(0)),
                (Some(0), Some(1)),
                (Some(1), Some(0)),
                (Some(1), Some(1)),
            ]
        );
    }
}
