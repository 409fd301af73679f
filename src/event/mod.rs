//! Acquisition events: the instructions the engine turns into hardware work.
//!
//! An [`AcquisitionEvent`] is one of four things:
//!
//! - [`AcquisitionEvent::Capture`]: a single capture step (move devices, take
//!   at most one frame per camera channel).
//! - [`AcquisitionEvent::Sequence`]: several capture steps fused into one
//!   hardware-triggered burst. Only the engine builds these.
//! - [`AcquisitionEvent::Finished`]: the acquisition-finished marker.
//! - [`AcquisitionEvent::SequenceEnd`]: flushes any pending merge buffer at
//!   the end of one submitted event stream.
//!
//! Markers never carry children and are never merged, which the type makes
//! unrepresentable rather than checked.

pub mod generators;
pub mod wire;

use crate::error::{AcqError, AcqResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Well-known axis names used by the generators and metadata.
pub mod axes {
    /// Time point index
    pub const TIME: &str = "time";
    /// Z slice index
    pub const Z: &str = "z";
    /// Channel name
    pub const CHANNEL: &str = "channel";
    /// XY position index or name
    pub const POSITION: &str = "position";
    /// Tile grid row
    pub const GRID_ROW: &str = "row";
    /// Tile grid column
    pub const GRID_COL: &str = "column";
}

/// A position along one named axis: an index or a label.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisValue {
    /// Numbered position, such as a time point or z slice
    Int(i64),
    /// Labelled position, such as a channel or named stage position
    Str(String),
}

impl AxisValue {
    /// The index, if this is an integer position.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AxisValue::Int(i) => Some(*i),
            AxisValue::Str(_) => None,
        }
    }

    /// The label, if this is a named position.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AxisValue::Int(_) => None,
            AxisValue::Str(s) => Some(s),
        }
    }

    /// Plain JSON number or string, as written into image metadata.
    pub fn to_json(&self) -> Value {
        match self {
            AxisValue::Int(i) => Value::from(*i),
            AxisValue::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl From<i64> for AxisValue {
    fn from(value: i64) -> Self {
        AxisValue::Int(value)
    }
}

impl From<i32> for AxisValue {
    fn from(value: i32) -> Self {
        AxisValue::Int(i64::from(value))
    }
}

impl From<usize> for AxisValue {
    fn from(value: usize) -> Self {
        AxisValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<&str> for AxisValue {
    fn from(value: &str) -> Self {
        AxisValue::Str(value.to_string())
    }
}

impl From<String> for AxisValue {
    fn from(value: String) -> Self {
        AxisValue::Str(value)
    }
}

impl fmt::Display for AxisValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisValue::Int(i) => write!(f, "{}", i),
            AxisValue::Str(s) => write!(f, "{}", s),
        }
    }
}

/// A config group together with the preset to apply (usually a channel).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPreset {
    /// Config group name
    pub group: String,
    /// Preset within the group
    pub preset: String,
}

impl ConfigPreset {
    /// Pairs a group with one of its presets.
    pub fn new(group: impl Into<String>, preset: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            preset: preset.into(),
        }
    }
}

/// Target of an arbitrary single-axis motion device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageCoordinate {
    /// Target position, in device units
    pub position: f64,
    /// Axis name recorded in image metadata for this device.
    pub axis_name: String,
}

/// Payload for a spatial light modulator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlmPattern {
    /// 8-bit image
    Bytes(Vec<u8>),
    /// 32-bit image
    Ints(Vec<i32>),
}

impl SlmPattern {
    /// Pixel count.
    pub fn len(&self) -> usize {
        match self {
            SlmPattern::Bytes(b) => b.len(),
            SlmPattern::Ints(i) => i.len(),
        }
    }

    /// True for a pattern with no pixels.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A (device, property, value) triple.
///
/// Field order matters: the derived `Ord` sorts by device, then property,
/// then value, which is the canonical order events compare in.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PropertySetting {
    /// Device label
    pub device: String,
    /// Property name
    pub property: String,
    /// Value as the device reports it
    pub value: String,
}

impl PropertySetting {
    /// Builds a setting from its parts.
    pub fn new(
        device: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            property: property.into(),
            value: value.into(),
        }
    }
}

/// One capture step.
///
/// Every hardware field is optional; an unset field means "leave the device
/// where it is".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CaptureEvent {
    /// Position of this step along each named axis
    pub axes: BTreeMap<String, AxisValue>,
    /// Config preset to apply
    pub config: Option<ConfigPreset>,
    /// Camera exposure, in ms
    pub exposure_ms: Option<f64>,
    /// Focus position, in µm
    pub z: Option<f64>,
    /// XY stage x target, in µm
    pub x: Option<f64>,
    /// XY stage y target, in µm
    pub y: Option<f64>,
    /// Other single-axis stages, keyed by device
    pub stage_positions: BTreeMap<String, StageCoordinate>,
    /// Image to show on the SLM
    pub slm_pattern: Option<SlmPattern>,
    /// Extra device properties to set
    pub properties: BTreeSet<PropertySetting>,
    /// Camera device; `None` means the core's current camera.
    pub camera: Option<String>,
    /// Earliest start, in ms after the acquisition started.
    pub min_start_time_ms: Option<u64>,
    /// Frame wait limit for this step, overriding the engine default
    pub timeout_ms: Option<f64>,
    /// Free-form tags copied into image metadata
    pub tags: BTreeMap<String, String>,
    /// Overrides the inferred need for a frame.
    pub acquire_image: Option<bool>,
}

impl CaptureEvent {
    /// Empty step that leaves every device alone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the position along `axis`.
    pub fn with_axis(mut self, axis: impl Into<String>, value: impl Into<AxisValue>) -> Self {
        self.axes.insert(axis.into(), value.into());
        self
    }

    /// Applies `preset` of config `group`.
    pub fn with_config(mut self, group: impl Into<String>, preset: impl Into<String>) -> Self {
        self.config = Some(ConfigPreset::new(group, preset));
        self
    }

    /// Sets the exposure, in ms.
    pub fn with_exposure(mut self, exposure_ms: f64) -> Self {
        self.exposure_ms = Some(exposure_ms);
        self
    }

    /// Moves focus to `position`, recording `index` on the z axis.
    pub fn with_z(mut self, index: Option<i64>, position: f64) -> Self {
        self.set_z(index, Some(position));
        self
    }

    /// Moves the XY stage.
    pub fn with_xy(mut self, x: f64, y: f64) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    /// Captures on `camera` instead of the current camera.
    pub fn with_camera(mut self, camera: impl Into<String>) -> Self {
        self.camera = Some(camera.into());
        self
    }

    /// Holds the step until `ms` after the acquisition started.
    pub fn with_min_start_time_ms(mut self, ms: u64) -> Self {
        self.min_start_time_ms = Some(ms);
        self
    }

    /// Limits how long to wait for this step's frames.
    pub fn with_timeout_ms(mut self, ms: f64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Adds a metadata tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Sets a device property before capture.
    pub fn with_property(
        mut self,
        device: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.properties
            .insert(PropertySetting::new(device, property, value));
        self
    }

    /// Shows `pattern` on the SLM before capture.
    pub fn with_slm_pattern(mut self, pattern: SlmPattern) -> Self {
        self.slm_pattern = Some(pattern);
        self
    }

    /// Sets the z axis index (when given) and the focus position.
    pub fn set_z(&mut self, index: Option<i64>, position: Option<f64>) {
        if let Some(index) = index {
            self.axes.insert(axes::Z.to_string(), AxisValue::Int(index));
        }
        self.z = position;
    }

    /// Sets the time axis index.
    pub fn set_time_index(&mut self, index: i64) {
        self.axes.insert(axes::TIME.to_string(), AxisValue::Int(index));
    }

    /// Sets the channel axis label.
    pub fn set_channel_name(&mut self, name: impl Into<String>) {
        self.axes
            .insert(axes::CHANNEL.to_string(), AxisValue::Str(name.into()));
    }

    /// Targets an arbitrary single-axis stage. The axis name defaults to the
    /// device name.
    pub fn set_stage_coordinate(
        &mut self,
        device: impl Into<String>,
        position: f64,
        axis_name: Option<String>,
    ) {
        let device = device.into();
        let axis_name = axis_name.unwrap_or_else(|| device.clone());
        self.stage_positions.insert(
            device,
            StageCoordinate {
                position,
                axis_name,
            },
        );
    }

    /// Target of stage `device`, if this step moves it.
    pub fn stage_position(&self, device: &str) -> Option<f64> {
        self.stage_positions.get(device).map(|c| c.position)
    }

    /// Position along `axis`, if set.
    pub fn axis(&self, axis: &str) -> Option<&AxisValue> {
        self.axes.get(axis)
    }

    /// Integer index on the time axis.
    pub fn time_index(&self) -> Option<i64> {
        self.axes.get(axes::TIME).and_then(AxisValue::as_int)
    }

    /// Integer index on the z axis.
    pub fn z_index(&self) -> Option<i64> {
        self.axes.get(axes::Z).and_then(AxisValue::as_int)
    }

    /// Named xy position, if the position axis carries a label.
    pub fn position_name(&self) -> Option<&str> {
        self.axes.get(axes::POSITION).and_then(AxisValue::as_str)
    }

    /// Axis positions as a JSON object, as stamped on images.
    pub fn axes_json(&self) -> Value {
        let map: Map<String, Value> = self
            .axes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Value::Object(map)
    }

    /// Whether this step takes a frame.
    ///
    /// An explicit `acquire_image` wins; otherwise any config, exposure or axis
    /// position implies a frame.
    pub fn should_acquire_image(&self) -> bool {
        match self.acquire_image {
            Some(flag) => flag,
            None => self.config.is_some() || self.exposure_ms.is_some() || !self.axes.is_empty(),
        }
    }
}

impl fmt::Display for CaptureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        for (device, coord) in &self.stage_positions {
            parts.push(format!("{}: {}", device, coord.position));
        }
        if let Some(z) = self.z {
            parts.push(format!("z {}", z));
        }
        if let Some(x) = self.x {
            parts.push(format!("x {}", x));
        }
        if let Some(y) = self.y {
            parts.push(format!("y {}", y));
        }
        for (axis, value) in &self.axes {
            parts.push(format!("{}: {}", axis, value));
        }
        if let Some(camera) = &self.camera {
            parts.push(format!("camera: {}", camera));
        }
        write!(f, "{}", parts.join("\t"))
    }
}

/// Which device classes step through per-child values during a burst.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SequencedDevices {
    /// Exposure steps per frame
    pub exposure: bool,
    /// Config group properties step per frame
    pub config: bool,
    /// XY stage steps per frame
    pub xy: bool,
    /// Focus steps per frame
    pub z: bool,
}

/// Capture steps fused into one hardware-triggered burst.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceEvent {
    events: Vec<CaptureEvent>,
    sequenced: SequencedDevices,
    exposure_ms: Option<f64>,
    min_start_time_ms: Option<u64>,
}

impl SequenceEvent {
    fn new(events: Vec<CaptureEvent>) -> Self {
        let z: BTreeSet<u64> = events.iter().filter_map(|e| e.z).map(f64::to_bits).collect();
        let xy: BTreeSet<(u64, u64)> = events
            .iter()
            .filter_map(|e| Some((e.x?.to_bits(), e.y?.to_bits())))
            .collect();
        let exposure: BTreeSet<u64> = events
            .iter()
            .filter_map(|e| e.exposure_ms)
            .map(f64::to_bits)
            .collect();
        let config: BTreeSet<&str> = events
            .iter()
            .filter_map(|e| e.config.as_ref())
            .map(|c| c.preset.as_str())
            .collect();

        let sequenced = SequencedDevices {
            exposure: exposure.len() > 1,
            config: config.len() > 1,
            xy: xy.len() > 1,
            z: z.len() > 1,
        };
        let exposure_ms = if sequenced.exposure {
            None
        } else {
            events.first().and_then(|e| e.exposure_ms)
        };
        let min_start_time_ms = events.first().and_then(|e| e.min_start_time_ms);
        Self {
            events,
            sequenced,
            exposure_ms,
            min_start_time_ms,
        }
    }

    /// Fused steps, in capture order.
    pub fn events(&self) -> &[CaptureEvent] {
        &self.events
    }

    /// Number of fused steps.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Never true for a burst built by `fused`.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Device classes that step during the burst.
    pub fn sequenced(&self) -> SequencedDevices {
        self.sequenced
    }

    /// Shared exposure, set only when exposure is not sequenced.
    pub fn exposure_ms(&self) -> Option<f64> {
        self.exposure_ms
    }

    /// Start time of the first step.
    pub fn min_start_time_ms(&self) -> Option<u64> {
        self.min_start_time_ms
    }

    /// Unwraps the burst into its steps.
    pub fn into_events(self) -> Vec<CaptureEvent> {
        self.events
    }
}

/// An instruction handed to the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum AcquisitionEvent {
    /// A single capture step
    Capture(Box<CaptureEvent>),
    /// Steps fused into one triggered burst
    Sequence(SequenceEvent),
    /// No further events for this acquisition
    Finished,
    /// Flushes steps waiting to be fused
    SequenceEnd,
}

impl From<CaptureEvent> for AcquisitionEvent {
    fn from(event: CaptureEvent) -> Self {
        AcquisitionEvent::Capture(Box::new(event))
    }
}

impl AcquisitionEvent {
    /// Fuses capture steps into one dispatch unit.
    ///
    /// One step stays a plain capture; two or more become a sequence.
    pub fn fused(mut events: Vec<CaptureEvent>) -> AcqResult<Self> {
        match events.len() {
            0 => Err(AcqError::Usage(
                "cannot build a sequence from zero events".to_string(),
            )),
            1 => Ok(events.remove(0).into()),
            _ => Ok(AcquisitionEvent::Sequence(SequenceEvent::new(events))),
        }
    }

    /// True for the finished marker.
    pub fn is_finished(&self) -> bool {
        matches!(self, AcquisitionEvent::Finished)
    }

    /// True for the sequence-end marker.
    pub fn is_sequence_end(&self) -> bool {
        matches!(self, AcquisitionEvent::SequenceEnd)
    }

    /// True for the finished and sequence-end markers.
    pub fn is_marker(&self) -> bool {
        self.is_finished() || self.is_sequence_end()
    }

    /// The step, if this is a single capture.
    pub fn as_capture(&self) -> Option<&CaptureEvent> {
        match self {
            AcquisitionEvent::Capture(e) => Some(e),
            _ => None,
        }
    }

    /// The burst, if this is a fused sequence.
    pub fn as_sequence(&self) -> Option<&SequenceEvent> {
        match self {
            AcquisitionEvent::Sequence(s) => Some(s),
            _ => None,
        }
    }

    /// Capture steps carried by this event, in order. Empty for markers.
    pub fn children(&self) -> &[CaptureEvent] {
        match self {
            AcquisitionEvent::Capture(e) => std::slice::from_ref(e.as_ref()),
            AcquisitionEvent::Sequence(s) => s.events(),
            AcquisitionEvent::Finished | AcquisitionEvent::SequenceEnd => &[],
        }
    }

    /// First capture step, if any.
    pub fn first(&self) -> Option<&CaptureEvent> {
        self.children().first()
    }

    /// Last capture step, if any.
    pub fn last(&self) -> Option<&CaptureEvent> {
        self.children().last()
    }

    /// Device classes that step during a burst. Empty for other events.
    pub fn sequenced(&self) -> SequencedDevices {
        match self {
            AcquisitionEvent::Sequence(s) => s.sequenced(),
            _ => SequencedDevices::default(),
        }
    }

    /// Earliest start, in ms after the acquisition started.
    pub fn min_start_time_ms(&self) -> Option<u64> {
        match self {
            AcquisitionEvent::Capture(e) => e.min_start_time_ms,
            AcquisitionEvent::Sequence(s) => s.min_start_time_ms(),
            _ => None,
        }
    }

    /// Exposure applied once before capture; `None` when unset or sequenced.
    pub fn exposure_ms(&self) -> Option<f64> {
        match self {
            AcquisitionEvent::Capture(e) => e.exposure_ms,
            AcquisitionEvent::Sequence(s) => s.exposure_ms(),
            _ => None,
        }
    }

    /// Frame wait limit, taken from the first step.
    pub fn timeout_ms(&self) -> Option<f64> {
        self.first().and_then(|e| e.timeout_ms)
    }

    /// Whether executing this event takes frames. Bursts always do.
    pub fn should_acquire_image(&self) -> bool {
        match self {
            AcquisitionEvent::Sequence(_) => true,
            AcquisitionEvent::Capture(e) => e.should_acquire_image(),
            _ => false,
        }
    }

    /// Number of frames to expect from each camera.
    ///
    /// A single capture takes one frame on the default camera. In a sequence,
    /// children without a camera count against the default camera.
    pub fn camera_image_counts(&self, default_camera: &str) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        match self {
            AcquisitionEvent::Capture(_) => {
                counts.insert(default_camera.to_string(), 1);
            }
            AcquisitionEvent::Sequence(s) => {
                for child in s.events() {
                    let camera = child.camera.as_deref().unwrap_or(default_camera);
                    *counts.entry(camera.to_string()).or_insert(0) += 1;
                }
            }
            AcquisitionEvent::Finished | AcquisitionEvent::SequenceEnd => {}
        }
        counts
    }

    /// Named stage devices any child moves.
    pub fn stage_devices(&self) -> BTreeSet<&str> {
        self.children()
            .iter()
            .flat_map(|e| e.stage_positions.keys().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for AcquisitionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionEvent::Finished => write!(f, "Acq finished event"),
            AcquisitionEvent::SequenceEnd => write!(f, "Acq sequence end event"),
            AcquisitionEvent::Capture(e) => write!(f, "{}", e),
            AcquisitionEvent::Sequence(s) => {
                write!(f, "Sequence of {} events [", s.len())?;
                for (i, e) in s.events().iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fused_single_event_stays_capture() {
        let event = CaptureEvent::new().with_axis(axes::TIME, 0);
        let fused = AcquisitionEvent::fused(vec![event.clone()]).unwrap();
        assert_eq!(fused, AcquisitionEvent::from(event));
        assert!(AcquisitionEvent::fused(Vec::new()).is_err());
    }

    #[test]
    fn test_sequence_flags_follow_distinct_values() {
        let a = CaptureEvent::new()
            .with_exposure(10.0)
            .with_z(Some(0), 1.0)
            .with_config("Channel", "DAPI")
            .with_xy(0.0, 0.0);
        let b = CaptureEvent::new()
            .with_exposure(10.0)
            .with_z(Some(1), 2.0)
            .with_config("Channel", "DAPI")
            .with_xy(0.0, 0.0);
        let fused = AcquisitionEvent::fused(vec![a, b]).unwrap();
        let flags = fused.sequenced();
        assert!(flags.z);
        assert!(!flags.exposure);
        assert!(!flags.config);
        assert!(!flags.xy);
        assert_eq!(fused.exposure_ms(), Some(10.0));
    }

    #[test]
    fn test_xy_sequenced_when_only_x_moves() {
        let a = CaptureEvent::new().with_xy(0.0, 5.0);
        let b = CaptureEvent::new().with_xy(100.0, 5.0);
        let fused = AcquisitionEvent::fused(vec![a, b]).unwrap();
        assert!(fused.sequenced().xy);
    }

    #[test]
    fn test_sequence_takes_first_min_start_time() {
        let a = CaptureEvent::new().with_min_start_time_ms(500);
        let b = CaptureEvent::new();
        let fused = AcquisitionEvent::fused(vec![a, b]).unwrap();
        assert_eq!(fused.min_start_time_ms(), Some(500));
    }

    #[test]
    fn test_should_acquire_image() {
        assert!(!CaptureEvent::new().should_acquire_image());
        assert!(CaptureEvent::new().with_axis("time", 1).should_acquire_image());
        let slm_only = CaptureEvent {
            acquire_image: Some(false),
            ..CaptureEvent::new().with_axis("time", 1)
        };
        assert!(!slm_only.should_acquire_image());
        assert!(!AcquisitionEvent::Finished.should_acquire_image());
    }

    #[test]
    fn test_camera_image_counts() {
        let single = AcquisitionEvent::from(CaptureEvent::new().with_camera("Left"));
        assert_eq!(single.camera_image_counts("Cam").get("Cam"), Some(&1));

        let fused = AcquisitionEvent::fused(vec![
            CaptureEvent::new().with_camera("Left"),
            CaptureEvent::new().with_camera("Right"),
            CaptureEvent::new().with_camera("Left"),
        ])
        .unwrap();
        let counts = fused.camera_image_counts("Cam");
        assert_eq!(counts.get("Left"), Some(&2));
        assert_eq!(counts.get("Right"), Some(&1));
        assert!(!counts.contains_key("Cam"));

        let default_only =
            AcquisitionEvent::fused(vec![CaptureEvent::new(), CaptureEvent::new()]).unwrap();
        assert_eq!(default_only.camera_image_counts("Cam").get("Cam"), Some(&2));
    }

    #[test]
    fn test_properties_are_canonically_ordered() {
        let event = CaptureEvent::new()
            .with_property("Laser", "Power", "10")
            .with_property("Arduino", "Switch", "1")
            .with_property("Laser", "Mode", "CW");
        let order: Vec<_> = event
            .properties
            .iter()
            .map(|p| (p.device.as_str(), p.property.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![("Arduino", "Switch"), ("Laser", "Mode"), ("Laser", "Power")]
        );
    }

    #[test]
    fn test_z_helpers() {
        let mut event = CaptureEvent::new();
        event.set_z(Some(2), Some(1.0));
        event.set_time_index(3);
        assert_eq!(event.z_index(), Some(2));
        assert_eq!(event.z, Some(1.0));
        assert_eq!(event.time_index(), Some(3));
        assert_eq!(event.axes_json(), serde_json::json!({"time": 3, "z": 2}));
    }
}
