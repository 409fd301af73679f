//! JSON wire form of acquisition events.
//!
//! ```json
//! {"axes": {"time": 3, "z": 2}, "z": 1.0, "min_start_time": 892567.265,
//!  "config_group": ["Channel", "DAPI"], "exposure": 10.0,
//!  "stage_positions": [["Piezo", 3.5]], "properties": [["Laser", "Power", "10"]],
//!  "tags": {"test": "test"}}
//! ```
//!
//! Markers are `{"special": "acquisition-end"}` and
//! `{"special": "sequence-end"}`; a fused burst is `{"events": [...]}`.
//! `min_start_time` travels in seconds and is rounded back to whole
//! milliseconds when parsed. A stage whose metadata axis is not named after
//! the device also gets an entry in `stage_axes` (`{device: axis}`).

use super::{AcquisitionEvent, AxisValue, CaptureEvent, ConfigPreset, PropertySetting, SlmPattern};
use crate::error::{AcqError, AcqResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const ACQUISITION_END: &str = "acquisition-end";
const SEQUENCE_END: &str = "sequence-end";

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    special: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    events: Option<Vec<WireEvent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_start_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config_group: Option<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exposure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    slm_pattern: Option<SlmPattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    axes: BTreeMap<String, AxisValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    stage_positions: Vec<(String, f64)>,
    /// Axis names of stages whose axis is not named after the device
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    stage_axes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    z: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    camera: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    properties: Vec<(String, String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    acquire_image: Option<bool>,
}

impl WireEvent {
    fn special(flag: &str) -> Self {
        Self {
            special: Some(flag.to_string()),
            ..Self::default()
        }
    }

    fn from_capture(event: &CaptureEvent) -> Self {
        Self {
            min_start_time: event.min_start_time_ms.map(|ms| ms as f64 / 1000.0),
            config_group: event
                .config
                .as_ref()
                .map(|c| (c.group.clone(), c.preset.clone())),
            exposure: event.exposure_ms,
            slm_pattern: event.slm_pattern.clone(),
            timeout: event.timeout_ms,
            axes: event.axes.clone(),
            stage_positions: event
                .stage_positions
                .iter()
                .map(|(device, coord)| (device.clone(), coord.position))
                .collect(),
            stage_axes: event
                .stage_positions
                .iter()
                .filter(|(device, coord)| coord.axis_name != **device)
                .map(|(device, coord)| (device.clone(), coord.axis_name.clone()))
                .collect(),
            z: event.z,
            x: event.x,
            y: event.y,
            camera: event.camera.clone(),
            tags: event.tags.clone(),
            properties: event
                .properties
                .iter()
                .map(|p| (p.device.clone(), p.property.clone(), p.value.clone()))
                .collect(),
            acquire_image: event.acquire_image,
            ..Self::default()
        }
    }

    fn into_capture(self) -> AcqResult<CaptureEvent> {
        if self.special.is_some() || self.events.is_some() {
            return Err(AcqError::WireFormat(
                "sequence children must be plain capture events".to_string(),
            ));
        }
        let min_start_time_ms = match self.min_start_time {
            Some(secs) if !secs.is_finite() || secs < 0.0 => {
                return Err(AcqError::WireFormat(format!(
                    "invalid min_start_time: {secs}"
                )))
            }
            Some(secs) => Some((secs * 1000.0).round() as u64),
            None => None,
        };

        let mut event = CaptureEvent {
            axes: self.axes,
            config: self
                .config_group
                .map(|(group, preset)| ConfigPreset { group, preset }),
            exposure_ms: self.exposure,
            z: self.z,
            x: self.x,
            y: self.y,
            slm_pattern: self.slm_pattern,
            properties: self
                .properties
                .into_iter()
                .map(|(device, property, value)| PropertySetting {
                    device,
                    property,
                    value,
                })
                .collect(),
            camera: self.camera,
            min_start_time_ms,
            timeout_ms: self.timeout,
            tags: self.tags,
            acquire_image: self.acquire_image,
            ..CaptureEvent::default()
        };
        let mut stage_axes = self.stage_axes;
        for (device, position) in self.stage_positions {
            let axis_name = stage_axes.remove(&device);
            event.set_stage_coordinate(device, position, axis_name);
        }
        Ok(event)
    }
}

/// Serializes an event to its wire JSON.
pub fn to_json(event: &AcquisitionEvent) -> AcqResult<Value> {
    let wire = match event {
        AcquisitionEvent::Finished => WireEvent::special(ACQUISITION_END),
        AcquisitionEvent::SequenceEnd => WireEvent::special(SEQUENCE_END),
        AcquisitionEvent::Capture(e) => WireEvent::from_capture(e),
        AcquisitionEvent::Sequence(s) => WireEvent {
            events: Some(s.events().iter().map(WireEvent::from_capture).collect()),
            ..WireEvent::default()
        },
    };
    Ok(serde_json::to_value(wire)?)
}

/// Parses an event (or fused burst) from wire JSON.
pub fn from_json(value: &Value) -> AcqResult<AcquisitionEvent> {
    let wire: WireEvent = serde_json::from_value(value.clone())?;
    if let Some(special) = wire.special.as_deref() {
        return match special {
            ACQUISITION_END => Ok(AcquisitionEvent::Finished),
            SEQUENCE_END => Ok(AcquisitionEvent::SequenceEnd),
            other => Err(AcqError::WireFormat(format!(
                "unknown special flag '{other}'"
            ))),
        };
    }
    match wire.events {
        Some(children) => {
            if children.is_empty() {
                return Err(AcqError::WireFormat(
                    "a sequence needs at least one child event".to_string(),
                ));
            }
            let children = children
                .into_iter()
                .map(WireEvent::into_capture)
                .collect::<AcqResult<Vec<_>>>()?;
            AcquisitionEvent::fused(children)
        }
        None => Ok(wire.into_capture()?.into()),
    }
}

/// [`to_json`] rendered as compact text.
pub fn to_string(event: &AcquisitionEvent) -> AcqResult<String> {
    Ok(serde_json::to_string(&to_json(event)?)?)
}

/// Parses wire JSON text. Text that is not JSON is a serialization error.
pub fn from_str(text: &str) -> AcqResult<AcquisitionEvent> {
    let value: Value = serde_json::from_str(text)?;
    from_json(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn time_z_event() -> CaptureEvent {
        let mut event = CaptureEvent::new()
            .with_min_start_time_ms(892_567_265)
            .with_tag("test", "test")
            .with_tag("test2", "test2");
        event.set_z(Some(2), Some(1.0));
        event.set_time_index(3);
        event
    }

    #[test]
    fn test_round_trip_keeps_positions_time_and_tags() {
        let original = AcquisitionEvent::from(time_z_event());
        let text = to_string(&original).unwrap();
        let parsed = from_str(&text).unwrap();
        let event = parsed.as_capture().unwrap();

        assert_eq!(event.z_index(), Some(2));
        assert_eq!(event.z, Some(1.0));
        assert_eq!(event.time_index(), Some(3));
        assert_eq!(event.min_start_time_ms, Some(892_567_265));
        assert_eq!(event.tags.get("test").map(String::as_str), Some("test"));
        assert_eq!(event.tags.get("test2").map(String::as_str), Some("test2"));
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_sequence_round_trip() {
        let second = time_z_event().with_exposure(20.0);
        let original = AcquisitionEvent::fused(vec![time_z_event(), second]).unwrap();
        let value = to_json(&original).unwrap();
        assert_eq!(value["events"].as_array().map(Vec::len), Some(2));

        let parsed = from_json(&value).unwrap();
        assert_eq!(parsed.children().len(), 2);
        assert_eq!(parsed.children()[1].exposure_ms, Some(20.0));
        assert_eq!(parsed.children()[0].tags.len(), 2);
    }

    #[test]
    fn test_markers() {
        assert_eq!(
            to_json(&AcquisitionEvent::Finished).unwrap(),
            json!({"special": "acquisition-end"})
        );
        assert!(from_json(&json!({"special": "sequence-end"}))
            .unwrap()
            .is_sequence_end());
        assert!(from_json(&json!({"special": "restart"})).is_err());
    }

    #[test]
    fn test_wire_keys() {
        let mut event = CaptureEvent::new()
            .with_config("Channel", "DAPI")
            .with_property("Laser", "Power", "10")
            .with_axis("channel", "DAPI");
        event.set_stage_coordinate("Piezo", 3.5, None);
        let value = to_json(&AcquisitionEvent::from(event)).unwrap();
        assert_eq!(value["config_group"], json!(["Channel", "DAPI"]));
        assert_eq!(value["properties"], json!([["Laser", "Power", "10"]]));
        assert_eq!(value["stage_positions"], json!([["Piezo", 3.5]]));
        assert_eq!(value["axes"], json!({"channel": "DAPI"}));
        assert!(value.get("exposure").is_none());
    }

    #[test]
    fn test_rejects_nested_markers() {
        let value = json!({"events": [{"special": "acquisition-end"}, {}]});
        assert!(matches!(from_json(&value), Err(AcqError::WireFormat(_))));
    }

    #[test]
    fn test_rejects_empty_sequence() {
        let value = json!({"events": []});
        assert!(matches!(from_json(&value), Err(AcqError::WireFormat(_))));
    }

    #[test]
    fn test_stage_axis_names_survive() {
        let mut event = CaptureEvent::new();
        event.set_stage_coordinate("Piezo", 3.5, Some("depth".to_string()));
        event.set_stage_coordinate("Rotator", 90.0, None);
        let original = AcquisitionEvent::from(event);

        let value = to_json(&original).unwrap();
        assert_eq!(value["stage_axes"], json!({"Piezo": "depth"}));

        let parsed = from_json(&value).unwrap();
        let capture = parsed.as_capture().unwrap();
        assert_eq!(capture.stage_positions["Piezo"].axis_name, "depth");
        assert_eq!(capture.stage_positions["Rotator"].axis_name, "Rotator");
        assert_eq!(parsed, original);
    }
}
