//! Image and summary metadata.
//!
//! Two kinds of metadata travel with an acquisition:
//!
//! - **Per-frame tags**: stamped onto every [`TaggedImage`] by the
//!   hardware-control worker right after the frame is attributed to its
//!   event (see [`stamp_image`]). Processors may add more tags downstream.
//! - **Summary metadata**: one JSON object describing the whole acquisition
//!   (acquisition id, start time, core devices, user additions). It is built
//!   once when the session starts and handed to `DataSink::initialize`.
//!
//! ## `SummaryMetadataBuilder`
//!
//! Summary metadata is assembled with a builder, mirroring how the session
//! collects device names from the hardware core and user-provided entries.

use crate::core::TaggedImage;
use crate::event::{axes, CaptureEvent};
use crate::hardware::HardwareCore;
use anyhow::Result;
use chrono::{DateTime, Local};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Tag names written by the engine.
pub mod keys {
    /// Milliseconds since the acquisition started
    pub const ELAPSED_TIME_MS: &str = "ElapsedTime-ms";
    /// Wall-clock capture time
    pub const DATE_TIME: &str = "DateAndTime";
    /// Exposure used for the frame, in ms
    pub const EXPOSURE: &str = "Exposure";
    /// Object of axis positions
    pub const AXES: &str = "Axes";
    /// Object of event tags
    pub const TAGS: &str = "Tags";
    /// Camera that produced the frame
    pub const CAMERA: &str = "Camera";
    /// Width in pixels
    pub const WIDTH: &str = "Width";
    /// Height in pixels
    pub const HEIGHT: &str = "Height";
    /// Pixel format name
    pub const PIXEL_TYPE: &str = "PixelType";
    /// Label of the XY position
    pub const POSITION_NAME: &str = "PositionName";
    /// Requested stage x, in µm
    pub const X_UM_INTENDED: &str = "XPosition_um_Intended";
    /// Requested stage y, in µm
    pub const Y_UM_INTENDED: &str = "YPosition_um_Intended";
    /// Requested focus, in µm
    pub const Z_UM_INTENDED: &str = "ZPosition_um_Intended";
    /// Tile grid row
    pub const GRID_ROW: &str = "GridRowIndex";
    /// Tile grid column
    pub const GRID_COL: &str = "GridColumnIndex";

    /// Acquisition UUID
    pub const ACQUISITION_ID: &str = "AcquisitionId";
    /// Local start time of the acquisition
    pub const START_TIME: &str = "StartTime";
    /// Default camera at start
    pub const CORE_CAMERA: &str = "Core-Camera";
    /// Focus device at start
    pub const CORE_FOCUS: &str = "Core-Focus";
    /// XY stage at start
    pub const CORE_XY_STAGE: &str = "Core-XYStage";
    /// SLM at start
    pub const CORE_SLM: &str = "Core-SLM";
}

const IMAGE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S -";
const START_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Stamps a frame with everything known about the event that produced it.
pub fn stamp_image(image: &mut TaggedImage, event: &CaptureEvent, elapsed_ms: u64, exposure_ms: f64) {
    let width = image.width;
    let height = image.height;
    let pixel_type = image.pixels.pixel_type();
    let tags = &mut image.tags;

    tags.insert(keys::ELAPSED_TIME_MS.into(), Value::from(elapsed_ms));
    tags.insert(
        keys::DATE_TIME.into(),
        Value::from(Local::now().format(IMAGE_TIME_FORMAT).to_string()),
    );

    if let (Some(x), Some(y)) = (event.x, event.y) {
        tags.insert(keys::X_UM_INTENDED.into(), Value::from(x));
        tags.insert(keys::Y_UM_INTENDED.into(), Value::from(y));
        let row = event.axis(axes::GRID_ROW).and_then(|v| v.as_int());
        let col = event.axis(axes::GRID_COL).and_then(|v| v.as_int());
        if let (Some(row), Some(col)) = (row, col) {
            tags.insert(keys::GRID_ROW.into(), Value::from(row));
            tags.insert(keys::GRID_COL.into(), Value::from(col));
        }
    }
    if let Some(z) = event.z {
        tags.insert(keys::Z_UM_INTENDED.into(), Value::from(z));
    }
    if let Some(name) = event.position_name() {
        tags.insert(keys::POSITION_NAME.into(), Value::from(name));
    }

    tags.insert(keys::AXES.into(), event.axes_json());
    if !event.tags.is_empty() {
        let custom: Map<String, Value> = event
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        tags.insert(keys::TAGS.into(), Value::Object(custom));
    }
    tags.insert(keys::EXPOSURE.into(), Value::from(exposure_ms));
    tags.insert(keys::WIDTH.into(), Value::from(width));
    tags.insert(keys::HEIGHT.into(), Value::from(height));
    tags.insert(keys::PIXEL_TYPE.into(), Value::from(pixel_type));
}

/// Axes object of a stamped frame.
pub fn axes_of(image: &TaggedImage) -> Option<&Map<String, Value>> {
    image.tag(keys::AXES).and_then(Value::as_object)
}

/// One axis position of a stamped frame.
pub fn axis_position<'a>(image: &'a TaggedImage, axis: &str) -> Option<&'a Value> {
    axes_of(image).and_then(|a| a.get(axis))
}

/// Elapsed time stamped on `image`, in ms.
pub fn elapsed_ms(image: &TaggedImage) -> Option<u64> {
    image.tag(keys::ELAPSED_TIME_MS).and_then(Value::as_u64)
}

/// Metadata describing the whole acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryMetadata {
    /// Id of the acquisition
    pub acquisition_id: Uuid,
    /// When the session started
    pub start_time: DateTime<Local>,
    /// Default camera
    pub core_camera: Option<String>,
    /// Focus device
    pub core_focus: Option<String>,
    /// XY stage
    pub core_xy_stage: Option<String>,
    /// SLM
    pub core_slm: Option<String>,
    /// User-supplied entries, merged last
    pub extra: Map<String, Value>,
}

impl SummaryMetadata {
    /// Reads device names from the core.
    pub async fn from_core(
        core: &dyn HardwareCore,
        acquisition_id: Uuid,
        extra: Map<String, Value>,
    ) -> Result<Self> {
        let mut builder = SummaryMetadataBuilder::new(acquisition_id)
            .camera(Some(core.camera_device().await?))
            .focus(core.focus_device().await?)
            .xy_stage(core.xy_stage_device().await?)
            .slm(core.slm_device().await?);
        for (key, value) in extra {
            builder = builder.entry(&key, value);
        }
        Ok(builder.build())
    }

    /// Flat JSON object handed to the sink.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            keys::ACQUISITION_ID.into(),
            Value::from(self.acquisition_id.to_string()),
        );
        map.insert(
            keys::START_TIME.into(),
            Value::from(self.start_time.format(START_TIME_FORMAT).to_string()),
        );
        let devices = [
            (keys::CORE_CAMERA, &self.core_camera),
            (keys::CORE_FOCUS, &self.core_focus),
            (keys::CORE_XY_STAGE, &self.core_xy_stage),
            (keys::CORE_SLM, &self.core_slm),
        ];
        for (key, device) in devices {
            map.insert(
                key.into(),
                Value::from(device.clone().unwrap_or_default()),
            );
        }
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }
}

/// A builder for constructing `SummaryMetadata` instances.
pub struct SummaryMetadataBuilder {
    inner: SummaryMetadata,
}

impl SummaryMetadataBuilder {
    /// Starts a summary stamped with the current time.
    pub fn new(acquisition_id: Uuid) -> Self {
        Self {
            inner: SummaryMetadata {
                acquisition_id,
                start_time: Local::now(),
                core_camera: None,
                core_focus: None,
                core_xy_stage: None,
                core_slm: None,
                extra: Map::new(),
            },
        }
    }

    /// Sets the default camera.
    pub fn camera(mut self, camera: Option<String>) -> Self {
        self.inner.core_camera = camera;
        self
    }

    /// Sets the focus device.
    pub fn focus(mut self, focus: Option<String>) -> Self {
        self.inner.core_focus = focus;
        self
    }

    /// Sets the XY stage.
    pub fn xy_stage(mut self, xy_stage: Option<String>) -> Self {
        self.inner.core_xy_stage = xy_stage;
        self
    }

    /// Sets the SLM.
    pub fn slm(mut self, slm: Option<String>) -> Self {
        self.inner.core_slm = slm;
        self
    }

    /// Adds a user entry.
    pub fn entry(mut self, key: &str, value: Value) -> Self {
        self.inner.extra.insert(key.to_string(), value);
        self
    }

    /// Finishes the summary.
    pub fn build(self) -> SummaryMetadata {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PixelBuffer;
    use serde_json::json;

    #[test]
    fn test_stamp_image() {
        let mut image = TaggedImage::new(2, 1, PixelBuffer::U8(vec![0, 1]));
        let event = CaptureEvent::new()
            .with_axis("time", 4)
            .with_z(Some(1), 2.5)
            .with_xy(10.0, 20.0)
            .with_tag("well", "A1");
        stamp_image(&mut image, &event, 1234, 15.0);

        assert_eq!(elapsed_ms(&image), Some(1234));
        assert_eq!(axis_position(&image, "time"), Some(&json!(4)));
        assert_eq!(image.tag(keys::Z_UM_INTENDED), Some(&json!(2.5)));
        assert_eq!(image.tag(keys::X_UM_INTENDED), Some(&json!(10.0)));
        assert_eq!(image.tag(keys::EXPOSURE), Some(&json!(15.0)));
        assert_eq!(image.tag(keys::PIXEL_TYPE), Some(&json!("GRAY8")));
        assert_eq!(image.tag(keys::TAGS), Some(&json!({"well": "A1"})));
    }

    #[test]
    fn test_summary_json() {
        let id = Uuid::new_v4();
        let summary = SummaryMetadataBuilder::new(id)
            .camera(Some("Camera".to_string()))
            .focus(Some("Z".to_string()))
            .entry("Sample", json!("HeLa"))
            .build()
            .to_json();
        assert_eq!(summary[keys::ACQUISITION_ID], json!(id.to_string()));
        assert_eq!(summary[keys::CORE_FOCUS], json!("Z"));
        assert_eq!(summary[keys::CORE_SLM], json!(""));
        assert_eq!(summary["Sample"], json!("HeLa"));
    }
}
