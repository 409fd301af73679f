//! Hardware capability interface consumed by the engine.
//!
//! The engine never talks to drivers directly. Everything it needs, from
//! device discovery and sequencing capabilities to moves and frame
//! retrieval, goes through [`HardwareCore`]. Implementations handle
//! protocol-specific details.
//!
//! ## Error Convention
//! - Every method returns `anyhow::Result`. The engine wraps preparation
//!   commands in bounded retries and converts the final failure into
//!   `AcqError::HardwareControl`.
//! - Frame polling methods return `Ok(None)` while no frame is ready yet;
//!   an `Err` is a real failure.
//!
//! ## Sequencing
//! A device is *sequenceable* when it can be pre-loaded with a list of
//! values and step through them on hardware trigger, up to a maximum
//! sequence length. The engine loads sequences, arms them with the `start_*`
//! methods, and stops them on abort or timeout.

pub mod mock;

use crate::core::PixelBuffer;
use crate::event::{PropertySetting, SlmPattern};
use anyhow::Result;
use async_trait::async_trait;

/// A frame as it comes off the camera, before the engine stamps metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct RawImage {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel data, row-major
    pub pixels: PixelBuffer,
    /// Camera device that produced the frame
    pub camera: String,
    /// Channel index for multi-camera adapters
    pub channel_index: Option<usize>,
}

/// Capability query and command interface to the microscope.
///
/// ## Device Names
/// - `camera_device` is the current (default) camera and always exists
/// - focus, XY stage and SLM are optional; `None` means not installed
///
/// ## Blocking Behavior
/// - Move and set commands return once the command is issued; the engine
///   polls `device_busy` until the device reports idle
/// - `snap_image` returns once exposure has finished; the frame is then
///   available from `get_image`
#[async_trait]
pub trait HardwareCore: Send + Sync {
    // ---- devices ----

    /// Current default camera
    async fn camera_device(&self) -> Result<String>;
    /// Make `camera` the current camera (used for per-event camera snaps)
    async fn set_camera_device(&self, camera: &str) -> Result<()>;
    /// Focus stage, if one is installed
    async fn focus_device(&self) -> Result<Option<String>>;
    /// XY stage, if one is installed
    async fn xy_stage_device(&self) -> Result<Option<String>>;
    /// Spatial light modulator, if one is installed
    async fn slm_device(&self) -> Result<Option<String>>;
    /// True if a device with this label is loaded
    async fn has_device(&self, device: &str) -> Result<bool>;

    // ---- config groups ----

    /// Property settings that make up `preset` of `group`
    async fn config_data(&self, group: &str, preset: &str) -> Result<Vec<PropertySetting>>;
    /// Apply `preset` of `group`
    async fn set_config(&self, group: &str, preset: &str) -> Result<()>;
    /// Block until the devices of the preset have settled
    async fn wait_for_config(&self, group: &str, preset: &str) -> Result<()>;

    // ---- sequencing capabilities ----

    /// True if the property can step on a trigger
    async fn is_property_sequenceable(&self, device: &str, property: &str) -> Result<bool>;
    /// Longest sequence the property accepts
    async fn property_sequence_max_length(&self, device: &str, property: &str) -> Result<usize>;
    /// True if the stage can step on a trigger
    async fn is_stage_sequenceable(&self, device: &str) -> Result<bool>;
    /// Longest sequence the stage accepts
    async fn stage_sequence_max_length(&self, device: &str) -> Result<usize>;
    /// True if the XY stage can step on a trigger
    async fn is_xy_stage_sequenceable(&self, device: &str) -> Result<bool>;
    /// Longest sequence the XY stage accepts
    async fn xy_stage_sequence_max_length(&self, device: &str) -> Result<usize>;
    /// True if the camera can step exposure on a trigger
    async fn is_exposure_sequenceable(&self, camera: &str) -> Result<bool>;
    /// Longest exposure sequence the camera accepts
    async fn exposure_sequence_max_length(&self, camera: &str) -> Result<usize>;

    // ---- hardware sequences ----

    /// Load per-trigger positions
    async fn load_stage_sequence(&self, device: &str, positions: &[f64]) -> Result<()>;
    /// Arm the loaded stage sequence
    async fn start_stage_sequence(&self, device: &str) -> Result<()>;
    /// Disarm the stage sequence
    async fn stop_stage_sequence(&self, device: &str) -> Result<()>;

    /// Load per-trigger XY positions; `x` and `y` have equal length
    async fn load_xy_stage_sequence(&self, device: &str, x: &[f64], y: &[f64]) -> Result<()>;
    /// Arm the loaded XY sequence
    async fn start_xy_stage_sequence(&self, device: &str) -> Result<()>;
    /// Disarm the XY sequence
    async fn stop_xy_stage_sequence(&self, device: &str) -> Result<()>;

    /// Load per-trigger exposures, in ms
    async fn load_exposure_sequence(&self, camera: &str, exposures_ms: &[f64]) -> Result<()>;
    /// Arm the loaded exposure sequence
    async fn start_exposure_sequence(&self, camera: &str) -> Result<()>;
    /// Disarm the exposure sequence
    async fn stop_exposure_sequence(&self, camera: &str) -> Result<()>;

    /// Load per-trigger property values
    async fn load_property_sequence(
        &self,
        device: &str,
        property: &str,
        values: &[String],
    ) -> Result<()>;
    /// Arm the loaded property sequence
    async fn start_property_sequence(&self, device: &str, property: &str) -> Result<()>;
    /// Disarm the property sequence
    async fn stop_property_sequence(&self, device: &str, property: &str) -> Result<()>;

    /// Ready `camera` for a triggered burst
    async fn prepare_sequence_acquisition(&self, camera: &str) -> Result<()>;

    // ---- single-value commands ----

    /// Start moving a single-axis stage
    async fn set_position(&self, device: &str, position: f64) -> Result<()>;
    /// Start moving the XY stage
    async fn set_xy_position(&self, device: &str, x: f64, y: f64) -> Result<()>;
    /// True while `device` is still moving or settling
    async fn device_busy(&self, device: &str) -> Result<bool>;
    /// Exposure of the current camera, in ms
    async fn exposure(&self) -> Result<f64>;
    /// Set the current camera's exposure, in ms
    async fn set_exposure(&self, exposure_ms: f64) -> Result<()>;
    /// Show `pattern` on the SLM
    async fn set_slm_image(&self, device: &str, pattern: &SlmPattern) -> Result<()>;
    /// Set one device property
    async fn set_property(&self, device: &str, property: &str, value: &str) -> Result<()>;

    // ---- capture ----

    /// Expose the current camera once
    async fn snap_image(&self) -> Result<()>;
    /// Start a burst of `count` frames on `camera`, advanced by trigger
    async fn start_sequence_acquisition(&self, camera: &str, count: usize) -> Result<()>;
    /// Stop a running burst on `camera`
    async fn stop_sequence_acquisition(&self, camera: &str) -> Result<()>;
    /// True while any camera is still acquiring a burst
    async fn is_sequence_running(&self) -> Result<bool>;
    /// Channels the current camera delivers per exposure
    async fn number_of_camera_channels(&self) -> Result<usize>;

    // ---- frame retrieval ----

    /// Next frame from the burst ring buffer, if one has arrived
    async fn pop_next_image(&self) -> Result<Option<RawImage>>;
    /// Frame from the last snap for `channel`, if available
    async fn get_image(&self, channel: usize) -> Result<Option<RawImage>>;
    /// True once the ring buffer has dropped frames
    async fn is_buffer_overflowed(&self) -> Result<bool>;
    /// Empty the ring buffer and reset the overflow flag
    async fn clear_circular_buffer(&self) -> Result<()>;
}
