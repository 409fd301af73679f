//! Mock Hardware Implementation
//!
//! Provides a simulated microscope for testing without physical hardware.
//!
//! # Simulated Devices
//!
//! - Camera `Camera` (more can be added), 64x64 16-bit frames of noise
//! - Focus stage `Z`, XY stage `XY`, optional SLM and extra stages
//! - Config group `Channel` with presets `DAPI`, `FITC` and `Cy5`
//!
//! Nothing is sequenceable until enabled with the `with_*_sequencing`
//! builders. Frames are produced immediately: a snap fills one slot per
//! camera channel, a burst fills the ring buffer with every frame at once.
//!
//! # Test Hooks
//!
//! - [`MockCore::fail_next`] makes the next N calls of a command fail
//! - [`MockCore::drop_frames`] silently drops frames to provoke timeouts
//! - [`MockCore::commands`] returns the log of every issued command

use super::{HardwareCore, RawImage};
use crate::core::PixelBuffer;
use crate::event::{PropertySetting, SlmPattern};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeSet, HashMap, VecDeque};

const DEFAULT_CAMERA: &str = "Camera";
const DEFAULT_EXPOSURE_MS: f64 = 10.0;

#[derive(Debug)]
struct FrameDrop {
    pass: usize,
    drop: usize,
}

struct MockState {
    camera: String,
    cameras: BTreeSet<String>,
    focus: Option<String>,
    xy_stage: Option<String>,
    slm: Option<String>,
    stages: BTreeSet<String>,

    positions: HashMap<String, f64>,
    xy_position: Option<(f64, f64)>,
    exposures: HashMap<String, f64>,
    properties: HashMap<(String, String), String>,
    configs: HashMap<(String, String), Vec<PropertySetting>>,

    stage_limits: HashMap<String, usize>,
    xy_limit: Option<usize>,
    exposure_limits: HashMap<String, usize>,
    property_limits: HashMap<(String, String), usize>,

    width: u32,
    height: u32,
    channels: usize,
    ring: VecDeque<RawImage>,
    ring_capacity: usize,
    overflowed: bool,
    snapped: Vec<Option<RawImage>>,
    outstanding: usize,

    busy_polls: usize,
    busy: HashMap<String, usize>,
    failures: HashMap<String, usize>,
    frame_drop: Option<FrameDrop>,
    commands: Vec<String>,
}

impl MockState {
    fn command(&mut self, name: &str, detail: String) -> Result<()> {
        if let Some(remaining) = self.failures.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                self.commands.push(format!("{name} FAILED"));
                bail!("injected failure in {name}");
            }
        }
        if detail.is_empty() {
            self.commands.push(name.to_string());
        } else {
            self.commands.push(format!("{name} {detail}"));
        }
        Ok(())
    }

    fn require_camera(&self, camera: &str) -> Result<()> {
        if self.cameras.contains(camera) {
            Ok(())
        } else {
            Err(anyhow!("no camera named '{camera}'"))
        }
    }

    /// False when the drop plan swallows this frame.
    fn frame_survives(&mut self) -> bool {
        match self.frame_drop.as_mut() {
            Some(plan) if plan.pass > 0 => {
                plan.pass -= 1;
                true
            }
            Some(plan) if plan.drop > 0 => {
                plan.drop -= 1;
                false
            }
            _ => true,
        }
    }

    fn make_frame(&self, camera: &str, channel: usize) -> RawImage {
        let n = self.width as usize * self.height as usize;
        let mut rng = rand::thread_rng();
        let pixels = (0..n).map(|_| rng.gen_range(0..4096u16)).collect();
        RawImage {
            width: self.width,
            height: self.height,
            pixels: PixelBuffer::U16(pixels),
            camera: camera.to_string(),
            channel_index: (self.channels > 1).then_some(channel),
        }
    }
}

/// In-memory simulated microscope.
pub struct MockCore {
    state: Mutex<MockState>,
}

impl Default for MockCore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCore {
    /// Microscope with a camera, focus and XY stage, three channel presets, and
    /// no sequencing support.
    pub fn new() -> Self {
        let mut configs = HashMap::new();
        for (preset, filter, power) in [("DAPI", "1", "10"), ("FITC", "2", "20"), ("Cy5", "3", "30")] {
            configs.insert(
                ("Channel".to_string(), preset.to_string()),
                vec![
                    PropertySetting::new("Wheel", "Label", filter),
                    PropertySetting::new("Laser", "Power", power),
                ],
            );
        }
        let state = MockState {
            camera: DEFAULT_CAMERA.to_string(),
            cameras: BTreeSet::from([DEFAULT_CAMERA.to_string()]),
            focus: Some("Z".to_string()),
            xy_stage: Some("XY".to_string()),
            slm: None,
            stages: BTreeSet::new(),
            positions: HashMap::new(),
            xy_position: None,
            exposures: HashMap::new(),
            properties: HashMap::new(),
            configs,
            stage_limits: HashMap::new(),
            xy_limit: None,
            exposure_limits: HashMap::new(),
            property_limits: HashMap::new(),
            width: 64,
            height: 64,
            channels: 1,
            ring: VecDeque::new(),
            ring_capacity: 1000,
            overflowed: false,
            snapped: Vec::new(),
            outstanding: 0,
            busy_polls: 0,
            busy: HashMap::new(),
            failures: HashMap::new(),
            frame_drop: None,
            commands: Vec::new(),
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Adds another camera device.
    pub fn with_camera(self, camera: &str) -> Self {
        self.state.lock().cameras.insert(camera.to_string());
        self
    }

    /// Adds a single-axis stage.
    pub fn with_stage(self, device: &str) -> Self {
        self.state.lock().stages.insert(device.to_string());
        self
    }

    /// Adds an SLM.
    pub fn with_slm(self, device: &str) -> Self {
        self.state.lock().slm = Some(device.to_string());
        self
    }

    /// Removes the focus device.
    pub fn without_focus(self) -> Self {
        self.state.lock().focus = None;
        self
    }

    /// Removes the XY stage.
    pub fn without_xy_stage(self) -> Self {
        self.state.lock().xy_stage = None;
        self
    }

    /// Defines a config preset.
    pub fn with_config(self, group: &str, preset: &str, settings: Vec<PropertySetting>) -> Self {
        self.state
            .lock()
            .configs
            .insert((group.to_string(), preset.to_string()), settings);
        self
    }

    /// Lets `device` sequence up to `max_length` positions.
    pub fn with_stage_sequencing(self, device: &str, max_length: usize) -> Self {
        self.state
            .lock()
            .stage_limits
            .insert(device.to_string(), max_length);
        self
    }

    /// Lets the XY stage sequence up to `max_length` positions.
    pub fn with_xy_sequencing(self, max_length: usize) -> Self {
        self.state.lock().xy_limit = Some(max_length);
        self
    }

    /// Lets `camera` sequence up to `max_length` exposures.
    pub fn with_exposure_sequencing(self, camera: &str, max_length: usize) -> Self {
        self.state
            .lock()
            .exposure_limits
            .insert(camera.to_string(), max_length);
        self
    }

    /// Lets a property sequence up to `max_length` values.
    pub fn with_property_sequencing(self, device: &str, property: &str, max_length: usize) -> Self {
        self.state
            .lock()
            .property_limits
            .insert((device.to_string(), property.to_string()), max_length);
        self
    }

    /// Frames delivered per exposure.
    pub fn with_camera_channels(self, channels: usize) -> Self {
        self.state.lock().channels = channels.max(1);
        self
    }

    /// Frame size in pixels.
    pub fn with_image_size(self, width: u32, height: u32) -> Self {
        {
            let mut state = self.state.lock();
            state.width = width;
            state.height = height;
        }
        self
    }

    /// Frames the ring buffer holds before it overflows.
    pub fn with_ring_capacity(self, capacity: usize) -> Self {
        self.state.lock().ring_capacity = capacity;
        self
    }

    /// Moved devices report busy for this many polls.
    pub fn with_busy_polls(self, polls: usize) -> Self {
        self.state.lock().busy_polls = polls;
        self
    }

    /// Makes the next `times` calls of `command` fail.
    pub fn fail_next(&self, command: &str, times: usize) {
        self.state.lock().failures.insert(command.to_string(), times);
    }

    /// Lets `pass` frames through, then drops the following `drop` frames.
    pub fn drop_frames(&self, pass: usize, drop: usize) {
        self.state.lock().frame_drop = Some(FrameDrop { pass, drop });
    }

    /// Every command issued so far, oldest first.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Number of logged commands starting with `prefix`.
    pub fn command_count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Empties the command log.
    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Last commanded position of a stage.
    pub fn position(&self, device: &str) -> Option<f64> {
        self.state.lock().positions.get(device).copied()
    }

    /// Last commanded XY position.
    pub fn xy_position(&self) -> Option<(f64, f64)> {
        self.state.lock().xy_position
    }

    /// Current value of a property.
    pub fn property(&self, device: &str, property: &str) -> Option<String> {
        self.state
            .lock()
            .properties
            .get(&(device.to_string(), property.to_string()))
            .cloned()
    }
}

#[async_trait]
impl HardwareCore for MockCore {
    async fn camera_device(&self) -> Result<String> {
        Ok(self.state.lock().camera.clone())
    }

    async fn set_camera_device(&self, camera: &str) -> Result<()> {
        let mut s = self.state.lock();
        s.require_camera(camera)?;
        s.command("set_camera_device", camera.to_string())?;
        s.camera = camera.to_string();
        Ok(())
    }

    async fn focus_device(&self) -> Result<Option<String>> {
        Ok(self.state.lock().focus.clone())
    }

    async fn xy_stage_device(&self) -> Result<Option<String>> {
        Ok(self.state.lock().xy_stage.clone())
    }

    async fn slm_device(&self) -> Result<Option<String>> {
        Ok(self.state.lock().slm.clone())
    }

    async fn has_device(&self, device: &str) -> Result<bool> {
        let s = self.state.lock();
        Ok(s.cameras.contains(device)
            || s.stages.contains(device)
            || s.focus.as_deref() == Some(device)
            || s.xy_stage.as_deref() == Some(device)
            || s.slm.as_deref() == Some(device))
    }

    async fn config_data(&self, group: &str, preset: &str) -> Result<Vec<PropertySetting>> {
        self.state
            .lock()
            .configs
            .get(&(group.to_string(), preset.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("no preset '{preset}' in group '{group}'"))
    }

    async fn set_config(&self, group: &str, preset: &str) -> Result<()> {
        let mut s = self.state.lock();
        s.command("set_config", format!("{group} {preset}"))?;
        let settings = s
            .configs
            .get(&(group.to_string(), preset.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("no preset '{preset}' in group '{group}'"))?;
        for setting in settings {
            s.properties
                .insert((setting.device, setting.property), setting.value);
        }
        Ok(())
    }

    async fn wait_for_config(&self, group: &str, preset: &str) -> Result<()> {
        self.state
            .lock()
            .command("wait_for_config", format!("{group} {preset}"))
    }

    async fn is_property_sequenceable(&self, device: &str, property: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .property_limits
            .contains_key(&(device.to_string(), property.to_string())))
    }

    async fn property_sequence_max_length(&self, device: &str, property: &str) -> Result<usize> {
        Ok(self
            .state
            .lock()
            .property_limits
            .get(&(device.to_string(), property.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn is_stage_sequenceable(&self, device: &str) -> Result<bool> {
        Ok(self.state.lock().stage_limits.contains_key(device))
    }

    async fn stage_sequence_max_length(&self, device: &str) -> Result<usize> {
        Ok(self
            .state
            .lock()
            .stage_limits
            .get(device)
            .copied()
            .unwrap_or(0))
    }

    async fn is_xy_stage_sequenceable(&self, _device: &str) -> Result<bool> {
        Ok(self.state.lock().xy_limit.is_some())
    }

    async fn xy_stage_sequence_max_length(&self, _device: &str) -> Result<usize> {
        Ok(self.state.lock().xy_limit.unwrap_or(0))
    }

    async fn is_exposure_sequenceable(&self, camera: &str) -> Result<bool> {
        Ok(self.state.lock().exposure_limits.contains_key(camera))
    }

    async fn exposure_sequence_max_length(&self, camera: &str) -> Result<usize> {
        Ok(self
            .state
            .lock()
            .exposure_limits
            .get(camera)
            .copied()
            .unwrap_or(0))
    }

    async fn load_stage_sequence(&self, device: &str, positions: &[f64]) -> Result<()> {
        let mut s = self.state.lock();
        let limit = s.stage_limits.get(device).copied().unwrap_or(0);
        if positions.len() > limit {
            bail!("{device} cannot hold a sequence of {}", positions.len());
        }
        s.command("load_stage_sequence", format!("{device} {positions:?}"))
    }

    async fn start_stage_sequence(&self, device: &str) -> Result<()> {
        self.state
            .lock()
            .command("start_stage_sequence", device.to_string())
    }

    async fn stop_stage_sequence(&self, device: &str) -> Result<()> {
        self.state
            .lock()
            .command("stop_stage_sequence", device.to_string())
    }

    async fn load_xy_stage_sequence(&self, device: &str, x: &[f64], y: &[f64]) -> Result<()> {
        let mut s = self.state.lock();
        if x.len() != y.len() {
            bail!("x and y sequences differ in length");
        }
        if x.len() > s.xy_limit.unwrap_or(0) {
            bail!("{device} cannot hold a sequence of {}", x.len());
        }
        s.command("load_xy_stage_sequence", format!("{device} {x:?} {y:?}"))
    }

    async fn start_xy_stage_sequence(&self, device: &str) -> Result<()> {
        self.state
            .lock()
            .command("start_xy_stage_sequence", device.to_string())
    }

    async fn stop_xy_stage_sequence(&self, device: &str) -> Result<()> {
        self.state
            .lock()
            .command("stop_xy_stage_sequence", device.to_string())
    }

    async fn load_exposure_sequence(&self, camera: &str, exposures_ms: &[f64]) -> Result<()> {
        let mut s = self.state.lock();
        let limit = s.exposure_limits.get(camera).copied().unwrap_or(0);
        if exposures_ms.len() > limit {
            bail!("{camera} cannot hold an exposure sequence of {}", exposures_ms.len());
        }
        s.command("load_exposure_sequence", format!("{camera} {exposures_ms:?}"))
    }

    async fn start_exposure_sequence(&self, camera: &str) -> Result<()> {
        self.state
            .lock()
            .command("start_exposure_sequence", camera.to_string())
    }

    async fn stop_exposure_sequence(&self, camera: &str) -> Result<()> {
        self.state
            .lock()
            .command("stop_exposure_sequence", camera.to_string())
    }

    async fn load_property_sequence(
        &self,
        device: &str,
        property: &str,
        values: &[String],
    ) -> Result<()> {
        self.state.lock().command(
            "load_property_sequence",
            format!("{device} {property} {values:?}"),
        )
    }

    async fn start_property_sequence(&self, device: &str, property: &str) -> Result<()> {
        self.state
            .lock()
            .command("start_property_sequence", format!("{device} {property}"))
    }

    async fn stop_property_sequence(&self, device: &str, property: &str) -> Result<()> {
        self.state
            .lock()
            .command("stop_property_sequence", format!("{device} {property}"))
    }

    async fn prepare_sequence_acquisition(&self, camera: &str) -> Result<()> {
        let mut s = self.state.lock();
        s.require_camera(camera)?;
        s.command("prepare_sequence_acquisition", camera.to_string())
    }

    async fn set_position(&self, device: &str, position: f64) -> Result<()> {
        let mut s = self.state.lock();
        if s.focus.as_deref() != Some(device) && !s.stages.contains(device) {
            bail!("no stage named '{device}'");
        }
        s.command("set_position", format!("{device} {position}"))?;
        s.positions.insert(device.to_string(), position);
        let polls = s.busy_polls;
        s.busy.insert(device.to_string(), polls);
        Ok(())
    }

    async fn set_xy_position(&self, device: &str, x: f64, y: f64) -> Result<()> {
        let mut s = self.state.lock();
        if s.xy_stage.as_deref() != Some(device) {
            bail!("no XY stage named '{device}'");
        }
        s.command("set_xy_position", format!("{device} {x} {y}"))?;
        s.xy_position = Some((x, y));
        let polls = s.busy_polls;
        s.busy.insert(device.to_string(), polls);
        Ok(())
    }

    async fn device_busy(&self, device: &str) -> Result<bool> {
        let mut s = self.state.lock();
        match s.busy.get_mut(device) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn exposure(&self) -> Result<f64> {
        let s = self.state.lock();
        Ok(s.exposures
            .get(&s.camera)
            .copied()
            .unwrap_or(DEFAULT_EXPOSURE_MS))
    }

    async fn set_exposure(&self, exposure_ms: f64) -> Result<()> {
        let mut s = self.state.lock();
        s.command("set_exposure", format!("{exposure_ms}"))?;
        let camera = s.camera.clone();
        s.exposures.insert(camera, exposure_ms);
        Ok(())
    }

    async fn set_slm_image(&self, device: &str, pattern: &SlmPattern) -> Result<()> {
        let mut s = self.state.lock();
        if s.slm.as_deref() != Some(device) {
            bail!("no SLM named '{device}'");
        }
        s.command("set_slm_image", format!("{device} {}", pattern.len()))
    }

    async fn set_property(&self, device: &str, property: &str, value: &str) -> Result<()> {
        let mut s = self.state.lock();
        s.command("set_property", format!("{device} {property} {value}"))?;
        s.properties
            .insert((device.to_string(), property.to_string()), value.to_string());
        Ok(())
    }

    async fn snap_image(&self) -> Result<()> {
        let mut s = self.state.lock();
        let camera = s.camera.clone();
        s.command("snap_image", camera.clone())?;
        let channels = s.channels;
        let mut snapped = Vec::with_capacity(channels);
        for channel in 0..channels {
            let frame = s
                .frame_survives()
                .then(|| s.make_frame(&camera, channel));
            snapped.push(frame);
        }
        s.snapped = snapped;
        Ok(())
    }

    async fn start_sequence_acquisition(&self, camera: &str, count: usize) -> Result<()> {
        let mut s = self.state.lock();
        s.require_camera(camera)?;
        s.command("start_sequence_acquisition", format!("{camera} {count}"))?;
        let channels = s.channels;
        for _ in 0..count {
            for channel in 0..channels {
                if s.frame_survives() {
                    let frame = s.make_frame(camera, channel);
                    s.ring.push_back(frame);
                    s.outstanding += 1;
                }
            }
        }
        if s.ring.len() > s.ring_capacity {
            s.overflowed = true;
        }
        Ok(())
    }

    async fn stop_sequence_acquisition(&self, camera: &str) -> Result<()> {
        let mut s = self.state.lock();
        s.command("stop_sequence_acquisition", camera.to_string())?;
        s.outstanding = 0;
        Ok(())
    }

    async fn is_sequence_running(&self) -> Result<bool> {
        Ok(self.state.lock().outstanding > 0)
    }

    async fn number_of_camera_channels(&self) -> Result<usize> {
        Ok(self.state.lock().channels)
    }

    async fn pop_next_image(&self) -> Result<Option<RawImage>> {
        let mut s = self.state.lock();
        let frame = s.ring.pop_front();
        if frame.is_some() {
            s.outstanding = s.outstanding.saturating_sub(1);
        }
        Ok(frame)
    }

    async fn get_image(&self, channel: usize) -> Result<Option<RawImage>> {
        let mut s = self.state.lock();
        let channels = s.channels;
        match s.snapped.get_mut(channel) {
            Some(slot) => Ok(slot.take()),
            None if channel < channels => Ok(None),
            None => Err(anyhow!("camera has no channel {channel}")),
        }
    }

    async fn is_buffer_overflowed(&self) -> Result<bool> {
        Ok(self.state.lock().overflowed)
    }

    async fn clear_circular_buffer(&self) -> Result<()> {
        let mut s = self.state.lock();
        s.command("clear_circular_buffer", String::new())?;
        s.ring.clear();
        s.overflowed = false;
        s.outstanding = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snap_fills_one_slot_per_channel() {
        let core = MockCore::new().with_camera_channels(2).with_image_size(4, 4);
        core.snap_image().await.unwrap();
        let first = core.get_image(0).await.unwrap().unwrap();
        assert_eq!(first.pixels.len(), 16);
        assert_eq!(first.channel_index, Some(0));
        assert!(core.get_image(1).await.unwrap().is_some());
        assert!(core.get_image(0).await.unwrap().is_none());
        assert!(core.get_image(5).await.is_err());
    }

    #[tokio::test]
    async fn test_sequence_drains_ring_buffer() {
        let core = MockCore::new();
        core.start_sequence_acquisition("Camera", 3).await.unwrap();
        assert!(core.is_sequence_running().await.unwrap());
        for _ in 0..3 {
            assert!(core.pop_next_image().await.unwrap().is_some());
        }
        assert!(!core.is_sequence_running().await.unwrap());
        assert!(core.pop_next_image().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_failures_and_drops() {
        let core = MockCore::new();
        core.fail_next("set_position", 1);
        assert!(core.set_position("Z", 1.0).await.is_err());
        assert!(core.set_position("Z", 1.0).await.is_ok());
        assert_eq!(core.position("Z"), Some(1.0));

        core.drop_frames(1, 2);
        core.start_sequence_acquisition("Camera", 4).await.unwrap();
        let mut received = 0;
        while core.pop_next_image().await.unwrap().is_some() {
            received += 1;
        }
        assert_eq!(received, 2);
    }

    #[tokio::test]
    async fn test_ring_overflow() {
        let core = MockCore::new().with_ring_capacity(2);
        core.start_sequence_acquisition("Camera", 3).await.unwrap();
        assert!(core.is_buffer_overflowed().await.unwrap());
        core.clear_circular_buffer().await.unwrap();
        assert!(!core.is_buffer_overflowed().await.unwrap());
    }

    #[tokio::test]
    async fn test_config_applies_properties() {
        let core = MockCore::new();
        core.set_config("Channel", "FITC").await.unwrap();
        assert_eq!(core.property("Laser", "Power").as_deref(), Some("20"));
        assert!(core.config_data("Channel", "Brightfield").await.is_err());
    }
}
