//! Executing one dispatch unit on the hardware.
//!
//! [`Executor::execute`] runs a single capture or a fused burst through the
//! full lifecycle: start-time gate, hooks, hardware preparation, capture,
//! frame retrieval and attribution. It runs only on the hardware-control
//! worker, which owns the [`HardwareState`] it diffs against.
//!
//! Frame attribution relies on each camera delivering the frames of a burst
//! in the order its children were listed. Frames from different cameras may
//! interleave. The engine cannot verify this ordering; it is a property the
//! hardware must provide.

use super::sequencing::fill_sequence;
use crate::acquisition::AcquisitionContext;
use crate::config::EngineConfig;
use crate::core::{FrameMessage, TaggedImage};
use crate::error::{AcqError, AcqResult};
use crate::error_recovery::{retry_hardware_command, RetryPolicy};
use crate::event::{AcquisitionEvent, CaptureEvent, SequenceEvent};
use crate::hardware::{HardwareCore, RawImage};
use crate::hooks::HookPoint;
use crate::metadata::{self, keys};
use crate::notification::{AcqNotification, Milestone};
use anyhow::Result;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Hardware-facing state owned by the hardware-control worker.
#[derive(Debug, Default)]
pub(crate) struct HardwareState {
    /// Steps waiting to be fused
    pub pending: Vec<CaptureEvent>,
    /// Final step of the last executed unit, used to skip redundant commands
    pub last_dispatched: Option<CaptureEvent>,
    /// Acquisition the state above belongs to
    pub acquisition: Option<Uuid>,
}

impl HardwareState {
    /// Forgets all diffing state when a new acquisition shows up.
    pub fn switch_to(&mut self, acquisition: Uuid) {
        if self.acquisition != Some(acquisition) {
            self.pending.clear();
            self.last_dispatched = None;
            self.acquisition = Some(acquisition);
        }
    }
}

#[derive(Debug)]
enum SequencedDevice {
    Stage(String),
    XyStage(String),
    Exposure(String),
    Property(String, String),
}

/// Devices armed for the current burst, stopped after it or on abort.
#[derive(Debug, Default)]
pub(crate) struct HardwareSequences {
    devices: Vec<SequencedDevice>,
    cameras: Vec<String>,
}

impl HardwareSequences {
    fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.cameras.is_empty()
    }
}

/// Device names read once per dispatch.
struct CoreDevices {
    camera: String,
    focus: Option<String>,
    xy_stage: Option<String>,
    slm: Option<String>,
}

pub(crate) struct Executor<'a> {
    core: &'a dyn HardwareCore,
    config: &'a EngineConfig,
    policy: RetryPolicy,
    ctx: &'a Arc<AcquisitionContext>,
}

impl<'a> Executor<'a> {
    /// Borrows what one dispatch unit needs.
    pub fn new(
        core: &'a dyn HardwareCore,
        config: &'a EngineConfig,
        ctx: &'a Arc<AcquisitionContext>,
    ) -> Self {
        Self {
            core,
            config,
            policy: config.retry_policy(),
            ctx,
        }
    }

    /// Runs one dispatch unit to completion.
    ///
    /// Frame timeouts are handled here and never returned. An abort makes
    /// this return `Ok` early after stopping armed sequences.
    pub async fn execute(&self, event: AcquisitionEvent, state: &mut HardwareState) -> AcqResult<()> {
        if self.ctx.debug_mode() {
            debug!(acquisition = %self.ctx.id(), "Executing: {}", event);
        }
        match event {
            AcquisitionEvent::Finished => return self.finish().await,
            AcquisitionEvent::SequenceEnd => return Ok(()),
            AcquisitionEvent::Capture(_) | AcquisitionEvent::Sequence(_) => {}
        }
        if !self.wait_for_start_time(event.min_start_time_ms()).await {
            return Ok(());
        }

        self.ctx.notify(Milestone::PreHardware, &event);
        let Some(event) = self.run_hooks(HookPoint::BeforeHardware, event).await else {
            return Ok(());
        };

        let mut sequences = HardwareSequences::default();
        match self.prepare_hardware(&event, state, &mut sequences).await {
            Ok(()) => {}
            Err(AcqError::Aborted) => {
                self.stop_hardware_sequences(&sequences).await;
                return Ok(());
            }
            Err(e) => {
                self.stop_hardware_sequences(&sequences).await;
                return Err(e);
            }
        }
        self.ctx.notify(Milestone::PostHardware, &event);

        let Some(event) = self.run_hooks(HookPoint::AfterHardware, event).await else {
            self.stop_hardware_sequences(&sequences).await;
            return Ok(());
        };
        // A hook may have changed the start time
        if !self.wait_for_start_time(event.min_start_time_ms()).await {
            self.stop_hardware_sequences(&sequences).await;
            return Ok(());
        }

        if !event.should_acquire_image() {
            return Ok(());
        }
        match self.acquire_images(&event, &mut sequences).await {
            Ok(()) => {}
            Err(AcqError::Aborted) => {
                self.stop_hardware_sequences(&sequences).await;
                return Ok(());
            }
            Err(AcqError::FrameTimeout {
                waited_ms,
                received,
                expected,
            }) => {
                warn!(
                    acquisition = %self.ctx.id(),
                    waited_ms,
                    "Frame timeout: {}/{} frames received, abandoning the rest of this capture",
                    received,
                    expected
                );
                self.stop_hardware_sequences(&sequences).await;
                return Ok(());
            }
            Err(e) => {
                self.stop_hardware_sequences(&sequences).await;
                return Err(e);
            }
        }

        if self.ctx.is_abort_requested() {
            self.stop_hardware_sequences(&sequences).await;
            return Ok(());
        }
        if let AcquisitionEvent::Sequence(_) = event {
            self.wait_for_sequence_stop().await?;
            self.stop_hardware_sequences(&sequences).await;
        }
        Ok(())
    }

    async fn finish(&self) -> AcqResult<()> {
        if self.ctx.are_events_finished() {
            debug!(acquisition = %self.ctx.id(), "Ignoring duplicate finish");
            return Ok(());
        }
        self.ctx
            .hooks()
            .run_and_close_all(&AcquisitionEvent::Finished)
            .await;
        if let Err(e) = self.ctx.add_to_output(FrameMessage::EndOfAcquisition).await {
            error!("Could not signal end of acquisition downstream: {}", e);
        }
        self.ctx.mark_events_finished();
        self.ctx.post(AcqNotification::events_finished());
        debug!(acquisition = %self.ctx.id(), "Acquisition events finished");
        Ok(())
    }

    /// Runs a hook list; `None` if a hook cancelled or an abort came in.
    async fn run_hooks(&self, point: HookPoint, event: AcquisitionEvent) -> Option<AcquisitionEvent> {
        let event = self.ctx.hooks().run(point, event).await;
        if self.ctx.is_abort_requested() {
            return None;
        }
        event
    }

    /// False if an abort arrived while waiting.
    async fn wait_for_start_time(&self, min_start_ms: Option<u64>) -> bool {
        let Some(target) = min_start_ms else {
            return !self.ctx.is_abort_requested();
        };
        while self.ctx.elapsed_ms() < target {
            if self.ctx.is_abort_requested() {
                return false;
            }
            sleep(self.config.start_time_poll()).await;
        }
        !self.ctx.is_abort_requested()
    }

    async fn retry<T, F, Fut>(&self, command: &str, operation: F) -> AcqResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_hardware_command(&self.policy, command, operation).await
    }

    /// Polls until `device` is idle. Returns [`AcqError::Aborted`] once the
    /// acquisition is aborted.
    async fn wait_for_device(&self, device: &str) -> AcqResult<()> {
        let core = self.core;
        loop {
            if self.ctx.is_abort_requested() {
                return Err(AcqError::Aborted);
            }
            let busy = self
                .retry("Waiting for device", move || core.device_busy(device))
                .await?;
            if !busy {
                return Ok(());
            }
            sleep(self.config.device_poll()).await;
        }
    }

    async fn move_stage(&self, command: &str, device: &str, position: f64) -> AcqResult<()> {
        let core = self.core;
        self.wait_for_device(device).await?;
        self.retry(command, move || core.set_position(device, position))
            .await?;
        self.wait_for_device(device).await
    }

    async fn move_xy_stage(&self, device: &str, x: f64, y: f64) -> AcqResult<()> {
        let core = self.core;
        self.wait_for_device(device).await?;
        self.retry("Moving XY stage", move || core.set_xy_position(device, x, y))
            .await?;
        self.wait_for_device(device).await
    }

    async fn devices(&self) -> AcqResult<CoreDevices> {
        let core = self.core;
        let (camera, focus, xy_stage, slm) = self
            .retry("Querying devices", move || query_devices(core))
            .await?;
        Ok(CoreDevices {
            camera,
            focus,
            xy_stage,
            slm,
        })
    }

    // ------------------------------------------------------------------
    // Hardware preparation
    // ------------------------------------------------------------------

    /// Applies every device target of `event`, arming sequences for a burst.
    ///
    /// Devices are visited in a fixed order: focus, other stages, XY stage,
    /// config group, exposure, SLM, then arbitrary properties. A device whose
    /// target matches the last dispatched step is left alone. Armed devices
    /// are recorded in `sequences` as they start, so a failure or abort part
    /// way through can still stop them.
    async fn prepare_hardware(
        &self,
        event: &AcquisitionEvent,
        state: &mut HardwareState,
        sequences: &mut HardwareSequences,
    ) -> AcqResult<()> {
        let children = event.children();
        let (Some(first), Some(last)) = (children.first(), children.last()) else {
            return Ok(());
        };
        let devices = self.devices().await?;
        let previous = state.last_dispatched.take().unwrap_or_default();
        let flags = event.sequenced();
        let core = self.core;

        if let AcquisitionEvent::Sequence(seq) = event {
            self.load_sequences(seq, &devices, sequences).await?;
        }

        // Focus
        if !flags.z {
            if let Some(z) = children.iter().find_map(|e| e.z) {
                if previous.z != Some(z) {
                    let focus = require(devices.focus.as_deref(), "a focus position")?;
                    self.ctx
                        .hooks()
                        .run(HookPoint::BeforeZDrive, event.clone())
                        .await;
                    self.ctx.notify(Milestone::PreZDrive, event);
                    self.move_stage("Moving Z device", focus, z).await?;
                }
            }
        }

        // Other single-axis stages; fused steps share their targets
        for (device, coordinate) in &first.stage_positions {
            let position = coordinate.position;
            if previous.stage_position(device) != Some(position) {
                self.move_stage("Moving stage", device, position).await?;
            }
        }

        // XY stage
        if !flags.xy {
            let x = children.iter().find_map(|e| e.x).or(previous.x);
            let y = children.iter().find_map(|e| e.y).or(previous.y);
            if let (Some(x), Some(y)) = (x, y) {
                if previous.x != Some(x) || previous.y != Some(y) {
                    let xy = require(devices.xy_stage.as_deref(), "an XY position")?;
                    self.move_xy_stage(xy, x, y).await?;
                }
            }
        }

        // Config group
        if !flags.config {
            if let Some(config) = children.iter().find_map(|e| e.config.as_ref()) {
                if previous.config.as_ref() != Some(config) {
                    let (group, preset) = (config.group.as_str(), config.preset.as_str());
                    self.retry("Setting config group", move || {
                        apply_config(core, group, preset)
                    })
                    .await?;
                }
            }
        }

        // Exposure
        if !flags.exposure {
            let exposure = event
                .exposure_ms()
                .or_else(|| children.iter().find_map(|e| e.exposure_ms));
            if let Some(exposure) = exposure {
                if previous.exposure_ms != Some(exposure) {
                    self.retry("Setting exposure", move || core.set_exposure(exposure))
                        .await?;
                }
            }
        }

        // SLM
        if let Some(pattern) = &first.slm_pattern {
            if previous.slm_pattern.as_ref() != Some(pattern) {
                let slm = require(devices.slm.as_deref(), "an SLM pattern")?;
                self.retry("Setting SLM pattern", move || core.set_slm_image(slm, pattern))
                    .await?;
            }
        }

        // Arbitrary properties
        for setting in &first.properties {
            if !previous.properties.contains(setting) {
                let (device, property, value) = (
                    setting.device.as_str(),
                    setting.property.as_str(),
                    setting.value.as_str(),
                );
                self.retry("Setting property", move || {
                    core.set_property(device, property, value)
                })
                .await?;
            }
        }

        state.last_dispatched = Some(last.clone());
        if self.ctx.debug_mode() && !sequences.is_empty() {
            debug!(acquisition = %self.ctx.id(), "Armed sequences: {:?}", sequences);
        }
        Ok(())
    }

    /// Loads and starts every sequenced device class of a burst.
    async fn load_sequences(
        &self,
        seq: &SequenceEvent,
        devices: &CoreDevices,
        sequences: &mut HardwareSequences,
    ) -> AcqResult<()> {
        let core = self.core;
        let children = seq.events();
        let flags = seq.sequenced();

        if flags.z {
            let focus = require(devices.focus.as_deref(), "a focus sequence")?;
            let positions = fill_sequence(children.iter().map(|e| e.z).collect()).unwrap_or_default();
            let positions = positions.as_slice();
            self.ctx
                .hooks()
                .run(HookPoint::BeforeZDrive, AcquisitionEvent::Sequence(seq.clone()))
                .await;
            self.retry("Loading Z sequence", move || {
                core.load_stage_sequence(focus, positions)
            })
            .await?;
            self.retry("Starting Z sequence", move || core.start_stage_sequence(focus))
                .await?;
            sequences.devices.push(SequencedDevice::Stage(focus.to_string()));
        }

        if flags.xy {
            let xy = require(devices.xy_stage.as_deref(), "an XY sequence")?;
            let xs = fill_sequence(children.iter().map(|e| e.x).collect()).unwrap_or_default();
            let ys = fill_sequence(children.iter().map(|e| e.y).collect()).unwrap_or_default();
            let (xs, ys) = (xs.as_slice(), ys.as_slice());
            self.retry("Loading XY sequence", move || {
                core.load_xy_stage_sequence(xy, xs, ys)
            })
            .await?;
            self.retry("Starting XY sequence", move || core.start_xy_stage_sequence(xy))
                .await?;
            sequences.devices.push(SequencedDevice::XyStage(xy.to_string()));
        }

        if flags.exposure {
            let camera = seq
                .events()
                .first()
                .and_then(|e| e.camera.as_deref())
                .unwrap_or(devices.camera.as_str());
            let exposures =
                fill_sequence(children.iter().map(|e| e.exposure_ms).collect()).unwrap_or_default();
            let exposures = exposures.as_slice();
            self.retry("Loading exposure sequence", move || {
                core.load_exposure_sequence(camera, exposures)
            })
            .await?;
            self.retry("Starting exposure sequence", move || {
                core.start_exposure_sequence(camera)
            })
            .await?;
            sequences
                .devices
                .push(SequencedDevice::Exposure(camera.to_string()));
        }

        if flags.config {
            self.load_config_sequences(children, sequences).await?;
        }

        let counts = AcquisitionEvent::Sequence(seq.clone()).camera_image_counts(&devices.camera);
        for camera in counts.keys() {
            let camera = camera.as_str();
            self.retry("Preparing sequence acquisition", move || {
                core.prepare_sequence_acquisition(camera)
            })
            .await?;
        }
        Ok(())
    }

    /// Turns a varying config preset into per-property sequences.
    ///
    /// Properties that do not change across the burst are set once.
    async fn load_config_sequences(
        &self,
        children: &[CaptureEvent],
        sequences: &mut HardwareSequences,
    ) -> AcqResult<()> {
        let core = self.core;
        let mut per_child = Vec::with_capacity(children.len());
        for child in children {
            let settings = match &child.config {
                Some(config) => {
                    let (group, preset) = (config.group.as_str(), config.preset.as_str());
                    Some(
                        self.retry("Reading config group", move || {
                            core.config_data(group, preset)
                        })
                        .await?,
                    )
                }
                None => None,
            };
            per_child.push(settings);
        }
        let Some(template) = per_child.iter().flatten().next().cloned() else {
            return Ok(());
        };

        for setting in template {
            let values: Vec<Option<String>> = per_child
                .iter()
                .map(|settings| {
                    settings.as_ref().and_then(|s| {
                        s.iter()
                            .find(|p| p.device == setting.device && p.property == setting.property)
                            .map(|p| p.value.clone())
                    })
                })
                .collect();
            let values = fill_sequence(values).unwrap_or_default();
            let (device, property) = (setting.device.as_str(), setting.property.as_str());

            if values.windows(2).all(|w| w[0] == w[1]) {
                let value = setting.value.as_str();
                self.retry("Setting property", move || {
                    core.set_property(device, property, value)
                })
                .await?;
                continue;
            }
            let values = values.as_slice();
            self.retry("Loading property sequence", move || {
                core.load_property_sequence(device, property, values)
            })
            .await?;
            self.retry("Starting property sequence", move || {
                core.start_property_sequence(device, property)
            })
            .await?;
            sequences
                .devices
                .push(SequencedDevice::Property(device.to_string(), property.to_string()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------

    /// Starts capture and pulls every expected frame into the output queue.
    async fn acquire_images(
        &self,
        event: &AcquisitionEvent,
        sequences: &mut HardwareSequences,
    ) -> AcqResult<()> {
        let core = self.core;
        let default_camera = self
            .retry("Querying camera", move || core.camera_device())
            .await?;
        let channels = self
            .retry("Querying camera channels", move || {
                core.number_of_camera_channels()
            })
            .await?
            .max(1);
        let current_exposure = self
            .retry("Reading exposure", move || core.exposure())
            .await?;

        let timeout = self.frame_timeout(event);

        match event {
            AcquisitionEvent::Capture(capture) => {
                self.snap(capture, event, &default_camera, channels, current_exposure, timeout)
                    .await
            }
            AcquisitionEvent::Sequence(seq) => {
                self.ctx.notify(Milestone::PreSequenceStarted, event);
                let counts = event.camera_image_counts(&default_camera);
                for (camera, count) in &counts {
                    core.start_sequence_acquisition(camera, *count)
                        .await
                        .map_err(|e| AcqError::hardware("Starting sequence acquisition", &e))?;
                    sequences.cameras.push(camera.clone());
                }
                self.ctx
                    .hooks()
                    .run(HookPoint::AfterCamera, event.clone())
                    .await;
                self.drain_burst(seq, &default_camera, channels, current_exposure, timeout)
                    .await?;
                self.ctx
                    .hooks()
                    .run(HookPoint::AfterSequence, event.clone())
                    .await;
                Ok(())
            }
            AcquisitionEvent::Finished | AcquisitionEvent::SequenceEnd => Ok(()),
        }
    }

    async fn snap(
        &self,
        capture: &CaptureEvent,
        event: &AcquisitionEvent,
        default_camera: &str,
        channels: usize,
        current_exposure: f64,
        timeout: Option<Duration>,
    ) -> AcqResult<()> {
        let core = self.core;
        let camera_override = capture
            .camera
            .as_deref()
            .filter(|camera| *camera != default_camera);

        self.ctx.notify(Milestone::PreSnap, event);
        if let Some(camera) = camera_override {
            core.set_camera_device(camera)
                .await
                .map_err(|e| AcqError::hardware("Switching camera", &e))?;
        }
        let snapped = core
            .snap_image()
            .await
            .map_err(|e| AcqError::hardware("Snapping image", &e));
        if camera_override.is_some() {
            core.set_camera_device(default_camera)
                .await
                .map_err(|e| AcqError::hardware("Restoring camera", &e))?;
        }
        snapped?;
        self.ctx
            .hooks()
            .run(HookPoint::AfterCamera, event.clone())
            .await;

        let deadline = FrameDeadline::new(timeout, channels);
        for channel in 0..channels {
            let raw = loop {
                if self.ctx.is_abort_requested() {
                    return Err(AcqError::Aborted);
                }
                let polled = core
                    .get_image(channel)
                    .await
                    .map_err(|e| AcqError::hardware("Retrieving image", &e))?;
                if let Some(raw) = polled {
                    break raw;
                }
                deadline.check(channel)?;
                sleep(self.config.frame_poll()).await;
            };
            self.emit(raw, capture, current_exposure).await?;
        }
        self.after_exposure(capture).await;
        Ok(())
    }

    async fn drain_burst(
        &self,
        seq: &SequenceEvent,
        default_camera: &str,
        channels: usize,
        current_exposure: f64,
        timeout: Option<Duration>,
    ) -> AcqResult<()> {
        let core = self.core;
        let children = seq.events();

        // Per (camera, channel) queue of child indices, in arrival order
        let mut owners: BTreeMap<(String, usize), VecDeque<usize>> = BTreeMap::new();
        for (index, child) in children.iter().enumerate() {
            let camera = child.camera.as_deref().unwrap_or(default_camera);
            for channel in 0..channels {
                owners
                    .entry((camera.to_string(), channel))
                    .or_default()
                    .push_back(index);
            }
        }
        let mut outstanding = vec![channels; children.len()];
        let expected = children.len() * channels;
        let deadline = FrameDeadline::new(timeout, expected);

        let mut received = 0;
        while received < expected {
            if self.ctx.is_abort_requested() {
                return Err(AcqError::Aborted);
            }
            let overflowed = core
                .is_buffer_overflowed()
                .await
                .map_err(|e| AcqError::hardware("Checking sequence buffer", &e))?;
            if overflowed {
                error!(acquisition = %self.ctx.id(), "Sequence buffer overflowed");
                return Err(AcqError::BufferOverflow);
            }
            let popped = core
                .pop_next_image()
                .await
                .map_err(|e| AcqError::hardware("Retrieving image", &e))?;
            let Some(raw) = popped else {
                deadline.check(received)?;
                sleep(self.config.frame_poll()).await;
                continue;
            };

            let key = (raw.camera.clone(), raw.channel_index.unwrap_or(0));
            let index = owners
                .get_mut(&key)
                .and_then(VecDeque::pop_front)
                .ok_or_else(|| AcqError::HardwareControl {
                    command: "Attributing frames".to_string(),
                    message: format!(
                        "unexpected frame from camera '{}' channel {}",
                        key.0, key.1
                    ),
                })?;
            let child = &children[index];
            self.emit(raw, child, current_exposure).await?;
            received += 1;

            outstanding[index] -= 1;
            if outstanding[index] == 0 {
                self.after_exposure(child).await;
            }
        }
        Ok(())
    }

    /// Stamps a frame with its step's metadata and queues it.
    async fn emit(&self, raw: RawImage, event: &CaptureEvent, current_exposure: f64) -> AcqResult<()> {
        let mut image = TaggedImage::new(raw.width, raw.height, raw.pixels);
        let exposure = event.exposure_ms.unwrap_or(current_exposure);
        metadata::stamp_image(&mut image, event, self.ctx.elapsed_ms(), exposure);
        image
            .tags
            .insert(keys::CAMERA.to_string(), Value::from(raw.camera));
        if self.ctx.debug_mode() {
            debug!(acquisition = %self.ctx.id(), "Image acquired: {}", event);
        }
        self.ctx.add_to_output(FrameMessage::frame(image)).await
    }

    async fn after_exposure(&self, event: &CaptureEvent) {
        let event = AcquisitionEvent::from(event.clone());
        self.ctx.notify(Milestone::PostExposure, &event);
        self.ctx.hooks().run(HookPoint::AfterExposure, event).await;
    }

    /// Per-event timeout, else the configured default. `None` waits forever.
    fn frame_timeout(&self, event: &AcquisitionEvent) -> Option<Duration> {
        event
            .timeout_ms()
            .map(|ms| Duration::from_secs_f64(ms.max(0.0) / 1000.0))
            .or_else(|| self.config.default_frame_timeout_ms.map(Duration::from_millis))
    }

    // ------------------------------------------------------------------
    // Cleanup
    // ------------------------------------------------------------------

    async fn wait_for_sequence_stop(&self) -> AcqResult<()> {
        loop {
            let running = self
                .core
                .is_sequence_running()
                .await
                .map_err(|e| AcqError::hardware("Waiting for sequence to stop", &e))?;
            if !running {
                return Ok(());
            }
            if self.ctx.is_abort_requested() {
                return Ok(());
            }
            sleep(self.config.sequence_stop_poll()).await;
        }
    }

    /// Stops armed sequences and clears the camera buffer. Failures are
    /// logged, never returned.
    async fn stop_hardware_sequences(&self, sequences: &HardwareSequences) {
        if sequences.is_empty() {
            return;
        }
        let core = self.core;
        for camera in &sequences.cameras {
            if let Err(e) = core.stop_sequence_acquisition(camera).await {
                warn!("Could not stop sequence acquisition on {}: {:#}", camera, e);
            }
        }
        for device in &sequences.devices {
            let stopped = match device {
                SequencedDevice::Stage(name) => core.stop_stage_sequence(name).await,
                SequencedDevice::XyStage(name) => core.stop_xy_stage_sequence(name).await,
                SequencedDevice::Exposure(camera) => core.stop_exposure_sequence(camera).await,
                SequencedDevice::Property(device, property) => {
                    core.stop_property_sequence(device, property).await
                }
            };
            if let Err(e) = stopped {
                warn!("Could not stop {:?}: {:#}", device, e);
            }
        }
        if !sequences.cameras.is_empty() {
            if let Err(e) = core.clear_circular_buffer().await {
                warn!("Could not clear camera buffer: {:#}", e);
            }
        }
    }
}

/// Deadline for the frames of one capture.
struct FrameDeadline {
    started: Instant,
    timeout: Option<Duration>,
    expected: usize,
}

impl FrameDeadline {
    fn new(timeout: Option<Duration>, expected: usize) -> Self {
        Self {
            started: Instant::now(),
            timeout,
            expected,
        }
    }

    fn check(&self, received: usize) -> AcqResult<()> {
        match self.timeout {
            Some(timeout) if self.started.elapsed() > timeout => Err(AcqError::FrameTimeout {
                waited_ms: self.started.elapsed().as_millis() as u64,
                received,
                expected: self.expected,
            }),
            _ => Ok(()),
        }
    }
}

fn require<'d>(device: Option<&'d str>, what: &str) -> AcqResult<&'d str> {
    device.ok_or_else(|| {
        AcqError::Configuration(format!("event requests {what} but no such device is installed"))
    })
}

async fn query_devices(
    core: &dyn HardwareCore,
) -> Result<(String, Option<String>, Option<String>, Option<String>)> {
    Ok((
        core.camera_device().await?,
        core.focus_device().await?,
        core.xy_stage_device().await?,
        core.slm_device().await?,
    ))
}


async fn apply_config(core: &dyn HardwareCore, group: &str, preset: &str) -> Result<()> {
    core.set_config(group, preset).await?;
    core.wait_for_config(group, preset).await
}
