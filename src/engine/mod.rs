//! Event sequencer and dispatcher.
//!
//! The engine owns two serial workers, each a Tokio task draining its own
//! channel:
//!
//! - **Generation worker**: pulls events from a submitted stream one at a
//!   time, runs event-generation hooks, honors pause and abort, and hands
//!   each event to the hardware-control worker. It waits for every event to
//!   finish executing before pulling the next one. That wait is the only
//!   backpressure between event sources and hardware.
//! - **Hardware-control worker**: owns the pending merge buffer and the last
//!   dispatched step. It fuses compatible steps into bursts, executes
//!   everything else, and pushes frames into the acquisition's first queue.
//!
//! ```text
//! submit_event_stream --> [generation worker] --HardwareJob--> [hardware worker]
//!                               ^    oneshot reply    |
//!                               `---------------------'
//! ```
//!
//! One engine can serve successive acquisitions. Hardware diffing state is
//! reset whenever a job for a different acquisition arrives.

pub mod execution;
pub mod sequencing;

use crate::acquisition::AcquisitionContext;
use crate::config::EngineConfig;
use crate::error::{AcqError, AcqResult};
use crate::event::AcquisitionEvent;
use crate::hardware::HardwareCore;
use crate::hooks::HookPoint;
use crate::messages::{EventStream, GenerationJob, HardwareJob, SharedError, SubmissionHandle};
use execution::{Executor, HardwareState};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Handle to the engine's workers. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    generation_tx: mpsc::UnboundedSender<GenerationJob>,
    core: Arc<dyn HardwareCore>,
    config: Arc<EngineConfig>,
}

impl Engine {
    /// Spawns both workers. Must be called within a Tokio runtime.
    pub fn new(core: Arc<dyn HardwareCore>, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let (hardware_tx, hardware_rx) = mpsc::channel(1);
        let (generation_tx, generation_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_hardware_worker(
            Arc::clone(&core),
            Arc::clone(&config),
            hardware_rx,
        ));
        tokio::spawn(run_generation_worker(
            Arc::clone(&config),
            generation_rx,
            hardware_tx,
        ));
        info!("Acquisition engine started");

        Self {
            generation_tx,
            core,
            config,
        }
    }

    /// Hardware the engine drives.
    pub fn core(&self) -> Arc<dyn HardwareCore> {
        Arc::clone(&self.core)
    }

    /// Settings shared by both workers.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Queues a lazy event source for the generation worker.
    pub fn submit_event_stream(
        &self,
        events: EventStream,
        ctx: Arc<AcquisitionContext>,
    ) -> SubmissionHandle {
        let (response, rx) = oneshot::channel();
        self.send(GenerationJob::SubmitStream {
            stream: events,
            ctx,
            response,
        });
        SubmissionHandle::new(rx)
    }

    /// Queues a finite list of events.
    pub fn submit_events(
        &self,
        events: Vec<AcquisitionEvent>,
        ctx: Arc<AcquisitionContext>,
    ) -> SubmissionHandle {
        self.submit_event_stream(stream::iter(events.into_iter().map(Some)).boxed(), ctx)
    }

    /// Queues the acquisition-finished event behind all earlier submissions.
    pub fn finish_acquisition(&self, ctx: Arc<AcquisitionContext>) -> SubmissionHandle {
        let (response, rx) = oneshot::channel();
        self.send(GenerationJob::Finish { ctx, response });
        SubmissionHandle::new(rx)
    }

    fn send(&self, job: GenerationJob) {
        // On failure the job, and with it the reply sender, is dropped;
        // the handle then reports a stopped worker.
        if let Err(e) = self.generation_tx.send(job) {
            error!("Generation worker is gone, dropping {:?}", e.0);
        }
    }
}

// ============================================================================
// Generation worker
// ============================================================================

async fn run_generation_worker(
    config: Arc<EngineConfig>,
    mut rx: mpsc::UnboundedReceiver<GenerationJob>,
    hardware_tx: mpsc::Sender<HardwareJob>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            GenerationJob::SubmitStream {
                stream,
                ctx,
                response,
            } => {
                let result = generate(&config, stream, &ctx, &hardware_tx).await;
                if let Err(e) = &result {
                    ctx.abort_shared(Some(Arc::clone(e)));
                }
                let _ = response.send(result);
            }
            GenerationJob::Finish { ctx, response } => {
                let (reply, done) = oneshot::channel();
                let result = match hardware_tx.send(HardwareJob::Finish { ctx, response: reply }).await {
                    Ok(()) => wait_reply(done).await,
                    Err(_) => Err(AcqError::WorkerStopped("hardware")),
                };
                let _ = response.send(result.map_err(Arc::new));
            }
        }
    }
    debug!("Generation worker exiting");
}

/// Feeds one stream to the hardware worker, one event at a time.
async fn generate(
    config: &EngineConfig,
    mut events: EventStream,
    ctx: &Arc<AcquisitionContext>,
    hardware_tx: &mpsc::Sender<HardwareJob>,
) -> Result<(), SharedError> {
    while let Some(item) = events.next().await {
        // Checked before the placeholder skip so a source that never
        // produces an event can still be aborted
        if ctx.is_abort_requested() {
            return Ok(());
        }
        let Some(event) = item else {
            continue;
        };
        let Some(event) = ctx.hooks().run(HookPoint::EventGeneration, event).await else {
            debug!(acquisition = %ctx.id(), "Event generation hook cancelled the stream");
            break;
        };
        while ctx.is_paused() && !ctx.is_abort_requested() {
            sleep(config.pause_poll()).await;
        }
        if ctx.is_abort_requested() {
            return Ok(());
        }
        if ctx.debug_mode() {
            debug!(acquisition = %ctx.id(), "Generated: {}", event);
        }
        dispatch(event, ctx, hardware_tx).await.map_err(Arc::new)?;
    }
    if ctx.is_abort_requested() {
        return Ok(());
    }
    // Flush whatever is still waiting to be fused
    dispatch(AcquisitionEvent::SequenceEnd, ctx, hardware_tx)
        .await
        .map_err(Arc::new)
}

async fn dispatch(
    event: AcquisitionEvent,
    ctx: &Arc<AcquisitionContext>,
    hardware_tx: &mpsc::Sender<HardwareJob>,
) -> AcqResult<()> {
    let (response, done) = oneshot::channel();
    hardware_tx
        .send(HardwareJob::Process {
            event,
            ctx: Arc::clone(ctx),
            response,
        })
        .await
        .map_err(|_| AcqError::WorkerStopped("hardware"))?;
    wait_reply(done).await
}

async fn wait_reply(done: oneshot::Receiver<AcqResult<()>>) -> AcqResult<()> {
    done.await
        .unwrap_or(Err(AcqError::WorkerStopped("hardware")))
}

// ============================================================================
// Hardware-control worker
// ============================================================================

async fn run_hardware_worker(
    core: Arc<dyn HardwareCore>,
    config: Arc<EngineConfig>,
    mut rx: mpsc::Receiver<HardwareJob>,
) {
    let mut state = HardwareState::default();
    while let Some(job) = rx.recv().await {
        match job {
            HardwareJob::Process {
                event,
                ctx,
                response,
            } => {
                state.switch_to(ctx.id());
                let result = process(core.as_ref(), &config, &ctx, event, &mut state).await;
                if let Err(e) = &result {
                    error!(acquisition = %ctx.id(), "Hardware control failed: {}", e);
                }
                let _ = response.send(result);
            }
            HardwareJob::Finish { ctx, response } => {
                state.switch_to(ctx.id());
                if !state.pending.is_empty() {
                    warn!(
                        acquisition = %ctx.id(),
                        "Discarding {} unexecuted events at finish",
                        state.pending.len()
                    );
                    state.pending.clear();
                }
                let executor = Executor::new(core.as_ref(), &config, &ctx);
                let result = executor
                    .execute(AcquisitionEvent::Finished, &mut state)
                    .await;
                let _ = response.send(result);
            }
        }
    }
    debug!("Hardware-control worker exiting");
}

/// Merges `event` into the pending burst, or flushes the burst and
/// executes.
async fn process(
    core: &dyn HardwareCore,
    config: &EngineConfig,
    ctx: &Arc<AcquisitionContext>,
    event: AcquisitionEvent,
    state: &mut HardwareState,
) -> AcqResult<()> {
    validate_devices(core, &event).await?;

    let executor = Executor::new(core, config, ctx);
    let capture = match event {
        AcquisitionEvent::Capture(capture) => *capture,
        other => {
            // Markers and prebuilt bursts are never fused
            flush(&executor, state).await?;
            return executor.execute(other, state).await;
        }
    };

    let Some(previous) = state.pending.last() else {
        state.pending.push(capture);
        return Ok(());
    };
    let fits = sequencing::can_extend(core, previous, &capture, state.pending.len() + 1)
        .await
        .map_err(|e| AcqError::hardware("Checking sequenceability", &e))?;
    if fits {
        state.pending.push(capture);
        return Ok(());
    }
    let buffered = std::mem::replace(&mut state.pending, vec![capture]);
    let merged = sequencing::merge_sequence(buffered)?;
    executor.execute(merged, state).await
}

/// Executes the pending burst, if any.
async fn flush(executor: &Executor<'_>, state: &mut HardwareState) -> AcqResult<()> {
    if state.pending.is_empty() {
        return Ok(());
    }
    let buffered = std::mem::take(&mut state.pending);
    let merged = sequencing::merge_sequence(buffered)?;
    executor.execute(merged, state).await
}

/// Fails fast when an event targets a stage that is not installed.
async fn validate_devices(core: &dyn HardwareCore, event: &AcquisitionEvent) -> AcqResult<()> {
    for device in event.stage_devices() {
        let present = core
            .has_device(device)
            .await
            .map_err(|e| AcqError::hardware("Looking up stage devices", &e))?;
        if !present {
            return Err(AcqError::Configuration(format!(
                "event requests stage '{device}', which is not installed"
            )));
        }
    }
    let children = event.children();
    if children.iter().any(|e| e.z.is_some()) {
        let focus = core
            .focus_device()
            .await
            .map_err(|e| AcqError::hardware("Looking up focus device", &e))?;
        if focus.is_none() {
            return Err(AcqError::Configuration(
                "event requests a z position but no focus device is installed".to_string(),
            ));
        }
    }
    if children.iter().any(|e| e.x.is_some() || e.y.is_some()) {
        let xy = core
            .xy_stage_device()
            .await
            .map_err(|e| AcqError::hardware("Looking up XY stage", &e))?;
        if xy.is_none() {
            return Err(AcqError::Configuration(
                "event requests an XY position but no XY stage is installed".to_string(),
            ));
        }
    }
    Ok(())
}
