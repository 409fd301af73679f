//! Acquisition session façade
//!
//! An [`Acquisition`] owns everything that lives for exactly one run: the
//! lifecycle flags, the hook registry, the image-processor chain and the
//! saving stage. The [`Engine`] does the hardware work; the acquisition
//! wires its output into the processing pipeline and exposes the controls
//! (pause, abort, finish) to callers.
//!
//! ## Lifecycle
//!
//! ```text
//! created --start--> started <--> paused
//!            \           |
//!             \        finish / abort
//!              \         v
//!               `--> events finished --(saving drains)--> completed
//! ```
//!
//! `abort` is a one-way latch reachable from any state. It always funnels
//! through the finished event so hooks are closed and the sink is told to
//! finish even on abort.
//!
//! ## Pipeline
//!
//! ```text
//! engine --q0--> processor 1 --q1--> ... --qN--> saving task --> DataSink
//! ```
//!
//! Every queue is a bounded `mpsc` channel of
//! `EngineConfig::image_queue_capacity`, so a slow sink throttles the
//! processors and, once the first queue fills, the hardware-control worker.

use crate::config::EngineConfig;
use crate::core::FrameMessage;
use crate::engine::Engine;
use crate::error::{AcqError, AcqResult};
use crate::event::{AcquisitionEvent, CaptureEvent};
use crate::hooks::{AcquisitionHook, HookPoint, HookRegistry};
use crate::messages::{EventStream, SharedError, SubmissionHandle};
use crate::metadata::SummaryMetadata;
use crate::notification::{AcqNotification, Milestone, NotificationHandler, NotificationListener};
use crate::processor::{run_processor, ImageProcessor};
use crate::sink::DataSink;
use futures::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// State shared between a session, the engine workers and the pipeline tasks.
pub struct AcquisitionContext {
    id: Uuid,
    abort_requested: AtomicBool,
    paused: AtomicBool,
    started: AtomicBool,
    events_finished: AtomicBool,
    start_time: Mutex<Option<Instant>>,
    error: Mutex<Option<SharedError>>,
    hooks: HookRegistry,
    notifications: NotificationHandler,
    output: mpsc::Sender<FrameMessage>,
    debug_mode: bool,
    engine: Engine,
}

impl AcquisitionContext {
    fn new(engine: Engine, output: mpsc::Sender<FrameMessage>, config: &EngineConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            abort_requested: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            started: AtomicBool::new(false),
            events_finished: AtomicBool::new(false),
            start_time: Mutex::new(None),
            error: Mutex::new(None),
            hooks: HookRegistry::new(),
            notifications: NotificationHandler::new(config.notification_backlog_warning),
            output,
            debug_mode: config.debug_mode,
            engine,
        }
    }

    /// Unique id, also used to scope hardware diffing in the engine.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Hooks registered on this acquisition.
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Whether per-event debug logging is on.
    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// True once an abort was requested, with or without a cause.
    pub fn is_abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::SeqCst)
    }

    /// Paused acquisitions stop pulling new events.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Sets or clears the pause flag. Events already dispatched still run.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// True once the saving stage is running.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// True once the finished event has been executed.
    pub fn are_events_finished(&self) -> bool {
        self.events_finished.load(Ordering::SeqCst)
    }

    /// Latches events-finished. Returns true if it was already set.
    pub(crate) fn mark_events_finished(&self) -> bool {
        self.events_finished.swap(true, Ordering::SeqCst)
    }

    fn mark_started(&self) {
        *self.start_time.lock() = Some(Instant::now());
        self.started.store(true, Ordering::SeqCst);
    }

    /// Milliseconds since the session started; zero before that.
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time
            .lock()
            .map_or(0, |start| start.elapsed().as_millis() as u64)
    }

    /// Requests a cooperative abort and funnels shutdown through finish.
    ///
    /// The first recorded cause wins. Calling this more than once is harmless.
    pub fn abort(self: &Arc<Self>, cause: Option<AcqError>) {
        self.abort_shared(cause.map(Arc::new));
    }

    pub(crate) fn abort_shared(self: &Arc<Self>, cause: Option<SharedError>) {
        if let Some(cause) = cause {
            let mut slot = self.error.lock();
            if slot.is_none() {
                *slot = Some(cause);
            }
        }
        if self.abort_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(acquisition = %self.id, "Acquisition abort requested");
        self.set_paused(false);
        // The handle is not awaited: abort can be requested from any task,
        // including the ones the finish path waits on.
        let _ = self.engine.finish_acquisition(Arc::clone(self));
    }

    /// First fatal error recorded by an abort.
    pub fn abort_cause(&self) -> Option<SharedError> {
        self.error.lock().clone()
    }

    /// Returns the captured fatal error, if any.
    pub fn check_for_exceptions(&self) -> Result<(), SharedError> {
        match self.abort_cause() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Queues a notification for the listeners.
    pub fn post(&self, notification: AcqNotification) {
        self.notifications.post(notification);
    }

    pub(crate) fn notify(&self, milestone: Milestone, event: &AcquisitionEvent) {
        let payload = event.first().map(|e| e.axes_json().to_string());
        self.post(AcqNotification::new(milestone, payload));
    }

    /// Pushes onto the first pipeline queue, waiting while it is full.
    pub(crate) async fn add_to_output(&self, message: FrameMessage) -> AcqResult<()> {
        self.output
            .send(message)
            .await
            .map_err(|_| AcqError::WorkerStopped("saving"))
    }
}

/// One acquisition run.
///
/// Must be created within a Tokio runtime: it spawns its notification task
/// immediately.
///
/// # Example
///
/// ```no_run
/// use rust_acqeng::acquisition::Acquisition;
/// use rust_acqeng::config::EngineConfig;
/// use rust_acqeng::engine::Engine;
/// use rust_acqeng::event::generators::{multi_d_events, timelapse};
/// use rust_acqeng::event::CaptureEvent;
/// use rust_acqeng::hardware::mock::MockCore;
/// use rust_acqeng::sink::MemorySink;
/// use std::sync::Arc;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = Engine::new(Arc::new(MockCore::new()), EngineConfig::default());
/// let sink = Arc::new(MemorySink::new());
/// let acq = Acquisition::new(&engine, sink.clone());
///
/// acq.submit_iter(multi_d_events(CaptureEvent::new(), vec![timelapse(5, 0.0)]))
///     .await?
///     .wait()
///     .await?;
/// acq.finish().await?;
/// acq.wait_for_completion().await?;
/// assert_eq!(sink.len(), 5);
/// # Ok(())
/// # }
/// ```
pub struct Acquisition {
    ctx: Arc<AcquisitionContext>,
    engine: Engine,
    sink: Arc<dyn DataSink>,
    queue_capacity: usize,
    processors: Mutex<Vec<Arc<dyn ImageProcessor>>>,
    summary_extra: Mutex<Map<String, Value>>,
    first_queue: Mutex<Option<mpsc::Receiver<FrameMessage>>>,
    saving_task: Mutex<Option<JoinHandle<()>>>,
    start_lock: tokio::sync::Mutex<()>,
}

impl Acquisition {
    /// Creates an acquisition on `engine`. Nothing starts until the first
    /// submission.
    pub fn new(engine: &Engine, sink: Arc<dyn DataSink>) -> Self {
        let config = engine.config();
        let (tx, rx) = mpsc::channel(config.image_queue_capacity);
        let ctx = Arc::new(AcquisitionContext::new(engine.clone(), tx, config));
        Self {
            ctx,
            engine: engine.clone(),
            sink,
            queue_capacity: config.image_queue_capacity,
            processors: Mutex::new(Vec::new()),
            summary_extra: Mutex::new(Map::new()),
            first_queue: Mutex::new(Some(rx)),
            saving_task: Mutex::new(None),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Adds an entry to the summary metadata handed to the sink.
    pub fn with_summary_metadata(self, key: &str, value: Value) -> Self {
        self.summary_extra.lock().insert(key.to_string(), value);
        self
    }

    /// Unique id of this acquisition.
    pub fn id(&self) -> Uuid {
        self.ctx.id()
    }

    /// Shared state the engine workers see.
    pub fn context(&self) -> &Arc<AcquisitionContext> {
        &self.ctx
    }

    /// Registers a hook. Only legal before the session starts.
    pub fn add_hook(&self, point: HookPoint, hook: Arc<dyn AcquisitionHook>) -> AcqResult<()> {
        self.ctx.hooks.add(point, hook)
    }

    /// Appends a processor to the chain. Only legal before the session starts.
    pub fn add_image_processor(&self, processor: Arc<dyn ImageProcessor>) -> AcqResult<()> {
        if self.ctx.is_started() {
            return Err(AcqError::Usage(
                "cannot add an image processor after the acquisition has started".to_string(),
            ));
        }
        self.processors.lock().push(processor);
        Ok(())
    }

    /// Listeners may be added at any time; they see later notifications only.
    pub fn add_listener(&self, listener: Arc<dyn NotificationListener>) {
        self.ctx.notifications.add_listener(listener);
    }

    /// Initializes the sink and starts the processing and saving tasks.
    ///
    /// Called lazily by the first submission; calling it again is a no-op.
    pub async fn start(&self) -> AcqResult<()> {
        let _guard = self.start_lock.lock().await;
        if self.ctx.is_started() {
            return Ok(());
        }
        self.ctx.hooks.seal();

        let extra = self.summary_extra.lock().clone();
        let core = self.engine.core();
        let summary = SummaryMetadata::from_core(core.as_ref(), self.ctx.id(), extra)
            .await
            .map_err(|e| AcqError::hardware("reading summary metadata", &e))?;
        self.sink.initialize(&summary.to_json()).await?;

        let mut input = self
            .first_queue
            .lock()
            .take()
            .ok_or_else(|| AcqError::Usage("acquisition pipeline already wired".to_string()))?;
        let processors: Vec<Arc<dyn ImageProcessor>> = self.processors.lock().clone();
        for processor in processors {
            let (tx, rx) = mpsc::channel(self.queue_capacity);
            tokio::spawn(run_processor(processor, input, tx, Arc::clone(&self.ctx)));
            input = rx;
        }
        let saving = tokio::spawn(run_saving(
            Arc::clone(&self.sink),
            input,
            Arc::clone(&self.ctx),
        ));
        *self.saving_task.lock() = Some(saving);

        self.ctx.mark_started();
        info!(acquisition = %self.ctx.id(), "Acquisition started");
        self.ctx.post(AcqNotification::acq_started());
        Ok(())
    }

    /// Hands a lazy event source to the engine.
    ///
    /// `None` items mean "no event yet"; the generation worker keeps pulling.
    pub async fn submit_events<S>(&self, events: S) -> AcqResult<SubmissionHandle>
    where
        S: Stream<Item = Option<AcquisitionEvent>> + Send + 'static,
    {
        self.start().await?;
        if self.ctx.are_events_finished() {
            return Err(AcqError::Usage(
                "cannot submit events after the acquisition has finished".to_string(),
            ));
        }
        let stream: EventStream = events.boxed();
        Ok(self
            .engine
            .submit_event_stream(stream, Arc::clone(&self.ctx)))
    }

    /// Convenience for plain iterators of capture steps.
    pub async fn submit_iter<I>(&self, events: I) -> AcqResult<SubmissionHandle>
    where
        I: IntoIterator<Item = CaptureEvent>,
        I::IntoIter: Send + 'static,
    {
        let events = events.into_iter().map(|e| Some(AcquisitionEvent::from(e)));
        self.submit_events(stream::iter(events)).await
    }

    /// Runs the finished event once all earlier submissions are done.
    pub async fn finish(&self) -> AcqResult<SubmissionHandle> {
        self.start().await?;
        Ok(self.engine.finish_acquisition(Arc::clone(&self.ctx)))
    }

    /// Aborts the run. The sink still gets `finish` and hooks are closed.
    pub async fn abort(&self, cause: Option<AcqError>) {
        if let Err(e) = self.start().await {
            error!("Could not start pipeline while aborting: {}", e);
        }
        self.ctx.abort(cause);
    }

    /// Stops the generation worker from pulling further events.
    pub fn pause(&self) {
        debug!(acquisition = %self.ctx.id(), "Pausing");
        self.ctx.set_paused(true);
    }

    /// Lets the generation worker pull events again.
    pub fn resume(&self) {
        debug!(acquisition = %self.ctx.id(), "Resuming");
        self.ctx.set_paused(false);
    }

    /// True while paused.
    pub fn is_paused(&self) -> bool {
        self.ctx.is_paused()
    }

    /// True once the session has started.
    pub fn is_started(&self) -> bool {
        self.ctx.is_started()
    }

    /// True once an abort was requested.
    pub fn is_abort_requested(&self) -> bool {
        self.ctx.is_abort_requested()
    }

    /// True once the finished event has run.
    pub fn are_events_finished(&self) -> bool {
        self.ctx.are_events_finished()
    }

    /// First fatal error recorded, if any.
    pub fn abort_cause(&self) -> Option<SharedError> {
        self.ctx.abort_cause()
    }

    /// Fails with the recorded fatal error, if any.
    pub fn check_for_exceptions(&self) -> Result<(), SharedError> {
        self.ctx.check_for_exceptions()
    }

    /// Waits until the saving stage has drained and notifications stopped.
    ///
    /// Returns the captured fatal error, if any.
    pub async fn wait_for_completion(&self) -> Result<(), SharedError> {
        let saving = self.saving_task.lock().take();
        if let Some(saving) = saving {
            if let Err(e) = saving.await {
                error!("Saving task ended abnormally: {}", e);
            }
            self.ctx.notifications.wait_until_done().await;
        }
        self.ctx.check_for_exceptions()
    }
}

async fn run_saving(
    sink: Arc<dyn DataSink>,
    mut input: mpsc::Receiver<FrameMessage>,
    ctx: Arc<AcquisitionContext>,
) {
    while let Some(message) = input.recv().await {
        match message {
            FrameMessage::EndOfAcquisition => break,
            FrameMessage::Frame(image) => match sink.put_image(*image).await {
                Ok(descriptor) => ctx.post(AcqNotification::image_saved(descriptor)),
                Err(e) => {
                    error!("Data sink failed to save image: {}", e);
                    ctx.abort(Some(e));
                }
            },
        }
    }
    if let Err(e) = sink.finish().await {
        error!("Data sink failed to finish: {}", e);
        ctx.abort(Some(e));
    }
    debug!(acquisition = %ctx.id(), "Saving stage finished");
    ctx.post(AcqNotification::data_sink_finished());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockCore;
    use crate::hooks::FnHook;
    use crate::processor::FnProcessor;
    use crate::sink::MemorySink;
    use std::time::Duration;

    fn setup() -> (Engine, Arc<MemorySink>) {
        let engine = Engine::new(Arc::new(MockCore::new()), EngineConfig::default());
        (engine, Arc::new(MemorySink::new()))
    }

    #[tokio::test]
    async fn test_hooks_rejected_after_start() {
        let (engine, sink) = setup();
        let acq = Acquisition::new(&engine, sink);
        acq.add_hook(HookPoint::BeforeHardware, Arc::new(FnHook::new(Some)))
            .unwrap();
        acq.start().await.unwrap();

        let hook = acq.add_hook(HookPoint::AfterHardware, Arc::new(FnHook::new(Some)));
        assert!(matches!(hook, Err(AcqError::Usage(_))));
        let processor = acq.add_image_processor(Arc::new(FnProcessor::new(|i| Ok(Some(i)))));
        assert!(matches!(processor, Err(AcqError::Usage(_))));

        acq.finish().await.unwrap().wait().await.unwrap();
        acq.wait_for_completion().await.unwrap();
    }

    #[tokio::test]
    async fn test_summary_metadata_reaches_sink() {
        let (engine, sink) = setup();
        let acq = Acquisition::new(&engine, sink.clone())
            .with_summary_metadata("Sample", Value::from("HeLa"));
        acq.finish().await.unwrap().wait().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), acq.wait_for_completion())
            .await
            .unwrap()
            .unwrap();

        let summary = sink.summary_metadata().unwrap();
        assert_eq!(summary["Sample"], Value::from("HeLa"));
        assert_eq!(summary["AcquisitionId"], Value::from(acq.id().to_string()));
        assert_eq!(sink.finish_calls(), 1);
        assert!(acq.are_events_finished());
    }

    #[tokio::test]
    async fn test_processor_chain_transforms_frames() {
        let (engine, sink) = setup();
        let acq = Acquisition::new(&engine, sink.clone());
        for name in ["first", "second"] {
            acq.add_image_processor(Arc::new(FnProcessor::new(move |mut image| {
                image.tags.insert(name.to_string(), Value::from(true));
                Ok(Some(image))
            })))
            .unwrap();
        }
        acq.add_image_processor(Arc::new(FnProcessor::new(|image| {
            let keep = crate::metadata::axis_position(&image, "time") != Some(&Value::from(1));
            Ok(keep.then_some(image))
        })))
        .unwrap();

        let events = (0..3).map(|t| CaptureEvent::new().with_axis("time", t));
        acq.submit_iter(events).await.unwrap().wait().await.unwrap();
        acq.finish().await.unwrap().wait().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), acq.wait_for_completion())
            .await
            .unwrap()
            .unwrap();

        let images = sink.images();
        assert_eq!(images.len(), 2);
        assert!(images
            .iter()
            .all(|i| i.tag("first").is_some() && i.tag("second").is_some()));
    }

    #[tokio::test]
    async fn test_processor_error_aborts() {
        let (engine, sink) = setup();
        let acq = Acquisition::new(&engine, sink.clone());
        acq.add_image_processor(Arc::new(FnProcessor::new(|_| {
            Err(AcqError::Processor("bad frame".to_string()))
        })))
        .unwrap();

        let handle = acq
            .submit_iter(vec![CaptureEvent::new().with_axis("time", 0)])
            .await
            .unwrap();
        let _ = handle.wait().await;
        let result = tokio::time::timeout(Duration::from_secs(5), acq.wait_for_completion())
            .await
            .unwrap();

        assert!(matches!(result.as_ref().map_err(|e| e.as_ref()), Err(AcqError::Processor(_))));
        assert!(acq.is_abort_requested());
        assert_eq!(sink.finish_calls(), 1);
        assert!(sink.is_empty());
    }
}
