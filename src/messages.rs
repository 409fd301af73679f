//! Message types for the engine's two workers
//!
//! Each worker owns its state and drains one channel of jobs. Every job
//! carries a `oneshot` sender; the submitter awaits the reply, which is how
//! the generation worker blocks until the hardware-control worker has fully
//! executed an event.

use crate::acquisition::AcquisitionContext;
use crate::error::{AcqError, AcqResult};
use crate::event::AcquisitionEvent;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// A fatal error shared between the session and every waiting caller.
pub type SharedError = Arc<AcqError>;

/// Lazily produced events. `None` items mean "nothing yet, more later".
pub type EventStream = BoxStream<'static, Option<AcquisitionEvent>>;

/// Jobs for the generation worker.
pub enum GenerationJob {
    /// Pull events from `stream` until it ends, one at a time
    SubmitStream {
        stream: EventStream,
        ctx: Arc<AcquisitionContext>,
        response: oneshot::Sender<Result<(), SharedError>>,
    },

    /// Run the acquisition-finished event
    Finish {
        ctx: Arc<AcquisitionContext>,
        response: oneshot::Sender<Result<(), SharedError>>,
    },
}

/// Jobs for the hardware-control worker.
pub enum HardwareJob {
    /// Merge or dispatch one event
    Process {
        event: AcquisitionEvent,
        ctx: Arc<AcquisitionContext>,
        response: oneshot::Sender<AcqResult<()>>,
    },

    /// Drop any pending merge buffer and execute the finished event
    Finish {
        ctx: Arc<AcquisitionContext>,
        response: oneshot::Sender<AcqResult<()>>,
    },
}

impl fmt::Debug for GenerationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationJob::SubmitStream { ctx, .. } => {
                write!(f, "SubmitStream({})", ctx.id())
            }
            GenerationJob::Finish { ctx, .. } => write!(f, "Finish({})", ctx.id()),
        }
    }
}

impl fmt::Debug for HardwareJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareJob::Process { event, .. } => write!(f, "Process({})", event),
            HardwareJob::Finish { ctx, .. } => write!(f, "Finish({})", ctx.id()),
        }
    }
}

/// Completion handle for one submission.
#[derive(Debug)]
#[must_use = "a submission handle does nothing unless awaited"]
pub struct SubmissionHandle {
    rx: oneshot::Receiver<Result<(), SharedError>>,
}

impl SubmissionHandle {
    pub(crate) fn new(rx: oneshot::Receiver<Result<(), SharedError>>) -> Self {
        Self { rx }
    }

    /// Waits until the submission has been fully executed.
    pub async fn wait(self) -> Result<(), SharedError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(Arc::new(AcqError::WorkerStopped("generation"))),
        }
    }
}
