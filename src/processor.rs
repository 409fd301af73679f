//! Image processors: queue-to-queue stages between the engine and the sink.
//!
//! Each processor added to an acquisition gets its own bounded input queue
//! and its own task. The task takes frames one at a time, hands them to
//! [`ImageProcessor::process`] and forwards whatever comes back. The
//! end-of-acquisition sentinel is forwarded unchanged, which is what lets
//! shutdown travel down the chain.

use crate::acquisition::AcquisitionContext;
use crate::core::{FrameMessage, TaggedImage};
use crate::error::AcqResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// One stage of the processing chain between camera and sink.
#[async_trait]
pub trait ImageProcessor: Send + Sync {
    /// Transforms one frame. `Ok(None)` drops it.
    async fn process(&self, image: TaggedImage) -> AcqResult<Option<TaggedImage>>;
}

type ProcessFn = dyn Fn(TaggedImage) -> AcqResult<Option<TaggedImage>> + Send + Sync;

/// Processor built from a closure.
pub struct FnProcessor {
    process: Box<ProcessFn>,
}

impl FnProcessor {
    /// Wraps a closure.
    pub fn new<F>(process: F) -> Self
    where
        F: Fn(TaggedImage) -> AcqResult<Option<TaggedImage>> + Send + Sync + 'static,
    {
        Self {
            process: Box::new(process),
        }
    }
}

#[async_trait]
impl ImageProcessor for FnProcessor {
    async fn process(&self, image: TaggedImage) -> AcqResult<Option<TaggedImage>> {
        (self.process)(image)
    }
}

/// Drains `input` through `processor` into `output` until the sentinel.
///
/// A processor error aborts the acquisition; the frame is dropped and the
/// loop keeps running so the sentinel still reaches the saving stage. If
/// the input closes without a sentinel one is forwarded anyway.
pub(crate) async fn run_processor(
    processor: Arc<dyn ImageProcessor>,
    mut input: mpsc::Receiver<FrameMessage>,
    output: mpsc::Sender<FrameMessage>,
    ctx: Arc<AcquisitionContext>,
) {
    while let Some(message) = input.recv().await {
        let image = match message {
            FrameMessage::EndOfAcquisition => {
                let _ = output.send(FrameMessage::EndOfAcquisition).await;
                debug!("Image processor received end of acquisition");
                return;
            }
            FrameMessage::Frame(image) => *image,
        };
        match processor.process(image).await {
            Ok(Some(processed)) => {
                if output.send(FrameMessage::frame(processed)).await.is_err() {
                    error!("Downstream queue closed; image processor stopping");
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!("Image processor failed: {}", e);
                ctx.abort(Some(e));
            }
        }
    }
    let _ = output.send(FrameMessage::EndOfAcquisition).await;
}
