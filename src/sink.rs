//! Data sinks: where frames end up.
//!
//! The saving worker calls [`DataSink::put_image`] once per frame and awaits
//! it, so a slow sink throttles the whole pipeline through the bounded
//! queues. [`DataSink::finish`] is called exactly once, when the
//! end-of-acquisition sentinel reaches the saving worker.

use crate::core::TaggedImage;
use crate::error::AcqResult;
use crate::metadata;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Destination of saved frames.
#[async_trait]
pub trait DataSink: Send + Sync {
    /// Called once before the first frame, with the summary metadata.
    async fn initialize(&self, summary_metadata: &Value) -> AcqResult<()>;

    /// Persists one frame. The returned descriptor is forwarded in the
    /// image-saved notification.
    async fn put_image(&self, image: TaggedImage) -> AcqResult<Option<String>>;

    /// No more frames will arrive.
    async fn finish(&self) -> AcqResult<()>;

    /// True once `finish` has run
    fn is_finished(&self) -> bool;

    /// True once any frame was stored
    fn anything_acquired(&self) -> bool;
}

/// Sink that keeps every frame in memory.
#[derive(Default)]
pub struct MemorySink {
    images: Mutex<Vec<TaggedImage>>,
    summary: Mutex<Option<Value>>,
    finished: AtomicBool,
    finish_calls: AtomicUsize,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the frames received so far, in arrival order.
    pub fn images(&self) -> Vec<TaggedImage> {
        self.images.lock().clone()
    }

    /// Number of frames stored.
    pub fn len(&self) -> usize {
        self.images.lock().len()
    }

    /// True before the first frame.
    pub fn is_empty(&self) -> bool {
        self.images.lock().is_empty()
    }

    /// Summary passed to `initialize`, if it ran.
    pub fn summary_metadata(&self) -> Option<Value> {
        self.summary.lock().clone()
    }

    /// How many times `finish` was called. Should never exceed one.
    pub fn finish_calls(&self) -> usize {
        self.finish_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSink for MemorySink {
    async fn initialize(&self, summary_metadata: &Value) -> AcqResult<()> {
        *self.summary.lock() = Some(summary_metadata.clone());
        Ok(())
    }

    async fn put_image(&self, image: TaggedImage) -> AcqResult<Option<String>> {
        let descriptor = metadata::axes_of(&image).map(|axes| Value::Object(axes.clone()).to_string());
        self.images.lock().push(image);
        Ok(descriptor)
    }

    async fn finish(&self) -> AcqResult<()> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn anything_acquired(&self) -> bool {
        !self.images.lock().is_empty()
    }
}

/// Sink that counts frames and drops them.
#[derive(Default)]
pub struct BlackHoleSink {
    received: AtomicUsize,
    bytes: AtomicUsize,
    finished: AtomicBool,
}

impl BlackHoleSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames dropped so far.
    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    /// Pixel bytes dropped so far.
    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSink for BlackHoleSink {
    async fn initialize(&self, _summary_metadata: &Value) -> AcqResult<()> {
        Ok(())
    }

    async fn put_image(&self, image: TaggedImage) -> AcqResult<Option<String>> {
        self.received.fetch_add(1, Ordering::SeqCst);
        self.bytes
            .fetch_add(image.pixels.memory_bytes(), Ordering::SeqCst);
        Ok(None)
    }

    async fn finish(&self) -> AcqResult<()> {
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn anything_acquired(&self) -> bool {
        self.received() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PixelBuffer;
    use crate::event::CaptureEvent;

    #[tokio::test]
    async fn test_memory_sink_records_frames() {
        let sink = MemorySink::new();
        assert!(!sink.anything_acquired());

        let mut image = TaggedImage::new(1, 1, PixelBuffer::U8(vec![7]));
        metadata::stamp_image(&mut image, &CaptureEvent::new().with_axis("time", 2), 0, 1.0);
        let descriptor = sink.put_image(image).await.unwrap();
        assert_eq!(descriptor.as_deref(), Some(r#"{"time":2}"#));

        sink.finish().await.unwrap();
        assert!(sink.is_finished());
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.finish_calls(), 1);
    }
}
