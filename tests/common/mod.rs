//! Shared helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use rust_acqeng::acquisition::Acquisition;
use rust_acqeng::config::EngineConfig;
use rust_acqeng::core::TaggedImage;
use rust_acqeng::engine::Engine;
use rust_acqeng::error::{AcqError, AcqResult};
use rust_acqeng::event::CaptureEvent;
use rust_acqeng::hardware::mock::MockCore;
use rust_acqeng::messages::SharedError;
use rust_acqeng::metadata;
use rust_acqeng::sink::{DataSink, MemorySink};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Upper bound for any single await in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Config with short retry delays.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        retry_delay_ms: 1,
        ..EngineConfig::default()
    }
}

pub fn engine_for(core: &Arc<MockCore>) -> Engine {
    Engine::new(core.clone(), fast_config())
}

/// Submits `events`, finishes, and waits for the pipeline to drain.
///
/// Returns the submission result and the completion result.
pub async fn run_events(
    acquisition: &Acquisition,
    events: Vec<CaptureEvent>,
) -> (Result<(), SharedError>, Result<(), SharedError>) {
    let handle = acquisition
        .submit_iter(events)
        .await
        .expect("submission accepted");
    let submitted = tokio::time::timeout(TEST_TIMEOUT, handle.wait())
        .await
        .expect("submission finished in time");
    let finish = acquisition.finish().await.expect("finish accepted");
    let _ = tokio::time::timeout(TEST_TIMEOUT, finish.wait())
        .await
        .expect("finish ran in time");
    let completed = tokio::time::timeout(TEST_TIMEOUT, acquisition.wait_for_completion())
        .await
        .expect("pipeline drained in time");
    (submitted, completed)
}

/// Integer position of `axis` on a stamped frame.
pub fn axis_index(image: &TaggedImage, axis: &str) -> Option<i64> {
    metadata::axis_position(image, axis).and_then(Value::as_i64)
}

/// Events that can never be fused on a default mock: every exposure differs.
pub fn distinct_exposures(n: usize) -> Vec<CaptureEvent> {
    (0..n)
        .map(|t| {
            CaptureEvent::new()
                .with_axis("time", t as i64)
                .with_exposure(10.0 + t as f64)
        })
        .collect()
}

/// Memory sink whose `put_image` blocks until the gate opens.
pub struct GateSink {
    inner: MemorySink,
    gate: Semaphore,
}

impl GateSink {
    pub fn closed() -> Self {
        Self {
            inner: MemorySink::new(),
            gate: Semaphore::new(0),
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(1_000_000);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn images(&self) -> Vec<TaggedImage> {
        self.inner.images()
    }
}

#[async_trait]
impl DataSink for GateSink {
    async fn initialize(&self, summary_metadata: &Value) -> AcqResult<()> {
        self.inner.initialize(summary_metadata).await
    }

    async fn put_image(&self, image: TaggedImage) -> AcqResult<Option<String>> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| AcqError::Sink(e.to_string()))?;
        permit.forget();
        self.inner.put_image(image).await
    }

    async fn finish(&self) -> AcqResult<()> {
        self.inner.finish().await
    }

    fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    fn anything_acquired(&self) -> bool {
        self.inner.anything_acquired()
    }
}
