//! Hooks: user code run at fixed points of the dispatch lifecycle.
//!
//! A hook receives the event about to be processed and returns the event to
//! continue with, possibly modified, or `None` to cancel it. Every hook is
//! closed exactly once when the acquisition-finished event executes.
//!
//! Hooks can only be registered before the acquisition starts. After that
//! the registry is sealed and iteration needs no further coordination.

use crate::error::{AcqError, AcqResult};
use crate::event::AcquisitionEvent;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where in the lifecycle a hook runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Generation worker, before an event is submitted to hardware
    EventGeneration,
    /// Before any hardware is prepared
    BeforeHardware,
    /// Right before the focus stage moves; the return value is ignored
    BeforeZDrive,
    /// After hardware is prepared, before capture
    AfterHardware,
    /// After capture was started, e.g. to fire an external trigger
    AfterCamera,
    /// After each exposure's frames arrived
    AfterExposure,
    /// After a whole burst has been drained
    AfterSequence,
}

impl HookPoint {
    /// Order in which hook lists are closed at the end of an acquisition.
    pub const ALL: [HookPoint; 7] = [
        HookPoint::EventGeneration,
        HookPoint::BeforeHardware,
        HookPoint::BeforeZDrive,
        HookPoint::AfterHardware,
        HookPoint::AfterCamera,
        HookPoint::AfterExposure,
        HookPoint::AfterSequence,
    ];
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookPoint::EventGeneration => "event-generation",
            HookPoint::BeforeHardware => "before-hardware",
            HookPoint::BeforeZDrive => "before-z-drive",
            HookPoint::AfterHardware => "after-hardware",
            HookPoint::AfterCamera => "after-camera",
            HookPoint::AfterExposure => "after-exposure",
            HookPoint::AfterSequence => "after-sequence",
        };
        write!(f, "{}", name)
    }
}

/// Code run at one lifecycle point of every event.
#[async_trait]
pub trait AcquisitionHook: Send + Sync {
    /// Returns the event to continue with, or `None` to cancel it.
    async fn run(&self, event: AcquisitionEvent) -> Option<AcquisitionEvent>;

    /// Called once when the acquisition finishes.
    async fn close(&self) {}
}

type RunFn = dyn Fn(AcquisitionEvent) -> Option<AcquisitionEvent> + Send + Sync;
type CloseFn = dyn Fn() + Send + Sync;

/// Hook built from plain closures.
pub struct FnHook {
    run: Box<RunFn>,
    close: Option<Box<CloseFn>>,
}

impl FnHook {
    /// Hook that may modify or cancel events.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(AcquisitionEvent) -> Option<AcquisitionEvent> + Send + Sync + 'static,
    {
        Self {
            run: Box::new(run),
            close: None,
        }
    }

    /// Hook that only observes events.
    pub fn observer<F>(observe: F) -> Self
    where
        F: Fn(&AcquisitionEvent) + Send + Sync + 'static,
    {
        Self::new(move |event| {
            observe(&event);
            Some(event)
        })
    }

    /// Runs `close` when the acquisition finishes.
    pub fn on_close<F>(mut self, close: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.close = Some(Box::new(close));
        self
    }
}

#[async_trait]
impl AcquisitionHook for FnHook {
    async fn run(&self, event: AcquisitionEvent) -> Option<AcquisitionEvent> {
        (self.run)(event)
    }

    async fn close(&self) {
        if let Some(close) = &self.close {
            close();
        }
    }
}

/// Hook lists for one acquisition, keyed by lifecycle point.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<HookPoint, Vec<Arc<dyn AcquisitionHook>>>>,
    sealed: AtomicBool,
}

impl HookRegistry {
    /// Empty, unsealed registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a hook. Fails once the registry is sealed.
    pub fn add(&self, point: HookPoint, hook: Arc<dyn AcquisitionHook>) -> AcqResult<()> {
        if self.sealed.load(Ordering::SeqCst) {
            return Err(AcqError::Usage(format!(
                "cannot add a {point} hook after the acquisition has started"
            )));
        }
        self.hooks.write().entry(point).or_default().push(hook);
        Ok(())
    }

    /// Rejects all further registrations.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    /// True once registration is closed.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Hooks registered at `point`, in registration order.
    pub fn hooks(&self, point: HookPoint) -> Vec<Arc<dyn AcquisitionHook>> {
        self.hooks.read().get(&point).cloned().unwrap_or_default()
    }

    /// Number of hooks at `point`.
    pub fn len(&self, point: HookPoint) -> usize {
        self.hooks.read().get(&point).map_or(0, Vec::len)
    }

    /// Runs the hooks at `point` in order; stops at the first cancellation.
    pub async fn run(&self, point: HookPoint, event: AcquisitionEvent) -> Option<AcquisitionEvent> {
        let mut current = event;
        for hook in self.hooks(point) {
            current = hook.run(current).await?;
        }
        Some(current)
    }

    /// Shows `event` to every hook, then closes it, list by list in
    /// [`HookPoint::ALL`] order.
    pub async fn run_and_close_all(&self, event: &AcquisitionEvent) {
        for point in HookPoint::ALL {
            for hook in self.hooks(point) {
                let _ = hook.run(event.clone()).await;
                hook.close().await;
            }
        }
    }
}
