//! Asynchronous progress notifications.
//!
//! The engine and the saving worker post [`AcqNotification`]s without ever
//! blocking. One background task drains them in post order and hands each
//! one to every registered listener. The task exits once it has seen both
//! the events-finished and the sink-finished milestones.

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Which part of the system a notification comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NotificationType {
    /// Start and end of the event stream
    Global,
    /// Hardware preparation for an event
    Hardware,
    /// Camera triggering and readout
    Camera,
    /// Saving stage
    Image,
}

impl NotificationType {
    /// Lower-case name used in logs and serialized notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Global => "global",
            NotificationType::Hardware => "hardware",
            NotificationType::Camera => "camera",
            NotificationType::Image => "image",
        }
    }
}

/// Lifecycle transition being reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Milestone {
    /// Session started
    AcqStarted,
    /// Finished event executed
    EventsFinished,
    /// About to prepare hardware for an event
    PreHardware,
    /// About to move focus
    PreZDrive,
    /// Hardware ready for an event
    PostHardware,
    /// About to start a burst
    PreSequenceStarted,
    /// About to expose a single frame
    PreSnap,
    /// All frames of a step received
    PostExposure,
    /// Sink accepted a frame
    ImageSaved,
    /// Sink finished
    DataSinkFinished,
}

impl Milestone {
    /// Notification type this milestone is posted under.
    pub fn category(&self) -> NotificationType {
        match self {
            Milestone::AcqStarted | Milestone::EventsFinished => NotificationType::Global,
            Milestone::PreHardware | Milestone::PreZDrive | Milestone::PostHardware => {
                NotificationType::Hardware
            }
            Milestone::PreSequenceStarted | Milestone::PreSnap | Milestone::PostExposure => {
                NotificationType::Camera
            }
            Milestone::ImageSaved | Milestone::DataSinkFinished => NotificationType::Image,
        }
    }

    /// Wire name of the milestone.
    pub fn as_str(&self) -> &'static str {
        match self {
            Milestone::AcqStarted => "acq_started",
            Milestone::EventsFinished => "acq_events_finished",
            Milestone::PreHardware => "pre_hardware",
            Milestone::PreZDrive => "pre_z_drive",
            Milestone::PostHardware => "post_hardware",
            Milestone::PreSequenceStarted => "pre_sequence_started",
            Milestone::PreSnap => "pre_snap",
            Milestone::PostExposure => "post_exposure",
            Milestone::ImageSaved => "image_saved",
            Milestone::DataSinkFinished => "data_sink_finished",
        }
    }
}

/// One immutable progress report.
#[derive(Clone, Debug, PartialEq)]
pub struct AcqNotification {
    /// Transition being reported
    pub milestone: Milestone,
    /// Event axes for hardware/camera milestones, sink descriptor for saved images
    pub payload: Option<String>,
}

impl AcqNotification {
    /// Notification with an optional payload.
    pub fn new(milestone: Milestone, payload: Option<String>) -> Self {
        Self { milestone, payload }
    }

    /// Session started.
    pub fn acq_started() -> Self {
        Self::new(Milestone::AcqStarted, None)
    }

    /// Finished event executed.
    pub fn events_finished() -> Self {
        Self::new(Milestone::EventsFinished, None)
    }

    /// Sink finished.
    pub fn data_sink_finished() -> Self {
        Self::new(Milestone::DataSinkFinished, None)
    }

    /// Frame saved, with the sink's descriptor.
    pub fn image_saved(descriptor: Option<String>) -> Self {
        Self::new(Milestone::ImageSaved, descriptor)
    }

    /// Type of the milestone.
    pub fn category(&self) -> NotificationType {
        self.milestone.category()
    }

    /// JSON form handed to remote listeners.
    pub fn to_json(&self) -> Value {
        let mut message = json!({
            "type": self.category().as_str(),
            "phase": self.milestone.as_str(),
        });
        if let (Some(payload), Some(map)) = (&self.payload, message.as_object_mut()) {
            map.insert("id".to_string(), Value::from(payload.as_str()));
        }
        message
    }
}

impl fmt::Display for AcqNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category().as_str(), self.milestone.as_str())
    }
}

/// Receives notifications on the notification task.
///
/// Listeners run synchronously, one item at a time; a slow listener delays
/// later notifications but never the engine.
pub trait NotificationListener: Send + Sync {
    /// Handles one notification
    fn on_notification(&self, notification: &AcqNotification);
}

impl<F> NotificationListener for F
where
    F: Fn(&AcqNotification) + Send + Sync,
{
    fn on_notification(&self, notification: &AcqNotification) {
        self(notification)
    }
}

type Listeners = Arc<RwLock<Vec<Arc<dyn NotificationListener>>>>;

/// Single-consumer notification fan-out.
pub struct NotificationHandler {
    tx: mpsc::UnboundedSender<AcqNotification>,
    depth: Arc<AtomicUsize>,
    backlog_warning: usize,
    listeners: Listeners,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationHandler {
    /// Spawns the notification task. Must be called within a Tokio runtime.
    pub fn new(backlog_warning: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let listeners: Listeners = Arc::new(RwLock::new(Vec::new()));
        let task = tokio::spawn(run_notification_loop(
            rx,
            Arc::clone(&depth),
            Arc::clone(&listeners),
        ));
        Self {
            tx,
            depth,
            backlog_warning,
            listeners,
            task: Mutex::new(Some(task)),
        }
    }

    /// Adds a listener for notifications posted from now on.
    pub fn add_listener(&self, listener: Arc<dyn NotificationListener>) {
        self.listeners.write().push(listener);
    }

    /// Queues a notification. Never blocks.
    pub fn post(&self, notification: AcqNotification) {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if self.tx.send(notification).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            debug!("Notification posted after the notification task exited");
            return;
        }
        if depth > self.backlog_warning {
            warn!(depth, "Acquisition notification queue size: {}", depth);
        }
    }

    /// Notifications queued but not yet delivered.
    pub fn backlog(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Waits for the notification task to exit.
    pub async fn wait_until_done(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Notification task ended abnormally: {}", e);
            }
        }
    }
}

async fn run_notification_loop(
    mut rx: mpsc::UnboundedReceiver<AcqNotification>,
    depth: Arc<AtomicUsize>,
    listeners: Listeners,
) {
    let mut events_finished = false;
    let mut sink_finished = false;
    while let Some(notification) = rx.recv().await {
        depth.fetch_sub(1, Ordering::SeqCst);
        dispatch(&listeners, &notification);
        match notification.milestone {
            Milestone::EventsFinished => events_finished = true,
            Milestone::DataSinkFinished => sink_finished = true,
            _ => {}
        }
        if events_finished && sink_finished {
            while let Ok(notification) = rx.try_recv() {
                depth.fetch_sub(1, Ordering::SeqCst);
                dispatch(&listeners, &notification);
            }
            break;
        }
    }
    debug!("Notification task exiting");
}

fn dispatch(listeners: &Listeners, notification: &AcqNotification) {
    let current: Vec<Arc<dyn NotificationListener>> = listeners.read().clone();
    for listener in current {
        listener.on_notification(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_notification_json() {
        let saved = AcqNotification::image_saved(Some("t=0".to_string()));
        assert_eq!(
            saved.to_json(),
            json!({"type": "image", "phase": "image_saved", "id": "t=0"})
        );
        assert_eq!(
            AcqNotification::new(Milestone::PreZDrive, None).to_json(),
            json!({"type": "hardware", "phase": "pre_z_drive"})
        );
    }

    #[tokio::test]
    async fn test_handler_delivers_in_order_and_exits() {
        let handler = NotificationHandler::new(500);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        handler.add_listener(Arc::new(move |n: &AcqNotification| {
            sink.lock().push(n.milestone);
        }));

        handler.post(AcqNotification::acq_started());
        handler.post(AcqNotification::image_saved(None));
        handler.post(AcqNotification::events_finished());
        handler.post(AcqNotification::data_sink_finished());

        tokio::time::timeout(Duration::from_secs(2), handler.wait_until_done())
            .await
            .expect("notification task should exit");
        assert_eq!(
            *seen.lock(),
            vec![
                Milestone::AcqStarted,
                Milestone::ImageSaved,
                Milestone::EventsFinished,
                Milestone::DataSinkFinished,
            ]
        );
        assert_eq!(handler.backlog(), 0);
    }
}
