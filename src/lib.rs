//! Core library for the rust_acqeng acquisition engine.
//!
//! This library turns lazily produced capture instructions into timed
//! hardware operations, fuses compatible instructions into
//! hardware-triggered bursts, and streams the resulting frames through a
//! bounded processing and saving pipeline. It is used by the demo binary
//! and by anything that embeds the engine.

pub mod acquisition;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod error_recovery;
pub mod event;
pub mod hardware;
pub mod hooks;
pub mod logging;
pub mod messages;
pub mod metadata;
pub mod notification;
pub mod processor;
pub mod sink;

pub use acquisition::Acquisition;
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{AcqError, AcqResult};
pub use event::{AcquisitionEvent, CaptureEvent};
