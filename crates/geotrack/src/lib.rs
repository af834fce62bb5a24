//! `geotrack` - Session-scoped location telemetry capture and sync
//!
//! This library periodically acquires the device position, enriches it with
//! device and network metadata, and appends each sample to a remote record
//! keyed by a per-session identifier.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod capture;
pub mod cli;
pub mod clock;
pub mod config;
pub mod environment;
pub mod error;
pub mod logging;
pub mod position;
pub mod sample;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod sync;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use capture::{CaptureEngine, CycleOutcome, CycleTrigger};
pub use config::Config;
pub use environment::EnvironmentProbe;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use position::{PositionError, PositionSource};
pub use sample::{DeviceInfo, TelemetrySample};
pub use scheduler::{SchedulerHandle, SchedulerState, UpdateScheduler, Visibility};
pub use session::{SessionId, SessionIdentity};
pub use status::{Phase, StatusBoard, TrackerStatus};
pub use sync::{SyncGateway, SyncOutcome};
pub use tracker::Tracker;
