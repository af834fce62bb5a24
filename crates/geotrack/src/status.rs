//! Observable tracker status for the presentation layer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::sample::{DeviceInfo, TelemetrySample};

/// Status text before the first cycle.
pub const INITIAL_MESSAGE: &str = "Initializing tracker...";
/// Status text while a position is being acquired.
pub const ACQUIRING_MESSAGE: &str = "Acquiring location...";
/// Status text after a successful cycle.
pub const SUCCESS_MESSAGE: &str = "Location acquired";
/// Public address placeholder before the first lookup.
pub const SCANNING_IP: &str = "Scanning...";

/// Coarse phase of the latest cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// A cycle is running (or none has finished yet).
    Loading,
    /// The latest cycle produced a sample.
    Success,
    /// The latest cycle failed.
    Error,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loading => write!(f, "loading"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Everything the presentation layer shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStatus {
    /// Phase of the latest cycle.
    pub phase: Phase,
    /// Human-readable status text.
    pub message: String,
    /// Latest successful sample; kept when later cycles fail.
    pub sample: Option<TelemetrySample>,
    /// Device fingerprint.
    pub device_info: Option<DeviceInfo>,
    /// Public address, [`SCANNING_IP`] until first resolved.
    pub public_ip: String,
    /// Number of samples synced since startup.
    pub sync_count: u64,
    /// When the last sample was synced.
    pub last_sync: Option<DateTime<Utc>>,
}

impl Default for TrackerStatus {
    fn default() -> Self {
        Self {
            phase: Phase::Loading,
            message: INITIAL_MESSAGE.to_string(),
            sample: None,
            device_info: None,
            public_ip: SCANNING_IP.to_string(),
            sync_count: 0,
            last_sync: None,
        }
    }
}

/// Publishes [`TrackerStatus`] updates to any number of subscribers.
#[derive(Debug)]
pub struct StatusBoard {
    tx: watch::Sender<TrackerStatus>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    /// Create a board holding the initial status.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(TrackerStatus::default());
        Self { tx }
    }

    /// Receive every future status change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TrackerStatus> {
        self.tx.subscribe()
    }

    /// The current status.
    #[must_use]
    pub fn snapshot(&self) -> TrackerStatus {
        self.tx.borrow().clone()
    }

    /// Mark a cycle as running.
    pub fn loading(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|status| {
            status.phase = Phase::Loading;
            status.message = message;
        });
    }

    /// Publish a fresh sample.
    pub fn success(&self, sample: &TelemetrySample) {
        self.tx.send_modify(|status| {
            status.phase = Phase::Success;
            status.message = SUCCESS_MESSAGE.to_string();
            status.device_info = Some(sample.device_info().clone());
            status.public_ip = sample.public_ip().to_string();
            status.sample = Some(sample.clone());
        });
    }

    /// Publish a failed cycle. The previous sample stays visible.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|status| {
            status.phase = Phase::Error;
            status.message = message;
        });
    }

    /// Count one synced sample.
    pub fn record_sync(&self, at: DateTime<Utc>) {
        self.tx.send_modify(|status| {
            status.sync_count += 1;
            status.last_sync = Some(at);
        });
    }

    /// Show the device fingerprint and address looked up at startup.
    ///
    /// Ignored once a cycle has produced a sample, which carries fresher
    /// values. Returns whether the status changed.
    pub fn set_environment(&self, device_info: DeviceInfo, public_ip: String) -> bool {
        self.tx.send_if_modified(|status| {
            if status.sample.is_some() {
                return false;
            }
            status.device_info = Some(device_info);
            status.public_ip = public_ip;
            true
        })
    }
}
