//! One capture cycle: acquire, enrich, build, sync.
//!
//! The position fix and the public-address lookup run concurrently; the
//! sample is built only once both have finished. A failed fix ends the cycle
//! with an error status and never reaches the sync layer. A failed sync is
//! logged and leaves the success status in place.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::environment::EnvironmentProbe;
use crate::position::{PositionError, PositionSource};
use crate::sample::TelemetrySample;
use crate::session::SessionId;
use crate::status::{StatusBoard, ACQUIRING_MESSAGE};
use crate::sync::{SyncGateway, SyncOutcome};

/// What started a capture cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTrigger {
    /// The eager first cycle.
    Startup,
    /// A regular interval tick.
    Tick,
    /// Catch-up after the host became visible again.
    Recovery,
    /// An explicit refresh request.
    Manual,
}

impl CycleTrigger {
    /// Whether the cycle announces itself with a loading status.
    ///
    /// Background cycles keep the last result on screen until they finish.
    #[must_use]
    pub fn shows_loading(self) -> bool {
        matches!(self, Self::Startup | Self::Manual)
    }
}

impl std::fmt::Display for CycleTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Startup => write!(f, "startup"),
            Self::Tick => write!(f, "tick"),
            Self::Recovery => write!(f, "recovery"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// How a capture cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A sample was built and handed to the sync layer.
    Captured {
        /// The new sample.
        sample: TelemetrySample,
        /// Whether the sample reached the remote store.
        sync: SyncOutcome,
    },
    /// No position could be acquired.
    Failed(PositionError),
}

impl CycleOutcome {
    /// Whether the cycle produced a sample.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Captured { .. })
    }
}

/// Runs capture cycles for one session.
#[derive(Debug)]
pub struct CaptureEngine {
    session_id: SessionId,
    position: PositionSource,
    probe: EnvironmentProbe,
    gateway: Arc<SyncGateway>,
    status: Arc<StatusBoard>,
    clock: Arc<dyn Clock>,
    last_success: Mutex<Option<DateTime<Utc>>>,
}

impl CaptureEngine {
    /// Create an engine writing to `session_id`'s record.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        position: PositionSource,
        probe: EnvironmentProbe,
        gateway: Arc<SyncGateway>,
        status: Arc<StatusBoard>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            session_id,
            position,
            probe,
            gateway,
            status,
            clock,
            last_success: Mutex::new(None),
        }
    }

    /// The session this engine records.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The status board this engine publishes to.
    #[must_use]
    pub fn status(&self) -> &Arc<StatusBoard> {
        &self.status
    }

    /// The clock used to stamp successes.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Wall-clock time of the last cycle that produced a sample.
    #[must_use]
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self
            .last_success
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Probe device and address once, for display until the first sample.
    pub async fn probe_environment(&self) {
        let ip = self.probe.public_ip().await;
        self.status.set_environment(self.probe.device_info(), ip);
    }

    /// Run one capture cycle.
    pub async fn fetch_location(&self, trigger: CycleTrigger) -> CycleOutcome {
        debug!(%trigger, session_id = %self.session_id, "Starting capture cycle");
        if trigger.shows_loading() {
            self.status.loading(ACQUIRING_MESSAGE);
        }

        let (position, public_ip) = tokio::join!(self.position.acquire(), self.probe.public_ip());

        let position = match position {
            Ok(position) => position,
            Err(e) => {
                warn!(%trigger, error = %e, "Capture cycle failed");
                self.status.error(e.user_message());
                return CycleOutcome::Failed(e);
            }
        };

        let sample = TelemetrySample::new(position, self.probe.device_info(), public_ip);
        *self
            .last_success
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(self.clock.now());
        self.status.success(&sample);
        info!(
            %trigger,
            latitude = sample.latitude(),
            longitude = sample.longitude(),
            accuracy = sample.accuracy(),
            ip = sample.public_ip(),
            "Location acquired"
        );

        let sync = self.gateway.append_sample(&self.session_id, &sample).await;
        if sync.is_success() {
            self.status.record_sync(self.clock.now());
        }

        CycleOutcome::Captured { sample, sync }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DeviceConfig;
    use crate::environment::RuntimeEnvironment;
    use crate::position::{PositionOptions, PERMISSION_DENIED, POSITION_UNAVAILABLE};
    use crate::sample::UNKNOWN_IP;
    use crate::status::Phase;
    use crate::testing::{FakeAddressLookup, FakeLocator, RecordingStore};
    use chrono::TimeZone;

    struct Harness {
        engine: CaptureEngine,
        locator: Arc<FakeLocator>,
        lookup: Arc<FakeAddressLookup>,
        store: Arc<RecordingStore>,
        clock: Arc<ManualClock>,
    }

    fn harness(locator: FakeLocator, lookup: FakeAddressLookup) -> Harness {
        let locator = Arc::new(locator);
        let lookup = Arc::new(lookup);
        let store = Arc::new(RecordingStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 5).unwrap(),
        ));

        let probe = EnvironmentProbe::new(
            RuntimeEnvironment::detect(&DeviceConfig::default()),
            lookup.clone(),
        );
        let gateway = Arc::new(SyncGateway::new(store.clone(), clock.clone(), "test"));
        let engine = CaptureEngine::new(
            SessionId::new("session-1"),
            PositionSource::new(locator.clone(), PositionOptions::default()),
            probe,
            gateway,
            Arc::new(StatusBoard::new()),
            clock.clone(),
        );

        Harness {
            engine,
            locator,
            lookup,
            store,
            clock,
        }
    }

    #[tokio::test]
    async fn test_permission_denied_cycle() {
        let h = harness(
            FakeLocator::failing(PERMISSION_DENIED, "denied"),
            FakeAddressLookup::ok("8.8.8.8"),
        );

        let outcome = h.engine.fetch_location(CycleTrigger::Startup).await;
        assert_eq!(outcome, CycleOutcome::Failed(PositionError::PermissionDenied));

        let status = h.engine.status().snapshot();
        assert_eq!(status.phase, Phase::Error);
        assert!(status.message.to_lowercase().contains("permission denied"));
        assert_eq!(status.sync_count, 0);
        assert!(h.engine.last_success().is_none());

        // The sync layer is never reached
        assert_eq!(h.store.create_calls(), 0);
        assert!(h.store.appended().is_empty());
    }

    #[tokio::test]
    async fn test_successful_cycle() {
        let h = harness(
            FakeLocator::fixed(37.0, -122.0, 12.5),
            FakeAddressLookup::ok("8.8.8.8"),
        );

        let outcome = h.engine.fetch_location(CycleTrigger::Startup).await;
        let CycleOutcome::Captured { sample, sync } = outcome else {
            panic!("expected a captured sample");
        };

        assert_eq!(sync, SyncOutcome::Success);
        assert_eq!(sample.latitude(), 37.0);
        assert_eq!(sample.longitude(), -122.0);
        assert_eq!(sample.accuracy(), 12.5);
        assert_eq!(sample.public_ip(), "8.8.8.8");
        assert!(sample.timestamp_iso().ends_with('Z'));

        let status = h.engine.status().snapshot();
        assert_eq!(status.phase, Phase::Success);
        assert_eq!(status.sync_count, 1);
        assert_eq!(status.last_sync, Some(h.clock.now()));
        assert_eq!(status.sample, Some(sample.clone()));

        let appended = h.store.appended();
        assert_eq!(appended.len(), 1);
        assert_eq!(appended[0].0.as_str(), "session-1");
        assert_eq!(appended[0].1, sample);
        assert_eq!(h.engine.last_success(), Some(h.clock.now()));
        assert_eq!(h.locator.calls(), 1);
        assert_eq!(h.lookup.calls(), 1);
    }

    #[tokio::test]
    async fn test_sync_failure_keeps_success_status() {
        let h = harness(
            FakeLocator::fixed(37.0, -122.0, 12.5),
            FakeAddressLookup::ok("8.8.8.8"),
        );
        h.store.set_fail_append(true);

        let outcome = h.engine.fetch_location(CycleTrigger::Tick).await;
        assert!(matches!(
            outcome,
            CycleOutcome::Captured {
                sync: SyncOutcome::Failure,
                ..
            }
        ));

        let status = h.engine.status().snapshot();
        assert_eq!(status.phase, Phase::Success);
        assert_eq!(status.sync_count, 0);
        assert!(status.last_sync.is_none());
    }

    #[tokio::test]
    async fn test_lookup_failure_uses_sentinel() {
        let h = harness(
            FakeLocator::fixed(51.5, -0.12, 30.0),
            FakeAddressLookup::failing(),
        );

        let outcome = h.engine.fetch_location(CycleTrigger::Tick).await;
        let CycleOutcome::Captured { sample, .. } = outcome else {
            panic!("expected a captured sample");
        };
        assert_eq!(sample.public_ip(), UNKNOWN_IP);
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_sample() {
        let h = harness(
            FakeLocator::fixed_then_failing(37.0, -122.0, 12.5, POSITION_UNAVAILABLE),
            FakeAddressLookup::ok("8.8.8.8"),
        );

        let first = h.engine.fetch_location(CycleTrigger::Startup).await;
        assert!(first.is_success());
        let stamped = h.engine.last_success();

        h.clock.advance(chrono::Duration::seconds(15));
        let second = h.engine.fetch_location(CycleTrigger::Tick).await;
        assert_eq!(second, CycleOutcome::Failed(PositionError::PositionUnavailable));

        let status = h.engine.status().snapshot();
        assert_eq!(status.phase, Phase::Error);
        assert_eq!(status.sample.map(|s| s.latitude()), Some(37.0));
        assert_eq!(status.sync_count, 1);
        assert_eq!(h.engine.last_success(), stamped);
        assert_eq!(h.store.appended().len(), 1);
    }

    #[tokio::test]
    async fn test_probe_environment() {
        let h = harness(
            FakeLocator::fixed(37.0, -122.0, 12.5),
            FakeAddressLookup::ok("1.1.1.1"),
        );

        h.engine.probe_environment().await;

        let status = h.engine.status().snapshot();
        assert_eq!(status.public_ip, "1.1.1.1");
        assert!(status.device_info.is_some());
        assert_eq!(status.phase, Phase::Loading);
        assert_eq!(h.locator.calls(), 0);
    }

    #[test]
    fn test_trigger_loading() {
        assert!(CycleTrigger::Startup.shows_loading());
        assert!(CycleTrigger::Manual.shows_loading());
        assert!(!CycleTrigger::Tick.shows_loading());
        assert!(!CycleTrigger::Recovery.shows_loading());
    }
}
