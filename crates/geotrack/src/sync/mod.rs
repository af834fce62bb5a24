//! Remote persistence of telemetry samples.
//!
//! Every session owns one tracker record in a [`RemoteStore`]. The record is
//! created at most once and samples are appended to it in arrival order.
//! [`SyncGateway`] makes sure the record exists before the first append and
//! turns every store failure into a logged [`SyncOutcome::Failure`].

pub mod http;
pub mod migrations;
pub mod schema;
pub mod sqlite;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::sample::TelemetrySample;
use crate::session::SessionId;

pub use http::HttpStore;
pub use sqlite::{SqliteStore, StoreStats, StoredSample, TrackerSummary};

/// Result of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The remote store accepted the operation.
    Success,
    /// The operation failed; the error has been logged.
    Failure,
}

impl SyncOutcome {
    /// Whether the operation succeeded.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Creation metadata stored with a new tracker record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerMetadata {
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Agent string of the client that created it.
    pub client: String,
}

/// A keyed document store holding one tracker record per session.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync + std::fmt::Debug {
    /// Backend name used in logs.
    fn name(&self) -> &'static str;

    /// Create the record for `id` unless it already exists.
    ///
    /// Returns `true` if this call created it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or rejects the write.
    async fn create_if_absent(&self, id: &SessionId, metadata: &TrackerMetadata) -> Result<bool>;

    /// Append one sample to the record for `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not exist or the write fails.
    async fn append(&self, id: &SessionId, sample: &TelemetrySample) -> Result<()>;
}

/// Writes samples to a [`RemoteStore`], creating the session record first.
#[derive(Debug)]
pub struct SyncGateway {
    store: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    client: String,
    ready: Mutex<HashSet<SessionId>>,
}

impl SyncGateway {
    /// Create a gateway over `store`.
    ///
    /// `client` is recorded as the creating agent of new records.
    #[must_use]
    pub fn new(store: Arc<dyn RemoteStore>, clock: Arc<dyn Clock>, client: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            client: client.into(),
            ready: Mutex::new(HashSet::new()),
        }
    }

    /// Name of the backing store.
    #[must_use]
    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Make sure the record for `id` exists.
    ///
    /// Reaches the store only until the first success for `id`. A failure
    /// leaves the identity unmarked so the next call tries again.
    pub async fn ensure_session_record(&self, id: &SessionId) -> SyncOutcome {
        let mut ready = self.ready.lock().await;
        if ready.contains(id) {
            return SyncOutcome::Success;
        }

        let metadata = TrackerMetadata {
            created_at: self.clock.now(),
            client: self.client.clone(),
        };
        match self.store.create_if_absent(id, &metadata).await {
            Ok(created) => {
                if created {
                    info!(session_id = %id, store = self.store.name(), "Created tracker record");
                } else {
                    debug!(session_id = %id, "Tracker record already exists");
                }
                ready.insert(id.clone());
                SyncOutcome::Success
            }
            Err(e) => {
                warn!(session_id = %id, store = self.store.name(), error = %e, "Failed to create tracker record");
                SyncOutcome::Failure
            }
        }
    }

    /// Append `sample` to the record for `id`, creating the record if needed.
    pub async fn append_sample(&self, id: &SessionId, sample: &TelemetrySample) -> SyncOutcome {
        if !self.ensure_session_record(id).await.is_success() {
            return SyncOutcome::Failure;
        }

        match self.store.append(id, sample).await {
            Ok(()) => {
                debug!(session_id = %id, timestamp = %sample.timestamp_iso(), "Synced sample");
                SyncOutcome::Success
            }
            Err(e) => {
                warn!(session_id = %id, store = self.store.name(), error = %e, "Failed to sync sample");
                SyncOutcome::Failure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::sample::{DeviceInfo, UNKNOWN_IP};
    use crate::testing::{FakeLocator, RecordingStore};

    fn sample() -> TelemetrySample {
        TelemetrySample::new(
            FakeLocator::position(37.0, -122.0, 12.5),
            DeviceInfo {
                browser: "Geotrack".to_string(),
                os: "Linux".to_string(),
                platform: "Linux x86_64".to_string(),
                screen: "Unknown".to_string(),
                user_agent: "Geotrack/0.1.0".to_string(),
            },
            UNKNOWN_IP.to_string(),
        )
    }

    fn gateway(store: &Arc<RecordingStore>) -> SyncGateway {
        SyncGateway::new(store.clone(), Arc::new(SystemClock), "Geotrack/0.1.0")
    }

    #[tokio::test]
    async fn test_ensure_reaches_store_once() {
        let store = Arc::new(RecordingStore::new());
        let gateway = gateway(&store);
        let id = SessionId::new("abc");

        for _ in 0..5 {
            assert_eq!(gateway.append_sample(&id, &sample()).await, SyncOutcome::Success);
        }
        assert_eq!(gateway.ensure_session_record(&id).await, SyncOutcome::Success);

        assert_eq!(store.create_calls(), 1);
        assert_eq!(store.appended().len(), 5);
    }

    #[tokio::test]
    async fn test_ensure_is_per_identity() {
        let store = Arc::new(RecordingStore::new());
        let gateway = gateway(&store);

        gateway.ensure_session_record(&SessionId::new("a")).await;
        gateway.ensure_session_record(&SessionId::new("b")).await;
        gateway.ensure_session_record(&SessionId::new("a")).await;

        assert_eq!(store.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_create_is_retried() {
        let store = Arc::new(RecordingStore::new());
        store.set_fail_create(true);
        let gateway = gateway(&store);
        let id = SessionId::new("abc");

        assert_eq!(gateway.append_sample(&id, &sample()).await, SyncOutcome::Failure);
        assert!(store.appended().is_empty());

        store.set_fail_create(false);
        assert_eq!(gateway.append_sample(&id, &sample()).await, SyncOutcome::Success);
        assert_eq!(store.create_calls(), 2);
        assert_eq!(store.appended().len(), 1);
    }

    #[tokio::test]
    async fn test_append_failure_is_reported() {
        let store = Arc::new(RecordingStore::new());
        store.set_fail_append(true);
        let gateway = gateway(&store);

        let outcome = gateway.append_sample(&SessionId::new("abc"), &sample()).await;
        assert_eq!(outcome, SyncOutcome::Failure);
        assert_eq!(store.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_creates_once() {
        let store = Arc::new(RecordingStore::new());
        let gateway = Arc::new(gateway(&store));
        let id = SessionId::new("abc");

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let gateway = gateway.clone();
            let id = id.clone();
            tasks.spawn(async move { gateway.ensure_session_record(&id).await });
        }
        while let Some(outcome) = tasks.join_next().await {
            assert_eq!(outcome.unwrap(), SyncOutcome::Success);
        }

        assert_eq!(store.create_calls(), 1);
    }

    #[test]
    fn test_metadata_wire_names() {
        let metadata = TrackerMetadata {
            created_at: FakeLocator::position(0.0, 0.0, 0.0).timestamp,
            client: "Geotrack/0.1.0".to_string(),
        };
        let value = serde_json::to_value(&metadata).unwrap();
        assert!(value.get("createdAt").is_some());
        assert_eq!(value["client"], "Geotrack/0.1.0");
    }
}
