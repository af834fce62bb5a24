//! Wiring of configured components into a running tracker.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::capture::{CaptureEngine, CycleOutcome, CycleTrigger};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, SyncBackend};
use crate::environment::{EnvironmentProbe, HttpAddressLookup, RuntimeEnvironment};
use crate::error::{Error, Result};
use crate::position::{locator_from_config, PositionOptions, PositionSource};
use crate::scheduler::{SchedulerHandle, UpdateScheduler};
use crate::session::{SessionId, SessionIdentity};
use crate::status::StatusBoard;
use crate::sync::{HttpStore, RemoteStore, SqliteStore, SyncGateway};

/// A fully assembled tracker for the current session.
#[derive(Debug)]
pub struct Tracker {
    engine: Arc<CaptureEngine>,
    interval: Duration,
}

impl Tracker {
    /// Build every component named by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built or the remote
    /// store cannot be opened.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Like [`Tracker::from_config`], stamping times with `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built or the remote
    /// store cannot be opened.
    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let environment = RuntimeEnvironment::detect(&config.device);
        let user_agent = environment.user_agent.clone();

        let session_id = SessionIdentity::from_dir(config.session_storage_dir()).resolve();

        let locator = locator_from_config(
            &config.position,
            http_client(&user_agent, config.position_timeout())?,
            Arc::clone(&clock),
        );
        let position = PositionSource::new(
            locator,
            PositionOptions::for_mode(config.position.accuracy_mode, config.position_timeout()),
        );

        let lookup = HttpAddressLookup::new(
            http_client(&user_agent, config.network_timeout())?,
            config.network.ip_lookup_url.clone(),
        );
        let probe = EnvironmentProbe::new(environment, Arc::new(lookup));

        let store = open_store(config, &user_agent)?;
        let gateway = Arc::new(SyncGateway::new(store, Arc::clone(&clock), user_agent));

        info!(
            session_id = %session_id,
            position = ?config.position.source,
            backend = gateway.store_name(),
            "Tracker assembled"
        );

        let engine = CaptureEngine::new(
            session_id,
            position,
            probe,
            gateway,
            Arc::new(StatusBoard::new()),
            clock,
        );
        Ok(Self {
            engine: Arc::new(engine),
            interval: config.update_interval(),
        })
    }

    /// The session being recorded.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        self.engine.session_id()
    }

    /// The status feed.
    #[must_use]
    pub fn status(&self) -> &Arc<StatusBoard> {
        self.engine.status()
    }

    /// Run a single capture cycle.
    pub async fn capture_once(&self) -> CycleOutcome {
        self.engine.fetch_location(CycleTrigger::Manual).await
    }

    /// Start the scheduler. The first cycle begins immediately.
    #[must_use]
    pub fn start(&self) -> SchedulerHandle {
        UpdateScheduler::new(Arc::clone(&self.engine), self.interval).spawn()
    }
}

fn http_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()?)
}

fn open_store(config: &Config, user_agent: &str) -> Result<Arc<dyn RemoteStore>> {
    match config.sync.backend {
        SyncBackend::Sqlite => Ok(Arc::new(SqliteStore::open(config.database_path())?)),
        SyncBackend::Http => {
            let endpoint = config
                .sync
                .endpoint
                .as_deref()
                .ok_or_else(|| Error::config_validation("sync.endpoint is required for the http backend"))?;
            Ok(Arc::new(HttpStore::new(
                http_client(user_agent, config.sync_timeout())?,
                endpoint,
                config.sync.api_token.clone(),
            )?))
        }
    }
}
