//! Position acquisition.
//!
//! A [`Locator`] is the platform's one-shot location request. It reports
//! failures as a numeric [`PlatformError`] code, which [`PositionSource`]
//! normalizes into the closed [`PositionError`] taxonomy shown to the user.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::{AccuracyMode, PositionConfig, PositionSourceKind};
use crate::sample::RawPosition;

/// Platform code: the user or system refused location access.
pub const PERMISSION_DENIED: u16 = 1;
/// Platform code: no fix could be obtained.
pub const POSITION_UNAVAILABLE: u16 = 2;
/// Platform code: the request ran out of time.
pub const TIMEOUT: u16 = 3;

/// Maximum age of a cached fix accepted in low-accuracy mode.
const LOW_ACCURACY_MAXIMUM_AGE: Duration = Duration::from_secs(60);

/// Why a position could not be acquired.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    /// Location access was refused.
    #[error("location permission denied")]
    PermissionDenied,

    /// No position fix is available.
    #[error("location information unavailable")]
    PositionUnavailable,

    /// The location request timed out.
    #[error("location request timed out")]
    Timeout,

    /// Any other failure.
    #[error("unknown location error: {0}")]
    Unknown(String),
}

impl PositionError {
    /// Map a platform error code to the taxonomy.
    #[must_use]
    pub fn from_code(code: u16, message: impl Into<String>) -> Self {
        match code {
            PERMISSION_DENIED => Self::PermissionDenied,
            POSITION_UNAVAILABLE => Self::PositionUnavailable,
            TIMEOUT => Self::Timeout,
            _ => Self::Unknown(message.into()),
        }
    }

    /// Status text for the presentation layer.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied => {
                "Location permission denied. Allow location access and try again.".to_string()
            }
            Self::PositionUnavailable => {
                "Location information is unavailable. Check your connection or location service."
                    .to_string()
            }
            Self::Timeout => "The request to get your location timed out.".to_string(),
            Self::Unknown(message) if message.is_empty() => {
                "An unknown error occurred while getting your location.".to_string()
            }
            Self::Unknown(message) => format!("Location acquisition failed: {message}"),
        }
    }
}

/// A failure reported by the platform location API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("platform location error {code}: {message}")]
pub struct PlatformError {
    /// One of [`PERMISSION_DENIED`], [`POSITION_UNAVAILABLE`], [`TIMEOUT`], or
    /// another platform-specific value.
    pub code: u16,
    /// Platform-provided detail.
    pub message: String,
}

impl PlatformError {
    /// Create a platform error.
    #[must_use]
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Options passed to every location request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    /// Ask for the most precise fix available.
    pub high_accuracy: bool,
    /// Upper bound for the request.
    pub timeout: Duration,
    /// Oldest cached fix the locator may return.
    pub maximum_age: Duration,
}

impl PositionOptions {
    /// Options for the given accuracy mode.
    #[must_use]
    pub fn for_mode(mode: AccuracyMode, timeout: Duration) -> Self {
        let (high_accuracy, maximum_age) = match mode {
            AccuracyMode::High => (true, Duration::ZERO),
            AccuracyMode::Balanced => (false, Duration::ZERO),
            AccuracyMode::Low => (false, LOW_ACCURACY_MAXIMUM_AGE),
        };
        Self {
            high_accuracy,
            timeout,
            maximum_age,
        }
    }
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self::for_mode(AccuracyMode::High, Duration::from_secs(10))
    }
}

/// The platform's single-shot location request.
#[async_trait::async_trait]
pub trait Locator: Send + Sync + std::fmt::Debug {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Request one position fix.
    ///
    /// # Errors
    ///
    /// Returns a [`PlatformError`] carrying the platform's failure code.
    async fn current_position(
        &self,
        options: &PositionOptions,
    ) -> std::result::Result<RawPosition, PlatformError>;
}

/// Acquires positions and normalizes failures.
#[derive(Debug, Clone)]
pub struct PositionSource {
    locator: Arc<dyn Locator>,
    options: PositionOptions,
}

impl PositionSource {
    /// Create a source over `locator`.
    #[must_use]
    pub fn new(locator: Arc<dyn Locator>, options: PositionOptions) -> Self {
        Self { locator, options }
    }

    /// Request one position fix.
    ///
    /// # Errors
    ///
    /// Returns the normalized [`PositionError`] for any failure, including
    /// fixes with out-of-range coordinates.
    pub async fn acquire(&self) -> std::result::Result<RawPosition, PositionError> {
        debug!(
            locator = self.locator.name(),
            high_accuracy = self.options.high_accuracy,
            "Requesting position"
        );

        let result =
            tokio::time::timeout(self.options.timeout, self.locator.current_position(&self.options))
                .await;

        match result {
            Err(_) => {
                warn!(
                    locator = self.locator.name(),
                    timeout_ms = self.options.timeout.as_millis(),
                    "Position request timed out"
                );
                Err(PositionError::Timeout)
            }
            Ok(Err(e)) => {
                warn!(locator = self.locator.name(), code = e.code, error = %e.message, "Position request failed");
                Err(PositionError::from_code(e.code, e.message))
            }
            Ok(Ok(position)) if !position.has_valid_coordinates() => {
                warn!(
                    latitude = position.latitude,
                    longitude = position.longitude,
                    "Locator returned invalid coordinates"
                );
                Err(PositionError::PositionUnavailable)
            }
            Ok(Ok(position)) => Ok(position),
        }
    }
}

/// Reports a fixed, configured position.
#[derive(Debug)]
pub struct StaticLocator {
    latitude: f64,
    longitude: f64,
    accuracy: f64,
    clock: Arc<dyn Clock>,
}

impl StaticLocator {
    /// Create a locator that always reports the given position.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, clock: Arc<dyn Clock>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            clock,
        }
    }
}

#[async_trait::async_trait]
impl Locator for StaticLocator {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn current_position(
        &self,
        _options: &PositionOptions,
    ) -> std::result::Result<RawPosition, PlatformError> {
        Ok(RawPosition {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self.accuracy,
            timestamp: self.clock.now(),
        })
    }
}

/// Location access turned off: every request is denied.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledLocator;

#[async_trait::async_trait]
impl Locator for DisabledLocator {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn current_position(
        &self,
        _options: &PositionOptions,
    ) -> std::result::Result<RawPosition, PlatformError> {
        Err(PlatformError::new(
            PERMISSION_DENIED,
            "location access is disabled in the configuration",
        ))
    }
}

#[derive(Debug, Deserialize)]
struct GeolocationResponse {
    #[serde(alias = "lat")]
    latitude: Option<f64>,
    #[serde(alias = "lon", alias = "lng")]
    longitude: Option<f64>,
    accuracy: Option<f64>,
}

/// Network geolocation: asks an HTTP service where this host is.
#[derive(Debug)]
pub struct HttpLocator {
    client: reqwest::Client,
    url: String,
    default_accuracy: f64,
    clock: Arc<dyn Clock>,
}

impl HttpLocator {
    /// Create a locator querying `url`.
    ///
    /// `default_accuracy` is reported when the service gives no accuracy.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        default_accuracy: f64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            default_accuracy,
            clock,
        }
    }
}

#[async_trait::async_trait]
impl Locator for HttpLocator {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn current_position(
        &self,
        options: &PositionOptions,
    ) -> std::result::Result<RawPosition, PlatformError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PlatformError::new(TIMEOUT, e.to_string())
                } else {
                    PlatformError::new(POSITION_UNAVAILABLE, e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(PlatformError::new(
                PERMISSION_DENIED,
                format!("geolocation service refused the request ({status})"),
            ));
        }
        if !status.is_success() {
            return Err(PlatformError::new(
                POSITION_UNAVAILABLE,
                format!("geolocation service answered {status}"),
            ));
        }

        let body: GeolocationResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::new(POSITION_UNAVAILABLE, e.to_string()))?;

        let (Some(latitude), Some(longitude)) = (body.latitude, body.longitude) else {
            return Err(PlatformError::new(
                POSITION_UNAVAILABLE,
                "geolocation response has no coordinates",
            ));
        };

        Ok(RawPosition {
            latitude,
            longitude,
            accuracy: body.accuracy.unwrap_or(self.default_accuracy),
            timestamp: self.clock.now(),
        })
    }
}

/// Build the locator selected by the configuration.
#[must_use]
pub fn locator_from_config(
    config: &PositionConfig,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
) -> Arc<dyn Locator> {
    match config.source {
        PositionSourceKind::Static => Arc::new(StaticLocator::new(
            config.latitude,
            config.longitude,
            config.accuracy_m,
            clock,
        )),
        PositionSourceKind::Http => Arc::new(HttpLocator::new(
            client,
            config.lookup_url.clone(),
            config.approximate_accuracy_m,
            clock,
        )),
        PositionSourceKind::Disabled => Arc::new(DisabledLocator),
    }
}
