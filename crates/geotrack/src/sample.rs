//! Telemetry record types.
//!
//! A [`TelemetrySample`] is built once per successful capture cycle from a
//! [`RawPosition`], a [`DeviceInfo`] and the public address, and is never
//! modified afterwards. Field names on the wire are camelCase so records
//! written by other clients of the same store line up.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MapProvider;

/// Placeholder used when the public address could not be resolved.
pub const UNKNOWN_IP: &str = "Unknown";

/// A position fix as reported by the locator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawPosition {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Accuracy radius in meters.
    pub accuracy: f64,
    /// When the locator took the fix (device clock).
    pub timestamp: DateTime<Utc>,
}

impl RawPosition {
    /// Whether both coordinates are finite and inside their valid ranges.
    #[must_use]
    pub fn has_valid_coordinates(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Device fingerprint derived from the runtime environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Browser or agent family.
    pub browser: String,
    /// Operating system family.
    pub os: String,
    /// Platform label (OS and architecture).
    pub platform: String,
    /// Screen geometry, `WIDTHxHEIGHT` or `Unknown`.
    pub screen: String,
    /// The raw user-agent string.
    pub user_agent: String,
}

/// One immutable capture of position, device and network metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireSample")]
pub struct TelemetrySample {
    latitude: f64,
    longitude: f64,
    accuracy: f64,
    #[serde(with = "iso8601_millis")]
    timestamp: DateTime<Utc>,
    device_info: DeviceInfo,
    #[serde(rename = "ip")]
    public_ip: String,
}

impl TelemetrySample {
    /// Build a sample from its parts.
    ///
    /// Negative or NaN accuracy is clamped to zero and the timestamp is
    /// truncated to the millisecond precision it is stored with.
    #[must_use]
    pub fn new(position: RawPosition, device_info: DeviceInfo, public_ip: String) -> Self {
        let accuracy = if position.accuracy.is_nan() {
            0.0
        } else {
            position.accuracy.max(0.0)
        };
        Self {
            latitude: position.latitude,
            longitude: position.longitude,
            accuracy,
            timestamp: position.timestamp.trunc_subsecs(3),
            device_info,
            public_ip,
        }
    }

    /// Latitude in degrees.
    #[must_use]
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Longitude in degrees.
    #[must_use]
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Accuracy radius in meters, never negative.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    /// When the fix was taken.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The fix time as an ISO-8601 UTC string with millisecond precision.
    #[must_use]
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Device fingerprint at capture time.
    #[must_use]
    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Public address, or [`UNKNOWN_IP`].
    #[must_use]
    pub fn public_ip(&self) -> &str {
        &self.public_ip
    }

    /// A link to this position on the given map service.
    #[must_use]
    pub fn map_url(&self, provider: MapProvider) -> String {
        let (lat, lon) = (self.latitude, self.longitude);
        match provider {
            MapProvider::Osm => {
                format!("https://www.openstreetmap.org/?mlat={lat}&mlon={lon}#map=15/{lat}/{lon}")
            }
            MapProvider::Google => format!("https://maps.google.com/maps?q={lat},{lon}&z=15"),
        }
    }
}

/// Incoming wire form; every decoded sample goes through [`TelemetrySample::new`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSample {
    latitude: f64,
    longitude: f64,
    accuracy: f64,
    #[serde(with = "iso8601_millis")]
    timestamp: DateTime<Utc>,
    device_info: DeviceInfo,
    ip: String,
}

impl From<WireSample> for TelemetrySample {
    fn from(wire: WireSample) -> Self {
        let position = RawPosition {
            latitude: wire.latitude,
            longitude: wire.longitude,
            accuracy: wire.accuracy,
            timestamp: wire.timestamp,
        };
        Self::new(position, wire.device_info, wire.ip)
    }
}

mod iso8601_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
