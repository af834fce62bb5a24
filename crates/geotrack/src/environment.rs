//! Device and network enrichment.
//!
//! The device fingerprint is a pure function of the [`RuntimeEnvironment`].
//! The public address is looked up over the network and is best-effort: any
//! failure yields [`UNKNOWN_IP`].

use std::net::IpAddr;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::sample::{DeviceInfo, UNKNOWN_IP};

/// Label used when a user-agent component is not recognized.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Browser families, most specific first (Edge and Opera also say Chrome,
/// Chrome also says Safari).
fn browser_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile(&[
            (r"Edg(e|A|iOS)?/", "Edge"),
            (r"OPR/|Opera", "Opera"),
            (r"SamsungBrowser/", "Samsung Internet"),
            (r"Chrome/|CriOS/", "Chrome"),
            (r"Firefox/|FxiOS/", "Firefox"),
            (r"Safari/", "Safari"),
            (r"(?i)^geotrack/", "Geotrack"),
        ])
    })
}

/// Operating system families, most specific first (iOS also says Mac OS X,
/// Android also says Linux).
fn os_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        compile(&[
            (r"Windows", "Windows"),
            (r"iPhone|iPad|iPod", "iOS"),
            (r"Android", "Android"),
            (r"CrOS", "ChromeOS"),
            (r"Mac OS X|Macintosh", "macOS"),
            (r"Linux|X11", "Linux"),
        ])
    })
}

fn compile(table: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    table
        .iter()
        .filter_map(|(pattern, label)| Regex::new(pattern).ok().map(|re| (re, *label)))
        .collect()
}

fn classify(user_agent: &str, patterns: &[(Regex, &'static str)]) -> &'static str {
    patterns
        .iter()
        .find(|(re, _)| re.is_match(user_agent))
        .map_or(UNKNOWN_LABEL, |(_, label)| *label)
}

/// Browser family named by a user-agent string.
#[must_use]
pub fn parse_browser(user_agent: &str) -> &'static str {
    classify(user_agent, browser_patterns())
}

/// Operating system family named by a user-agent string.
#[must_use]
pub fn parse_os(user_agent: &str) -> &'static str {
    classify(user_agent, os_patterns())
}

/// The facts a device fingerprint is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnvironment {
    /// User-agent string.
    pub user_agent: String,
    /// Platform label.
    pub platform: String,
    /// Screen geometry, if known.
    pub screen: Option<String>,
}

impl RuntimeEnvironment {
    /// Describe the running host, applying configured overrides.
    #[must_use]
    pub fn detect(config: &DeviceConfig) -> Self {
        Self {
            user_agent: config
                .user_agent
                .clone()
                .unwrap_or_else(native_user_agent),
            platform: native_platform(),
            screen: config.screen.clone(),
        }
    }
}

fn os_token() -> &'static str {
    match std::env::consts::OS {
        "linux" => "X11; Linux",
        "macos" => "Macintosh; Mac OS X",
        "windows" => "Windows NT 10.0",
        "android" => "Linux; Android",
        "ios" => "iPhone; CPU iPhone OS",
        other => other,
    }
}

/// The agent string this process reports when none is configured.
#[must_use]
pub fn native_user_agent() -> String {
    format!(
        "Geotrack/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        os_token(),
        std::env::consts::ARCH
    )
}

fn native_platform() -> String {
    let os = match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "MacIntel",
        "windows" => "Win32",
        other => other,
    };
    format!("{os} {}", std::env::consts::ARCH)
}

/// Resolves this host's public address.
#[async_trait::async_trait]
pub trait AddressLookup: Send + Sync + std::fmt::Debug {
    /// Look up the public address.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status, or a
    /// malformed body.
    async fn lookup(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct IpEchoResponse {
    ip: String,
}

/// Looks up the public address via an IP echo service.
#[derive(Debug, Clone)]
pub struct HttpAddressLookup {
    client: reqwest::Client,
    url: String,
}

impl HttpAddressLookup {
    /// Create a lookup against `url`, which must answer `{"ip": "..."}`.
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait::async_trait]
impl AddressLookup for HttpAddressLookup {
    async fn lookup(&self) -> Result<String> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::api(status.as_u16(), "IP lookup failed"));
        }
        let body = response.text().await?;
        let echo: IpEchoResponse = serde_json::from_str(&body)?;
        Ok(echo.ip)
    }
}

/// Derives the device fingerprint and public address.
#[derive(Debug, Clone)]
pub struct EnvironmentProbe {
    environment: RuntimeEnvironment,
    lookup: Arc<dyn AddressLookup>,
}

impl EnvironmentProbe {
    /// Create a probe.
    #[must_use]
    pub fn new(environment: RuntimeEnvironment, lookup: Arc<dyn AddressLookup>) -> Self {
        Self {
            environment,
            lookup,
        }
    }

    /// The device fingerprint.
    #[must_use]
    pub fn device_info(&self) -> DeviceInfo {
        let ua = &self.environment.user_agent;
        DeviceInfo {
            browser: parse_browser(ua).to_string(),
            os: parse_os(ua).to_string(),
            platform: self.environment.platform.clone(),
            screen: self
                .environment
                .screen
                .clone()
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            user_agent: ua.clone(),
        }
    }

    /// The public address, or [`UNKNOWN_IP`] if it cannot be determined.
    pub async fn public_ip(&self) -> String {
        match self.lookup.lookup().await {
            Ok(raw) => match raw.trim().parse::<IpAddr>() {
                Ok(addr) => {
                    debug!(ip = %addr, "Resolved public address");
                    addr.to_string()
                }
                Err(_) => {
                    warn!(value = %raw, "IP lookup returned something that is not an address");
                    UNKNOWN_IP.to_string()
                }
            },
            Err(e) => {
                warn!(error = %e, "IP lookup failed");
                UNKNOWN_IP.to_string()
            }
        }
    }
}
