//! Fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::capture::CaptureEngine;
use crate::clock::ManualClock;
use crate::config::DeviceConfig;
use crate::environment::{AddressLookup, EnvironmentProbe, RuntimeEnvironment};
use crate::error::{Error, Result};
use crate::position::{Locator, PlatformError, PositionOptions, PositionSource};
use crate::sample::{RawPosition, TelemetrySample};
use crate::session::{SessionId, SessionStorage};
use crate::status::StatusBoard;
use crate::sync::{RemoteStore, SyncGateway, TrackerMetadata};

/// Session storage that always fails.
#[derive(Debug)]
pub struct UnavailableStorage;

impl SessionStorage for UnavailableStorage {
    fn get_item(&self, _key: &str) -> Result<Option<String>> {
        Err(Error::session_storage("storage disabled"))
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
        Err(Error::session_storage("storage disabled"))
    }
}

#[derive(Debug, Clone)]
enum Step {
    Fix(RawPosition),
    Fail(PlatformError),
    Hang,
}

/// A locator that plays back a script. The last step repeats forever.
#[derive(Debug)]
pub struct FakeLocator {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl FakeLocator {
    fn scripted(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn position(latitude: f64, longitude: f64, accuracy: f64) -> RawPosition {
        RawPosition {
            latitude,
            longitude,
            accuracy,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        }
    }

    pub fn fixed(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self::scripted(vec![Step::Fix(Self::position(latitude, longitude, accuracy))])
    }

    pub fn failing(code: u16, message: &str) -> Self {
        Self::scripted(vec![Step::Fail(PlatformError::new(code, message))])
    }

    pub fn hanging() -> Self {
        Self::scripted(vec![Step::Hang])
    }

    /// Succeed once, then fail with `code` on every later call.
    pub fn fixed_then_failing(latitude: f64, longitude: f64, accuracy: f64, code: u16) -> Self {
        Self::scripted(vec![
            Step::Fix(Self::position(latitude, longitude, accuracy)),
            Step::Fail(PlatformError::new(code, "later failure")),
        ])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        if steps.len() > 1 {
            steps.pop_front().unwrap()
        } else {
            steps.front().cloned().unwrap()
        }
    }
}

#[async_trait::async_trait]
impl Locator for FakeLocator {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn current_position(
        &self,
        _options: &PositionOptions,
    ) -> std::result::Result<RawPosition, PlatformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Fix(position) => Ok(position),
            Step::Fail(error) => Err(error),
            Step::Hang => std::future::pending().await,
        }
    }
}

/// An address lookup with a canned answer.
#[derive(Debug)]
pub struct FakeAddressLookup {
    answer: Option<String>,
    hang: bool,
    calls: AtomicUsize,
}

impl FakeAddressLookup {
    pub fn ok(ip: &str) -> Self {
        Self {
            answer: Some(ip.to_string()),
            hang: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            hang: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Never answers.
    pub fn hanging() -> Self {
        Self {
            answer: None,
            hang: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AddressLookup for FakeAddressLookup {
    async fn lookup(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.answer
            .clone()
            .ok_or_else(|| Error::api(503, "lookup unavailable"))
    }
}

/// A remote store that records every call.
#[derive(Debug, Default)]
pub struct RecordingStore {
    creates: AtomicUsize,
    appended: Mutex<Vec<(SessionId, TelemetrySample)>>,
    fail_create: AtomicBool,
    fail_append: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_append(&self, fail: bool) {
        self.fail_append.store(fail, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn appended(&self) -> Vec<(SessionId, TelemetrySample)> {
        self.appended.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RemoteStore for RecordingStore {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn create_if_absent(&self, _id: &SessionId, _metadata: &TrackerMetadata) -> Result<bool> {
        let previous = self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::api(500, "create rejected"));
        }
        Ok(previous == 0)
    }

    async fn append(&self, id: &SessionId, sample: &TelemetrySample) -> Result<()> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(Error::api(500, "append rejected"));
        }
        self.appended
            .lock()
            .unwrap()
            .push((id.clone(), sample.clone()));
        Ok(())
    }
}

/// A capture engine over fakes, answering IP lookups with `8.8.8.8`.
pub fn capture_engine(
    locator: Arc<FakeLocator>,
    store: Arc<RecordingStore>,
    clock: Arc<ManualClock>,
    options: PositionOptions,
) -> CaptureEngine {
    capture_engine_with_lookup(
        locator,
        Arc::new(FakeAddressLookup::ok("8.8.8.8")),
        store,
        clock,
        options,
    )
}

/// A capture engine over fakes with the given address lookup.
pub fn capture_engine_with_lookup(
    locator: Arc<FakeLocator>,
    lookup: Arc<FakeAddressLookup>,
    store: Arc<RecordingStore>,
    clock: Arc<ManualClock>,
    options: PositionOptions,
) -> CaptureEngine {
    let probe = EnvironmentProbe::new(
        RuntimeEnvironment::detect(&DeviceConfig::default()),
        lookup,
    );
    let gateway = Arc::new(SyncGateway::new(store, clock.clone(), "test"));
    CaptureEngine::new(
        SessionId::new("session-1"),
        PositionSource::new(locator, options),
        probe,
        gateway,
        Arc::new(StatusBoard::new()),
        clock,
    )
}

/// Serve one HTTP response on a loopback port.
///
/// Returns the base URL and a handle resolving to the raw request text.
pub async fn serve_once_capturing(status: u16, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = body.to_string();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;

        let response = format!(
            "HTTP/1.1 {status} Test\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        request
    });

    (format!("http://{addr}/"), handle)
}

/// Serve one HTTP response on a loopback port and return its URL.
pub async fn serve_once(status: u16, body: &str) -> String {
    serve_once_capturing(status, body).await.0
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return String::from_utf8_lossy(&buf).into_owned();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    String::from_utf8_lossy(&buf).into_owned()
}
