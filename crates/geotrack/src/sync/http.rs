//! REST document store backend.
//!
//! Records live at `{endpoint}/trackers/{id}`. Creation uses a conditional
//! `PUT` with `If-None-Match: *`, so a record that already exists answers
//! `409` or `412` and is left untouched. Samples are `POST`ed to
//! `{endpoint}/trackers/{id}/locations`.

use reqwest::header::IF_NONE_MATCH;
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::error::{Error, Result};
use crate::sample::TelemetrySample;
use crate::session::SessionId;

use super::{RemoteStore, TrackerMetadata};

/// Tracker store reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    base: Url,
    api_token: Option<String>,
}

impl HttpStore {
    /// Create a store rooted at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `endpoint` is not an absolute URL.
    pub fn new(client: reqwest::Client, endpoint: &str, api_token: Option<String>) -> Result<Self> {
        let base = Url::parse(endpoint)
            .map_err(|e| Error::config_validation(format!("invalid sync endpoint {endpoint:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(Error::config_validation(format!(
                "sync endpoint {endpoint:?} cannot hold paths"
            )));
        }
        Ok(Self {
            client,
            base,
            api_token,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::internal("sync endpoint cannot hold paths"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn api_error(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Error::api(status, body)
}

#[async_trait::async_trait]
impl RemoteStore for HttpStore {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn create_if_absent(&self, id: &SessionId, metadata: &TrackerMetadata) -> Result<bool> {
        let url = self.url(&["trackers", id.as_str()])?;
        debug!(%url, "Creating tracker record");

        let response = self
            .authorize(self.client.put(url))
            .header(IF_NONE_MATCH, "*")
            .json(metadata)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => Ok(false),
            _ => Err(api_error(response).await),
        }
    }

    async fn append(&self, id: &SessionId, sample: &TelemetrySample) -> Result<()> {
        let url = self.url(&["trackers", id.as_str(), "locations"])?;

        let response = self
            .authorize(self.client.post(url))
            .json(sample)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::TrackerNotFound {
                session_id: id.to_string(),
            }),
            _ => Err(api_error(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{DeviceInfo, UNKNOWN_IP};
    use crate::testing::{serve_once_capturing, FakeLocator};

    fn metadata() -> TrackerMetadata {
        TrackerMetadata {
            created_at: FakeLocator::position(0.0, 0.0, 0.0).timestamp,
            client: "Geotrack/0.1.0".to_string(),
        }
    }

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

    #[test]
    fn test_rejects_bad_endpoint() {
        assert!(HttpStore::new(reqwest::Client::new(), "not a url", None).is_err());
        assert!(HttpStore::new(reqwest::Client::new(), "mailto:ops@example.com", None).is_err());
    }

    #[test]
    fn test_url_building() {
        let store =
            HttpStore::new(reqwest::Client::new(), "https://store.example.com/v1/", None).unwrap();
        let url = store.url(&["trackers", "abc", "locations"]).unwrap();
        assert_eq!(url.as_str(), "https://store.example.com/v1/trackers/abc/locations");

        let store =
            HttpStore::new(reqwest::Client::new(), "https://store.example.com/v1", None).unwrap();
        let url = store.url(&["trackers", "a/b"]).unwrap();
        assert_eq!(url.as_str(), "https://store.example.com/v1/trackers/a%2Fb");
    }

    #[tokio::test]
    async fn test_create_sends_conditional_put() {
        let (url, request) = serve_once_capturing(201, "{}").await;
        let store =
            HttpStore::new(reqwest::Client::new(), &url, Some("secret".to_string())).unwrap();

        let created = store
            .create_if_absent(&SessionId::new("abc"), &metadata())
            .await
            .unwrap();
        assert!(created);

        let request = request.await.unwrap();
        assert!(request.starts_with("PUT /trackers/abc HTTP/1.1"));
        let lower = request.to_lowercase();
        assert!(lower.contains("if-none-match: *"));
        assert!(lower.contains("authorization: bearer secret"));
        assert!(request.contains("\"createdAt\""));
    }

    #[tokio::test]
    async fn test_create_existing_record() {
        for status in [409, 412] {
            let url = crate::testing::serve_once(status, "{}").await;
            let store = HttpStore::new(reqwest::Client::new(), &url, None).unwrap();
            let created = store
                .create_if_absent(&SessionId::new("abc"), &metadata())
                .await
                .unwrap();
            assert!(!created);
        }
    }

    #[tokio::test]
    async fn test_create_server_error() {
        let url = crate::testing::serve_once(500, r#"{"error":"boom"}"#).await;
        let store = HttpStore::new(reqwest::Client::new(), &url, None).unwrap();
        let err = store
            .create_if_absent(&SessionId::new("abc"), &metadata())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(500));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_append_posts_sample() {
        let (url, request) = serve_once_capturing(200, "{}").await;
        let store = HttpStore::new(reqwest::Client::new(), &url, None).unwrap();

        store.append(&SessionId::new("abc"), &sample()).await.unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /trackers/abc/locations HTTP/1.1"));
        assert!(!request.to_lowercase().contains("authorization:"));
        assert!(request.contains("\"deviceInfo\""));
        assert!(request.contains("\"ip\":\"Unknown\""));
    }

    #[tokio::test]
    async fn test_append_missing_record() {
        let url = crate::testing::serve_once(404, "{}").await;
        let store = HttpStore::new(reqwest::Client::new(), &url, None).unwrap();
        let err = store.append(&SessionId::new("abc"), &sample()).await.unwrap_err();
        assert!(matches!(err, Error::TrackerNotFound { .. }));
    }
}
