use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use alertsync_core::{
    CategoryToggles, FetchError, HistoryFetcher, Identity, Message, PreferenceSink, TimeWindow,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct HttpFetcherConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub request_timeout: Duration,
}

/// REST client for the alert backend: history pages and preference
/// mirroring, both authenticated with `x-api-key`.
pub struct HttpBackend {
    client: Client,
    config: HttpFetcherConfig,
}

impl HttpBackend {
    pub fn new(config: HttpFetcherConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FetchError::InvalidRequest(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("x-api-key", self.config.api_key.expose_secret())
            .header("accept", "application/json")
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, FetchError> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(match FetchError::from_status(status.as_u16(), body) {
            FetchError::RateLimited { .. } => FetchError::RateLimited { retry_after },
            other => other,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.config.request_timeout)
        } else if e.is_builder() {
            FetchError::InvalidRequest(e.to_string())
        } else {
            FetchError::Unreachable(e.to_string())
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl HistoryFetcher for HttpBackend {
    #[instrument(skip_all, fields(account_id = %identity.account_id, start = %window.start, end = %window.end))]
    async fn fetch_history(
        &self,
        identity: &Identity,
        window: &TimeWindow,
    ) -> Result<Vec<Message>, FetchError> {
        let start = timestamp(window.start);
        let end = timestamp(window.end);
        let request = self.authorized(self.client.get(self.url("messages"))).query(&[
            ("email", identity.account_id.as_str()),
            ("startDate", start.as_str()),
            ("endDate", end.as_str()),
        ]);

        let response = self.send(request).await?;
        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        decode_page(&body)
    }
}

/// Decode a history page entry by entry. Malformed entries are skipped;
/// only a body that is not a JSON array fails the page.
fn decode_page(body: &[u8]) -> Result<Vec<Message>, FetchError> {
    let entries: Vec<Value> =
        serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    let total = entries.len();
    let messages: Vec<Message> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(index, error = %e, "skipping malformed history entry");
                None
            }
        })
        .collect();
    debug!(count = messages.len(), skipped = total - messages.len(), "history page received");
    Ok(messages)
}

#[async_trait]
impl PreferenceSink for HttpBackend {
    #[instrument(skip_all, fields(account_id = %identity.account_id))]
    async fn push_notification_settings(
        &self,
        identity: &Identity,
        settings: &CategoryToggles,
    ) -> Result<(), FetchError> {
        let body = json!({
            "email": identity.account_id,
            "notificationSettings": settings,
        });
        let request = self
            .authorized(self.client.post(self.url("update-notification-settings")))
            .json(&body);
        self.send(request).await?;
        debug!("notification settings mirrored");
        Ok(())
    }
}
