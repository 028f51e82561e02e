//! Firebase Realtime Database client over the REST streaming API.
//!
//! Subscriptions are a long-lived `GET <base>/.json` with
//! `Accept: text/event-stream`; writes are `PUT` (set) and `DELETE`.

use super::sse::{SseDecoder, SseMessage};
use super::{EventStream, RemoteError, RemoteEvent, RemoteStore};
use futures::future::BoxFuture;
use futures::{TryStreamExt, stream};
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Where and how to reach a database.
#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    base_url: Url,
    auth: Option<String>,
    request_timeout: Duration,
}

impl FirebaseConfig {
    const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Accepts either a bare database name (`my-db`, expanded to
    /// `https://my-db.firebaseio.com`) or a full base URL.
    pub fn new(database: &str) -> Result<Self, url::ParseError> {
        let base_url = if database.contains("://") {
            Url::parse(database)?
        } else {
            Url::parse(&format!("https://{database}.firebaseio.com"))?
        };
        Ok(Self {
            base_url,
            auth: None,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Sets the database secret or ID token passed as `?auth=`.
    #[must_use]
    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    /// Sets the timeout for write requests. The subscription has none.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// REST endpoint for a tree key; the root key `""` maps to `/.json`.
    pub fn endpoint(&self, key: &str) -> Url {
        let mut url = self.base_url.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        let key = if key.is_empty() { "/" } else { key };
        url.set_path(&format!("{base_path}{key}.json"));
        if let Some(auth) = &self.auth {
            url.query_pairs_mut().append_pair("auth", auth);
        }
        url
    }
}

/// [`RemoteStore`] backed by a Firebase Realtime Database.
#[derive(Debug, Clone)]
pub struct FirebaseClient {
    config: FirebaseConfig,
    client: reqwest::Client,
    stream_client: reqwest::Client,
}

impl FirebaseClient {
    pub fn new(config: FirebaseConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let stream_client = reqwest::Client::builder().build()?;
        Ok(Self {
            config,
            client,
            stream_client,
        })
    }

    pub fn config(&self) -> &FirebaseConfig {
        &self.config
    }
}

impl RemoteStore for FirebaseClient {
    fn subscribe(&self) -> BoxFuture<'_, Result<EventStream, RemoteError>> {
        Box::pin(async move {
            info!(database = %self.config.base_url, "opening event stream");
            let response = self
                .stream_client
                .get(self.config.endpoint(""))
                .header(ACCEPT, "text/event-stream")
                .send()
                .await?;
            let response = check_status(response).await?;

            let mut decoder = SseDecoder::default();
            let events = response
                .bytes_stream()
                .map_err(RemoteError::from)
                .map_ok(move |chunk| {
                    let parsed: Vec<_> = decoder.feed(&chunk).into_iter().map(parse_event).collect();
                    stream::iter(parsed)
                })
                .try_flatten();
            Ok(Box::pin(events) as EventStream)
        })
    }

    fn set_at_path(
        &self,
        path: &str,
        value: Option<Value>,
    ) -> BoxFuture<'_, Result<(), RemoteError>> {
        let url = self.config.endpoint(path);
        let path = path.to_string();
        Box::pin(async move {
            let request = match &value {
                Some(value) => self.client.put(url).json(value),
                None => self.client.delete(url),
            };
            check_status(request.send().await?).await?;
            debug!(path = %path, delete = value.is_none(), "remote write acknowledged");
            Ok(())
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Maps a decoded SSE message onto a [`RemoteEvent`].
fn parse_event(message: SseMessage) -> Result<RemoteEvent, RemoteError> {
    match message.event.as_str() {
        "put" | "patch" => {
            let payload: Value = serde_json::from_str(&message.data)?;
            let path = payload
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| RemoteError::Protocol(format!("{} event without path", message.event)))?
                .to_string();
            let data = payload.get("data").cloned().unwrap_or(Value::Null);
            Ok(if message.event == "put" {
                RemoteEvent::Put { path, data }
            } else {
                RemoteEvent::Patch { path, data }
            })
        }
        "keep-alive" => Ok(RemoteEvent::KeepAlive),
        "cancel" => Ok(RemoteEvent::Cancel(message.data)),
        "auth_revoked" => Ok(RemoteEvent::AuthRevoked),
        "error" => Ok(RemoteEvent::Error(message.data)),
        _ => Ok(RemoteEvent::Other(message.event)),
    }
}
