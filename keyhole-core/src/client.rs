//! Resilient client for the USGS M2M JSON API.
//!
//! Every call goes through [`with_backoff`]: transient failures (timeouts,
//! connection resets, gateway errors, rate limiting) are retried with
//! exponential backoff, while service-reported errors surface immediately.
//! The client holds nothing beyond the session token.

use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config::UsgsConfig;
use crate::scene::SceneRecord;

const API_URL: &str = "https://m2m.cr.usgs.gov/api/api/json/stable/";

/// Scenes per `scene-search` page; the API maximum.
pub const PAGE_SIZE: u64 = 10_000;

/// Bounded retry: 5 attempts, backing off 1, 2, 4, 8, 16 seconds.
const MAX_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transient error: {0}")]
    Transient(String),

    #[error("API error {code}: {message}")]
    Service { code: String, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected response shape: {0}")]
    Decode(String),

    #[error("not logged in")]
    NotAuthenticated,
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}

/// M2M responses wrap the payload in a `data` field and report logical
/// failures through `errorCode`/`errorMessage` alongside an HTTP 200.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Paginated access to the remote catalog. The reconciler and seeder talk to
/// this port so tests can swap in a canned catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch one page of `scene-search` results starting at `starting_number`
    /// (1-based). `filter_id` restricts the search to download-available
    /// scenes; `None` walks the full unfiltered catalog. A page shorter than
    /// [`page_size`](Self::page_size) signals the end of results.
    async fn scene_page(
        &self,
        dataset: &str,
        starting_number: u64,
        filter_id: Option<&str>,
    ) -> Result<Vec<SceneRecord>, ClientError>;

    fn page_size(&self) -> u64 {
        PAGE_SIZE
    }
}

pub struct M2mClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    token: String,
    session: RwLock<Option<String>>,
}

impl std::fmt::Debug for M2mClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("M2mClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field(
                "session",
                &self.session.read().map(|s| s.is_some()).unwrap_or(false),
            )
            .finish()
    }
}

impl M2mClient {
    pub fn new(credentials: &UsgsConfig) -> Self {
        Self::with_base_url(credentials, API_URL)
    }

    pub fn with_base_url(credentials: &UsgsConfig, base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            base_url: base_url.to_string(),
            username: credentials.username.clone(),
            token: credentials.token.clone(),
            session: RwLock::new(None),
        }
    }

    /// Exchange the application token for a session token. Must be called
    /// once before any search; the token rides along as `X-Auth-Token`.
    pub async fn login(&self) -> Result<(), ClientError> {
        info!("logging in to USGS M2M API");
        let data = self
            .post(
                "login-token",
                json!({ "username": self.username, "token": self.token }),
            )
            .await?;
        let key = data
            .as_str()
            .ok_or_else(|| ClientError::Decode("login-token returned no session token".into()))?
            .to_string();
        *self.session.write().expect("session lock poisoned") = Some(key);
        info!("login successful");
        Ok(())
    }

    /// End the session. Called exactly once at shutdown; a no-op when the
    /// login never happened. The request must go out while the session token
    /// is still held, since the API rejects an unauthenticated logout; the
    /// token is dropped afterwards whether or not the call succeeded.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let had_session = self.session.read().expect("session lock poisoned").is_some();
        if !had_session {
            return Ok(());
        }
        let result = self.post("logout", json!({})).await;
        *self.session.write().expect("session lock poisoned") = None;
        result?;
        info!("logged out");
        Ok(())
    }

    /// POST `body` to `endpoint`, retrying transient failures, and unwrap the
    /// response envelope.
    pub async fn post(&self, endpoint: &str, body: Value) -> Result<Value, ClientError> {
        with_backoff(endpoint, || self.post_once(endpoint, &body)).await
    }

    async fn post_once(&self, endpoint: &str, body: &Value) -> Result<Value, ClientError> {
        let mut request = self
            .http
            .post(format!("{}{}", self.base_url, endpoint))
            .json(body);
        if let Some(token) = self.session.read().expect("session lock poisoned").as_deref() {
            request = request.header("X-Auth-Token", token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() || err.is_connect() => {
                return Err(ClientError::Transient(err.to_string()));
            }
            Err(err) => return Err(ClientError::Network(err)),
        };

        let status = response.status();
        if matches!(status.as_u16(), 429 | 502 | 503 | 504) {
            return Err(ClientError::Transient(format!("HTTP {status}")));
        }
        let response = response.error_for_status()?;

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|err| ClientError::Decode(err.to_string()))?;
        if let Some(code) = envelope.error_code {
            return Err(ClientError::Service {
                code,
                message: envelope.error_message.unwrap_or_default(),
            });
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl CatalogSource for M2mClient {
    async fn scene_page(
        &self,
        dataset: &str,
        starting_number: u64,
        filter_id: Option<&str>,
    ) -> Result<Vec<SceneRecord>, ClientError> {
        if self.session.read().expect("session lock poisoned").is_none() {
            return Err(ClientError::NotAuthenticated);
        }

        let mut body = json!({
            "datasetName": dataset,
            "maxResults": self.page_size(),
            "startingNumber": starting_number,
            "sceneFilter": {},
        });
        match filter_id {
            Some(filter_id) => {
                body["sceneFilter"] = json!({
                    "metadataFilter": {
                        "filterType": "value",
                        "filterId": filter_id,
                        "value": "Y",
                    }
                });
            }
            // The unfiltered walk needs the full metadata list for each
            // record so unscanned placeholders keep their fields.
            None => {
                body["metadataType"] = json!("full");
            }
        }

        let data = self.post("scene-search", body).await?;
        let results = data.get("results").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(results).map_err(|err| ClientError::Decode(err.to_string()))
    }
}

/// Run `call`, retrying transient errors with exponential backoff. The last
/// error is surfaced once the attempt budget is spent.
pub(crate) async fn with_backoff<T, F, Fut>(endpoint: &str, mut call: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut delay = INITIAL_BACKOFF;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                warn!(
                    endpoint,
                    attempt,
                    max_attempts = MAX_ATTEMPTS,
                    wait_secs = delay.as_secs(),
                    "transient error, retrying: {err}"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => {
                if err.is_transient() {
                    error!(endpoint, "all {MAX_ATTEMPTS} attempts failed");
                }
                return Err(err);
            }
        }
    }
}
