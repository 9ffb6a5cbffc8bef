//! HTTP implementation of the remote session traits
//!
//! Talks to a JSON REST front end of the data service:
//!
//! | Operation        | Request                                          |
//! |------------------|--------------------------------------------------|
//! | open             | `POST /sessions` `{username, password, dataset}` |
//! | list channels    | `GET /sessions/{id}/channels`                    |
//! | get data         | `GET /sessions/{id}/data?start=&duration=&channels=` |
//! | get annotations  | `GET /sessions/{id}/annotations?layer=`          |
//! | close            | `DELETE /sessions/{id}`                          |
//!
//! Retrying is not done here; every error is classified into a
//! [`SessionError`] and the retry loop decides what to do with it.

use super::{RawAnnotation, RemoteSession, SessionConnector, SessionError, SessionResult};
use crate::{Channel, SampleMatrix, TimeSpan};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Connect timeout for the underlying HTTP client
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Login credentials for the data service
#[derive(Clone, Serialize)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Create credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Account name
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Serialize)]
struct OpenRequest<'a> {
    username: &'a str,
    password: &'a str,
    dataset: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenResponse {
    session_id: String,
    start_time_usec: i64,
    end_time_usec: i64,
}

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    name: String,
    sample_rate: f64,
}

#[derive(Debug, Deserialize)]
struct DataResponse {
    samples: Vec<Vec<f64>>,
}

/// Classify a non-success HTTP status
pub fn classify_status(status: StatusCode, body: &str) -> SessionError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        SessionError::Service(detail)
    } else {
        SessionError::Rejected(detail)
    }
}

/// Classify a transport-level reqwest error
pub fn classify_transport(err: &reqwest::Error) -> SessionError {
    if err.is_decode() {
        SessionError::MalformedResponse(err.to_string())
    } else {
        SessionError::Connection(err.to_string())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> SessionResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &body));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| SessionError::MalformedResponse(e.to_string()))
}

/// Join channel indices into the `channels` query value
fn channel_param(channels: &[usize]) -> String {
    channels
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Opens sessions over HTTP
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: Arc<Client>,
    base_url: String,
    credentials: Credentials,
}

impl HttpConnector {
    /// Create a connector for `base_url` (e.g., "https://data.example.org/api")
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> SessionResult<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SessionError::Connection(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(Arc::new(client), base_url, credentials))
    }

    /// Create a connector sharing an existing client
    pub fn with_client(
        client: Arc<Client>,
        base_url: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// Base URL for API endpoints
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl SessionConnector for HttpConnector {
    async fn open(&self, source_reference: &str) -> SessionResult<Box<dyn RemoteSession>> {
        let url = format!("{}/sessions", self.base_url);
        debug!(url = %url, dataset = source_reference, "Opening remote session");

        let body = OpenRequest {
            username: &self.credentials.username,
            password: &self.credentials.password,
            dataset: source_reference,
        };
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        let opened: OpenResponse = decode(response).await?;

        Ok(Box::new(HttpSession {
            client: Arc::clone(&self.client),
            session_url: format!("{}/sessions/{}", self.base_url, opened.session_id),
            span: TimeSpan {
                start_usec: opened.start_time_usec,
                end_usec: opened.end_time_usec,
            },
        }))
    }
}

/// An open HTTP session
#[derive(Debug)]
pub struct HttpSession {
    client: Arc<Client>,
    session_url: String,
    span: TimeSpan,
}

impl HttpSession {
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> SessionResult<T> {
        let url = format!("{}{}", self.session_url, path);
        debug!("GET {} with {} params", url, params.len());

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        decode(response).await
    }
}

#[async_trait]
impl RemoteSession for HttpSession {
    fn time_span(&self) -> TimeSpan {
        self.span
    }

    async fn list_channels(&self) -> SessionResult<Vec<Channel>> {
        let channels: Vec<ChannelResponse> = self.get("/channels", &[]).await?;
        Ok(channels
            .into_iter()
            .map(|c| Channel::new(c.name, c.sample_rate))
            .collect())
    }

    async fn get_data(
        &self,
        channels: &[usize],
        start_usec: i64,
        duration_usec: i64,
    ) -> SessionResult<SampleMatrix> {
        let params = [
            ("start", start_usec.to_string()),
            ("duration", duration_usec.to_string()),
            ("channels", channel_param(channels)),
        ];
        let data: DataResponse = self.get("/data", &params).await?;
        SampleMatrix::from_rows(channels.len(), data.samples).map_err(SessionError::MalformedResponse)
    }

    async fn get_annotations(&self, layer: &str) -> SessionResult<Vec<RawAnnotation>> {
        self.get("/annotations", &[("layer", layer.to_string())]).await
    }

    async fn close(self: Box<Self>) -> SessionResult<()> {
        let response = self
            .client
            .delete(&self.session_url)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}
