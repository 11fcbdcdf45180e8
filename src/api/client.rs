use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder};
use serde_json::Value;
use tokio_util::io::ReaderStream;
use url::Url;

use crate::api::error::AttemptFailure;

/// Timeouts applied to one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
    /// Ceiling on the whole request, including the body transfer
    pub overall: Option<Duration>,
}

/// Raw outcome of an attempt that reached the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// One attempt at each kind of request the API accepts
///
/// Implementations must not retry. A response with any status code is returned as `Ok`, only
/// failures to get a response at all are errors. Retrying and status classification happen in
/// [crate::api::transport::RetryingTransport].
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Multipart upload with a `file` part and optional `prefix` field
    async fn upload(&self, endpoint: &str, file: &Path, prefix: Option<&str>, timeouts: Timeouts) -> Result<ApiResponse, AttemptFailure>;

    async fn post_json(&self, endpoint: &str, body: &Value, timeouts: Timeouts) -> Result<ApiResponse, AttemptFailure>;

    async fn get_json(&self, endpoint: &str, query: &[(&str, &str)], timeouts: Timeouts) -> Result<ApiResponse, AttemptFailure>;
}

/// reqwest backed client sending a static bearer token
pub struct HttpClient {
    base_url: Url,
    token: String,
}

impl HttpClient {
    pub fn new(base_url: Url, token: String) -> HttpClient {
        HttpClient { base_url, token }
    }

    fn url(&self, endpoint: &str) -> Result<Url, AttemptFailure> {
        self.base_url.join(endpoint).map_err(|e| AttemptFailure::Request(format!("bad endpoint {endpoint}: {e}")))
    }

    /// Timeouts live on the reqwest client, so each attempt gets a client built for its policy
    fn client(&self, timeouts: Timeouts) -> Result<Client, AttemptFailure> {
        Client::builder()
            .connect_timeout(timeouts.connect)
            .read_timeout(timeouts.read)
            .build()
            .map_err(classify)
    }

    async fn send(&self, request: RequestBuilder, timeouts: Timeouts) -> Result<ApiResponse, AttemptFailure> {
        let request = match timeouts.overall {
            Some(overall) => request.timeout(overall),
            None => request,
        };
        let response = request.bearer_auth(&self.token).send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;
        debug!("HTTP {status}: {} bytes", body.len());
        Ok(ApiResponse { status, body })
    }
}

#[async_trait]
impl ApiClient for HttpClient {
    async fn upload(&self, endpoint: &str, file: &Path, prefix: Option<&str>, timeouts: Timeouts) -> Result<ApiResponse, AttemptFailure> {
        let url = self.url(endpoint)?;
        let handle = tokio::fs::File::open(file)
            .await
            .map_err(|e| AttemptFailure::Request(format!("can't open {}: {e}", file.display())))?;
        let length = handle
            .metadata()
            .await
            .map_err(|e| AttemptFailure::Request(format!("can't stat {}: {e}", file.display())))?
            .len();
        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let part = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(handle)), length).file_name(file_name);
        let mut form = Form::new().part("file", part);
        if let Some(prefix) = prefix {
            form = form.text("prefix", prefix.to_string());
        }

        let request = self.client(timeouts)?.post(url).multipart(form);
        self.send(request, timeouts).await
    }

    async fn post_json(&self, endpoint: &str, body: &Value, timeouts: Timeouts) -> Result<ApiResponse, AttemptFailure> {
        let request = self.client(timeouts)?.post(self.url(endpoint)?).json(body);
        self.send(request, timeouts).await
    }

    async fn get_json(&self, endpoint: &str, query: &[(&str, &str)], timeouts: Timeouts) -> Result<ApiResponse, AttemptFailure> {
        let request = self.client(timeouts)?.get(self.url(endpoint)?).query(query);
        self.send(request, timeouts).await
    }
}

fn classify(err: reqwest::Error) -> AttemptFailure {
    if err.is_timeout() {
        AttemptFailure::Timeout(err.to_string())
    } else if err.is_connect() {
        AttemptFailure::Connect(err.to_string())
    } else {
        AttemptFailure::Request(err.to_string())
    }
}
