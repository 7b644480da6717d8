//! HTTP bindings for vendors that expose plain JSON endpoints
//!
//! [`HttpInvoker`] posts one request to one provider endpoint. [`HttpJobClient`]
//! speaks the submit/status/download shape of asynchronous job APIs.
//!
//! Non-2xx responses become vendor errors carrying the HTTP status and the
//! vendor's own message, never payloads.

use crate::error::ProviderError;
use crate::invoker::ProviderInvoker;
use crate::poller::JobClient;
use crate::types::{JobArtifact, JobId, ProviderRequest, StatusReport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Longest vendor message kept from a raw (non-JSON) error body
const MAX_VENDOR_MESSAGE_LEN: usize = 512;

/// Single provider endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpEndpoint {
    /// URL requests are posted to
    pub url: Url,

    /// Value for the Authorization header
    #[serde(default)]
    pub auth_header: Option<String>,
}

impl HttpEndpoint {
    /// Parse `url` into an endpoint
    pub fn parse(url: &str, auth_header: Option<String>) -> crate::Result<Self> {
        Ok(Self {
            url: Url::parse(url)?,
            auth_header,
        })
    }
}

/// Invokes a provider by POSTing `{"payload": ..., "options": ...}` to its endpoint
#[derive(Clone, Debug)]
pub struct HttpInvoker {
    client: reqwest::Client,
    endpoint: HttpEndpoint,
}

impl HttpInvoker {
    /// Invoker with its own connection pool
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    /// Invoker whose client gives up on a request after `timeout`
    pub fn with_request_timeout(endpoint: HttpEndpoint, timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Invoker sharing an existing client (and its pool)
    pub fn with_client(client: reqwest::Client, endpoint: HttpEndpoint) -> Self {
        Self { client, endpoint }
    }
}

#[derive(Serialize)]
struct InvokeBody<'a> {
    payload: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a Value>,
}

#[async_trait]
impl ProviderInvoker for HttpInvoker {
    async fn invoke(
        &self,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, ProviderError> {
        let mut builder = self
            .client
            .post(self.endpoint.url.clone())
            .json(&InvokeBody {
                payload: &request.payload,
                options: request.options.as_ref(),
            });
        if let Some(auth) = &self.endpoint.auth_header {
            builder = builder.header("Authorization", auth);
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::cancelled()),
            response = send_json(builder) => response,
        }
    }
}

/// Endpoints of an asynchronous job API
///
/// Status, download and cancel URLs get the job id appended as a path segment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobEndpoints {
    /// POST target for new jobs
    pub submit_url: Url,
    /// GET `{status_url}/{id}`
    pub status_url: Url,
    /// GET `{download_url}/{id}`
    pub download_url: Url,
    /// DELETE `{cancel_url}/{id}`, when the vendor supports it
    #[serde(default)]
    pub cancel_url: Option<Url>,
    /// Value for the Authorization header
    #[serde(default)]
    pub auth_header: Option<String>,
}

impl JobEndpoints {
    /// Conventional layout under one base URL
    ///
    /// Jobs are POSTed to `base`, status is read from `{base}/status/{id}` and
    /// results from `{base}/result/{id}`. No cancel endpoint is assumed.
    pub fn under(base: &str) -> crate::Result<Self> {
        let submit_url = Url::parse(base)?;
        let mut root = submit_url.clone();
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }
        Ok(Self {
            status_url: root.join("status")?,
            download_url: root.join("result")?,
            submit_url,
            cancel_url: None,
            auth_header: None,
        })
    }

    /// Send `auth_header` as the Authorization header on every request
    #[must_use]
    pub fn with_auth(mut self, auth_header: impl Into<String>) -> Self {
        self.auth_header = Some(auth_header.into());
        self
    }
}

/// [`JobClient`] over HTTP
#[derive(Clone, Debug)]
pub struct HttpJobClient {
    client: reqwest::Client,
    endpoints: JobEndpoints,
    request_timeout: Duration,
}

impl HttpJobClient {
    /// Client with a 30 second per-request timeout
    pub fn new(endpoints: JobEndpoints) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Share an existing client
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Per-request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.timeout(self.request_timeout);
        match &self.endpoints.auth_header {
            Some(auth) => builder.header("Authorization", auth),
            None => builder,
        }
    }
}

#[async_trait]
impl JobClient for HttpJobClient {
    async fn submit(&self, payload: &Value, cancel: &CancellationToken) -> Result<JobId, ProviderError> {
        let builder = self.authorize(self.client.post(self.endpoints.submit_url.clone()).json(payload));
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::cancelled()),
            body = send_json(builder) => body?,
        };
        let id = extract_job_id(&body)?;
        tracing::debug!(job_id = %id, url = %self.endpoints.submit_url, "Job accepted");
        Ok(id)
    }

    async fn get_status(&self, job_id: &JobId) -> Result<StatusReport, ProviderError> {
        let url = job_url(&self.endpoints.status_url, job_id)?;
        let body = send_json(self.authorize(self.client.get(url))).await?;
        serde_json::from_value(body)
            .map_err(|e| ProviderError::malformed(format!("unreadable status response: {e}")))
    }

    async fn download(&self, job_id: &JobId) -> Result<JobArtifact, ProviderError> {
        let url = job_url(&self.endpoints.download_url, job_id)?;
        let response = checked(self.authorize(self.client.get(url)).send().await?).await?;

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        if is_json {
            let listing: UrlListing = response.json().await?;
            Ok(JobArtifact::Urls(listing.urls))
        } else {
            Ok(JobArtifact::Bytes(response.bytes().await?.to_vec()))
        }
    }

    async fn cancel(&self, job_id: &JobId) -> Result<bool, ProviderError> {
        let Some(base) = &self.endpoints.cancel_url else {
            return Ok(false);
        };
        let url = job_url(base, job_id)?;
        checked(self.authorize(self.client.delete(url)).send().await?).await?;
        Ok(true)
    }
}

#[derive(Deserialize)]
struct UrlListing {
    urls: Vec<Url>,
}

async fn send_json(builder: reqwest::RequestBuilder) -> Result<Value, ProviderError> {
    let response = checked(builder.send().await?).await?;
    response
        .json()
        .await
        .map_err(|e| ProviderError::malformed(format!("response is not JSON: {e}")))
}

/// Turn a non-2xx response into a vendor error
async fn checked(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::vendor(status.as_u16(), vendor_message(&body)))
}

/// Pull the vendor's message out of an error body
///
/// Understands `{"error": {"message": ..}}`, `{"error": ".."}` and
/// `{"message": ..}`; anything else is kept as (truncated) text.
fn vendor_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let found = json
            .pointer("/error/message")
            .and_then(Value::as_str)
            .or_else(|| json.get("error").and_then(Value::as_str))
            .or_else(|| json.get("message").and_then(Value::as_str));
        if let Some(message) = found {
            return Some(message.to_string());
        }
    }

    Some(body.chars().take(MAX_VENDOR_MESSAGE_LEN).collect())
}

fn extract_job_id(body: &Value) -> Result<JobId, ProviderError> {
    ["id", "job_id", "upload_id"]
        .iter()
        .find_map(|key| match body.get(key)? {
            Value::String(s) if !s.is_empty() => Some(JobId::from(s.as_str())),
            Value::Number(n) => Some(JobId::from(n.to_string())),
            _ => None,
        })
        .ok_or_else(|| ProviderError::malformed("submit response carries no job id"))
}

fn job_url(base: &Url, job_id: &JobId) -> Result<Url, ProviderError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| ProviderError::malformed(format!("cannot append a job id to {base}")))?
        .pop_if_empty()
        .push(job_id.as_str());
    Ok(url)
}
