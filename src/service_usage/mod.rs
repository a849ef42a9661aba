//! Service Usage REST client used to enable Google APIs on a project.
//!
//! Enabling services is a long-running operation: `services:batchEnable`
//! returns an operation name which is then polled through
//! [`OperationClient::check_progress`].

use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;

use crate::operation::{BatchRequest, Operation, OperationClient, OperationFuture, RemoteError};

mod types;

use types::{BatchEnableRequest, ErrorEnvelope, OperationResource};

/// Default REST endpoint, with trailing slash.
pub const DEFAULT_ENDPOINT: &str = "https://serviceusage.googleapis.com/v1/";

const SERVICE_SUFFIX: &str = ".googleapis.com";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Appends `.googleapis.com` to every id that lacks it.
#[must_use]
pub fn normalise_service_ids<S: AsRef<str>>(ids: &[S]) -> Vec<String> {
    ids.iter()
        .map(AsRef::as_ref)
        .map(|id| {
            if id.ends_with(SERVICE_SUFFIX) {
                id.to_owned()
            } else {
                format!("{id}{SERVICE_SUFFIX}")
            }
        })
        .collect()
}

/// Extracts the short names of the services listed in a batch-enable
/// response, sorted.
///
/// `projects/123/services/run.googleapis.com` becomes `run`. A response
/// without a `services` array yields an empty list.
#[must_use]
pub fn enabled_service_names(response: &Value) -> Vec<String> {
    let mut names: Vec<String> = response
        .get("services")
        .and_then(Value::as_array)
        .map(|services| {
            services
                .iter()
                .filter_map(|service| service.get("name").and_then(Value::as_str))
                .map(short_name)
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn short_name(resource: &str) -> String {
    let last = resource.rsplit('/').next().unwrap_or(resource);
    last.strip_suffix(SERVICE_SUFFIX).unwrap_or(last).to_owned()
}

/// Service Usage API client authenticated with a bearer token.
#[derive(Clone, Debug)]
pub struct ServiceUsageClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl ServiceUsageClient {
    /// Creates a client against `endpoint` using `token` for every request.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the HTTP client cannot be initialised.
    pub fn new(
        endpoint: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| RemoteError::new(format!("failed to build HTTP client: {err}")))?;
        let mut base = endpoint.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            http,
            endpoint: base,
            token: token.into(),
        })
    }

    /// Absolute URL for a resource path relative to the endpoint.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| RemoteError::new(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::new(describe_failure(status.as_u16(), &body)))
    }

    async fn fetch_operation(&self, request: RequestBuilder) -> Result<Operation, RemoteError> {
        let response = self.send(request).await?;
        let resource: OperationResource = response
            .json()
            .await
            .map_err(|err| RemoteError::new(format!("invalid operation payload: {err}")))?;
        Ok(resource.into())
    }
}

/// Renders a non-2xx response, preferring the first line of the API's own
/// error message.
fn describe_failure(status: u16, body: &str) -> String {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .map_or_else(|_| body.to_owned(), |envelope| envelope.error.message);
    let first_line = detail.lines().next().unwrap_or_default().trim();
    if first_line.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {first_line}")
    }
}

impl OperationClient for ServiceUsageClient {
    fn submit<'a>(&'a self, request: &'a BatchRequest) -> OperationFuture<'a, Operation> {
        Box::pin(async move {
            let url = self.url(&format!("{}/services:batchEnable", request.parent));
            debug!(%url, services = ?request.ids, "submitting batch enable");
            let body = BatchEnableRequest {
                service_ids: &request.ids,
            };
            self.fetch_operation(self.http.post(url).json(&body)).await
        })
    }

    fn check_progress<'a>(&'a self, name: &'a str) -> OperationFuture<'a, Operation> {
        Box::pin(async move {
            let url = self.url(name);
            self.fetch_operation(self.http.get(url)).await
        })
    }

    fn cancel<'a>(&'a self, operation: &'a Operation) -> OperationFuture<'a, ()> {
        Box::pin(async move {
            let url = self.url(&format!("{}:cancel", operation.name));
            debug!(%url, "cancelling operation");
            self.send(self.http.post(url).json(&serde_json::json!({})))
                .await
                .map(|_| ())
        })
    }
}
