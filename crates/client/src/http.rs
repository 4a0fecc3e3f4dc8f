use std::time::Duration;

use reqwest::{StatusCode, Url};
use snafu::{ResultExt, ensure};

use super::source::{
    BoxFuture, BuildHttpClientSnafu, DecodePayloadSnafu, InvalidEndpointSnafu, ReadBodySnafu,
    RunNotFoundSnafu, RunStatusResult, RunStatusSource, SendRequestSnafu, UnexpectedStatusSnafu,
};
use super::status::{ErrorEnvelope, RunStatusReport};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoint: String,
    pub api_token: Option<String>,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim().to_string(),
            api_token: api_token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

/// Polls `GET {endpoint}/runs/{run_id}/status`.
pub struct HttpRunStatusClient {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpRunStatusClient {
    pub fn new(config: ClientConfig) -> RunStatusResult<Self> {
        ensure!(
            !config.endpoint.is_empty(),
            InvalidEndpointSnafu {
                stage: "http-client-new",
                endpoint: config.endpoint.clone(),
                details: "endpoint is empty".to_string(),
            }
        );

        let base_url = Url::parse(&config.endpoint).map_err(|source| {
            InvalidEndpointSnafu {
                stage: "http-client-parse-endpoint",
                endpoint: config.endpoint.clone(),
                details: source.to_string(),
            }
            .build()
        })?;
        ensure!(
            !base_url.cannot_be_a_base(),
            InvalidEndpointSnafu {
                stage: "http-client-endpoint-base",
                endpoint: config.endpoint.clone(),
                details: "endpoint cannot carry path segments".to_string(),
            }
        );

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context(BuildHttpClientSnafu {
                stage: "http-client-build",
            })?;

        Ok(Self {
            client,
            base_url,
            api_token: config.api_token,
        })
    }

    pub fn status_url(&self, run_id: &str) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejects cannot-be-a-base endpoints.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["runs", run_id, "status"]);
        }
        url
    }

    async fn request_status(&self, run_id: &str) -> RunStatusResult<RunStatusReport> {
        let mut request = self.client.get(self.status_url(run_id));
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context(SendRequestSnafu {
            stage: "run-status-send",
            run_id: run_id.to_string(),
        })?;
        let status = response.status();
        let body = response.text().await.context(ReadBodySnafu {
            stage: "run-status-read-body",
            run_id: run_id.to_string(),
        })?;

        classify_response(run_id, status, &body)
    }
}

impl RunStatusSource for HttpRunStatusClient {
    fn fetch_status<'a>(
        &'a self,
        run_id: &'a str,
    ) -> BoxFuture<'a, RunStatusResult<RunStatusReport>> {
        Box::pin(self.request_status(run_id))
    }
}

fn classify_response(
    run_id: &str,
    status: StatusCode,
    body: &str,
) -> RunStatusResult<RunStatusReport> {
    if status.is_success() {
        return serde_json::from_str(body).context(DecodePayloadSnafu {
            stage: "run-status-decode",
            run_id: run_id.to_string(),
        });
    }

    // Only the service's own error code is terminal; a bare 404 is retried.
    let flagged_not_found = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.is_run_not_found())
        .unwrap_or(false);

    if flagged_not_found {
        return RunNotFoundSnafu {
            stage: "run-status-not-found",
            run_id: run_id.to_string(),
        }
        .fail();
    }

    tracing::debug!(run_id, status = status.as_u16(), "run service rejected status request");
    UnexpectedStatusSnafu {
        stage: "run-status-http-status",
        run_id: run_id.to_string(),
        status: status.as_u16(),
        body: body.to_string(),
    }
    .fail()
}
