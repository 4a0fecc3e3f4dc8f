use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;

use super::status::RunStatusReport;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type RunStatusResult<T> = Result<T, RunStatusError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RunStatusError {
    #[snafu(display("run '{run_id}' is not known to the run service"))]
    RunNotFound { stage: &'static str, run_id: String },
    #[snafu(display("run service endpoint '{endpoint}' is invalid: {details}"))]
    InvalidEndpoint {
        stage: &'static str,
        endpoint: String,
        details: String,
    },
    #[snafu(display("failed to build http client on `{stage}`: {source}"))]
    BuildHttpClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("run status request for '{run_id}' failed on `{stage}`: {source}"))]
    SendRequest {
        stage: &'static str,
        run_id: String,
        source: reqwest::Error,
    },
    #[snafu(display("failed to read run status body for '{run_id}': {source}"))]
    ReadBody {
        stage: &'static str,
        run_id: String,
        source: reqwest::Error,
    },
    #[snafu(display("run service returned status {status} for '{run_id}': {body}"))]
    UnexpectedStatus {
        stage: &'static str,
        run_id: String,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode run status for '{run_id}': {source}"))]
    DecodePayload {
        stage: &'static str,
        run_id: String,
        source: serde_json::Error,
    },
    #[snafu(display("run status request for '{run_id}' exceeded {timeout_ms}ms"))]
    Timeout {
        stage: &'static str,
        run_id: String,
        timeout_ms: u64,
    },
}

impl RunStatusError {
    /// True when the service reported the run as gone; every other variant is transient.
    pub fn is_run_not_found(&self) -> bool {
        matches!(self, Self::RunNotFound { .. })
    }
}

/// Anything that can answer "what is the state of run X right now".
pub trait RunStatusSource: Send + Sync {
    fn fetch_status<'a>(&'a self, run_id: &'a str)
    -> BoxFuture<'a, RunStatusResult<RunStatusReport>>;
}
