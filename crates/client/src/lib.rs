mod http;
mod source;
mod status;

pub use http::{ClientConfig, DEFAULT_REQUEST_TIMEOUT, HttpRunStatusClient};
pub use source::{BoxFuture, RunStatusError, RunStatusResult, RunStatusSource};
pub use status::{RUN_NOT_FOUND_CODE, RemoteRunStatus, RunStatusReport};
