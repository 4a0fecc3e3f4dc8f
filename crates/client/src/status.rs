use serde::{Deserialize, Serialize};

/// Error code the run service returns for ids it no longer tracks.
pub const RUN_NOT_FOUND_CODE: &str = "RUN_NOT_FOUND";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteRunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RemoteRunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One run-status payload as served by the remote run service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatusReport {
    pub status: RemoteRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_so_far: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl RunStatusReport {
    pub fn new(status: RemoteRunStatus) -> Self {
        Self {
            status,
            content_so_far: None,
            completed_text: None,
            partial_text: None,
            seq: None,
        }
    }

    pub fn running(content_so_far: impl Into<String>) -> Self {
        Self::new(RemoteRunStatus::Running).with_content_so_far(content_so_far)
    }

    pub fn completed(content_so_far: impl Into<String>) -> Self {
        Self::new(RemoteRunStatus::Completed).with_content_so_far(content_so_far)
    }

    pub fn failed() -> Self {
        Self::new(RemoteRunStatus::Failed)
    }

    pub fn cancelled() -> Self {
        Self::new(RemoteRunStatus::Cancelled)
    }

    pub fn with_content_so_far(mut self, content: impl Into<String>) -> Self {
        self.content_so_far = Some(content.into());
        self
    }

    pub fn with_completed_text(mut self, content: impl Into<String>) -> Self {
        self.completed_text = Some(content.into());
        self
    }

    pub fn with_partial_text(mut self, content: impl Into<String>) -> Self {
        self.partial_text = Some(content.into());
        self
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Resolves the text produced so far.
    ///
    /// `content_so_far` wins when populated, then `completed_text`, then
    /// `partial_text`. Empty strings count as absent.
    pub fn content(&self) -> Option<&str> {
        [
            self.content_so_far.as_deref(),
            self.completed_text.as_deref(),
            self.partial_text.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find(|text| !text.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorEnvelope {
    #[serde(default)]
    pub(crate) code: Option<String>,
    #[serde(default)]
    pub(crate) error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub(crate) code: Option<String>,
}

impl ErrorEnvelope {
    pub(crate) fn is_run_not_found(&self) -> bool {
        let nested = self.error.as_ref().and_then(|body| body.code.as_deref());
        [self.code.as_deref(), nested]
            .into_iter()
            .flatten()
            .any(|code| code == RUN_NOT_FOUND_CODE)
    }
}
