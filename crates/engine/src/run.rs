use tokio_util::sync::CancellationToken;

use super::ids::{ConversationId, CorrelationId, MessageId, RunId};
use super::message::now_unix_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// One in-flight generation run and the assistant message it produces.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: RunId,
    pub correlation_id: CorrelationId,
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub status: RunStatus,
    pub started_at_unix_millis: u64,
    pub last_seq: u64,
    /// Aborts the generation request that created the run. Session-bound, never persisted.
    pub cancel: CancellationToken,
    pub module: Option<String>,
}

impl Run {
    pub fn new(
        id: RunId,
        correlation_id: CorrelationId,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Self {
        Self {
            id,
            correlation_id,
            conversation_id,
            message_id,
            status: RunStatus::Running,
            started_at_unix_millis: now_unix_millis(),
            last_seq: 0,
            cancel: CancellationToken::new(),
            module: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_started_at(mut self, started_at_unix_millis: u64) -> Self {
        self.started_at_unix_millis = started_at_unix_millis;
        self
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    fn apply(&mut self, patch: RunPatch) {
        let RunPatch {
            id,
            status,
            last_seq,
        } = patch;

        if let Some(id) = id {
            self.id = id;
        }
        if let Some(status) = status {
            self.status = status;
        }
        if let Some(last_seq) = last_seq {
            self.last_seq = last_seq;
        }
    }

    pub(crate) fn merged(mut self, patch: RunPatch) -> Self {
        self.apply(patch);
        self
    }
}

/// Partial run update. A populated `id` renames the registry key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunPatch {
    pub id: Option<RunId>,
    pub status: Option<RunStatus>,
    pub last_seq: Option<u64>,
}

impl RunPatch {
    pub fn rename(id: RunId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn last_seq(last_seq: u64) -> Self {
        Self {
            last_seq: Some(last_seq),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }
}
