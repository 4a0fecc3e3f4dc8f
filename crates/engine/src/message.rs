use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::ids::{ConversationId, MessageId};

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Lifecycle status of a generated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Streaming,
    Completed,
    Cancelled,
}

/// A retrieved document the response cites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: Role,
    pub content: String,
    pub created_at_unix_millis: u64,
    /// `None` for messages that were never generated; reads as completed.
    #[serde(default)]
    pub status: Option<MessageStatus>,
    #[serde(default)]
    pub sources: Option<Vec<SourceCitation>>,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default)]
    pub used_documents: Option<bool>,
    #[serde(default)]
    pub module: Option<String>,
}

impl Message {
    pub fn new(
        id: MessageId,
        conversation_id: ConversationId,
        role: Role,
        content: impl Into<String>,
        created_at_unix_millis: u64,
    ) -> Self {
        Self {
            id,
            conversation_id,
            role,
            content: content.into(),
            created_at_unix_millis,
            status: None,
            sources: None,
            attachments: None,
            used_documents: None,
            module: None,
        }
    }

    pub fn user(
        id: MessageId,
        conversation_id: ConversationId,
        content: impl Into<String>,
    ) -> Self {
        Self::new(id, conversation_id, Role::User, content, now_unix_millis())
    }

    /// Assistant message owned by a run.
    pub fn assistant(
        id: MessageId,
        conversation_id: ConversationId,
        content: impl Into<String>,
        status: MessageStatus,
        created_at_unix_millis: u64,
    ) -> Self {
        Self::new(
            id,
            conversation_id,
            Role::Assistant,
            content,
            created_at_unix_millis,
        )
        .with_status(status)
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn effective_status(&self) -> MessageStatus {
        self.status.unwrap_or(MessageStatus::Completed)
    }

    pub fn content_len(&self) -> usize {
        text_len(&self.content)
    }

    /// Shallow merge: every populated patch field replaces the stored one.
    pub fn apply(&mut self, patch: MessagePatch) {
        let MessagePatch {
            content,
            status,
            sources,
            attachments,
            used_documents,
            module,
        } = patch;

        if let Some(content) = content {
            self.content = content;
        }
        if let Some(status) = status {
            self.status = Some(status);
        }
        if let Some(sources) = sources {
            self.sources = Some(sources);
        }
        if let Some(attachments) = attachments {
            self.attachments = Some(attachments);
        }
        if let Some(used_documents) = used_documents {
            self.used_documents = Some(used_documents);
        }
        if let Some(module) = module {
            self.module = Some(module);
        }
    }
}

/// Partial message update. Identity fields (`id`, `conversation_id`, `role`,
/// creation time) are not patchable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub status: Option<MessageStatus>,
    pub sources: Option<Vec<SourceCitation>>,
    pub attachments: Option<Vec<Attachment>>,
    pub used_documents: Option<bool>,
    pub module: Option<String>,
}

impl MessagePatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn status(status: MessageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_sources(mut self, sources: Vec<SourceCitation>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn with_used_documents(mut self, used_documents: bool) -> Self {
        self.used_documents = Some(used_documents);
        self
    }
}

/// Text length in Unicode scalar values.
pub fn text_len(text: &str) -> usize {
    text.chars().count()
}

pub(crate) fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_u64, |duration| duration.as_millis() as u64)
}
