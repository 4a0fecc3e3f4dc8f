use std::collections::HashMap;

use super::ids::{ConversationId, MessageId};
use super::message::{Message, MessagePatch};

/// Keyed message collection plus the per-conversation insertion order.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: HashMap<MessageId, Message>,
    conversations: HashMap<ConversationId, Vec<MessageId>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an unseen message. Returns `false` without touching the stored
    /// copy when the id already exists: the first writer owns identity.
    pub fn add_message(&mut self, message: Message) -> bool {
        if self.messages.contains_key(&message.id) {
            return false;
        }

        self.conversations
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message.id.clone());
        self.messages.insert(message.id.clone(), message);
        true
    }

    /// Merges `patch` into an existing message; unknown ids are a no-op.
    pub fn update_message(&mut self, id: &MessageId, patch: MessagePatch) -> bool {
        match self.messages.get_mut(id) {
            Some(message) => {
                message.apply(patch);
                true
            }
            None => false,
        }
    }

    pub fn get_message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.get(id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.contains_key(id)
    }

    /// Messages of one conversation, oldest first. Equal timestamps keep
    /// insertion order.
    pub fn conversation_messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        let Some(ids) = self.conversations.get(conversation_id) else {
            return Vec::new();
        };

        let mut messages = ids
            .iter()
            .filter_map(|id| self.messages.get(id))
            .cloned()
            .collect::<Vec<_>>();
        messages.sort_by_key(|message| message.created_at_unix_millis);
        messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageStatus, Role};

    fn message(id: &str, conversation: &str, created_at: u64) -> Message {
        Message::new(
            MessageId::new(id),
            ConversationId::new(conversation),
            Role::User,
            format!("body of {id}"),
            created_at,
        )
    }

    #[test]
    fn add_is_idempotent_and_first_writer_wins() {
        let mut store = MessageStore::new();
        assert!(store.add_message(message("m1", "c1", 10)));

        let mut rewrite = message("m1", "c1", 99);
        rewrite.content = "second writer".to_string();
        assert!(!store.add_message(rewrite));

        let stored = store.get_message(&MessageId::new("m1")).unwrap();
        assert_eq!(stored.content, "body of m1");
        assert_eq!(store.len(), 1);
        assert_eq!(store.conversation_messages(&ConversationId::new("c1")).len(), 1);
    }

    #[test]
    fn conversation_reads_sort_by_timestamp_not_insertion() {
        let mut store = MessageStore::new();
        store.add_message(message("late", "c1", 30));
        store.add_message(message("early", "c1", 10));
        store.add_message(message("tie-a", "c1", 20));
        store.add_message(message("tie-b", "c1", 20));
        store.add_message(message("other", "c2", 0));

        let ids = store
            .conversation_messages(&ConversationId::new("c1"))
            .into_iter()
            .map(|message| message.id.into_inner())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["early", "tie-a", "tie-b", "late"]);
    }

    #[test]
    fn unknown_conversation_reads_empty() {
        let store = MessageStore::new();
        assert!(
            store
                .conversation_messages(&ConversationId::new("missing"))
                .is_empty()
        );
    }

    #[test]
    fn update_merges_fields_and_ignores_unknown_ids() {
        let mut store = MessageStore::new();
        store.add_message(message("m1", "c1", 1));

        assert!(store.update_message(
            &MessageId::new("m1"),
            MessagePatch::status(MessageStatus::Streaming).with_used_documents(true),
        ));
        assert!(!store.update_message(&MessageId::new("ghost"), MessagePatch::content("x")));

        let stored = store.get_message(&MessageId::new("m1")).unwrap();
        assert_eq!(stored.content, "body of m1");
        assert_eq!(stored.status, Some(MessageStatus::Streaming));
        assert_eq!(stored.used_documents, Some(true));
        assert!(store.get_message(&MessageId::new("ghost")).is_none());
    }

    #[test]
    fn absent_status_reads_as_completed() {
        let plain = message("m1", "c1", 1);
        assert_eq!(plain.effective_status(), MessageStatus::Completed);
    }
}
