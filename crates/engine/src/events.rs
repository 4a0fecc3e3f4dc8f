use tokio::sync::broadcast;

use super::ids::{ConversationId, RunId};

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Lifecycle notification for presentation code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// A run left the registry; emitted once per removed entry.
    RunRemoved {
        run_id: RunId,
        conversation_id: ConversationId,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::RunRemoved { run_id, .. } => run_id,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::RunRemoved {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Publish/subscribe hub scoped to one engine. Dropping a receiver unsubscribes it.
#[derive(Debug, Clone)]
pub struct RunEvents {
    sender: broadcast::Sender<RunEvent>,
}

impl RunEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

impl Default for RunEvents {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
