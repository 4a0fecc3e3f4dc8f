use std::sync::Arc;

use tokio::sync::Mutex;

use super::message_store::MessageStore;
use super::registry::RunRegistry;

/// Everything the engine mutates. One lock guards both stores so a reconcile
/// step observes and updates them together.
#[derive(Debug)]
pub struct SyncState {
    pub messages: MessageStore,
    pub runs: RunRegistry,
}

impl SyncState {
    pub fn new(runs: RunRegistry) -> Self {
        Self {
            messages: MessageStore::new(),
            runs,
        }
    }
}

pub type SharedState = Arc<Mutex<SyncState>>;
