//! Client-side synchronization of long-running server generation runs.
//!
//! The engine keeps a message store and a registry of in-flight runs, polls the
//! run service for each active run on a fixed interval, and merges what it
//! learns back into local messages.

mod config;
mod engine;
mod events;
mod ids;
mod message;
mod message_store;
mod persistence;
mod reconcile;
mod registry;
mod run;
mod scheduler;
mod state;

pub use config::{
    DEFAULT_LOCAL_RUN_PREFIX, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT, MIN_POLL_INTERVAL,
    SyncConfig,
};
pub use engine::SyncEngine;
pub use events::{DEFAULT_EVENT_CAPACITY, RunEvent, RunEvents};
pub use ids::{ConversationId, CorrelationId, MessageId, RunId};
pub use message::{
    Attachment, Message, MessagePatch, MessageStatus, Role, SourceCitation, text_len,
};
pub use message_store::MessageStore;
pub use persistence::{
    ActiveRunPersistence, DEFAULT_ACTIVE_RUNS_KEY, PersistenceError, PersistenceResult,
};
pub use reconcile::{ReconcileOutcome, reconcile};
pub use registry::RunRegistry;
pub use run::{Run, RunPatch, RunStatus};
pub use scheduler::{PollScheduler, Visibility};
pub use state::{SharedState, SyncState};
pub use tokio_util::sync::CancellationToken;
