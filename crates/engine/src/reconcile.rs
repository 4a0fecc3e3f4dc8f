use runsync_client::{RemoteRunStatus, RunStatusReport, RunStatusResult};

use super::ids::RunId;
use super::message::{Message, MessagePatch, MessageStatus, text_len};
use super::run::{Run, RunPatch};
use super::state::SyncState;

/// What one poll result did to local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The run left the registry before the result arrived.
    UnknownRun,
    /// Still running; `content_grew` reports whether stored text was replaced.
    Streaming { content_grew: bool },
    /// Final text written, run removed.
    Completed,
    /// Failed, cancelled or gone server-side; run removed.
    Removed,
    /// Sequence number older than one already applied.
    StaleSequence,
    /// Transient failure; run kept for the next tick.
    Retained,
}

/// Merges one polled status for `run_id` into the message store and registry.
///
/// Idempotent and order-tolerant: replaying a result, or applying an older
/// one after a newer one, never shortens a streaming message.
pub fn reconcile(
    state: &mut SyncState,
    run_id: &RunId,
    result: RunStatusResult<RunStatusReport>,
) -> ReconcileOutcome {
    let Some(run) = state.runs.get_run(run_id).cloned() else {
        tracing::debug!(run_id = %run_id, "dropping poll result for a run no longer tracked");
        return ReconcileOutcome::UnknownRun;
    };

    let report = match result {
        Ok(report) => report,
        Err(error) if error.is_run_not_found() => {
            tracing::debug!(run_id = %run_id, "run service no longer knows the run; removing");
            state.runs.remove_run(run_id);
            return ReconcileOutcome::Removed;
        }
        Err(error) => {
            tracing::warn!(run_id = %run_id, error = %error, "run status poll failed; retrying next tick");
            return ReconcileOutcome::Retained;
        }
    };

    if let Some(seq) = report.seq {
        if seq < run.last_seq {
            tracing::debug!(run_id = %run_id, seq, last_seq = run.last_seq, "ignoring out-of-order status");
            return ReconcileOutcome::StaleSequence;
        }
        if seq > run.last_seq {
            state.runs.update_run(run_id, RunPatch::last_seq(seq));
        }
    }

    match report.status {
        RemoteRunStatus::Running => apply_running(state, &run, report.content()),
        RemoteRunStatus::Completed => {
            apply_completed(state, &run, report.content());
            state.runs.remove_run(run_id);
            ReconcileOutcome::Completed
        }
        RemoteRunStatus::Failed | RemoteRunStatus::Cancelled => {
            // Never fabricate text for a run that produced nothing.
            state.messages.update_message(
                &run.message_id,
                MessagePatch::status(MessageStatus::Cancelled),
            );
            state.runs.remove_run(run_id);
            ReconcileOutcome::Removed
        }
    }
}

fn apply_running(state: &mut SyncState, run: &Run, content: Option<&str>) -> ReconcileOutcome {
    let Some(existing) = state.messages.get_message(&run.message_id) else {
        let message = assistant_message(run, content.unwrap_or_default(), MessageStatus::Streaming);
        state.messages.add_message(message);
        return ReconcileOutcome::Streaming {
            content_grew: content.is_some(),
        };
    };

    // Length guard: a stale response must not overwrite newer text.
    let content_grew = content.is_some_and(|text| text_len(text) > existing.content_len());
    let mut patch = MessagePatch::status(MessageStatus::Streaming);
    if content_grew && let Some(text) = content {
        patch = patch.with_content(text);
    }
    state.messages.update_message(&run.message_id, patch);

    ReconcileOutcome::Streaming { content_grew }
}

fn apply_completed(state: &mut SyncState, run: &Run, content: Option<&str>) {
    if !state.messages.contains(&run.message_id) {
        state.messages.add_message(assistant_message(
            run,
            content.unwrap_or_default(),
            MessageStatus::Completed,
        ));
        return;
    }

    let mut patch = MessagePatch::status(MessageStatus::Completed);
    if let Some(text) = content {
        patch = patch.with_content(text);
    }
    state.messages.update_message(&run.message_id, patch);
}

pub(crate) fn assistant_message(run: &Run, content: &str, status: MessageStatus) -> Message {
    let message = Message::assistant(
        run.message_id.clone(),
        run.conversation_id.clone(),
        content,
        status,
        run.started_at_unix_millis,
    );
    match &run.module {
        Some(module) => message.with_module(module.clone()),
        None => message,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use runsync_client::RunStatusError;
    use runsync_storage::MemoryStore;
    use tokio::sync::broadcast;

    use super::*;
    use crate::events::{RunEvent, RunEvents};
    use crate::ids::{ConversationId, CorrelationId, MessageId};
    use crate::persistence::ActiveRunPersistence;
    use crate::registry::RunRegistry;

    fn state_with_run() -> (SyncState, broadcast::Receiver<RunEvent>) {
        let events = RunEvents::new(16);
        let receiver = events.subscribe();
        let persistence = ActiveRunPersistence::new(Arc::new(MemoryStore::new()), "k");
        let mut state = SyncState::new(RunRegistry::new(persistence, events));
        state.runs.add_run(
            Run::new(
                RunId::new("r1"),
                CorrelationId::new("corr-1"),
                ConversationId::new("c1"),
                MessageId::new("m1"),
            )
            .with_started_at(1_000),
        );
        (state, receiver)
    }

    fn r1() -> RunId {
        RunId::new("r1")
    }

    fn m1(state: &SyncState) -> Option<&Message> {
        state.messages.get_message(&MessageId::new("m1"))
    }

    fn not_found() -> RunStatusError {
        RunStatusError::RunNotFound {
            stage: "test",
            run_id: "r1".to_string(),
        }
    }

    fn transient() -> RunStatusError {
        RunStatusError::Timeout {
            stage: "test",
            run_id: "r1".to_string(),
            timeout_ms: 5,
        }
    }

    #[test]
    fn streams_then_completes_and_notifies_once() {
        let (mut state, mut events) = state_with_run();

        let outcome = reconcile(&mut state, &r1(), Ok(RunStatusReport::running("Hel")));
        assert_eq!(outcome, ReconcileOutcome::Streaming { content_grew: true });
        let outcome = reconcile(&mut state, &r1(), Ok(RunStatusReport::running("Hello")));
        assert_eq!(outcome, ReconcileOutcome::Streaming { content_grew: true });

        let message = m1(&state).unwrap();
        assert_eq!(message.content, "Hello");
        assert_eq!(message.status, Some(MessageStatus::Streaming));
        assert_eq!(message.created_at_unix_millis, 1_000);
        assert!(state.runs.get_run(&r1()).is_some());

        let outcome = reconcile(
            &mut state,
            &r1(),
            Ok(RunStatusReport::completed("Hello world")),
        );
        assert_eq!(outcome, ReconcileOutcome::Completed);

        let message = m1(&state).unwrap();
        assert_eq!(message.content, "Hello world");
        assert_eq!(message.status, Some(MessageStatus::Completed));
        assert!(state.runs.get_run(&r1()).is_none());
        assert_eq!(
            events.try_recv().unwrap(),
            RunEvent::RunRemoved {
                run_id: r1(),
                conversation_id: ConversationId::new("c1"),
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn shorter_running_content_is_rejected() {
        let (mut state, _events) = state_with_run();
        reconcile(&mut state, &r1(), Ok(RunStatusReport::running("Hello")));

        let outcome = reconcile(&mut state, &r1(), Ok(RunStatusReport::running("He")));
        assert_eq!(outcome, ReconcileOutcome::Streaming { content_grew: false });
        assert_eq!(m1(&state).unwrap().content, "Hello");

        // Equal length is not growth either.
        reconcile(&mut state, &r1(), Ok(RunStatusReport::running("HELLO")));
        assert_eq!(m1(&state).unwrap().content, "Hello");
    }

    #[test]
    fn replaying_a_result_is_idempotent() {
        let (mut state, _events) = state_with_run();
        let report = RunStatusReport::running("partial");

        reconcile(&mut state, &r1(), Ok(report.clone()));
        let once = m1(&state).cloned();
        reconcile(&mut state, &r1(), Ok(report));

        assert_eq!(m1(&state).cloned(), once);
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn run_not_found_removes_without_touching_messages() {
        let (mut state, mut events) = state_with_run();

        let outcome = reconcile(&mut state, &r1(), Err(not_found()));
        assert_eq!(outcome, ReconcileOutcome::Removed);
        assert!(state.runs.is_empty());
        assert!(state.messages.is_empty());
        assert_eq!(events.try_recv().unwrap().run_id(), &r1());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn transient_errors_keep_the_run() {
        let (mut state, mut events) = state_with_run();

        let outcome = reconcile(&mut state, &r1(), Err(transient()));
        assert_eq!(outcome, ReconcileOutcome::Retained);
        assert!(state.runs.get_run(&r1()).unwrap().is_running());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn failure_cancels_existing_message_only() {
        let (mut state, _events) = state_with_run();
        let outcome = reconcile(&mut state, &r1(), Ok(RunStatusReport::failed()));
        assert_eq!(outcome, ReconcileOutcome::Removed);
        assert!(m1(&state).is_none());

        let (mut state, _events) = state_with_run();
        reconcile(&mut state, &r1(), Ok(RunStatusReport::running("Hi")));
        reconcile(&mut state, &r1(), Ok(RunStatusReport::cancelled()));

        let message = m1(&state).unwrap();
        assert_eq!(message.content, "Hi");
        assert_eq!(message.status, Some(MessageStatus::Cancelled));
        assert!(state.runs.is_empty());
    }

    #[test]
    fn completion_creates_missing_message() {
        let (mut state, _events) = state_with_run();

        reconcile(
            &mut state,
            &r1(),
            Ok(RunStatusReport::new(RemoteRunStatus::Completed).with_completed_text("Done.")),
        );

        let message = m1(&state).unwrap();
        assert_eq!(message.content, "Done.");
        assert_eq!(message.status, Some(MessageStatus::Completed));
        assert_eq!(
            state
                .messages
                .conversation_messages(&ConversationId::new("c1"))
                .len(),
            1
        );
    }

    #[test]
    fn completion_without_text_keeps_streamed_content() {
        let (mut state, _events) = state_with_run();
        reconcile(&mut state, &r1(), Ok(RunStatusReport::running("kept")));
        reconcile(
            &mut state,
            &r1(),
            Ok(RunStatusReport::new(RemoteRunStatus::Completed)),
        );

        let message = m1(&state).unwrap();
        assert_eq!(message.content, "kept");
        assert_eq!(message.status, Some(MessageStatus::Completed));
    }

    #[test]
    fn older_sequence_numbers_are_ignored() {
        let (mut state, _events) = state_with_run();
        reconcile(
            &mut state,
            &r1(),
            Ok(RunStatusReport::running("abc").with_seq(5)),
        );
        assert_eq!(state.runs.get_run(&r1()).unwrap().last_seq, 5);

        let outcome = reconcile(
            &mut state,
            &r1(),
            Ok(RunStatusReport::completed("abc and more").with_seq(4)),
        );
        assert_eq!(outcome, ReconcileOutcome::StaleSequence);
        assert!(state.runs.get_run(&r1()).is_some());
        assert_eq!(m1(&state).unwrap().content, "abc");
    }

    #[test]
    fn results_for_departed_runs_are_dropped() {
        let (mut state, _events) = state_with_run();
        state.runs.remove_run(&r1());

        let outcome = reconcile(&mut state, &r1(), Ok(RunStatusReport::running("late")));
        assert_eq!(outcome, ReconcileOutcome::UnknownRun);
        assert!(state.messages.is_empty());
    }
}
