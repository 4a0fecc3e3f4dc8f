use std::sync::Arc;

use runsync_client::{HttpRunStatusClient, RunStatusError};
use runsync_engine::{
    CorrelationId, MessageStatus, Run, RunEvent, RunId, SyncEngine, Visibility,
};
use runsync_storage::{SqliteStore, StorageError};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

mod command;
mod settings;

use command::{Command, HELP};
use settings::SettingsStore;

#[derive(Debug, Snafu)]
enum AppError {
    #[snafu(display("failed to open client state on `{stage}`: {source}"))]
    OpenStorage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("failed to build run status client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: RunStatusError,
    },
}

type AppResult<T> = Result<T, AppError>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(error) = run().await {
        tracing::error!(error = %error, "runsync failed to start");
        eprintln!("runsync: {error}");
        std::process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    let mut settings_store = SettingsStore::load();
    let settings = settings_store.settings().clone();
    tracing::info!(
        endpoint = %settings.endpoint,
        database_path = %settings.database_path,
        config_path = %settings_store.config_path().display(),
        "starting runsync"
    );

    let store = SqliteStore::open(&settings.database_path)
        .await
        .context(OpenStorageSnafu {
            stage: "open-client-state",
        })?;
    let client = HttpRunStatusClient::new(settings.to_client_config()).context(BuildClientSnafu {
        stage: "build-run-status-client",
    })?;

    let mut engine = SyncEngine::mount(
        settings.to_sync_config(),
        Arc::new(client),
        Arc::new(store),
    );
    if !engine.restored_run_ids().is_empty() {
        println!(
            "{} run(s) were active last session; use 'restored' to list them",
            engine.restored_run_ids().len()
        );
    }
    let printer = tokio::spawn(print_events(engine.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(error) = signal {
                    tracing::warn!(error = %error, "failed to listen for ctrl-c");
                }
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(error) => {
                        tracing::warn!(error = %error, "failed to read stdin");
                        break;
                    }
                };
                match command::parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => execute(&mut engine, &mut settings_store, command).await,
                    Ok(None) => {}
                    Err(error) => println!("{error}"),
                }
            }
        }
    }

    engine.unmount().await;
    printer.abort();
    Ok(())
}

async fn execute(
    engine: &mut SyncEngine,
    settings_store: &mut SettingsStore,
    command: Command,
) {
    match command {
        Command::Attach {
            run_id,
            message_id,
            conversation_id,
        } => {
            let run = Run::new(
                run_id.clone(),
                CorrelationId::generate(),
                conversation_id,
                message_id,
            );
            engine.start_run(run).await;
            println!("tracking run {run_id}");
        }
        Command::Start {
            message_id,
            conversation_id,
        } => {
            let run = Run::new(
                RunId::local(&engine.config().local_run_prefix),
                CorrelationId::generate(),
                conversation_id,
                message_id,
            );
            println!(
                "started local run {} (correlation {})",
                run.id, run.correlation_id
            );
            engine.start_run(run).await;
        }
        Command::Confirm {
            correlation_id,
            run_id,
        } => {
            if engine.confirm_run(&correlation_id, run_id.clone()).await {
                println!("run {correlation_id} is now {run_id}");
            } else {
                println!("no run started under correlation {correlation_id}");
            }
        }
        Command::Finish { run_id, content } => {
            if !engine.complete_local_run(&run_id, content).await {
                println!("unknown run {run_id}");
            }
        }
        Command::Cancel { run_id } => {
            if !engine.cancel_run(&run_id).await {
                println!("unknown run {run_id}");
            }
        }
        Command::Show { conversation_id } => {
            let generating = engine.is_generating(&conversation_id).await;
            println!("conversation {conversation_id} (generating: {generating})");
            for message in engine.conversation_messages(&conversation_id).await {
                println!(
                    "  {} {:?} [{}] {}",
                    message.id,
                    message.role,
                    status_label(message.effective_status()),
                    message.content
                );
            }
        }
        Command::Runs => {
            let runs = engine.active_runs().await;
            if runs.is_empty() {
                println!("no active runs");
            }
            for run in runs {
                println!(
                    "  {} message={} conversation={} seq={}",
                    run.id, run.message_id, run.conversation_id, run.last_seq
                );
            }
        }
        Command::Hide => engine.set_visibility(Visibility::Hidden),
        Command::Visible => engine.set_visibility(Visibility::Visible),
        Command::Restored => {
            if engine.restored_run_ids().is_empty() {
                println!("no runs restored");
            }
            for run_id in engine.restored_run_ids() {
                println!("  {run_id}");
            }
        }
        Command::Set { key, value } => match settings_store.set(&key, &value) {
            Ok(()) => println!(
                "saved {key} to {}; restart to apply",
                settings_store.config_path().display()
            ),
            Err(error) => println!("{error}"),
        },
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

async fn print_events(mut events: broadcast::Receiver<RunEvent>) {
    loop {
        match events.recv().await {
            Ok(RunEvent::RunRemoved {
                run_id,
                conversation_id,
            }) => println!("run {run_id} finished in conversation {conversation_id}"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event printer lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn status_label(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Streaming => "streaming",
        MessageStatus::Completed => "completed",
        MessageStatus::Cancelled => "cancelled",
    }
}
