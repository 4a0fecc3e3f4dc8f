use std::str::SplitWhitespace;

use runsync_engine::{ConversationId, CorrelationId, MessageId, RunId};
use snafu::{OptionExt, Snafu};

pub const DEFAULT_CONVERSATION_ID: &str = "default";

pub const HELP: &str = "\
commands:
  attach <run_id> <message_id> [conversation]   track a run issued by the server
  start <message_id> [conversation]             begin a local-only run
  confirm <correlation_id> <run_id>             move a local run to its server id
  finish <run_id> <text...>                     complete a local run inline
  cancel <run_id>                               abort a run and mark its message
  show [conversation]                           print a conversation's messages
  runs                                          list active runs
  hide | visible                                report host visibility
  restored                                      list run ids left by the last session
  set <key> <value...>                          save a setting for the next start
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Attach {
        run_id: RunId,
        message_id: MessageId,
        conversation_id: ConversationId,
    },
    Start {
        message_id: MessageId,
        conversation_id: ConversationId,
    },
    Confirm {
        correlation_id: CorrelationId,
        run_id: RunId,
    },
    Finish {
        run_id: RunId,
        content: String,
    },
    Cancel {
        run_id: RunId,
    },
    Show {
        conversation_id: ConversationId,
    },
    Runs,
    Hide,
    Visible,
    Restored,
    Set {
        key: String,
        value: String,
    },
    Help,
    Quit,
}

#[derive(Debug, Snafu)]
pub enum CommandError {
    #[snafu(display("unknown command '{raw}', try 'help'"))]
    UnknownCommand { stage: &'static str, raw: String },
    #[snafu(display("'{command}' needs <{argument}>"))]
    MissingArgument {
        stage: &'static str,
        command: &'static str,
        argument: &'static str,
    },
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Parses one console line. Blank lines parse to `None`.
pub fn parse(line: &str) -> CommandResult<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };

    let command = match name {
        "attach" => Command::Attach {
            run_id: required(&mut words, "attach", "run_id")?.into(),
            message_id: required(&mut words, "attach", "message_id")?.into(),
            conversation_id: conversation(&mut words),
        },
        "start" => Command::Start {
            message_id: required(&mut words, "start", "message_id")?.into(),
            conversation_id: conversation(&mut words),
        },
        "confirm" => Command::Confirm {
            correlation_id: required(&mut words, "confirm", "correlation_id")?.into(),
            run_id: required(&mut words, "confirm", "run_id")?.into(),
        },
        "finish" => Command::Finish {
            run_id: required(&mut words, "finish", "run_id")?.into(),
            content: words.collect::<Vec<_>>().join(" "),
        },
        "cancel" => Command::Cancel {
            run_id: required(&mut words, "cancel", "run_id")?.into(),
        },
        "show" => Command::Show {
            conversation_id: conversation(&mut words),
        },
        "runs" => Command::Runs,
        "hide" => Command::Hide,
        "visible" => Command::Visible,
        "restored" => Command::Restored,
        "set" => Command::Set {
            key: required(&mut words, "set", "key")?.to_string(),
            value: words.collect::<Vec<_>>().join(" "),
        },
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => {
            return UnknownCommandSnafu {
                stage: "parse-command",
                raw: name,
            }
            .fail();
        }
    };

    Ok(Some(command))
}

fn required<'a>(
    words: &mut SplitWhitespace<'a>,
    command: &'static str,
    argument: &'static str,
) -> CommandResult<&'a str> {
    words.next().context(MissingArgumentSnafu {
        stage: "parse-command-argument",
        command,
        argument,
    })
}

fn conversation(words: &mut SplitWhitespace<'_>) -> ConversationId {
    ConversationId::new(words.next().unwrap_or(DEFAULT_CONVERSATION_ID))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_commands() {
        assert_eq!(
            parse("attach srv-1 m1 chat-7").unwrap(),
            Some(Command::Attach {
                run_id: RunId::new("srv-1"),
                message_id: MessageId::new("m1"),
                conversation_id: ConversationId::new("chat-7"),
            })
        );
        assert_eq!(
            parse("  start m2 ").unwrap(),
            Some(Command::Start {
                message_id: MessageId::new("m2"),
                conversation_id: ConversationId::new(DEFAULT_CONVERSATION_ID),
            })
        );
        assert_eq!(
            parse("confirm corr-1 srv-2").unwrap(),
            Some(Command::Confirm {
                correlation_id: CorrelationId::new("corr-1"),
                run_id: RunId::new("srv-2"),
            })
        );
    }

    #[test]
    fn finish_keeps_the_remaining_words_as_content() {
        assert_eq!(
            parse("finish local-1 the  final answer").unwrap(),
            Some(Command::Finish {
                run_id: RunId::new("local-1"),
                content: "the final answer".to_string(),
            })
        );
        assert_eq!(
            parse("finish local-1").unwrap(),
            Some(Command::Finish {
                run_id: RunId::new("local-1"),
                content: String::new(),
            })
        );
    }

    #[test]
    fn set_takes_a_key_and_the_rest_as_value() {
        assert_eq!(
            parse("set endpoint https://runs.test").unwrap(),
            Some(Command::Set {
                key: "endpoint".to_string(),
                value: "https://runs.test".to_string(),
            })
        );
        assert!(matches!(
            parse("set"),
            Err(CommandError::MissingArgument {
                command: "set",
                argument: "key",
                ..
            })
        ));
    }

    #[test]
    fn blank_lines_and_bare_commands() {
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(parse("runs").unwrap(), Some(Command::Runs));
        assert_eq!(parse("exit").unwrap(), Some(Command::Quit));
        assert_eq!(parse("hide").unwrap(), Some(Command::Hide));
    }

    #[test]
    fn rejects_unknown_and_incomplete_commands() {
        assert!(matches!(
            parse("launch m1"),
            Err(CommandError::UnknownCommand { ref raw, .. }) if raw == "launch"
        ));
        assert!(matches!(
            parse("confirm corr-1"),
            Err(CommandError::MissingArgument {
                command: "confirm",
                argument: "run_id",
                ..
            })
        ));
    }
}
