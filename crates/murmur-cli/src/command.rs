//! Line-oriented input.
//!
//! Every stdin line is either a slash command or a message to send.

use murmur_app::RuntimeHandle;
use murmur_proto::ConversationId;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Something the user typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send the line as a text message.
    Send(String),
    /// Load the next older page.
    More,
    /// Follow another conversation.
    Switch(ConversationId),
    /// Connect again after the client gave up.
    Reconnect,
    /// Exit.
    Quit,
}

/// Input that is not a valid command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// Unrecognized slash command.
    #[error("unknown command: /{0}")]
    Unknown(String),

    /// `/switch` without a numeric conversation id.
    #[error("usage: /switch <conversation-id>")]
    SwitchUsage,
}

/// Parse one input line. Blank lines yield `None`.
///
/// A leading `//` escapes the slash so the rest is sent as text.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    if let Some(escaped) = line.strip_prefix("//") {
        return Ok(Some(Command::Send(format!("/{escaped}"))));
    }

    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let mut words = command.split_whitespace();
    match words.next().unwrap_or_default() {
        "more" => Ok(Some(Command::More)),
        "quit" | "exit" => Ok(Some(Command::Quit)),
        "reconnect" => Ok(Some(Command::Reconnect)),
        "switch" => words
            .next()
            .and_then(|id| id.parse().ok())
            .map(|id| Some(Command::Switch(ConversationId(id))))
            .ok_or(CommandError::SwitchUsage),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

/// Forward stdin to the runtime until EOF or `/quit`, then shut it down.
pub async fn read_stdin(handle: RuntimeHandle, mut conversation: ConversationId, token: String) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            },
        };

        let queued = match parse(&line) {
            Ok(None) => Ok(()),
            Ok(Some(Command::Send(text))) => handle.send_text(conversation, text),
            Ok(Some(Command::More)) => handle.load_next_page(conversation),
            Ok(Some(Command::Switch(next))) => {
                conversation = next;
                handle.set_active_conversation(next)
            },
            Ok(Some(Command::Reconnect)) => handle.connect(token.clone()),
            Ok(Some(Command::Quit)) => break,
            Err(e) => {
                tracing::warn!("{e}");
                Ok(())
            },
        };

        if queued.is_err() {
            return;
        }
    }

    if handle.shutdown().is_err() {
        tracing::debug!("runtime already stopped");
    }
}
