//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to control the chat session without sending messages
//! to the agent.

/// A parsed chat command.
///
/// These commands control the chat session and are not sent to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Clear the conversation and start a new thread.
    Clear,

    /// Resend the last message after a failure.
    Retry,

    /// Show the current thread id.
    Thread,

    /// Save the transcript to a file.
    SaveTranscript(String),

    /// Load conversation history from a file.
    LoadTranscript(String),

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command,
/// or `None` if it should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use compass_chat::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/save transcript.json").is_some());
/// assert!(parse_command("Is Astoria a good place to live?").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "clear" | "new" => ChatCommand::Clear,
        "retry" | "r" => ChatCommand::Retry,
        "thread" => ChatCommand::Thread,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "save" => match argument {
            Some(arg) => ChatCommand::SaveTranscript(arg.to_string()),
            None => ChatCommand::Invalid("/save requires a file path".to_string()),
        },
        "load" => match argument {
            Some(arg) => ChatCommand::LoadTranscript(arg.to_string()),
            None => ChatCommand::Invalid("/load requires a file path".to_string()),
        },
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /clear                 Clear the conversation and start a new thread
  /retry                 Resend the last message after an error
  /thread                Show the current thread id
  /save <file>           Save the current transcript
  /load <file>           Load a transcript from disk
  /help                  Show this help message
  /quit                  Exit the chat

Try asking:
  What's the quality score for ZIP 10001?
  Compare Brooklyn 11211 vs Manhattan 10013
  Find neighborhoods with low poverty rates
  Show demographics for Williamsburg"#
}
