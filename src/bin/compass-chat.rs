//! Interactive chat application for the neighborhood advisor agent.
//!
//! This binary provides a streaming REPL interface that talks to the agent's
//! chat endpoint, showing tool activity as it happens.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a local agent
//! compass-chat
//!
//! # Point at another deployment and keep the thread between runs
//! compass-chat --endpoint https://compass.example.com/api/agent/chat/stream \
//!     --state-file ~/.compass-chat.json
//!
//! # Disable colors (useful for piping output)
//! compass-chat --no-color
//! ```
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/clear` - Clear the conversation and start a new thread
//! - `/retry` - Resend the last message after an error
//! - `/thread` - Show the current thread id
//! - `/save <file>` / `/load <file>` - Save or restore a transcript
//! - `/quit` - Exit the application

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use compass_chat::chat::{
    ChatArgs, ChatCommand, ChatConfig, ChatSession, PlainTextRenderer, Renderer, help_text,
    parse_command,
};
use compass_chat::{
    FileStore, KeyValueStore, MemoryStore, NoopLogger, SessionLogger, StderrLogger, ToolCallStatus,
    Transport,
};

/// How often the interrupt flag is checked while a response streams.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

/// Main entry point for the compass-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (mut args, _) = ChatArgs::from_command_line_relaxed("compass-chat [OPTIONS]");
    let token = args.token.take();
    let config = ChatConfig::from(args);
    let use_color = config.use_color;

    let store: Arc<dyn KeyValueStore> = match &config.state_file {
        Some(path) => {
            let store = FileStore::new(path.to_string_lossy());
            println!("Keeping thread state in {}", store.path().as_str());
            Arc::new(store)
        }
        None => Arc::new(MemoryStore::new()),
    };
    if let Some(token) = token {
        store.set(&config.token_key, &token)?;
    }
    let logger: Arc<dyn SessionLogger> = if config.verbose {
        Arc::new(StderrLogger::verbose())
    } else if config.state_file.is_some() {
        Arc::new(StderrLogger::new())
    } else {
        Arc::new(NoopLogger)
    };

    let mut session = ChatSession::new(config, store, logger)?;
    let mut renderer = PlainTextRenderer::with_color(use_color);
    let mut rl = DefaultEditor::new()?;

    // Flag for interrupt handling during streaming
    let interrupted = Arc::new(AtomicBool::new(false));

    // Set up Ctrl+C handler
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    println!("NYC Neighborhood Advisor");
    if let Some(endpoint) = &session.config().endpoint {
        println!("Talking to {endpoint}");
    }
    if let Some(thread_id) = session.thread_id() {
        println!("Continuing thread {thread_id}");
    }
    println!("Type /help for commands, /quit to exit\n");

    loop {
        // Reset interrupt flag before each input
        interrupted.store(false, Ordering::Relaxed);

        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                // Check for slash commands
                if let Some(cmd) = parse_command(line) {
                    match cmd {
                        ChatCommand::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        ChatCommand::Clear => {
                            session.clear_messages();
                            renderer.print_info("Conversation cleared.");
                        }
                        ChatCommand::Retry => {
                            if session.retry_last_message() {
                                println!("Advisor:");
                                stream_response(&mut session, &mut renderer, &interrupted).await;
                            } else {
                                renderer.print_info("Nothing to retry.");
                            }
                        }
                        ChatCommand::Thread => match session.thread_id() {
                            Some(thread_id) => renderer.print_info(&format!("Thread: {thread_id}")),
                            None => renderer.print_info("No thread yet."),
                        },
                        ChatCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {}", line);
                            }
                        }
                        ChatCommand::SaveTranscript(path) => {
                            match session.save_transcript_to(&path) {
                                Ok(_) => {
                                    renderer.print_info(&format!("Transcript saved to {}", path))
                                }
                                Err(err) => renderer
                                    .print_error(&format!("Failed to save transcript: {}", err)),
                            }
                        }
                        ChatCommand::LoadTranscript(path) => {
                            match session.load_transcript_from(&path) {
                                Ok(_) => renderer.print_info(&format!(
                                    "Transcript loaded from {} ({} messages)",
                                    path,
                                    session.messages().len()
                                )),
                                Err(err) => renderer
                                    .print_error(&format!("Failed to load transcript: {}", err)),
                            }
                        }
                        ChatCommand::Invalid(message) => {
                            renderer.print_error(&message);
                        }
                    }
                    continue;
                }

                // Regular message - send to the agent
                if session.send_message(line) {
                    println!("Advisor:");
                    stream_response(&mut session, &mut renderer, &interrupted).await;
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    Ok(())
}

/// Render updates until the response ends or the user presses Ctrl+C.
async fn stream_response<T: Transport + 'static>(
    session: &mut ChatSession<T>,
    renderer: &mut dyn Renderer,
    interrupted: &AtomicBool,
) {
    let mut ticker = tokio::time::interval(INTERRUPT_POLL);
    loop {
        tokio::select! {
            update = session.next_update() => match update {
                Some(update) => renderer.render_update(&update),
                None => break,
            },
            _ = ticker.tick() => {
                if interrupted.swap(false, Ordering::Relaxed) {
                    session.stop_streaming();
                    renderer.print_interrupted();
                    break;
                }
            }
        }
    }
    if let Some(message) = session.messages().last() {
        for call in message
            .tool_calls
            .iter()
            .filter(|call| call.status == ToolCallStatus::Error)
        {
            renderer.finish_tool_call(call);
        }
    }
    println!();
}
