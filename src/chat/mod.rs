//! Chat application module for conversations with the neighborhood advisor agent.
//!
//! This module provides the streaming chat session and the pieces of the
//! terminal front end built on top of it. It supports:
//!
//! - Streaming responses with real-time token display
//! - Tool-call cards while the agent looks up data
//! - Slash commands for session control
//! - Thread continuity across restarts through a key-value store
//!
//! # Architecture
//!
//! The module is organized into several components:
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: Conversation state and the streaming turn engine
//! - [`commands`]: Slash command parsing

mod commands;
mod config;
mod session;

pub use crate::render::{PlainTextRenderer, Renderer, ToolCard, describe_tool_call};
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
pub use session::{ChatSession, ErrorHook};
