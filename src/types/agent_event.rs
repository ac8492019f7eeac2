use serde::{Deserialize, Serialize};

use crate::types::{
    CustomEvent, DoneEvent, ErrorEvent, TokenEvent, ToolCallEvent, ToolCallStartEvent,
    ToolResultEvent,
};

/// An event in an agent chat stream.
///
/// Each `data:` frame of the stream carries one JSON object whose `event` field selects the
/// variant.  A turn is a run of token and tool events terminated by `done` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum AgentEvent {
    /// A fragment of assistant text.
    #[serde(rename = "token")]
    Token(TokenEvent),

    /// The agent is about to call a tool; arguments follow in `tool_call`.
    #[serde(rename = "tool_call_start")]
    ToolCallStart(ToolCallStartEvent),

    /// The agent is calling a tool with the given arguments.
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallEvent),

    /// A tool finished and returned text.
    #[serde(rename = "tool_result")]
    ToolResult(ToolResultEvent),

    /// Informational progress from inside a tool.
    #[serde(rename = "custom")]
    Custom(CustomEvent),

    /// The turn completed.
    #[serde(rename = "done")]
    Done(DoneEvent),

    /// The agent failed the turn.
    #[serde(rename = "error")]
    Error(ErrorEvent),

    /// An event name this client does not know.  Ignored.
    #[serde(other)]
    Unknown,
}

impl AgentEvent {
    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::Token(_) => "token",
            AgentEvent::ToolCallStart(_) => "tool_call_start",
            AgentEvent::ToolCall(_) => "tool_call",
            AgentEvent::ToolResult(_) => "tool_result",
            AgentEvent::Custom(_) => "custom",
            AgentEvent::Done(_) => "done",
            AgentEvent::Error(_) => "error",
            AgentEvent::Unknown => "unknown",
        }
    }

    /// True for the events that end a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Done(_) | AgentEvent::Error(_))
    }
}
