use serde::{Deserialize, Serialize};

/// Announces a tool invocation before its arguments are known.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallStartEvent {
    /// Name of the tool being called.
    pub tool_name: String,

    /// Identifier correlating the start, call and result of one invocation.
    pub tool_call_id: String,
}

impl ToolCallStartEvent {
    /// Create a new `ToolCallStartEvent`.
    pub fn new(tool_name: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
        }
    }
}
