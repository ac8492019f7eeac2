use serde::{Deserialize, Serialize};

/// The result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultEvent {
    /// Name of the tool that was called.
    pub tool_name: String,

    /// The text returned by the tool.
    pub content: String,

    /// Identifier of the invocation this result completes.
    pub tool_call_id: String,
}

impl ToolResultEvent {
    /// Create a new `ToolResultEvent`.
    pub fn new(
        tool_name: impl Into<String>,
        content: impl Into<String>,
        tool_call_id: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }
}
