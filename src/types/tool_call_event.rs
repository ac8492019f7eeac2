use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool invocation with its full argument map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallEvent {
    /// Name of the tool being called.
    pub tool_name: String,

    /// Arguments passed to the tool.
    #[serde(default)]
    pub tool_args: Map<String, Value>,

    /// Identifier correlating the start, call and result of one invocation.
    pub tool_call_id: String,
}

impl ToolCallEvent {
    /// Create a new `ToolCallEvent`.
    pub fn new(
        tool_name: impl Into<String>,
        tool_args: Map<String, Value>,
        tool_call_id: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_args,
            tool_call_id: tool_call_id.into(),
        }
    }
}
