use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle of a tool call.
///
/// Status only moves forward: `pending` to `running` to one of the terminal states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Announced, arguments not yet known.
    Pending,
    /// Arguments known, tool executing.
    Running,
    /// The tool returned a result.
    Completed,
    /// The turn failed before the tool returned.
    Error,
}

impl ToolCallStatus {
    fn rank(self) -> u8 {
        match self {
            ToolCallStatus::Pending => 0,
            ToolCallStatus::Running => 1,
            ToolCallStatus::Completed | ToolCallStatus::Error => 2,
        }
    }

    /// True for `completed` and `error`.
    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// True if moving from `self` to `next` does not regress.
    pub fn can_advance_to(self, next: ToolCallStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolCallStatus::Pending => "pending",
            ToolCallStatus::Running => "running",
            ToolCallStatus::Completed => "completed",
            ToolCallStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// One tool invocation within an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Identifier of the invocation, unique within its turn.
    pub id: String,

    /// Name of the tool.
    pub name: String,

    /// Arguments passed to the tool.
    #[serde(default)]
    pub args: Map<String, Value>,

    /// Current status.
    pub status: ToolCallStatus,

    /// Result text; only present once the call completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl ToolCall {
    /// A freshly announced call with no arguments.
    pub fn pending(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args: Map::new(),
            status: ToolCallStatus::Pending,
            result: None,
        }
    }

    /// A call whose arguments are known.
    pub fn running(id: impl Into<String>, name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
            status: ToolCallStatus::Running,
            result: None,
        }
    }

    /// Move to `next` unless that would regress.  Returns whether the status changed.
    pub fn advance(&mut self, next: ToolCallStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Mark the call completed with `result`.  Ignored if the call already finished.
    pub fn complete(&mut self, result: impl Into<String>) -> bool {
        if self.advance(ToolCallStatus::Completed) {
            self.result = Some(result.into());
            true
        } else {
            false
        }
    }
}
