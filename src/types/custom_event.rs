use serde::{Deserialize, Serialize};

/// A progress message emitted from inside a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomEvent {
    /// Progress message.
    pub message: String,
}

impl CustomEvent {
    /// Create a new `CustomEvent`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
