use serde::{Deserialize, Serialize};

/// A fragment of assistant text streamed by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenEvent {
    /// The text fragment to append to the assistant message.
    pub content: String,

    /// The graph node that emitted this token.
    #[serde(default = "default_node")]
    pub node: String,
}

impl TokenEvent {
    /// Create a new `TokenEvent` emitted by the model node.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            node: default_node(),
        }
    }
}

fn default_node() -> String {
    "model".to_string()
}
