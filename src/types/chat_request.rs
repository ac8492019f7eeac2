use serde::{Deserialize, Serialize};

/// Body of a request to the agent chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRequest {
    /// The user's message.
    pub message: String,

    /// Conversation thread to continue; `null` starts a new thread.
    pub thread_id: Option<String>,
}

impl ChatRequest {
    /// Create a new `ChatRequest`.
    pub fn new(message: impl Into<String>, thread_id: Option<String>) -> Self {
        Self {
            message: message.into(),
            thread_id,
        }
    }
}
