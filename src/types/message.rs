use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::ToolCall;

/// Identifier of a message within a session.
///
/// Identifiers are handed out in creation order, so comparing two ids compares their age.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg_{}", self.0)
    }
}

/// Author of a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person chatting.
    User,
    /// The agent.
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry of the conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Identifier of the message.
    pub id: MessageId,

    /// Author of the message.
    pub role: Role,

    /// Text of the message.  Grows while the assistant streams.
    pub content: String,

    /// Tools invoked while producing this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// When the message was created.
    #[serde(with = "crate::utils::time")]
    pub timestamp: OffsetDateTime,
}

impl Message {
    /// A user message with `content`.
    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// An empty assistant message awaiting the stream.
    pub fn assistant_placeholder(id: MessageId) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: String::new(),
            tool_calls: Vec::new(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Look up a tool call of this message by id.
    pub fn tool_call(&self, id: &str) -> Option<&ToolCall> {
        self.tool_calls.iter().find(|call| call.id == id)
    }
}
