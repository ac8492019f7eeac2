use serde::{Deserialize, Serialize};

use crate::Error;

/// An error the agent reports inside the stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEvent {
    /// Error message.
    pub error: String,

    /// Type of error that occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl ErrorEvent {
    /// Create a new `ErrorEvent` without a type.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_type: None,
        }
    }

    /// Convert this event into the error reported to callers.
    pub fn to_error(&self) -> Error {
        Error::server(self.error.clone(), self.error_type.clone())
    }
}
