use serde::{Deserialize, Serialize};

/// Marks the successful end of an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoneEvent {
    /// The thread to continue on subsequent sends.
    pub thread_id: String,

    /// The complete final response text, if the agent sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_message: Option<String>,
}

impl DoneEvent {
    /// Create a new `DoneEvent` without a final message.
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            final_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn final_message_is_optional() {
        let event: DoneEvent = serde_json::from_value(json!({"thread_id": "th-1"})).unwrap();
        assert_eq!(event, DoneEvent::new("th-1"));

        let event: DoneEvent =
            serde_json::from_value(json!({"thread_id": "th-1", "final_message": null})).unwrap();
        assert!(event.final_message.is_none());
    }
}
