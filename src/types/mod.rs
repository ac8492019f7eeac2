// Public modules
pub mod agent_event;
pub mod chat_request;
pub mod custom_event;
pub mod done_event;
pub mod error_event;
pub mod message;
pub mod token_event;
pub mod tool_call;
pub mod tool_call_event;
pub mod tool_call_start_event;
pub mod tool_result_event;

// Re-exports
pub use agent_event::AgentEvent;
pub use chat_request::ChatRequest;
pub use custom_event::CustomEvent;
pub use done_event::DoneEvent;
pub use error_event::ErrorEvent;
pub use message::{Message, MessageId, Role};
pub use token_event::TokenEvent;
pub use tool_call::{ToolCall, ToolCallStatus};
pub use tool_call_event::ToolCallEvent;
pub use tool_call_start_event::ToolCallStartEvent;
pub use tool_result_event::ToolResultEvent;
