//! Folds agent events into conversation state.
//!
//! [`SessionState`] is everything a chat front end displays.  A [`TurnReducer`] is created
//! for every assistant turn and owns the tool calls of that turn; it is discarded when the
//! turn ends, so nothing leaks from one turn into the next.

use std::collections::HashMap;

use crate::observability::{SESSION_ORPHAN_RESULTS, SESSION_TOOL_CALLS};
use crate::types::{AgentEvent, Message, MessageId, ToolCall, ToolCallStatus};
use crate::Error;

/// Content placed in an assistant message that produced nothing before an interruption.
pub const INTERRUPTED_CONTENT: &str = "[interrupted]";

/// A visible change produced by applying one stream update.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// The server assigned the thread through the response header.
    ThreadAssigned(String),
    /// Text was appended to the assistant message.
    Token(String),
    /// A tool call was announced.
    ToolCallStarted(ToolCall),
    /// A tool call received its arguments and is running.
    ToolCallRunning(ToolCall),
    /// A tool call returned.
    ToolCallCompleted(ToolCall),
    /// A tool reported progress.
    Progress(String),
    /// The turn completed.
    Done {
        /// Thread to continue on.
        thread_id: String,
        /// Complete response text, when the agent sent it.
        final_message: Option<String>,
    },
    /// The turn failed.
    Failed(Error),
}

/// How a failure treats the text already streamed into the assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Annotation {
    /// Replace the content with the error.
    Replace,
    /// Write the error only if nothing streamed.
    IfEmpty,
}

/// Conversation state observed by callers.
#[derive(Debug, Default, Clone)]
pub struct SessionState {
    pub(crate) messages: Vec<Message>,
    pub(crate) is_streaming: bool,
    pub(crate) current_tool_call: Option<ToolCall>,
    pub(crate) error: Option<String>,
    pub(crate) thread_id: Option<String>,
}

impl SessionState {
    fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|message| message.id == id)
    }
}

/// Text recorded in the session's error field for `error`.
///
/// Agent-reported errors keep the agent's own wording.
pub fn describe_error(error: &Error) -> String {
    if error.is_server_reported() {
        error.message().to_string()
    } else {
        error.to_string()
    }
}

/// Reducer for a single assistant turn.
#[derive(Debug)]
pub struct TurnReducer {
    assistant_id: MessageId,
    tool_calls: Vec<ToolCall>,
    index: HashMap<String, usize>,
}

impl TurnReducer {
    /// Start a turn writing into the assistant message `assistant_id`.
    pub fn new(assistant_id: MessageId) -> Self {
        Self {
            assistant_id,
            tool_calls: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Apply one event.  Returns the visible change, or `None` if the event was dropped.
    pub fn apply_event(
        &mut self,
        state: &mut SessionState,
        event: AgentEvent,
    ) -> Option<SessionUpdate> {
        match event {
            AgentEvent::Token(token) => {
                if !state.is_streaming {
                    return None;
                }
                let message = state.message_mut(self.assistant_id)?;
                message.content.push_str(&token.content);
                Some(SessionUpdate::Token(token.content))
            }
            AgentEvent::ToolCallStart(start) => {
                if !state.is_streaming {
                    return None;
                }
                let idx = match self.index.get(&start.tool_call_id).copied() {
                    Some(idx) => idx,
                    None => {
                        SESSION_TOOL_CALLS.click();
                        self.insert(ToolCall::pending(start.tool_call_id, start.tool_name))
                    }
                };
                let call = self.tool_calls[idx].clone();
                state.current_tool_call = Some(call.clone());
                Some(SessionUpdate::ToolCallStarted(call))
            }
            AgentEvent::ToolCall(invocation) => {
                if !state.is_streaming {
                    return None;
                }
                let idx = match self.index.get(&invocation.tool_call_id).copied() {
                    Some(idx) => {
                        let call = &mut self.tool_calls[idx];
                        call.name = invocation.tool_name;
                        call.args = invocation.tool_args;
                        call.advance(ToolCallStatus::Running);
                        idx
                    }
                    None => {
                        SESSION_TOOL_CALLS.click();
                        self.insert(ToolCall::running(
                            invocation.tool_call_id,
                            invocation.tool_name,
                            invocation.tool_args,
                        ))
                    }
                };
                self.sync(state);
                let call = self.tool_calls[idx].clone();
                state.current_tool_call = Some(call.clone());
                Some(SessionUpdate::ToolCallRunning(call))
            }
            AgentEvent::ToolResult(result) => {
                let Some(idx) = self.index.get(&result.tool_call_id).copied() else {
                    SESSION_ORPHAN_RESULTS.click();
                    return None;
                };
                self.tool_calls[idx].complete(result.content);
                self.sync(state);
                state.current_tool_call = None;
                Some(SessionUpdate::ToolCallCompleted(self.tool_calls[idx].clone()))
            }
            AgentEvent::Custom(custom) => Some(SessionUpdate::Progress(custom.message)),
            AgentEvent::Done(done) => {
                if !state.is_streaming {
                    return None;
                }
                if let Some(final_message) = done.final_message.as_deref()
                    && let Some(message) = state.message_mut(self.assistant_id)
                    && message.content.is_empty()
                {
                    message.content = final_message.to_string();
                }
                state.thread_id = Some(done.thread_id.clone());
                state.is_streaming = false;
                state.current_tool_call = None;
                Some(SessionUpdate::Done {
                    thread_id: done.thread_id,
                    final_message: done.final_message,
                })
            }
            AgentEvent::Error(error) => {
                Some(self.fail(state, error.to_error(), Annotation::IfEmpty))
            }
            AgentEvent::Unknown => None,
        }
    }

    /// End the turn with `error`.
    pub fn fail(
        &mut self,
        state: &mut SessionState,
        error: Error,
        annotation: Annotation,
    ) -> SessionUpdate {
        let description = describe_error(&error);
        self.abandon_tool_calls(state);
        if let Some(message) = state.message_mut(self.assistant_id)
            && (annotation == Annotation::Replace || message.content.is_empty())
        {
            message.content = format!("Error: {description}");
        }
        state.error = Some(description);
        state.is_streaming = false;
        state.current_tool_call = None;
        SessionUpdate::Failed(error)
    }

    /// End the turn because the caller stopped it.  No error is recorded.
    pub fn interrupt(&mut self, state: &mut SessionState) {
        self.abandon_tool_calls(state);
        if let Some(message) = state.message_mut(self.assistant_id)
            && message.content.is_empty()
        {
            message.content = INTERRUPTED_CONTENT.to_string();
        }
        state.is_streaming = false;
        state.current_tool_call = None;
    }

    fn insert(&mut self, call: ToolCall) -> usize {
        let idx = self.tool_calls.len();
        self.index.insert(call.id.clone(), idx);
        self.tool_calls.push(call);
        idx
    }

    fn abandon_tool_calls(&mut self, state: &mut SessionState) {
        let mut changed = false;
        for call in self.tool_calls.iter_mut() {
            changed |= call.advance(ToolCallStatus::Error);
        }
        if changed {
            self.sync(state);
        }
    }

    fn sync(&self, state: &mut SessionState) {
        if let Some(message) = state.message_mut(self.assistant_id) {
            message.tool_calls = self.tool_calls.clone();
        }
    }
}
