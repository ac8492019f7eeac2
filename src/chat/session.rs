//! Core chat session management.
//!
//! This module provides the `ChatSession` struct which manages conversation
//! state and drives streamed exchanges with the agent.
//!
//! A turn runs in two halves.  A spawned task reads the response and forwards every decoded
//! event over a channel, tagged with the generation of the turn that produced it.  The owner
//! of the session pumps that channel with [`ChatSession::next_update`], which applies each
//! event through the turn reducer.  Cancelling a turn bumps the generation, so anything the
//! old task already queued is discarded unread.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{from_reader, to_writer_pretty};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::Error;
use crate::chat::config::ChatConfig;
use crate::client::{AgentClient, ChatStream, Transport};
use crate::error::Result;
use crate::observability::{
    SESSION_CANCELLATIONS, SESSION_ERRORS, SESSION_RETRIES, SESSION_SENDS, SESSION_STALE_UPDATES,
    STREAM_DURATION, STREAM_IDLE_TIMEOUTS, STREAM_TTFE,
};
use crate::reducer::{Annotation, SessionState, SessionUpdate, TurnReducer};
use crate::session_logger::SessionLogger;
use crate::sse::EventStream;
use crate::store::KeyValueStore;
use crate::types::{AgentEvent, ChatRequest, Message, MessageId, Role, ToolCall};

/// Callback invoked with every error reported for a turn.
pub type ErrorHook = Box<dyn FnMut(&Error) + Send>;

/// What the reader task observed.
#[derive(Debug)]
enum StreamUpdate {
    Opened { thread_id: String },
    Event(AgentEvent),
    SkippedFrame(Error),
    Failed(Error),
    Ended,
}

#[derive(Debug)]
struct Envelope {
    generation: u64,
    update: StreamUpdate,
}

struct ActiveTurn {
    generation: u64,
    cancel: CancellationToken,
    reducer: TurnReducer,
    started: Instant,
    saw_event: bool,
}

/// A chat session that manages conversation state and agent interactions.
///
/// All state changes happen on the task that owns the session.  At most one turn is in
/// flight at a time.
pub struct ChatSession<T: Transport + 'static> {
    transport: Arc<T>,
    store: Arc<dyn KeyValueStore>,
    logger: Arc<dyn SessionLogger>,
    on_error: Option<ErrorHook>,
    config: ChatConfig,
    state: SessionState,
    turn: Option<ActiveTurn>,
    generation: u64,
    next_message_id: u64,
    last_user_message: Option<String>,
    updates_tx: UnboundedSender<Envelope>,
    updates_rx: UnboundedReceiver<Envelope>,
}

impl ChatSession<AgentClient> {
    /// Creates a new chat session talking HTTP to the endpoint in `config`.
    pub fn new(
        config: ChatConfig,
        store: Arc<dyn KeyValueStore>,
        logger: Arc<dyn SessionLogger>,
    ) -> Result<Self> {
        let client = AgentClient::with_options(config.endpoint.clone(), Some(config.connect_timeout))?;
        Ok(Self::with_transport(Arc::new(client), store, logger, config))
    }
}

impl<T: Transport + 'static> ChatSession<T> {
    /// Creates a new chat session over a custom transport.
    ///
    /// The thread identifier is restored from `store`.
    pub fn with_transport(
        transport: Arc<T>,
        store: Arc<dyn KeyValueStore>,
        logger: Arc<dyn SessionLogger>,
        config: ChatConfig,
    ) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let thread_id = match store.get(&config.thread_key) {
            Ok(thread_id) => thread_id,
            Err(err) => {
                logger.log_store_failure(&config.thread_key, &err);
                None
            }
        };
        Self {
            transport,
            store,
            logger,
            on_error: None,
            config,
            state: SessionState {
                thread_id,
                ..SessionState::default()
            },
            turn: None,
            generation: 0,
            next_message_id: 1,
            last_user_message: None,
            updates_tx,
            updates_rx,
        }
    }

    /// Installs a callback that sees every reported error.  Cancellation is never reported.
    pub fn set_error_handler(&mut self, hook: impl FnMut(&Error) + Send + 'static) {
        self.on_error = Some(Box::new(hook));
    }

    /// Sends a user message and starts streaming the response.
    ///
    /// Returns `false` without doing anything when `text` is blank or a response is already
    /// streaming.  Otherwise the user message and an empty assistant message are appended and
    /// the session is streaming before this returns.  Drive the response with
    /// [`next_update`](Self::next_update) or [`wait_idle`](Self::wait_idle).
    pub fn send_message(&mut self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() || self.state.is_streaming {
            return false;
        }
        SESSION_SENDS.click();

        self.last_user_message = Some(text.to_string());
        self.state.error = None;
        self.state.current_tool_call = None;
        let user_id = self.allocate_id();
        self.state.messages.push(Message::user(user_id, trimmed));
        let assistant_id = self.allocate_id();
        self.state
            .messages
            .push(Message::assistant_placeholder(assistant_id));
        self.state.is_streaming = true;

        if let Some(stale) = self.turn.take() {
            stale.cancel.cancel();
        }
        self.generation += 1;
        let mut turn = ActiveTurn {
            generation: self.generation,
            cancel: CancellationToken::new(),
            reducer: TurnReducer::new(assistant_id),
            started: Instant::now(),
            saw_event: false,
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                let error = Error::http_client(
                    "a Tokio runtime is required to stream responses",
                    Some(Box::new(err)),
                );
                turn.reducer
                    .fail(&mut self.state, error.clone(), Annotation::Replace);
                self.report(&error);
                return true;
            }
        };

        let request = ChatRequest::new(trimmed, self.state.thread_id.clone());
        let bearer_token = self.read_store(&self.config.token_key);
        handle.spawn(read_stream(
            Arc::clone(&self.transport),
            request,
            bearer_token,
            self.config.idle_timeout,
            turn.cancel.clone(),
            turn.generation,
            self.updates_tx.clone(),
        ));
        self.turn = Some(turn);
        true
    }

    /// Clears the conversation and forgets the thread.
    ///
    /// Any in-flight response is cancelled; nothing it produced afterwards reaches the
    /// session.  Calling this on an empty session is harmless.
    pub fn clear_messages(&mut self) {
        if let Some(turn) = self.turn.take() {
            turn.cancel.cancel();
            SESSION_CANCELLATIONS.click();
        }
        self.generation += 1;
        self.state.messages.clear();
        self.state.error = None;
        self.state.is_streaming = false;
        self.state.current_tool_call = None;
        self.state.thread_id = None;
        self.last_user_message = None;
        self.persist_thread_id();
    }

    /// Resends the last user message after a failure.
    ///
    /// The failed user/assistant pair is discarded first.  Returns `false` if there is no
    /// message to retry or a response is streaming.
    pub fn retry_last_message(&mut self) -> bool {
        if self.state.is_streaming {
            return false;
        }
        let Some(text) = self.last_user_message.clone() else {
            return false;
        };
        SESSION_RETRIES.click();
        if self.state.messages.len() >= 2 {
            let keep = self.state.messages.len() - 2;
            self.state.messages.truncate(keep);
        }
        self.state.error = None;
        self.send_message(&text)
    }

    /// Stops the in-flight response, keeping what has streamed so far.
    ///
    /// Returns `false` when nothing was streaming.
    pub fn stop_streaming(&mut self) -> bool {
        let Some(mut turn) = self.turn.take() else {
            return false;
        };
        turn.cancel.cancel();
        SESSION_CANCELLATIONS.click();
        self.generation += 1;
        turn.reducer.interrupt(&mut self.state);
        STREAM_DURATION.add(turn.started.elapsed().as_secs_f64());
        true
    }

    /// Waits for and applies the next change of the streaming response.
    ///
    /// Returns `None` once nothing is streaming.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let generation = match &self.turn {
                Some(turn) if self.state.is_streaming => turn.generation,
                _ => return None,
            };
            let envelope = self.updates_rx.recv().await?;
            if envelope.generation != generation {
                SESSION_STALE_UPDATES.click();
                continue;
            }
            if let Some(update) = self.apply(envelope.update) {
                return Some(update);
            }
        }
    }

    /// Applies updates until the current response ends.
    pub async fn wait_idle(&mut self) {
        while self.next_update().await.is_some() {}
    }

    /// The conversation so far.
    pub fn messages(&self) -> &[Message] {
        &self.state.messages
    }

    /// Whether a response is streaming.
    pub fn is_streaming(&self) -> bool {
        self.state.is_streaming
    }

    /// The tool call the agent is working on, if any.
    pub fn current_tool_call(&self) -> Option<&ToolCall> {
        self.state.current_tool_call.as_ref()
    }

    /// The error that ended the last turn.
    pub fn error(&self) -> Option<&str> {
        self.state.error.as_deref()
    }

    /// The thread this conversation continues on.
    pub fn thread_id(&self) -> Option<&str> {
        self.state.thread_id.as_deref()
    }

    /// The active configuration.
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Saves the transcript to the specified path.
    pub fn save_transcript_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let transcript = TranscriptFile::new(self.state.thread_id.clone(), &self.state.messages);
        let file = File::create(path.as_ref())
            .map_err(|err| Error::io("failed to create transcript file", err))?;
        let writer = BufWriter::new(file);
        to_writer_pretty(writer, &transcript).map_err(|err| {
            Error::serialization("failed to serialize transcript", Some(Box::new(err)))
        })
    }

    /// Loads a transcript from disk, replacing the current conversation and thread.
    ///
    /// An in-flight response is cancelled once the file has been read successfully.
    pub fn load_transcript_from<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let file = File::open(path.as_ref())
            .map_err(|err| Error::io("failed to open transcript file", err))?;
        let reader = BufReader::new(file);
        let transcript: TranscriptFile = from_reader(reader).map_err(|err| {
            Error::serialization("failed to parse transcript", Some(Box::new(err)))
        })?;

        let mut next_message_id = self.next_message_id;
        for message in &transcript.messages {
            let after = message.id.0.checked_add(1).ok_or_else(|| {
                Error::serialization(format!("message id {} is out of range", message.id), None)
            })?;
            next_message_id = next_message_id.max(after);
        }

        self.clear_messages();
        self.next_message_id = next_message_id;
        self.last_user_message = transcript
            .messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.clone());
        self.state.messages = transcript.messages;
        self.state.thread_id = transcript.thread_id;
        self.persist_thread_id();
        Ok(())
    }

    fn apply(&mut self, update: StreamUpdate) -> Option<SessionUpdate> {
        let mut turn = self.turn.take()?;
        let result = match update {
            StreamUpdate::Opened { thread_id } => {
                self.state.thread_id = Some(thread_id.clone());
                self.persist_thread_id();
                Some(SessionUpdate::ThreadAssigned(thread_id))
            }
            StreamUpdate::Event(event) => {
                if !turn.saw_event {
                    turn.saw_event = true;
                    STREAM_TTFE.add(turn.started.elapsed().as_secs_f64());
                }
                self.logger.log_stream_event(&event);
                if let AgentEvent::Custom(custom) = &event {
                    self.logger.log_progress(&custom.message);
                }
                let update = turn.reducer.apply_event(&mut self.state, event);
                if let Some(SessionUpdate::Done { .. }) = &update {
                    self.persist_thread_id();
                }
                update
            }
            StreamUpdate::SkippedFrame(err) => {
                self.logger.log_skipped_frame(&err);
                None
            }
            StreamUpdate::Failed(err) if err.is_abort() => {
                turn.reducer.interrupt(&mut self.state);
                None
            }
            StreamUpdate::Failed(err) => {
                Some(turn.reducer.fail(&mut self.state, err, Annotation::Replace))
            }
            StreamUpdate::Ended if self.state.is_streaming => {
                let err = Error::streaming("stream ended unexpectedly", None);
                Some(turn.reducer.fail(&mut self.state, err, Annotation::IfEmpty))
            }
            StreamUpdate::Ended => None,
        };

        if let Some(SessionUpdate::Failed(err)) = &result {
            self.report(err);
        }
        if self.state.is_streaming {
            self.turn = Some(turn);
        } else {
            turn.cancel.cancel();
            STREAM_DURATION.add(turn.started.elapsed().as_secs_f64());
        }
        result
    }

    fn report(&mut self, err: &Error) {
        SESSION_ERRORS.click();
        self.logger.log_error(err);
        if let Some(hook) = self.on_error.as_mut() {
            hook(err);
        }
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = MessageId(self.next_message_id);
        self.next_message_id = self.next_message_id.saturating_add(1);
        id
    }

    fn read_store(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(err) => {
                self.logger.log_store_failure(key, &err);
                None
            }
        }
    }

    fn persist_thread_id(&self) {
        let key = &self.config.thread_key;
        let result = match &self.state.thread_id {
            Some(thread_id) => self.store.set(key, thread_id),
            None => self.store.remove(key),
        };
        if let Err(err) = result {
            self.logger.log_store_failure(key, &err);
        }
    }
}

/// Reads one response and forwards what it sees until the turn ends or is cancelled.
async fn read_stream<T: Transport + ?Sized>(
    transport: Arc<T>,
    request: ChatRequest,
    bearer_token: Option<String>,
    idle_timeout: Option<Duration>,
    cancel: CancellationToken,
    generation: u64,
    updates: UnboundedSender<Envelope>,
) {
    let send = |update: StreamUpdate| {
        _ = updates.send(Envelope { generation, update });
    };

    let opened = tokio::select! {
        _ = cancel.cancelled() => return,
        opened = open_stream(&*transport, &request, bearer_token.as_deref(), idle_timeout) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(err) => {
            send(StreamUpdate::Failed(err));
            return;
        }
    };
    if let Some(thread_id) = stream.thread_id.take() {
        send(StreamUpdate::Opened { thread_id });
    }

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = next_event(&mut stream.events, idle_timeout) => next,
        };
        match next {
            Some(Ok(event)) => {
                let terminal = event.is_terminal();
                send(StreamUpdate::Event(event));
                if terminal {
                    return;
                }
            }
            Some(Err(err)) if err.is_frame_error() => send(StreamUpdate::SkippedFrame(err)),
            Some(Err(err)) => {
                send(StreamUpdate::Failed(err));
                return;
            }
            None => {
                send(StreamUpdate::Ended);
                return;
            }
        }
    }
}

async fn open_stream<T: Transport + ?Sized>(
    transport: &T,
    request: &ChatRequest,
    bearer_token: Option<&str>,
    idle_timeout: Option<Duration>,
) -> Result<ChatStream> {
    let Some(limit) = idle_timeout else {
        return transport.open(request, bearer_token).await;
    };
    match tokio::time::timeout(limit, transport.open(request, bearer_token)).await {
        Ok(opened) => opened,
        Err(_) => {
            STREAM_IDLE_TIMEOUTS.click();
            Err(Error::timeout(
                "the agent did not start responding",
                Some(limit.as_secs_f64()),
            ))
        }
    }
}

async fn next_event(
    events: &mut EventStream,
    idle_timeout: Option<Duration>,
) -> Option<Result<AgentEvent>> {
    let Some(limit) = idle_timeout else {
        return events.next().await;
    };
    match tokio::time::timeout(limit, events.next()).await {
        Ok(next) => next,
        Err(_) => {
            STREAM_IDLE_TIMEOUTS.click();
            Some(Err(Error::timeout(
                "no data received from the agent",
                Some(limit.as_secs_f64()),
            )))
        }
    }
}

#[derive(Serialize, Deserialize)]
struct TranscriptFile {
    version: u8,
    #[serde(default)]
    thread_id: Option<String>,
    messages: Vec<Message>,
}

impl TranscriptFile {
    fn new(thread_id: Option<String>, messages: &[Message]) -> Self {
        Self {
            version: 1,
            thread_id,
            messages: messages.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use bytes::Bytes;
    use futures::channel::mpsc as chunk_channel;
    use futures::stream;
    use serde_json::{Value, json};

    use super::*;
    use crate::session_logger::NoopLogger;
    use crate::sse::process_sse;
    use crate::store::{MemoryStore, THREAD_ID_KEY, TOKEN_KEY};
    use crate::types::ToolCallStatus;

    type ChunkSender = chunk_channel::UnboundedSender<Result<Bytes>>;

    enum Script {
        Body {
            thread_id: Option<String>,
            chunks: Vec<String>,
        },
        Live(chunk_channel::UnboundedReceiver<Result<Bytes>>),
        Fail(Error),
        Silent,
        Stalled,
    }

    #[derive(Default)]
    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<(ChatRequest, Option<String>)>>,
    }

    impl ScriptedTransport {
        fn push(&self, script: Script) {
            self.scripts.lock().unwrap().push_back(script);
        }

        fn body(&self, frames: &[Value]) {
            self.push(Script::Body {
                thread_id: None,
                chunks: frames.iter().map(frame).collect(),
            });
        }

        fn live(&self) -> ChunkSender {
            let (tx, rx) = chunk_channel::unbounded();
            self.push(Script::Live(rx));
            tx
        }

        fn requests(&self) -> Vec<(ChatRequest, Option<String>)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn open(
            &self,
            request: &ChatRequest,
            bearer_token: Option<&str>,
        ) -> Result<ChatStream> {
            self.requests
                .lock()
                .unwrap()
                .push((request.clone(), bearer_token.map(String::from)));
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted response left");
            match script {
                Script::Body { thread_id, chunks } => {
                    let bytes = stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))));
                    Ok(ChatStream {
                        thread_id,
                        events: Box::pin(process_sse(bytes)),
                    })
                }
                Script::Live(rx) => Ok(ChatStream {
                    thread_id: None,
                    events: Box::pin(process_sse(rx)),
                }),
                Script::Fail(err) => Err(err),
                Script::Silent => Ok(ChatStream {
                    thread_id: None,
                    events: Box::pin(stream::pending::<Result<AgentEvent>>()),
                }),
                Script::Stalled => futures::future::pending().await,
            }
        }
    }

    fn frame(value: &Value) -> String {
        format!("data: {value}\n\n")
    }

    fn token(content: &str) -> Value {
        json!({"event": "token", "content": content, "node": "model"})
    }

    fn done(thread_id: &str) -> Value {
        json!({"event": "done", "thread_id": thread_id})
    }

    fn session_with(
        store: MemoryStore,
        config: ChatConfig,
    ) -> (ChatSession<ScriptedTransport>, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::default());
        let session = ChatSession::with_transport(
            Arc::clone(&transport),
            Arc::new(store),
            Arc::new(NoopLogger),
            config,
        );
        (session, transport)
    }

    fn session() -> (ChatSession<ScriptedTransport>, Arc<ScriptedTransport>) {
        session_with(MemoryStore::new(), ChatConfig::new())
    }

    fn assistant<T: Transport + 'static>(session: &ChatSession<T>) -> &Message {
        session.messages().last().unwrap()
    }

    #[tokio::test]
    async fn send_appends_pair_and_streams_before_response() {
        let (mut session, transport) = session();
        transport.push(Script::Silent);

        assert!(session.send_message("  Safest areas near Flushing?  "));
        assert!(session.is_streaming());
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Safest areas near Flushing?");
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].content.is_empty());
        assert!(messages[0].id < messages[1].id);
        session.clear_messages();
    }

    #[tokio::test]
    async fn send_while_streaming_is_noop() {
        let (mut session, transport) = session();
        transport.push(Script::Silent);
        assert!(session.send_message("first"));
        assert!(!session.send_message("second"));
        assert_eq!(session.messages().len(), 2);
        assert!(session.is_streaming());
        session.clear_messages();
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let (mut session, transport) = session();
        assert!(!session.send_message("   \n\t"));
        assert!(session.messages().is_empty());
        assert!(!session.is_streaming());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn tokens_concatenate_across_chunks() {
        let (mut session, transport) = session();
        let body = [token("Hello"), token(" "), token("world"), done("th-1")]
            .iter()
            .map(frame)
            .collect::<String>();
        let (head, tail) = body.split_at(23);
        transport.push(Script::Body {
            thread_id: None,
            chunks: vec![head.to_string(), tail.to_string()],
        });

        session.send_message("hi");
        session.wait_idle().await;
        assert!(!session.is_streaming());
        assert_eq!(assistant(&session).content, "Hello world");
        assert!(session.error().is_none());
    }

    #[tokio::test]
    async fn tool_events_fold_into_one_call() {
        let (mut session, transport) = session();
        transport.body(&[
            json!({"event": "tool_call_start", "tool_name": "get_nsqi_prediction", "tool_call_id": "t1"}),
            json!({"event": "tool_call", "tool_name": "get_nsqi_prediction", "tool_args": {"zip_code": "10001"}, "tool_call_id": "t1"}),
            json!({"event": "tool_result", "tool_name": "get_nsqi_prediction", "content": "Score: 75", "tool_call_id": "t1"}),
            token("Chelsea scores 75."),
            done("th-1"),
        ]);

        session.send_message("How is 10001?");
        let mut updates = Vec::new();
        while let Some(update) = session.next_update().await {
            updates.push(update);
        }
        assert!(matches!(updates[0], SessionUpdate::ToolCallStarted(_)));
        assert!(matches!(updates[1], SessionUpdate::ToolCallRunning(_)));
        assert!(matches!(updates[2], SessionUpdate::ToolCallCompleted(_)));

        let calls = &assistant(&session).tool_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_nsqi_prediction");
        assert_eq!(calls[0].args["zip_code"], json!("10001"));
        assert_eq!(calls[0].status, ToolCallStatus::Completed);
        assert_eq!(calls[0].result.as_deref(), Some("Score: 75"));
        assert!(session.current_tool_call().is_none());
    }

    #[tokio::test]
    async fn unknown_tool_result_is_dropped() {
        let (mut session, transport) = session();
        transport.body(&[
            json!({"event": "tool_result", "tool_name": "x", "content": "?", "tool_call_id": "ghost"}),
            done("th-1"),
        ]);
        session.send_message("hi");
        session.wait_idle().await;
        assert!(assistant(&session).tool_calls.is_empty());
        assert!(session.error().is_none());
    }

    #[tokio::test]
    async fn done_thread_id_is_persisted_and_reused() {
        let store = MemoryStore::new();
        let (mut session, transport) = session_with(store.clone(), ChatConfig::new());
        transport.body(&[token("one"), done("thread-7")]);
        transport.body(&[token("two"), done("thread-7")]);

        session.send_message("first");
        session.wait_idle().await;
        assert_eq!(session.thread_id(), Some("thread-7"));
        assert_eq!(
            store.get(THREAD_ID_KEY).unwrap().as_deref(),
            Some("thread-7")
        );

        session.send_message("second");
        session.wait_idle().await;
        let requests = transport.requests();
        assert_eq!(requests[0].0.thread_id, None);
        assert_eq!(requests[1].0.thread_id.as_deref(), Some("thread-7"));
        assert_eq!(requests[1].0.message, "second");
        assert_eq!(session.messages().len(), 4);
    }

    #[tokio::test]
    async fn thread_id_is_restored_from_store() {
        let store = MemoryStore::with_value(THREAD_ID_KEY, "restored");
        let (mut session, transport) = session_with(store, ChatConfig::new());
        assert_eq!(session.thread_id(), Some("restored"));
        transport.body(&[done("restored")]);
        session.send_message("again");
        session.wait_idle().await;
        assert_eq!(transport.requests()[0].0.thread_id.as_deref(), Some("restored"));
    }

    #[tokio::test]
    async fn header_thread_id_is_persisted_on_open() {
        let store = MemoryStore::new();
        let (mut session, transport) = session_with(store.clone(), ChatConfig::new());
        transport.push(Script::Body {
            thread_id: Some("from-header".to_string()),
            chunks: vec![frame(&token("x")), frame(&done("from-header"))],
        });
        session.send_message("hi");
        let first = session.next_update().await;
        assert!(matches!(first, Some(SessionUpdate::ThreadAssigned(ref id)) if id == "from-header"));
        assert_eq!(
            store.get(THREAD_ID_KEY).unwrap().as_deref(),
            Some("from-header")
        );
        session.wait_idle().await;
    }

    #[tokio::test]
    async fn bearer_token_comes_from_store() {
        let store = MemoryStore::with_value(TOKEN_KEY, "secret");
        let (mut session, transport) = session_with(store, ChatConfig::new());
        transport.body(&[done("t")]);
        session.send_message("hi");
        session.wait_idle().await;
        assert_eq!(transport.requests()[0].1.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn error_event_ends_turn_without_completing_tools() {
        let (mut session, transport) = session();
        transport.body(&[
            json!({"event": "tool_call", "tool_name": "search_neighborhoods", "tool_args": {}, "tool_call_id": "t9"}),
            json!({"event": "error", "error": "Agent crashed", "error_type": "RuntimeError"}),
            token("never applied"),
        ]);
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        session.set_error_handler(move |err| sink.lock().unwrap().push(err.to_string()));

        session.send_message("hi");
        session.wait_idle().await;
        assert!(!session.is_streaming());
        assert_eq!(session.error(), Some("Agent crashed"));
        let message = assistant(&session);
        assert_eq!(message.content, "Error: Agent crashed");
        assert_eq!(message.tool_calls[0].status, ToolCallStatus::Error);
        assert!(message.tool_calls[0].result.is_none());
        assert_eq!(
            *reported.lock().unwrap(),
            vec!["Agent error (RuntimeError): Agent crashed".to_string()]
        );
    }

    #[tokio::test]
    async fn transport_failure_annotates_and_reports() {
        let (mut session, transport) = session();
        transport.push(Script::Fail(Error::authentication("Invalid token")));
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        session.set_error_handler(move |_| *sink.lock().unwrap() += 1);

        session.send_message("hi");
        let update = session.next_update().await;
        assert!(matches!(update, Some(SessionUpdate::Failed(ref e)) if e.is_authentication()));
        assert!(session.next_update().await.is_none());
        assert_eq!(session.error(), Some("Authentication error: Invalid token"));
        assert_eq!(
            assistant(&session).content,
            "Error: Authentication error: Invalid token"
        );
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn eof_without_done_is_an_error() {
        let (mut session, transport) = session();
        transport.body(&[token("Partial answer")]);
        session.send_message("hi");
        session.wait_idle().await;
        assert!(!session.is_streaming());
        assert_eq!(
            session.error(),
            Some("Streaming error: stream ended unexpectedly")
        );
        assert_eq!(assistant(&session).content, "Partial answer");
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let (mut session, transport) = session();
        transport.push(Script::Body {
            thread_id: None,
            chunks: vec![
                "data: {not json\n\n".to_string(),
                "data: {\"content\": \"no event\"}\n\n".to_string(),
                frame(&token("ok")),
                frame(&done("t")),
            ],
        });
        session.send_message("hi");
        session.wait_idle().await;
        assert_eq!(assistant(&session).content, "ok");
        assert!(session.error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_stream_times_out() {
        let config = ChatConfig::new().with_idle_timeout(Some(Duration::from_secs(5)));
        let (mut session, transport) = session_with(MemoryStore::new(), config);
        transport.push(Script::Silent);
        session.send_message("hi");
        let update = session.next_update().await;
        assert!(matches!(update, Some(SessionUpdate::Failed(ref e)) if e.is_timeout()));
        assert!(!session.is_streaming());
        assert!(assistant(&session).content.starts_with("Error: Timeout error"));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_open_times_out() {
        let config = ChatConfig::new().with_idle_timeout(Some(Duration::from_secs(5)));
        let (mut session, transport) = session_with(MemoryStore::new(), config);
        assert_eq!(session.config().idle_timeout, Some(Duration::from_secs(5)));
        transport.push(Script::Stalled);
        session.send_message("hi");
        let update = tokio::time::timeout(Duration::from_secs(3600), session.next_update())
            .await
            .expect("the turn should fail before an hour passes");
        assert!(matches!(update, Some(SessionUpdate::Failed(ref e)) if e.is_timeout()));
        assert!(!session.is_streaming());
        assert!(session.error().is_some());
        assert!(assistant(&session).content.starts_with("Error: Timeout error"));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_open_without_idle_timeout_waits() {
        let config = ChatConfig::new().with_idle_timeout(None);
        let (mut session, transport) = session_with(MemoryStore::new(), config);
        transport.push(Script::Stalled);
        session.send_message("hi");
        let waited = tokio::time::timeout(Duration::from_secs(600), session.next_update()).await;
        assert!(waited.is_err());
        assert!(session.is_streaming());
        assert!(session.stop_streaming());
    }

    #[tokio::test]
    async fn clear_resets_everything() {
        let store = MemoryStore::with_value(THREAD_ID_KEY, "old");
        let (mut session, transport) = session_with(store.clone(), ChatConfig::new());
        transport.push(Script::Fail(Error::internal_server("boom")));
        session.send_message("hi");
        session.wait_idle().await;
        assert!(session.error().is_some());

        session.clear_messages();
        assert!(session.messages().is_empty());
        assert!(!session.is_streaming());
        assert!(session.error().is_none());
        assert!(session.thread_id().is_none());
        assert_eq!(store.get(THREAD_ID_KEY).unwrap(), None);

        session.clear_messages();
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn retry_without_history_is_noop() {
        let (mut session, transport) = session();
        assert!(!session.retry_last_message());
        assert!(session.messages().is_empty());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn retry_replaces_failed_pair() {
        let (mut session, transport) = session();
        transport.push(Script::Fail(Error::service_unavailable("Bad Gateway", None)));
        transport.body(&[token("Recovered"), done("th")]);

        session.send_message("Compare 11101 and 11375");
        session.wait_idle().await;
        assert!(session.error().is_some());

        assert!(session.retry_last_message());
        assert!(session.error().is_none());
        assert_eq!(session.messages().len(), 2);
        session.wait_idle().await;
        assert_eq!(session.messages()[0].content, "Compare 11101 and 11375");
        assert_eq!(assistant(&session).content, "Recovered");
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(transport.requests()[1].0.message, "Compare 11101 and 11375");
    }

    #[tokio::test]
    async fn cancelled_turn_cannot_touch_new_state() {
        let (mut session, transport) = session();
        let old = transport.live();
        old.unbounded_send(Ok(Bytes::from(frame(&token("Hel"))))).unwrap();

        session.send_message("first");
        assert!(matches!(session.next_update().await, Some(SessionUpdate::Token(_))));

        session.clear_messages();
        assert!(session.next_update().await.is_none());

        transport.body(&[token("fresh"), done("new-thread")]);
        session.send_message("second");
        _ = old.unbounded_send(Ok(Bytes::from(frame(&token("stale")))));
        _ = old.unbounded_send(Ok(Bytes::from(frame(&json!({
            "event": "tool_call", "tool_name": "x", "tool_args": {}, "tool_call_id": "old"
        })))));
        _ = old.unbounded_send(Ok(Bytes::from(frame(&done("old-thread")))));
        session.wait_idle().await;

        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "second");
        assert_eq!(messages[1].content, "fresh");
        assert!(messages[1].tool_calls.is_empty());
        assert_eq!(session.thread_id(), Some("new-thread"));
    }

    #[tokio::test]
    async fn stop_streaming_keeps_partial_text() {
        let (mut session, transport) = session();
        let live = transport.live();
        live.unbounded_send(Ok(Bytes::from(frame(&token("Astoria is"))))).unwrap();
        session.send_message("hi");
        session.next_update().await;

        assert!(session.stop_streaming());
        assert!(!session.is_streaming());
        assert!(session.error().is_none());
        assert_eq!(assistant(&session).content, "Astoria is");
        assert!(!session.stop_streaming());
        assert!(session.next_update().await.is_none());
    }

    #[tokio::test]
    async fn transcript_round_trip() {
        let (mut session, transport) = session();
        transport.body(&[token("Sunnyside"), done("th-3")]);
        session.send_message("Quiet areas?");
        session.wait_idle().await;

        let path = std::env::temp_dir().join(format!(
            "compass-transcript-{}-{}.json",
            std::process::id(),
            time::OffsetDateTime::now_utc().unix_timestamp_nanos()
        ));
        session.save_transcript_to(&path).unwrap();

        let store = MemoryStore::new();
        let (mut restored, transport) = session_with(store.clone(), ChatConfig::new());
        restored.load_transcript_from(&path).unwrap();
        assert_eq!(restored.messages(), session.messages());
        assert_eq!(restored.thread_id(), Some("th-3"));
        assert_eq!(store.get(THREAD_ID_KEY).unwrap().as_deref(), Some("th-3"));

        transport.body(&[done("th-3")]);
        assert!(restored.retry_last_message());
        assert_eq!(restored.messages().len(), 2);
        assert!(restored.messages()[0].id > session.messages()[1].id);
        restored.wait_idle().await;
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn transcript_with_exhausted_ids_is_rejected() {
        let (mut session, transport) = session();
        transport.body(&[token("Kept"), done("th-5")]);
        session.send_message("hi");
        session.wait_idle().await;

        let path = std::env::temp_dir().join(format!(
            "compass-transcript-max-{}-{}.json",
            std::process::id(),
            time::OffsetDateTime::now_utc().unix_timestamp_nanos()
        ));
        let transcript = json!({
            "version": 1,
            "thread_id": "th-max",
            "messages": [{
                "id": u64::MAX,
                "role": "user",
                "content": "hand edited",
                "timestamp": "2024-05-01T12:00:00Z",
            }],
        });
        std::fs::write(&path, transcript.to_string()).unwrap();

        let err = session.load_transcript_from(&path).unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[1].content, "Kept");
        assert_eq!(session.thread_id(), Some("th-5"));
        std::fs::remove_file(&path).unwrap();
    }
}
