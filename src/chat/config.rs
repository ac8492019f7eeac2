//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and configuration
//! structures for controlling chat behavior.

use std::path::PathBuf;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::store::{THREAD_ID_KEY, TOKEN_KEY};

/// Default time to establish a connection.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default time the stream may stay silent before the turn fails.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Command-line arguments for the compass-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Full URL of the streaming chat endpoint.
    #[arrrg(optional, "Chat endpoint (default: $COMPASS_API_URL/api/agent/chat/stream)", "URL")]
    pub endpoint: Option<String>,

    /// Bearer token to store before the first request.
    #[arrrg(optional, "Bearer token sent with every request", "TOKEN")]
    pub token: Option<String>,

    /// File that keeps the thread id and token between runs.
    #[arrrg(optional, "State file for thread id and token", "PATH")]
    pub state_file: Option<String>,

    /// Seconds of stream silence tolerated; zero disables the limit.
    #[arrrg(optional, "Idle timeout in seconds, 0 disables (default: 120)", "SECONDS")]
    pub idle_timeout: Option<u64>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Log every stream event to standard error.
    #[arrrg(flag, "Log stream events to stderr")]
    pub verbose: bool,
}

/// Configuration for a chat session.
///
/// This struct holds the resolved configuration values after processing
/// command-line arguments with appropriate defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Endpoint override; `None` resolves from the environment.
    pub endpoint: Option<String>,

    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,

    /// Longest silence tolerated on an open stream.  `None` waits forever.
    pub idle_timeout: Option<Duration>,

    /// Store key of the thread identifier.
    pub thread_key: String,

    /// Store key of the bearer token.
    pub token_key: String,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Where the terminal front end persists its key-value store.
    pub state_file: Option<PathBuf>,

    /// Whether stream events are logged.
    pub verbose: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Endpoint: from `COMPASS_API_URL`, else localhost
    /// - Connect timeout: 60 seconds
    /// - Idle timeout: 120 seconds
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            endpoint: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            thread_key: THREAD_ID_KEY.to_string(),
            token_key: TOKEN_KEY.to_string(),
            use_color: true,
            state_file: None,
            verbose: false,
        }
    }

    /// Sets the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the idle timeout.  `None` disables it.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the store keys for the thread id and token.
    pub fn with_store_keys(mut self, thread_key: impl Into<String>, token_key: impl Into<String>) -> Self {
        self.thread_key = thread_key.into();
        self.token_key = token_key.into();
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Sets the state file.
    pub fn with_state_file(mut self, path: Option<PathBuf>) -> Self {
        self.state_file = path;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        let idle_timeout = match args.idle_timeout {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_IDLE_TIMEOUT),
        };

        ChatConfig {
            endpoint: args.endpoint,
            idle_timeout,
            use_color: !args.no_color,
            state_file: args.state_file.map(PathBuf::from),
            verbose: args.verbose,
            ..ChatConfig::new()
        }
    }
}
