// Public modules
pub mod chat;
pub mod client;
pub mod error;
pub mod reducer;
pub mod render;
pub mod session_logger;
pub mod sse;
pub mod store;
pub mod types;
pub mod utils;

mod observability;

// Re-exports
pub use chat::{ChatConfig, ChatSession};
pub use client::{AgentClient, ChatStream, Transport};
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use reducer::{SessionState, SessionUpdate};
pub use session_logger::{NoopLogger, SessionLogger, StderrLogger};
pub use store::{FileStore, KeyValueStore, MemoryStore, THREAD_ID_KEY, TOKEN_KEY};
pub use types::*;
