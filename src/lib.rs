//! Streaming multi-provider chat core: context budgeting, attachment preparation, provider
//! adapters for OpenAI-compatible, DeepSeek and Gemini backends, and the send/stop
//! orchestrator that writes replies into a conversation store.

pub mod attachment;
pub mod budget;
pub mod config;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod persist;
pub mod provider;
pub mod registry;
pub mod session;
pub mod stream;
pub mod title;
pub mod tokens;
pub mod types;

pub use config::ChatConfig;
pub use error::ChatError;
pub use orchestrator::{ChatOrchestrator, GenerationStatus, SendOutcome};
pub use provider::{ChatProvider, DeltaStream, ProviderKind, ReplyRequest};
pub use registry::ProviderRegistry;
pub use persist::StoredSessions;
pub use session::{SessionState, SessionStore, SharedSessions};
pub use types::*;
