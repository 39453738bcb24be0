//! OpenAI Chat Completions adapter plus the request and decoding helpers that every
//! chat-completions compatible backend reuses.

mod provider;
pub(crate) mod request;
mod stream;

pub(crate) use provider::CompletionsClient;
pub use provider::{DEFAULT_BASE_URL, OpenAiChatProvider};
pub use stream::ChatCompletionsDecoder;
