//! Google Gemini `GenerateContent` adapter.

mod provider;
mod request;
mod stream;

pub use provider::{DEFAULT_BASE_URL, GoogleGeminiProvider};
pub use stream::GeminiDecoder;
