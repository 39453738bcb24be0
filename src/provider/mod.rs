use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::ChatError;
use crate::stream::SseDecoder;
use crate::types::{ImageAttachment, Message, normalize_model};

pub mod deepseek;
pub(crate) mod error;
pub mod google_gemini;
pub mod openai_chat;

/// Stream of accumulated reply snapshots; each item holds the full text produced so far.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

/// Everything an adapter needs to produce one assistant reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRequest {
    pub model: String,
    /// Budgeted window, already containing any flattened text attachments.
    pub messages: Vec<Message>,
    pub images: Vec<ImageAttachment>,
    pub max_completion_tokens: usize,
}

/// Pulls reply text out of provider JSON.
pub trait FrameDecoder: Send + Sync {
    /// Incremental text carried by one streamed frame, if any.
    fn extract_delta(&self, frame: &Value) -> Option<String>;

    /// Full text of a non-streaming response body. Empty when nothing usable is present.
    fn extract_final_text(&self, body: &Value) -> String;
}

/// A backend able to stream chat replies and name conversations.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Starts a streaming reply.
    ///
    /// The returned stream yields accumulated snapshots and ends when the provider finishes.
    /// Once `cancel` fires it yields [`ChatError::Aborted`] and stops, even while waiting on
    /// the network.
    async fn stream_reply(
        &self,
        request: ReplyRequest,
        api_key: &str,
        cancel: CancellationToken,
    ) -> Result<DeltaStream, ChatError>;

    /// Asks the model for a short conversation title.
    async fn generate_title(
        &self,
        model: &str,
        first_message: &str,
        api_key: &str,
    ) -> Result<String, ChatError>;

    /// Whether `model` accepts image input through this adapter.
    fn supports_images(&self, model: &str) -> bool;

    /// Provider name used in logs and errors.
    fn name(&self) -> &'static str;
}

/// Thread-safe provider handle.
pub type DynProvider = Arc<dyn ChatProvider>;

/// Backend family a model id routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    DeepSeek,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Gemini => "gemini",
        }
    }
}

/// Routes a model id to its backend family.
///
/// # Errors
///
/// A blank id matches no family and yields [`ChatError::UnsupportedProvider`].
///
/// # Examples
///
/// ```
/// use kotoba_chat::provider::{ProviderKind, select_provider};
///
/// assert_eq!(select_provider("DeepSeek Chat").unwrap(), ProviderKind::DeepSeek);
/// assert_eq!(select_provider("gemini-2.5-flash").unwrap(), ProviderKind::Gemini);
/// assert_eq!(select_provider("gpt-4o").unwrap(), ProviderKind::OpenAi);
/// assert!(select_provider("  ").is_err());
/// ```
pub fn select_provider(model: &str) -> Result<ProviderKind, ChatError> {
    let id = normalize_model(model).to_lowercase();
    if id.is_empty() {
        return Err(ChatError::UnsupportedProvider {
            model: model.to_string(),
        });
    }
    if id.contains("deepseek") {
        Ok(ProviderKind::DeepSeek)
    } else if id.contains("gemini") {
        Ok(ProviderKind::Gemini)
    } else {
        Ok(ProviderKind::OpenAi)
    }
}

/// Races `fut` against `cancel`, resolving to [`ChatError::Aborted`] if the token fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, ChatError>
where
    F: Future<Output = Result<T, ChatError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChatError::aborted()),
        result = fut => result,
    }
}

/// Folds decoded frames into accumulated snapshots, stopping with an abort on cancellation.
pub(crate) fn accumulate_deltas<D>(
    mut frames: SseDecoder,
    decoder: D,
    cancel: CancellationToken,
) -> DeltaStream
where
    D: FrameDecoder + 'static,
{
    Box::pin(try_stream! {
        let mut text = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ChatError::aborted()),
                frame = frames.next() => Ok(frame),
            }?;
            let Some(frame) = next else {
                break;
            };
            let frame = frame?;
            if let Some(piece) = decoder.extract_delta(&frame) {
                if !piece.is_empty() {
                    text.push_str(&piece);
                    yield text.clone();
                }
            }
        }
    })
}

/// Wraps a complete non-streamed reply as a one-item snapshot stream.
pub(crate) fn single_snapshot(text: String) -> DeltaStream {
    if text.is_empty() {
        Box::pin(futures_util::stream::empty())
    } else {
        Box::pin(futures_util::stream::once(async move { Ok(text) }))
    }
}
