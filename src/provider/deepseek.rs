//! DeepSeek adapter over the chat-completions wire format.
//!
//! DeepSeek never receives images. When some are attached a note naming them is appended
//! and the completion budget is clamped again, since the note grew the prompt after fitting.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::budget::safe_completion_budget;
use crate::error::ChatError;
use crate::http::DynHttpTransport;
use crate::provider::openai_chat::{ChatCompletionsDecoder, CompletionsClient};
use crate::provider::openai_chat::request::{
    CompletionOptions, REPLY_TEMPERATURE, TokenField, build_chat_body, convert_messages,
    title_messages,
};
use crate::provider::{ChatProvider, DeltaStream, FrameDecoder, ReplyRequest};
use crate::title::{TITLE_MAX_TOKENS, TITLE_TEMPERATURE};
use crate::types::{ImageAttachment, Message, image_names};

/// Default DeepSeek API host.
pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";

pub struct DeepSeekProvider {
    client: CompletionsClient,
}

impl DeepSeekProvider {
    pub fn new(transport: DynHttpTransport) -> Self {
        Self {
            client: CompletionsClient::new(transport, DEFAULT_BASE_URL, "deepseek"),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.client.set_base_url(base_url);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.client.set_timeout(timeout);
        self
    }

    fn options(max_tokens: usize, temperature: f64, stream: bool) -> CompletionOptions {
        CompletionOptions {
            token_field: TokenField::MaxTokens,
            max_tokens,
            temperature: Some(temperature),
            stream,
        }
    }
}

fn image_note(images: &[ImageAttachment]) -> Message {
    let names = image_names(images);
    Message::user(format!(
        "🖼️ Attached images ({names}). Note: this model does not analyze images; please switch to Gemini or an OpenAI vision model."
    ))
}

/// Final message list and completion budget sent to DeepSeek.
fn prepare_window(request: &ReplyRequest) -> (Vec<Message>, usize) {
    let mut window = request.messages.clone();
    if !request.images.is_empty() {
        window.push(image_note(&request.images));
    }
    let max_tokens = safe_completion_budget(&request.model, &window, request.max_completion_tokens);
    (window, max_tokens)
}

#[async_trait]
impl ChatProvider for DeepSeekProvider {
    async fn stream_reply(
        &self,
        request: ReplyRequest,
        api_key: &str,
        cancel: CancellationToken,
    ) -> Result<DeltaStream, ChatError> {
        let (window, max_tokens) = prepare_window(&request);
        let body = build_chat_body(
            &request.model,
            convert_messages(&window),
            &Self::options(max_tokens, REPLY_TEMPERATURE, true),
        );
        debug!(
            provider = self.name(),
            model = %request.model,
            max_tokens,
            "dispatching chat completion"
        );
        self.client
            .stream(&body, api_key, cancel, ChatCompletionsDecoder::deepseek())
            .await
    }

    async fn generate_title(
        &self,
        model: &str,
        first_message: &str,
        api_key: &str,
    ) -> Result<String, ChatError> {
        let body = build_chat_body(
            model,
            title_messages(first_message),
            &Self::options(TITLE_MAX_TOKENS, TITLE_TEMPERATURE, false),
        );
        let response = self.client.complete(&body, api_key).await?;
        Ok(ChatCompletionsDecoder::deepseek()
            .extract_final_text(&response)
            .trim()
            .to_string())
    }

    fn supports_images(&self, _model: &str) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "deepseek"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn image(name: &str) -> ImageAttachment {
        ImageAttachment {
            name: name.to_string(),
            mime: "image/jpeg".to_string(),
            data_url: "data:image/jpeg;base64,AAAA".to_string(),
        }
    }

    #[test]
    fn images_become_a_note() {
        let request = ReplyRequest {
            model: "deepseek-chat".to_string(),
            messages: vec![Message::user("look")],
            images: vec![image("a.jpg"), image("b.jpg")],
            max_completion_tokens: 1000,
        };
        let (window, max_tokens) = prepare_window(&request);
        assert_eq!(window.len(), 2);
        assert_eq!(window[1].role, Role::User);
        assert_eq!(
            window[1].content,
            "🖼️ Attached images (a.jpg, b.jpg). Note: this model does not analyze images; please switch to Gemini or an OpenAI vision model."
        );
        assert_eq!(max_tokens, 1000);
    }

    #[test]
    fn budget_is_clamped_after_fitting() {
        let request = ReplyRequest {
            model: "deepseek-chat".to_string(),
            messages: vec![Message::user("a".repeat(12_000))],
            images: Vec::new(),
            max_completion_tokens: 1024,
        };
        // 4096 - 3000 - 512
        let (_, max_tokens) = prepare_window(&request);
        assert_eq!(max_tokens, 584);
    }

    #[test]
    fn body_always_uses_max_tokens_and_temperature() {
        let body = build_chat_body(
            "deepseek-chat",
            convert_messages(&[Message::user("hi")]),
            &DeepSeekProvider::options(300, REPLY_TEMPERATURE, true),
        );
        assert_eq!(body["max_tokens"], serde_json::json!(300));
        assert_eq!(body["temperature"], serde_json::json!(0.7));
        assert_eq!(body["stream"], serde_json::json!(true));
    }
}
