use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ChatError;
use crate::http::{DynHttpTransport, post_json_stream_with_headers, post_json_with_headers};
use crate::provider::error::status_error;
use crate::provider::{
    ChatProvider, DeltaStream, FrameDecoder, ReplyRequest, accumulate_deltas, cancellable,
};
use crate::stream::open_event_stream;
use crate::title::{TITLE_MAX_TOKENS, TITLE_TEMPERATURE};
use crate::types::image_names;

use super::request::{
    CompletionOptions, REPLY_TEMPERATURE, attach_images_to_last, build_chat_body,
    convert_messages, is_vision_model, title_messages,
};
use super::stream::ChatCompletionsDecoder;

/// Default OpenAI API host.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// HTTP plumbing shared by every chat-completions compatible backend.
pub(crate) struct CompletionsClient {
    transport: DynHttpTransport,
    base_url: String,
    timeout: Option<Duration>,
    provider: &'static str,
}

impl CompletionsClient {
    pub(crate) fn new(
        transport: DynHttpTransport,
        base_url: impl Into<String>,
        provider: &'static str,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            timeout: None,
            provider,
        }
    }

    pub(crate) fn set_base_url(&mut self, base_url: impl Into<String>) {
        self.base_url = base_url.into();
    }

    pub(crate) fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn build_headers(api_key: &str, accept: &str) -> HashMap<String, String> {
        HashMap::from([
            ("Authorization".to_string(), format!("Bearer {api_key}")),
            ("Accept".to_string(), accept.to_string()),
        ])
    }

    /// Sends a streaming request and folds the reply into snapshots.
    pub(crate) async fn stream(
        &self,
        body: &Value,
        api_key: &str,
        cancel: CancellationToken,
        decoder: ChatCompletionsDecoder,
    ) -> Result<DeltaStream, ChatError> {
        let response = cancellable(
            &cancel,
            post_json_stream_with_headers(
                self.transport.as_ref(),
                self.endpoint(),
                Self::build_headers(api_key, "text/event-stream"),
                body,
                self.timeout,
            ),
        )
        .await?;
        let frames = cancellable(&cancel, open_event_stream(response, self.provider)).await?;
        Ok(accumulate_deltas(frames, decoder, cancel))
    }

    /// Sends a non-streaming request and returns the parsed body.
    pub(crate) async fn complete(&self, body: &Value, api_key: &str) -> Result<Value, ChatError> {
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            Self::build_headers(api_key, "application/json"),
            body,
            self.timeout,
        )
        .await?;
        let text = response.text();
        if !response.is_success() {
            return Err(status_error(
                self.provider,
                response.status,
                &response.headers,
                &text,
            ));
        }
        serde_json::from_str(&text).map_err(|err| {
            ChatError::provider(self.provider, format!("failed to parse response: {err}"))
        })
    }
}

/// OpenAI Chat Completions adapter.
pub struct OpenAiChatProvider {
    client: CompletionsClient,
}

impl OpenAiChatProvider {
    /// Creates an adapter pointing at [`DEFAULT_BASE_URL`].
    pub fn new(transport: DynHttpTransport) -> Self {
        Self {
            client: CompletionsClient::new(transport, DEFAULT_BASE_URL, "openai_chat"),
        }
    }

    /// Points the adapter at a proxy or compatible host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.client.set_base_url(base_url);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.client.set_timeout(timeout);
        self
    }

    fn build_reply_body(&self, request: &ReplyRequest) -> Value {
        let mut messages = convert_messages(&request.messages);
        if !request.images.is_empty() {
            if is_vision_model(&request.model) {
                attach_images_to_last(&mut messages, &request.images);
            } else {
                let names = image_names(&request.images);
                messages.push(json!({
                    "role": "user",
                    "content": format!(
                        "🖼️ Attached images ({names}), but the selected model cannot analyze images."
                    ),
                }));
            }
        }
        build_chat_body(
            &request.model,
            messages,
            &CompletionOptions::openai(
                &request.model,
                request.max_completion_tokens,
                REPLY_TEMPERATURE,
                true,
            ),
        )
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    async fn stream_reply(
        &self,
        request: ReplyRequest,
        api_key: &str,
        cancel: CancellationToken,
    ) -> Result<DeltaStream, ChatError> {
        let body = self.build_reply_body(&request);
        debug!(
            provider = self.name(),
            model = %request.model,
            max_completion_tokens = request.max_completion_tokens,
            images = request.images.len(),
            "dispatching chat completion"
        );
        self.client
            .stream(&body, api_key, cancel, ChatCompletionsDecoder::openai())
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
            &CompletionOptions::openai(model, TITLE_MAX_TOKENS, TITLE_TEMPERATURE, false),
        );
        let response = self.client.complete(&body, api_key).await?;
        Ok(ChatCompletionsDecoder::openai()
            .extract_final_text(&response)
            .trim()
            .to_string())
    }

    fn supports_images(&self, model: &str) -> bool {
        is_vision_model(model)
    }

    fn name(&self) -> &'static str {
        "openai_chat"
    }
}
