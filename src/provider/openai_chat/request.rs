use serde_json::{Map, Value, json};

use crate::title::TITLE_INSTRUCTION;
use crate::types::{ImageAttachment, Message};

const VISION_MARKERS: &[&str] = &["gpt-4o", "gpt-4-vision", "o-mini"];

/// Sampling temperature for replies on models that accept one.
pub(crate) const REPLY_TEMPERATURE: f64 = 0.7;

/// Name of the completion-size field in the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenField {
    MaxTokens,
    MaxCompletionTokens,
}

impl TokenField {
    fn key(self) -> &'static str {
        match self {
            TokenField::MaxTokens => "max_tokens",
            TokenField::MaxCompletionTokens => "max_completion_tokens",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct CompletionOptions {
    pub(crate) token_field: TokenField,
    pub(crate) max_tokens: usize,
    pub(crate) temperature: Option<f64>,
    pub(crate) stream: bool,
}

impl CompletionOptions {
    /// OpenAI rules: `gpt-5*` takes `max_completion_tokens` and no temperature.
    pub(crate) fn openai(model: &str, max_tokens: usize, temperature: f64, stream: bool) -> Self {
        let reasoning = is_gpt5_family(model);
        Self {
            token_field: if reasoning {
                TokenField::MaxCompletionTokens
            } else {
                TokenField::MaxTokens
            },
            max_tokens,
            temperature: (!reasoning).then_some(temperature),
            stream,
        }
    }
}

pub(crate) fn is_gpt5_family(model: &str) -> bool {
    model.starts_with("gpt-5")
}

/// Models that take `image_url` content parts.
pub(crate) fn is_vision_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    VISION_MARKERS.iter().any(|marker| lower.contains(marker))
}

pub(crate) fn convert_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| json!({"role": message.role.as_str(), "content": message.content}))
        .collect()
}

/// Replaces the last message with a user message carrying its text plus every image.
pub(crate) fn attach_images_to_last(messages: &mut Vec<Value>, images: &[ImageAttachment]) {
    let text = messages
        .pop()
        .and_then(|last| last.get("content").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default();
    let mut parts = vec![json!({"type": "text", "text": text})];
    parts.extend(
        images
            .iter()
            .map(|image| json!({"type": "image_url", "image_url": {"url": image.data_url}})),
    );
    messages.push(json!({"role": "user", "content": parts}));
}

pub(crate) fn title_messages(first_message: &str) -> Vec<Value> {
    convert_messages(&[
        Message::system(TITLE_INSTRUCTION),
        Message::user(first_message),
    ])
}

pub(crate) fn build_chat_body(
    model: &str,
    messages: Vec<Value>,
    options: &CompletionOptions,
) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert("messages".to_string(), Value::Array(messages));
    body.insert(
        options.token_field.key().to_string(),
        Value::from(options.max_tokens),
    );
    if let Some(temperature) = options.temperature {
        body.insert("temperature".to_string(), Value::from(temperature));
    }
    if options.stream {
        body.insert("stream".to_string(), Value::Bool(true));
    }
    Value::Object(body)
}
