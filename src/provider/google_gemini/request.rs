use serde_json::{Value, json};

use crate::budget::safe_completion_budget;
use crate::provider::ReplyRequest;
use crate::title::{TITLE_INSTRUCTION, TITLE_MAX_TOKENS, TITLE_TEMPERATURE};
use crate::types::{ImageAttachment, Message, Role};

/// Hard cap applied to Gemini output before the safety clamp.
pub(crate) const MAX_OUTPUT_TOKENS: usize = 2048;

const REPLY_TEMPERATURE: f64 = 0.7;
const FALLBACK_IMAGE_MIME: &str = "image/png";

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        other => other.as_str(),
    }
}

/// Maps messages to `contents`, attaching images as `inline_data` parts on the final entry.
pub(crate) fn build_contents(messages: &[Message], images: &[ImageAttachment]) -> Vec<Value> {
    let mut contents: Vec<Value> = messages
        .iter()
        .map(|message| {
            json!({
                "role": gemini_role(message.role),
                "parts": [{"text": message.content}],
            })
        })
        .collect();

    if let Some(parts) = contents
        .last_mut()
        .and_then(|last| last.get_mut("parts"))
        .and_then(Value::as_array_mut)
    {
        for image in images {
            let Some(data) = image.base64_payload() else {
                continue;
            };
            let mime_type = if image.mime.is_empty() {
                FALLBACK_IMAGE_MIME
            } else {
                image.mime.as_str()
            };
            parts.push(json!({"inline_data": {"mime_type": mime_type, "data": data}}));
        }
    }

    contents
}

pub(crate) fn build_reply_body(request: &ReplyRequest) -> Value {
    let max_output = safe_completion_budget(
        &request.model,
        &request.messages,
        request.max_completion_tokens.min(MAX_OUTPUT_TOKENS),
    );
    json!({
        "contents": build_contents(&request.messages, &request.images),
        "generationConfig": {
            "temperature": REPLY_TEMPERATURE,
            "maxOutputTokens": max_output,
        },
    })
}

/// Gemini has no system turn in this flow, so the instruction is folded into the user text.
pub(crate) fn build_title_body(first_message: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{"text": format!("{TITLE_INSTRUCTION}\n\nMessage:\n{first_message}")}],
        }],
        "generationConfig": {
            "temperature": TITLE_TEMPERATURE,
            "maxOutputTokens": TITLE_MAX_TOKENS,
        },
    })
}
