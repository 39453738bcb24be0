use serde_json::Value;

use crate::provider::FrameDecoder;

/// Reads text out of chat-completions chunks and bodies.
///
/// Streamed chunks carry text in `choices[0].delta.content`; legacy completions use
/// `choices[0].text`. Some OpenAI-compatible backends put whole messages in
/// `choices[0].message.content` mid-stream, which the DeepSeek flavour also accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatCompletionsDecoder {
    message_in_stream: bool,
}

impl ChatCompletionsDecoder {
    pub fn openai() -> Self {
        Self {
            message_in_stream: false,
        }
    }

    pub fn deepseek() -> Self {
        Self {
            message_in_stream: true,
        }
    }
}

fn string_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

impl FrameDecoder for ChatCompletionsDecoder {
    fn extract_delta(&self, frame: &Value) -> Option<String> {
        let delta = string_at(frame, "/choices/0/delta/content");
        let message = if self.message_in_stream {
            string_at(frame, "/choices/0/message/content")
        } else {
            None
        };
        delta
            .or(message)
            .or_else(|| string_at(frame, "/choices/0/text"))
            .map(str::to_string)
    }

    fn extract_final_text(&self, body: &Value) -> String {
        [
            string_at(body, "/choices/0/message/content"),
            string_at(body, "/choices/0/text"),
        ]
        .into_iter()
        .flatten()
        .find(|text| !text.is_empty())
        .unwrap_or_default()
        .to_string()
    }
}
