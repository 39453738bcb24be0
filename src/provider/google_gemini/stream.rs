use serde_json::Value;

use crate::provider::FrameDecoder;

/// Reads text from `GenerateContent` responses and stream chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeminiDecoder;

fn part_texts(value: &Value) -> Vec<&str> {
    value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .filter(|text| !text.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl GeminiDecoder {
    /// Title responses join their parts with single spaces.
    pub fn extract_title(&self, body: &Value) -> String {
        part_texts(body).join(" ").trim().to_string()
    }
}

impl FrameDecoder for GeminiDecoder {
    fn extract_delta(&self, frame: &Value) -> Option<String> {
        let texts = part_texts(frame);
        (!texts.is_empty()).then(|| texts.concat())
    }

    fn extract_final_text(&self, body: &Value) -> String {
        let joined = part_texts(body).join("\n");
        if !joined.is_empty() {
            return joined;
        }
        body.pointer("/output/0/content/text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}
