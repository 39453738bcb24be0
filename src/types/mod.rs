//! Shared data structures for conversations, messages, models and attachments.
//!
//! Conversations are plain serde values so the session store can persist them as-is; the
//! attachment types are transient and only live for the duration of one send.

use serde::{Deserialize, Serialize};

/// Chat role understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Wire name used by the chat-completions style APIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A single turn in a conversation.
///
/// # Examples
///
/// ```
/// # use kotoba_chat::types::{Message, Role};
/// let msg = Message::user("Explain lifetimes");
/// assert_eq!(msg.role, Role::User);
/// assert_eq!(msg.content, "Explain lifetimes");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// A titled, ordered list of messages.
///
/// Message order is conversational order and is never rearranged by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Static description of a selectable model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// Identifier sent to the provider and used for routing.
    pub value: &'static str,
    /// Human-readable label.
    pub label: &'static str,
    /// Combined prompt + completion ceiling, in tokens.
    pub max_context_tokens: usize,
}

/// Context ceiling assumed for models missing from [`MODELS`].
pub const DEFAULT_CONTEXT_TOKENS: usize = 8192;

/// Model used when nothing else was chosen.
pub const DEFAULT_MODEL: &str = "gpt-4-turbo";

/// Models offered by the client together with their context ceilings.
pub const MODELS: &[ModelDescriptor] = &[
    ModelDescriptor {
        value: "gpt-5",
        label: "GPT-5",
        max_context_tokens: 8192,
    },
    ModelDescriptor {
        value: "gpt-5-mini",
        label: "GPT-5 Mini",
        max_context_tokens: 8192,
    },
    ModelDescriptor {
        value: "gpt-4",
        label: "GPT-4",
        max_context_tokens: 8192,
    },
    ModelDescriptor {
        value: "gpt-4-turbo",
        label: "GPT-4 Turbo",
        max_context_tokens: 4096,
    },
    ModelDescriptor {
        value: "gpt-3.5-turbo",
        label: "GPT-3.5 Turbo",
        max_context_tokens: 4096,
    },
    ModelDescriptor {
        value: "deepseek-chat",
        label: "DeepSeek Chat",
        max_context_tokens: 4096,
    },
    ModelDescriptor {
        value: "gemini-2.5-flash",
        label: "Gemini (Google)",
        max_context_tokens: 8192,
    },
];

/// Looks up a model descriptor by its exact identifier.
pub fn find_model(value: &str) -> Option<&'static ModelDescriptor> {
    MODELS.iter().find(|model| model.value == value)
}

/// Returns the token ceiling for `model`, defaulting to [`DEFAULT_CONTEXT_TOKENS`].
pub fn context_limit(model: &str) -> usize {
    find_model(model)
        .map(|descriptor| descriptor.max_context_tokens)
        .unwrap_or(DEFAULT_CONTEXT_TOKENS)
}

/// Maps display labels and loosely spelled ids onto canonical model identifiers.
///
/// # Examples
///
/// ```
/// # use kotoba_chat::types::normalize_model;
/// assert_eq!(normalize_model("DeepSeek Chat"), "deepseek-chat");
/// assert_eq!(normalize_model("Gemini (Google)"), "gemini-2.5-flash");
/// assert_eq!(normalize_model(" gpt-4o "), "gpt-4o");
/// ```
pub fn normalize_model(model: &str) -> String {
    let trimmed = model.trim();
    let lower = trimmed.to_lowercase();
    if lower == "deepseek chat" || (lower.contains("deepseek") && !lower.starts_with("deepseek")) {
        return "deepseek-chat".to_string();
    }
    if lower == "gemini (google)" || (lower.contains("gemini") && !lower.starts_with("gemini")) {
        return "gemini-2.5-flash".to_string();
    }
    trimmed.to_string()
}

/// Text file flattened into the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextAttachment {
    pub name: String,
    /// Markdown fence language derived from the file extension.
    pub lang: Option<&'static str>,
    pub content: String,
}

impl TextAttachment {
    /// Renders the attachment as the synthetic user message sent to the model.
    ///
    /// # Examples
    ///
    /// ```
    /// # use kotoba_chat::types::TextAttachment;
    /// let text = TextAttachment { name: "main.rs".into(), lang: Some("rust"), content: "fn main() {}".into() };
    /// assert_eq!(text.to_message().content, "📎 File: main.rs\n```rust\nfn main() {}\n```");
    /// ```
    pub fn to_message(&self) -> Message {
        Message::user(format!(
            "📎 File: {}\n```{}\n{}\n```",
            self.name,
            self.lang.unwrap_or_default(),
            self.content
        ))
    }
}

/// Image encoded as a base64 data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub name: String,
    pub mime: String,
    pub data_url: String,
}

impl ImageAttachment {
    /// Base64 payload following the comma of the data URL, if any.
    pub fn base64_payload(&self) -> Option<&str> {
        self.data_url
            .split_once(',')
            .map(|(_, data)| data.trim())
            .filter(|data| !data.is_empty())
    }
}

/// Output of the attachment preparer for one send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedAttachments {
    pub texts: Vec<TextAttachment>,
    pub images: Vec<ImageAttachment>,
}

/// Comma separated image names, used in the notes sent to models without vision.
pub fn image_names(images: &[ImageAttachment]) -> String {
    images
        .iter()
        .map(|image| image.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
