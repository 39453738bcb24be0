use std::time::Duration;

use thiserror::Error;

/// Aggregates every failure mode exposed by the chat core.
///
/// Only validation and provider-class errors are meant to reach the user. Cancellation and
/// title-generation failures are absorbed by the orchestrator with a fallback behaviour.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Pre-flight rejection: missing API key, empty input, no selected conversation.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Represents transport-layer or networking failures.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Reports invalid or missing credentials.
    #[error("auth failure: {message}")]
    Auth { message: String },
    /// Indicates that the provider throttled the request.
    #[error("rate limited: {message}")]
    RateLimit {
        /// Raw message returned by the upstream provider.
        message: String,
        /// Optional wait duration suggested by the provider before retrying.
        retry_after: Option<Duration>,
    },
    /// Non-2xx status or an error payload embedded in a provider response.
    #[error("provider {provider} error: {message}")]
    Provider {
        /// Name of the provider, such as `openai_chat`.
        provider: &'static str,
        /// Message extracted from the provider's error field, or the raw body.
        message: String,
    },
    /// The in-flight request was cancelled by the caller.
    #[error("request aborted: {message}")]
    Aborted { message: String },
    /// No adapter can serve the requested model.
    #[error("unsupported model/provider: {model}")]
    UnsupportedProvider { model: String },
    /// Reading a staged attachment failed; the whole batch is rejected.
    #[error("failed to read attachment {name}: {message}")]
    Attachment { name: String, message: String },
    /// Malformed conversation import payload.
    #[error("failed to import: {message}")]
    Import { message: String },
    /// Secondary title request failed. Never surfaced to the user.
    #[error("title generation failed: {message}")]
    TitleGeneration { message: String },
    /// Raised when building or validating configuration fails.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the configuration field that failed validation.
        field: String,
        /// Additional context explaining why the field is invalid.
        reason: String,
    },
    /// Loading or saving the conversation list failed.
    #[error("persistence error: {message}")]
    Persistence { message: String },
}

impl ChatError {
    /// Creates a [`ChatError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use kotoba_chat::error::ChatError;
    ///
    /// let err = ChatError::transport("dns lookup failed");
    /// assert!(matches!(err, ChatError::Transport { .. }));
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a [`ChatError::Provider`] with the given provider name and message.
    ///
    /// # Examples
    ///
    /// ```
    /// use kotoba_chat::error::ChatError;
    ///
    /// let err = ChatError::provider("openai_chat", "bad JSON payload");
    /// assert!(matches!(err, ChatError::Provider { provider: "openai_chat", .. }));
    /// ```
    pub fn provider<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Creates a [`ChatError::Validation`].
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates the cancellation error raised when a generation is stopped.
    pub fn aborted() -> Self {
        Self::Aborted {
            message: "generation stopped by user".to_string(),
        }
    }

    /// Returns `true` for the cancellation outcome, which callers treat as a clean stop.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Returns `true` when the error should be shown to the person driving the chat.
    ///
    /// # Examples
    ///
    /// ```
    /// use kotoba_chat::error::ChatError;
    ///
    /// assert!(ChatError::validation("Please enter a message").is_user_facing());
    /// assert!(!ChatError::aborted().is_user_facing());
    /// ```
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            Self::Aborted { .. } | Self::TitleGeneration { .. } | Self::Persistence { .. }
        )
    }
}

/// Pulls `error.message` out of a provider error body, falling back to the raw text.
///
/// All three backends wrap failures as `{"error": {"message": ...}}`; anything else is
/// reported verbatim so the user still sees what came back.
pub(crate) fn provider_error_message(body: &str) -> String {
    let trimmed = body.trim();
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value
            .pointer("/error/message")
            .and_then(|message| message.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        Err(_) if trimmed.is_empty() => "{}".to_string(),
        Err(_) => trimmed.to_string(),
    }
}
