use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::http::DynHttpTransport;
use crate::provider::ProviderKind;
use crate::provider::deepseek::DeepSeekProvider;
use crate::provider::google_gemini::GoogleGeminiProvider;
use crate::provider::openai_chat::OpenAiChatProvider;
use crate::registry::ProviderRegistry;
use crate::types::DEFAULT_MODEL;

/// Default quiet period before a session snapshot is written.
pub const DEFAULT_SAVE_QUIET_PERIOD_MS: u64 = 600;

/// Per-provider connection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    /// Overrides the provider's public host, e.g. for a proxy.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Declarative configuration of the chat core.
///
/// Every field has a default, so `{}` is a valid document.
///
/// # Examples
///
/// ```
/// use kotoba_chat::config::ChatConfig;
///
/// let config = ChatConfig::from_json_str(r#"{
///     "deepseek": {"base_url": "https://proxy.local"},
///     "api_keys": {"deepseek-chat": "sk-test"}
/// }"#).unwrap();
/// assert_eq!(config.default_model, "gpt-4-turbo");
/// assert_eq!(config.save_quiet_period_ms, 600);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub openai: ProviderEndpoint,
    pub deepseek: ProviderEndpoint,
    pub gemini: ProviderEndpoint,
    pub default_model: String,
    /// Time allowed for a title request, or for a reply to start streaming.
    pub request_timeout_secs: Option<u64>,
    pub save_quiet_period_ms: u64,
    /// API keys by model id.
    pub api_keys: HashMap<String, String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            openai: ProviderEndpoint::default(),
            deepseek: ProviderEndpoint::default(),
            gemini: ProviderEndpoint::default(),
            default_model: DEFAULT_MODEL.to_string(),
            request_timeout_secs: None,
            save_quiet_period_ms: DEFAULT_SAVE_QUIET_PERIOD_MS,
            api_keys: HashMap::new(),
        }
    }
}

fn invalid(field: &str, reason: &str) -> ChatError {
    ChatError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

impl ChatConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// [`ChatError::InvalidConfig`] for malformed JSON or values rejected by
    /// [`ChatConfig::validate`].
    pub fn from_json_str(json: &str) -> Result<Self, ChatError> {
        let config: Self = serde_json::from_str(json).map_err(|err| ChatError::InvalidConfig {
            field: "config".to_string(),
            reason: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects blank base URLs and model ids and zero durations.
    pub fn validate(&self) -> Result<(), ChatError> {
        for (field, endpoint) in [
            ("openai.base_url", &self.openai),
            ("deepseek.base_url", &self.deepseek),
            ("gemini.base_url", &self.gemini),
        ] {
            if endpoint
                .base_url
                .as_deref()
                .is_some_and(|url| url.trim().is_empty())
            {
                return Err(invalid(field, "must not be blank"));
            }
        }
        if self.default_model.trim().is_empty() {
            return Err(invalid("default_model", "must not be blank"));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(invalid("request_timeout_secs", "must be greater than zero"));
        }
        if self.save_quiet_period_ms == 0 {
            return Err(invalid("save_quiet_period_ms", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn save_quiet_period(&self) -> Duration {
        Duration::from_millis(self.save_quiet_period_ms)
    }
}

/// Builds a registry holding all three adapters over a shared transport.
///
/// # Errors
///
/// Propagates [`ChatConfig::validate`] failures.
pub fn build_registry(
    config: &ChatConfig,
    transport: DynHttpTransport,
) -> Result<ProviderRegistry, ChatError> {
    config.validate()?;
    let timeout = config.request_timeout();

    let mut openai = OpenAiChatProvider::new(transport.clone()).with_timeout(timeout);
    if let Some(base_url) = &config.openai.base_url {
        openai = openai.with_base_url(base_url.clone());
    }

    let mut deepseek = DeepSeekProvider::new(transport.clone()).with_timeout(timeout);
    if let Some(base_url) = &config.deepseek.base_url {
        deepseek = deepseek.with_base_url(base_url.clone());
    }

    let mut gemini = GoogleGeminiProvider::new(transport).with_timeout(timeout);
    if let Some(base_url) = &config.gemini.base_url {
        gemini = gemini.with_base_url(base_url.clone());
    }

    Ok(ProviderRegistry::builder()
        .register(ProviderKind::OpenAi, Arc::new(openai))
        .register(ProviderKind::DeepSeek, Arc::new(deepseek))
        .register(ProviderKind::Gemini, Arc::new(gemini))
        .build())
}
