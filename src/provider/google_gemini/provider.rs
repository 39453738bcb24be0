use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ChatError, provider_error_message};
use crate::http::{DynHttpTransport, post_json_stream_with_headers, post_json_with_headers};
use crate::provider::error::status_error;
use crate::provider::{
    ChatProvider, DeltaStream, FrameDecoder, ReplyRequest, accumulate_deltas, cancellable,
    single_snapshot,
};
use crate::stream::open_event_stream;

use super::request::{build_reply_body, build_title_body};
use super::stream::GeminiDecoder;

/// Default Google Generative Language host.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Method {
    StreamGenerate,
    Generate,
}

/// Where the API key travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthStyle {
    Header,
    QueryParam,
}

/// One attempt in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rung {
    pub(crate) api_version: &'static str,
    pub(crate) method: Method,
    pub(crate) auth: AuthStyle,
}

impl Rung {
    const fn new(api_version: &'static str, method: Method, auth: AuthStyle) -> Self {
        Self {
            api_version,
            method,
            auth,
        }
    }
}

pub(crate) const REPLY_RUNGS: [Rung; 4] = [
    Rung::new("v1beta", Method::StreamGenerate, AuthStyle::Header),
    Rung::new("v1beta", Method::Generate, AuthStyle::Header),
    Rung::new("v1", Method::Generate, AuthStyle::Header),
    Rung::new("v1", Method::Generate, AuthStyle::QueryParam),
];

pub(crate) const TITLE_RUNGS: [Rung; 2] = [
    Rung::new("v1beta", Method::Generate, AuthStyle::Header),
    Rung::new("v1", Method::Generate, AuthStyle::Header),
];

/// Only failures the next rung might fix move the chain forward; network errors and
/// cancellation end it.
fn falls_through(err: &ChatError) -> bool {
    matches!(
        err,
        ChatError::Provider { .. } | ChatError::Auth { .. } | ChatError::RateLimit { .. }
    )
}

fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

/// Google Gemini adapter with the streaming to non-streaming fallback chain.
pub struct GoogleGeminiProvider {
    transport: DynHttpTransport,
    base_url: String,
    timeout: Option<Duration>,
}

impl GoogleGeminiProvider {
    pub fn new(transport: DynHttpTransport) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: None,
        }
    }

    /// Overrides the host, e.g. for a proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the URL of `rung` for `model`, carrying the key as a query parameter when
    /// the rung asks for it.
    pub(crate) fn endpoint(
        &self,
        rung: Rung,
        model: &str,
        api_key: &str,
    ) -> Result<String, ChatError> {
        let base = self.base_url.trim_end_matches('/');
        let path = model_path(model);
        let url = match rung.method {
            Method::StreamGenerate => {
                format!("{base}/{}/{path}:streamGenerateContent?alt=sse", rung.api_version)
            }
            Method::Generate => format!("{base}/{}/{path}:generateContent", rung.api_version),
        };
        match rung.auth {
            AuthStyle::Header => Ok(url),
            AuthStyle::QueryParam => reqwest::Url::parse_with_params(&url, &[("key", api_key)])
                .map(String::from)
                .map_err(|err| ChatError::InvalidConfig {
                    field: "gemini.base_url".to_string(),
                    reason: err.to_string(),
                }),
        }
    }

    fn build_headers(rung: Rung, api_key: &str) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if rung.auth == AuthStyle::Header {
            headers.insert("x-goog-api-key".to_string(), api_key.to_string());
        }
        let accept = match rung.method {
            Method::StreamGenerate => "text/event-stream",
            Method::Generate => "application/json",
        };
        headers.insert("Accept".to_string(), accept.to_string());
        headers
    }

    async fn stream_rung(
        &self,
        rung: Rung,
        model: &str,
        body: &Value,
        api_key: &str,
        cancel: &CancellationToken,
    ) -> Result<DeltaStream, ChatError> {
        let response = cancellable(
            cancel,
            post_json_stream_with_headers(
                self.transport.as_ref(),
                self.endpoint(rung, model, api_key)?,
                Self::build_headers(rung, api_key),
                body,
                self.timeout,
            ),
        )
        .await?;
        let frames = cancellable(cancel, open_event_stream(response, self.name())).await?;
        Ok(accumulate_deltas(frames, GeminiDecoder, cancel.clone()))
    }

    /// Runs a non-streaming rung; an `error` field in a 2xx body still counts as failure.
    async fn generate_rung(
        &self,
        rung: Rung,
        model: &str,
        body: &Value,
        api_key: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, ChatError> {
        let response = cancellable(
            cancel,
            post_json_with_headers(
                self.transport.as_ref(),
                self.endpoint(rung, model, api_key)?,
                Self::build_headers(rung, api_key),
                body,
                self.timeout,
            ),
        )
        .await?;
        let text = response.text();
        if !response.is_success() {
            return Err(status_error(
                self.name(),
                response.status,
                &response.headers,
                &text,
            ));
        }
        let parsed: Value = serde_json::from_str(&text).map_err(|err| {
            ChatError::provider(self.name(), format!("failed to parse response: {err}"))
        })?;
        if parsed.get("error").is_some() {
            return Err(ChatError::provider(self.name(), provider_error_message(&text)));
        }
        Ok(parsed)
    }

    async fn run_rung(
        &self,
        rung: Rung,
        model: &str,
        body: &Value,
        api_key: &str,
        cancel: &CancellationToken,
    ) -> Result<DeltaStream, ChatError> {
        match rung.method {
            Method::StreamGenerate => self.stream_rung(rung, model, body, api_key, cancel).await,
            Method::Generate => {
                let parsed = self.generate_rung(rung, model, body, api_key, cancel).await?;
                Ok(single_snapshot(GeminiDecoder.extract_final_text(&parsed)))
            }
        }
    }
}

fn exhausted(provider: &'static str, last_error: Option<ChatError>) -> ChatError {
    last_error.unwrap_or_else(|| ChatError::provider(provider, "no endpoint attempted"))
}

#[async_trait]
impl ChatProvider for GoogleGeminiProvider {
    async fn stream_reply(
        &self,
        request: ReplyRequest,
        api_key: &str,
        cancel: CancellationToken,
    ) -> Result<DeltaStream, ChatError> {
        let body = build_reply_body(&request);
        debug!(
            provider = self.name(),
            model = %request.model,
            images = request.images.len(),
            "dispatching generate content"
        );

        let mut last_error = None;
        for rung in REPLY_RUNGS {
            match self
                .run_rung(rung, &request.model, &body, api_key, &cancel)
                .await
            {
                Ok(deltas) => {
                    info!(
                        provider = self.name(),
                        api_version = rung.api_version,
                        method = ?rung.method,
                        auth = ?rung.auth,
                        "gemini endpoint accepted request"
                    );
                    return Ok(deltas);
                }
                Err(err) if falls_through(&err) => {
                    warn!(
                        provider = self.name(),
                        api_version = rung.api_version,
                        method = ?rung.method,
                        error = %err,
                        "gemini endpoint failed, trying next"
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(exhausted(self.name(), last_error))
    }

    async fn generate_title(
        &self,
        model: &str,
        first_message: &str,
        api_key: &str,
    ) -> Result<String, ChatError> {
        let body = build_title_body(first_message);
        let never = CancellationToken::new();

        let mut last_error = None;
        for rung in TITLE_RUNGS {
            match self.generate_rung(rung, model, &body, api_key, &never).await {
                Ok(parsed) => return Ok(GeminiDecoder.extract_title(&parsed)),
                Err(err) if falls_through(&err) => last_error = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(exhausted(self.name(), last_error))
    }

    fn supports_images(&self, _model: &str) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "google_gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::reqwest::default_dyn_transport;

    fn provider() -> GoogleGeminiProvider {
        GoogleGeminiProvider::new(default_dyn_transport().expect("transport"))
    }

    #[test]
    fn rung_urls_follow_fallback_order() {
        let provider = provider();
        let urls: Vec<String> = REPLY_RUNGS
            .iter()
            .map(|rung| {
                provider
                    .endpoint(*rung, "gemini-2.5-flash", "k-1")
                    .expect("url")
            })
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse",
                "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent",
                "https://generativelanguage.googleapis.com/v1/models/gemini-2.5-flash:generateContent",
                "https://generativelanguage.googleapis.com/v1/models/gemini-2.5-flash:generateContent?key=k-1",
            ]
        );
    }

    #[test]
    fn query_key_is_percent_encoded() {
        let url = provider()
            .with_base_url("http://localhost:8080/")
            .endpoint(REPLY_RUNGS[3], "models/gemini-pro", "a b&c")
            .expect("url");
        assert_eq!(
            url,
            "http://localhost:8080/v1/models/gemini-pro:generateContent?key=a+b%26c"
        );
    }

    #[test]
    fn query_rung_sends_no_key_header() {
        let headers = GoogleGeminiProvider::build_headers(REPLY_RUNGS[3], "secret");
        assert!(!headers.contains_key("x-goog-api-key"));
        let headers = GoogleGeminiProvider::build_headers(REPLY_RUNGS[0], "secret");
        assert_eq!(headers.get("x-goog-api-key"), Some(&"secret".to_string()));
    }

    #[test]
    fn only_provider_class_errors_fall_through() {
        assert!(falls_through(&ChatError::provider("google_gemini", "404")));
        assert!(falls_through(&ChatError::Auth {
            message: "bad key".into()
        }));
        assert!(!falls_through(&ChatError::transport("reset")));
        assert!(!falls_through(&ChatError::aborted()));
    }
}
