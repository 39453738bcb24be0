use std::collections::HashMap;
use std::time::Duration;

use crate::error::{ChatError, provider_error_message};

/// Classifies a failed HTTP exchange.
///
/// 401 and 403 become [`ChatError::Auth`], 429 becomes [`ChatError::RateLimit`] carrying any
/// numeric `Retry-After`, and everything else is a [`ChatError::Provider`]. The message is
/// always the provider's `error.message` when present.
pub(crate) fn status_error(
    provider: &'static str,
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> ChatError {
    let message = provider_error_message(body);
    match status {
        401 | 403 => ChatError::Auth { message },
        429 => ChatError::RateLimit {
            message,
            retry_after: retry_after_from_headers(headers),
        },
        _ => ChatError::Provider { provider, message },
    }
}

/// Reads a numeric `Retry-After` header; HTTP-date values are ignored.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
