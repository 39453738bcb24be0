//! Conversation titles: the instruction sent to the model and the local fallback.

use std::sync::LazyLock;

use regex::Regex;

/// System instruction for the title request.
pub const TITLE_INSTRUCTION: &str = "You name chats. Create a short, general reference title (3–6 words) for the user's first message. Avoid private names, keep it generic, Title Case, no quotes or trailing punctuation.";

/// Completion budget for the title request.
pub const TITLE_MAX_TOKENS: usize = 16;

/// Sampling temperature for the title request, where the model accepts one.
pub const TITLE_TEMPERATURE: f64 = 0.2;

const FALLBACK_TITLE_CHARS: usize = 42;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("CODE_FENCE pattern is valid"));
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("URL pattern is valid"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("WHITESPACE pattern is valid"));

const QUOTES: &[char] = &['"', '“', '”', '\''];

/// Builds a title from the first user message without calling a model.
///
/// Code fences and URLs are dropped, whitespace collapsed, the first 42 characters kept,
/// the first letter upper-cased and trailing dots removed.
///
/// # Examples
///
/// ```
/// use kotoba_chat::title::derive_title;
///
/// assert_eq!(
///     derive_title("how do I parse https://example.com/a?b   in rust..."),
///     "How do I parse in rust"
/// );
/// assert_eq!(derive_title("```\nfn main() {}\n```"), "");
/// ```
pub fn derive_title(first_message: &str) -> String {
    let without_code = CODE_FENCE.replace_all(first_message, "");
    let without_urls = URL.replace_all(&without_code, "");
    let collapsed = WHITESPACE.replace_all(&without_urls, " ");
    let clipped: String = collapsed.trim().chars().take(FALLBACK_TITLE_CHARS).collect();

    let mut chars = clipped.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    let rest = chars.as_str().trim_end_matches('.');
    format!("{}{rest}", first.to_uppercase())
}

/// Trims a model-produced title and strips one surrounding quote on each side.
pub fn clean_title(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix(QUOTES).unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix(QUOTES).unwrap_or(trimmed);
    trimmed.trim().to_string()
}

/// Picks the final title: the cleaned model output, else the derived fallback.
///
/// Returns `None` when neither yields any text, in which case the conversation keeps
/// its current title.
pub fn resolve_title(generated: Option<&str>, first_message: &str) -> Option<String> {
    let from_model = generated.map(clean_title).unwrap_or_default();
    let title = if from_model.is_empty() {
        clean_title(&derive_title(first_message))
    } else {
        from_model
    };
    (!title.is_empty()).then_some(title)
}
