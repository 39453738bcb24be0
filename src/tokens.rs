//! Provider-agnostic token estimation.
//!
//! The heuristic is roughly four characters per token. It never calls a real tokenizer, so
//! the budgeting code built on top of it must tolerate large errors in either direction.

use crate::types::Message;

/// Estimates the token cost of `text` as `ceil(chars / 4)`.
///
/// # Examples
///
/// ```
/// use kotoba_chat::tokens::estimate_tokens;
///
/// assert_eq!(estimate_tokens(""), 0);
/// assert_eq!(estimate_tokens("abcd"), 1);
/// assert_eq!(estimate_tokens("abcde"), 2);
/// ```
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Sums [`estimate_tokens`] over message contents. Roles are not counted.
pub fn estimate_message_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|message| estimate_tokens(&message.content))
        .sum()
}
