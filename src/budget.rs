//! Context-window budgeting.
//!
//! Keeps prompt plus requested completion under a model's context ceiling. The completion
//! budget yields first; after that the oldest non-system messages are evicted. System
//! messages are pinned and the newest message always survives.

use tracing::debug;

use crate::tokens::estimate_message_tokens;
use crate::types::{Message, Role, context_limit};

/// Head-room kept free on top of prompt and completion.
pub const CONTEXT_SAFETY_TOKENS: usize = 512;

/// Smallest completion budget the fitter will ever request.
pub const MIN_COMPLETION_TOKENS: usize = 256;

/// Floor applied by [`safe_completion_budget`].
pub const MIN_SAFE_COMPLETION_TOKENS: usize = 64;

/// Trimmed message window with the completion budget that fits next to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FittedWindow {
    pub messages: Vec<Message>,
    pub max_completion_tokens: usize,
}

fn over_budget(prompt: usize, completion: usize, max_total: usize) -> bool {
    prompt + completion + CONTEXT_SAFETY_TOKENS > max_total
}

fn completion_room(max_total: usize, prompt: usize) -> usize {
    max_total
        .saturating_sub(prompt)
        .saturating_sub(CONTEXT_SAFETY_TOKENS)
        .max(MIN_COMPLETION_TOKENS)
}

/// Fits `messages` and a completion budget into the context window of `model`.
///
/// # Examples
///
/// ```
/// use kotoba_chat::budget::fit_messages_to_budget;
/// use kotoba_chat::types::Message;
///
/// let fitted = fit_messages_to_budget(&[Message::user("hello")], "gpt-4", 1024);
/// assert_eq!(fitted.messages.len(), 1);
/// assert_eq!(fitted.max_completion_tokens, 1024);
/// ```
pub fn fit_messages_to_budget(
    messages: &[Message],
    model: &str,
    desired_completion_tokens: usize,
) -> FittedWindow {
    let max_total = context_limit(model);
    let mut out = messages.to_vec();

    let mut max_completion = desired_completion_tokens.max(MIN_COMPLETION_TOKENS);
    let mut prompt = estimate_message_tokens(&out);

    if over_budget(prompt, max_completion, max_total) {
        max_completion = completion_room(max_total, prompt);
    }

    // the newest message is never considered for eviction here
    let mut index = 0;
    while over_budget(prompt, max_completion, max_total) && out.len() > 1 && index < out.len() - 1
    {
        if out[index].role == Role::System {
            index += 1;
            continue;
        }
        out.remove(index);
        prompt = estimate_message_tokens(&out);
    }

    if over_budget(prompt, max_completion, max_total) && !out.is_empty() {
        let last = out.len() - 1;
        let start = if last > 0 && out[last - 1].role == Role::Assistant {
            last - 1
        } else {
            last
        };
        let minimal = out.split_off(start);
        let minimal_prompt = estimate_message_tokens(&minimal);
        max_completion = completion_room(max_total, minimal_prompt);
        debug!(
            model,
            kept = minimal.len(),
            max_completion,
            "context collapsed to minimal window"
        );
        return FittedWindow {
            messages: minimal,
            max_completion_tokens: max_completion,
        };
    }

    if out.len() != messages.len() {
        debug!(
            model,
            dropped = messages.len() - out.len(),
            max_completion,
            "evicted oldest messages to fit context"
        );
    }

    FittedWindow {
        messages: out,
        max_completion_tokens: max_completion,
    }
}

/// Clamps `requested` into `[64, max_total - prompt - safety]` for `model`.
///
/// Used where the final payload differs from the window the fitter saw, such as when notes
/// or images are appended after fitting. The floor wins when the cap drops below it.
///
/// # Examples
///
/// ```
/// use kotoba_chat::budget::safe_completion_budget;
/// use kotoba_chat::types::Message;
///
/// assert_eq!(safe_completion_budget("gpt-4", &[Message::user("hi")], 2048), 2048);
/// assert_eq!(safe_completion_budget("gpt-4", &[Message::user("hi")], 10), 64);
/// ```
pub fn safe_completion_budget(model: &str, prompt_messages: &[Message], requested: usize) -> usize {
    let max_total = context_limit(model) as i64;
    let prompt = estimate_message_tokens(prompt_messages) as i64;
    let cap = max_total - prompt - CONTEXT_SAFETY_TOKENS as i64;
    let clamped = (requested as i64).min(cap);
    clamped.max(MIN_SAFE_COMPLETION_TOKENS as i64) as usize
}

/// Completion size the orchestrator asks the fitter for: whatever the window leaves after
/// the prompt and a small margin, but never less than 500.
pub fn desired_completion_for(model: &str, prompt_messages: &[Message]) -> usize {
    let max_total = context_limit(model);
    let prompt = estimate_message_tokens(prompt_messages);
    max_total.saturating_sub(prompt).saturating_sub(256).max(500)
}
