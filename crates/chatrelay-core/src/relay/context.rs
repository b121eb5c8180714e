//! Upstream message list for one relay invocation.

use chatrelay_ai::Message;

use crate::models::{Conversation, Turn};

/// System prompt for `conversation`: its override, else `default_prompt`.
pub fn system_prompt<'a>(conversation: &'a Conversation, default_prompt: &'a str) -> &'a str {
    conversation
        .system_prompt_override
        .as_deref()
        .unwrap_or(default_prompt)
}

/// `[system prompt, ...last context_turns prior turns, new user message]`.
///
/// Oldest prior turns are dropped first. A blank system prompt is left out.
pub fn build_messages(
    system_prompt: &str,
    prior_turns: &[Turn],
    context_turns: usize,
    user_message: &str,
) -> Vec<Message> {
    let window = &prior_turns[prior_turns.len().saturating_sub(context_turns)..];

    let mut messages = Vec::with_capacity(window.len() + 2);
    if !system_prompt.trim().is_empty() {
        messages.push(Message::system(system_prompt));
    }
    messages.extend(
        window
            .iter()
            .map(|turn| Message::new(turn.role.into(), turn.content.clone())),
    );
    messages.push(Message::user(user_message));
    messages
}
