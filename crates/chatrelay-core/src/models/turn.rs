//! Transcript turn models.

use chatrelay_ai::Role;
use serde::{Deserialize, Serialize};

/// Author of a turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl From<ChatRole> for Role {
    fn from(role: ChatRole) -> Self {
        match role {
            ChatRole::User => Role::User,
            ChatRole::Assistant => Role::Assistant,
            ChatRole::System => Role::System,
        }
    }
}

/// One immutable message of a conversation's transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub id: String,
    pub conversation_id: String,
    /// Position in the conversation's log, strictly increasing from 0.
    pub seq: u64,
    pub role: ChatRole,
    pub content: String,
    /// Milliseconds since the epoch; never decreases within a conversation.
    pub created_at: i64,
}

impl Turn {
    /// Build the turn that follows `previous` in the same conversation.
    pub fn next_after(
        previous: Option<&Turn>,
        conversation_id: &str,
        seq: u64,
        role: ChatRole,
        content: &str,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let created_at = previous.map_or(now, |prev| now.max(prev.created_at));
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            seq,
            role,
            content: content.to_string(),
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_at_never_goes_backwards() {
        let mut previous = Turn::next_after(None, "conv", 0, ChatRole::User, "hi");
        previous.created_at = i64::MAX - 1;

        let next = Turn::next_after(Some(&previous), "conv", 1, ChatRole::Assistant, "hello");
        assert_eq!(next.created_at, previous.created_at);
        assert_eq!(next.seq, 1);
        assert_ne!(next.id, previous.id);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        assert_eq!(Role::from(ChatRole::System), Role::System);
    }
}
