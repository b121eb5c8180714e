//! Conversation models.

use serde::{Deserialize, Serialize};

/// Title given to conversations until one is generated or chosen.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New Chat";

/// A conversation owned by exactly one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_override: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    pub fn new(owner_id: impl Into<String>, model: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            title: DEFAULT_CONVERSATION_TITLE.to_string(),
            model: model.into(),
            system_prompt_override: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt_override = Some(prompt.into());
        self
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }

    pub fn rename(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}
