use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::models::DEFAULT_CONVERSATION_TITLE;

/// What a session does with the upstream once the client has gone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectPolicy {
    /// Keep consuming the upstream so the stored turn holds the whole reply.
    #[default]
    Drain,
    /// Drop the upstream at the first failed write and keep the partial reply.
    Abort,
}

impl FromStr for DisconnectPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "drain" => Ok(Self::Drain),
            "abort" => Ok(Self::Abort),
            other => Err(format!("unknown disconnect policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Used when a conversation has no override; empty means no system message.
    pub system_prompt: String,
    /// Prior turns sent upstream, most recent kept.
    pub context_turns: usize,
    pub connect_timeout: Duration,
    /// Upper bound on the silence between two upstream reads.
    pub read_timeout: Duration,
    pub disconnect_policy: DisconnectPolicy,
    /// Title that marks a conversation as still unnamed.
    pub default_title: String,
    /// Capacity of the channel between a session and the HTTP body.
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant.".to_string(),
            context_turns: 20,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            disconnect_policy: DisconnectPolicy::Drain,
            default_title: DEFAULT_CONVERSATION_TITLE.to_string(),
            channel_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        assert_eq!("Drain".parse::<DisconnectPolicy>(), Ok(DisconnectPolicy::Drain));
        assert_eq!(" abort ".parse::<DisconnectPolicy>(), Ok(DisconnectPolicy::Abort));
        assert!("later".parse::<DisconnectPolicy>().is_err());

        let parsed: DisconnectPolicy = serde_json::from_str("\"abort\"").unwrap();
        assert_eq!(parsed, DisconnectPolicy::Abort);
        assert_eq!(DisconnectPolicy::default(), DisconnectPolicy::Drain);
    }
}
