//! Relay of one conversation turn from the upstream provider to a client.
//!
//! A session moves through `Initializing -> Streaming -> Finalizing` and ends
//! `Completed` or `Failed`. [`RelayService::prepare`] covers everything up to
//! an open upstream, so failures there can still become a plain error
//! response. [`RelaySession::run`] does the streaming and never returns an
//! error: whatever happens is described by the [`RelayOutcome`].

mod config;
pub mod context;
mod session;

use serde::Serialize;

use crate::error::RelayError;
use crate::models::Turn;

pub use config::{DisconnectPolicy, RelayConfig};
pub use session::{RelayService, RelaySession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    Initializing,
    Streaming,
    Finalizing,
    Completed,
    Failed,
}

impl RelayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Streaming => "streaming",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Everything a finished session did.
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    pub state: RelayState,
    /// Concatenation of every fragment received from upstream.
    pub content: String,
    pub fragments_total: usize,
    pub fragments_forwarded: usize,
    /// At least one event reached the client.
    pub started: bool,
    pub client_disconnected: bool,
    /// The upstream was dropped before it finished.
    pub upstream_aborted: bool,
    pub user_turn: Turn,
    pub assistant_turn: Option<Turn>,
    pub error: Option<RelayError>,
}
