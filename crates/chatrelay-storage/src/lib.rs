//! ChatRelay Storage - Low-level storage abstraction layer
//!
//! This crate provides the persistence layer for ChatRelay, using redb as the
//! embedded database. It exposes byte-level APIs so the model types can live
//! in chatrelay-core without a dependency cycle.
//!
//! # Tables
//!
//! - `conversations` - Conversation records keyed by id
//! - `turns` - Transcript turns keyed by `(conversation_id, seq)`

pub mod conversation;
pub mod turn;

pub use conversation::ConversationStorage;
pub use turn::TurnStorage;
