mod conversation;
mod turn;

pub use conversation::{Conversation, DEFAULT_CONVERSATION_TITLE};
pub use turn::{ChatRole, Turn};
