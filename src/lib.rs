//! Local-first chat storage: conversations, their messages, pinning and
//! recency ordering, persisted in SQLite.

pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use error::{StoreError, StoreResult};
pub use models::{Conversation, Message, Role};
pub use services::ConversationStore;
