use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub is_pinned: bool,
    /// Date of the newest message, or `created_at` while the conversation is empty.
    pub last_message_at: DateTime<Utc>,
    /// Truncated text of the newest message, for list rows.
    pub last_message_preview: Option<String>,
    pub created_at: DateTime<Utc>,
}
