use std::path::Path;

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::{Conversation, Message, Role};
use crate::services::conversation::{
    non_blank, preview_text, DEFAULT_PREVIEW_LENGTH, MIN_PREVIEW_LENGTH,
};
use crate::services::database::Database;

/// Conversations and their messages, with validation and ordering rules on
/// top of [`Database`].
///
/// Cloning is cheap; clones share the same connection. Construct one at
/// startup and hand it to whatever needs it.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    db: Database,
    preview_length: usize,
}

impl ConversationStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            preview_length: DEFAULT_PREVIEW_LENGTH,
        }
    }

    /// Open (or create) the store backed by the file at `path`.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        Ok(Self::new(Database::open(path).await?))
    }

    /// Maximum preview length in characters, at least [`MIN_PREVIEW_LENGTH`].
    pub fn with_preview_length(mut self, preview_length: usize) -> Self {
        self.preview_length = preview_length.max(MIN_PREVIEW_LENGTH);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn create_conversation(
        &self,
        name: &str,
        avatar: Option<&str>,
    ) -> StoreResult<Conversation> {
        if non_blank(name).is_none() {
            tracing::warn!("Rejected conversation with empty name");
            return Err(StoreError::Validation(
                "conversation name must not be empty".to_string(),
            ));
        }

        let now = now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            avatar: avatar
                .filter(|a| non_blank(a).is_some())
                .map(str::to_string),
            is_pinned: false,
            last_message_at: now,
            last_message_preview: None,
            created_at: now,
        };

        self.db.insert_conversation(&conversation).await?;
        tracing::debug!("Created conversation {} ({})", conversation.id, conversation.name);
        Ok(conversation)
    }

    /// All conversations, pinned first, then most recent activity first.
    pub async fn list_conversations(&self) -> StoreResult<Vec<Conversation>> {
        let conversations = self.db.list_conversations().await?;
        Ok(conversations
            .into_iter()
            .map(|c| self.with_preview(c))
            .collect())
    }

    pub async fn get_conversation(&self, id: &str) -> StoreResult<Conversation> {
        self.db
            .get_conversation(id)
            .await?
            .map(|c| self.with_preview(c))
            .ok_or_else(|| StoreError::conversation_not_found(id))
    }

    /// Case-insensitive name filter that keeps list ordering. A blank query
    /// matches everything.
    pub async fn search_conversations(&self, query: &str) -> StoreResult<Vec<Conversation>> {
        let conversations = self.list_conversations().await?;
        let Some(query) = non_blank(query) else {
            return Ok(conversations);
        };
        let needle = query.to_lowercase();
        Ok(conversations
            .into_iter()
            .filter(|c| c.name.to_lowercase().contains(&needle))
            .collect())
    }

    pub async fn conversation_count(&self) -> StoreResult<usize> {
        self.db.count_conversations().await
    }

    /// Remove a conversation together with all of its messages.
    pub async fn delete_conversation(&self, id: &str) -> StoreResult<()> {
        if !self.db.delete_conversation(id).await? {
            return Err(StoreError::conversation_not_found(id));
        }
        tracing::debug!("Deleted conversation {}", id);
        Ok(())
    }

    /// Flip the pinned flag. Recency is left untouched.
    pub async fn toggle_pin(&self, id: &str) -> StoreResult<Conversation> {
        let conversation = self
            .db
            .toggle_conversation_pin(id)
            .await?
            .ok_or_else(|| StoreError::conversation_not_found(id))?;
        tracing::debug!(
            "Conversation {} pinned={}",
            conversation.id,
            conversation.is_pinned
        );
        Ok(self.with_preview(conversation))
    }

    pub async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
        role: Role,
    ) -> StoreResult<Message> {
        if non_blank(text).is_none() {
            tracing::warn!("Rejected empty message for conversation {}", conversation_id);
            return Err(StoreError::Validation(
                "message text must not be empty".to_string(),
            ));
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            text: text.to_string(),
            created_at: now(),
        };

        if !self.db.insert_message(&message).await? {
            return Err(StoreError::conversation_not_found(conversation_id));
        }
        tracing::debug!(
            "Stored {} message {} in conversation {}",
            role.as_str(),
            message.id,
            conversation_id
        );
        Ok(message)
    }

    /// Messages oldest first; messages sharing a date keep the order they were sent in.
    pub async fn list_messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        self.db
            .list_messages(conversation_id)
            .await?
            .ok_or_else(|| StoreError::conversation_not_found(conversation_id))
    }

    /// Remove one message. The owning conversation's recency falls back to
    /// its newest remaining message, or its creation time.
    pub async fn delete_message(&self, id: &str) -> StoreResult<()> {
        if !self.db.delete_message(id).await? {
            return Err(StoreError::message_not_found(id));
        }
        tracing::debug!("Deleted message {}", id);
        Ok(())
    }

    /// Flush pending writes. Call once at shutdown.
    pub async fn close(&self) -> StoreResult<()> {
        self.db.checkpoint().await?;
        tracing::info!("Chat store flushed");
        Ok(())
    }

    fn with_preview(&self, mut conversation: Conversation) -> Conversation {
        conversation.last_message_preview = conversation
            .last_message_preview
            .as_deref()
            .map(|text| preview_text(text, self.preview_length));
        conversation
    }
}

/// Current time at the precision the database keeps.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
