use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::settings::SettingsService;
use super::store::ConversationStore;
use crate::error::StoreError;
use crate::models::Role;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Chat not found: {0}")]
    ChatNotFound(String),

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A chat as delivered by a remote chat list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteChat {
    pub name: String,
    pub avatar: Option<String>,
    pub is_pinned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub role: Role,
    pub text: String,
}

/// Read side of a chat service that can pre-populate the store.
#[async_trait]
pub trait ChatSource: Send + Sync {
    async fn fetch_chat_list(&self) -> Result<Vec<RemoteChat>, SourceError>;

    /// Messages of the chat named `chat_name`, oldest first.
    async fn fetch_messages(&self, chat_name: &str) -> Result<Vec<RemoteMessage>, SourceError>;
}

/// Static in-memory chat list standing in for a chat backend.
#[derive(Debug, Clone)]
pub struct MockChatSource {
    chats: Vec<(RemoteChat, Vec<RemoteMessage>)>,
}

impl Default for MockChatSource {
    fn default() -> Self {
        let long_text = "Тест огромных сообщений ".repeat(18);
        let chat = |name: &str, avatar: &str, pinned: bool, opening: &str, closing: &str| {
            (
                RemoteChat {
                    name: name.to_string(),
                    avatar: Some(avatar.to_string()),
                    is_pinned: pinned,
                },
                vec![
                    RemoteMessage {
                        role: Role::Friend,
                        text: opening.to_string(),
                    },
                    RemoteMessage {
                        role: Role::User,
                        text: long_text.clone(),
                    },
                    RemoteMessage {
                        role: Role::Friend,
                        text: closing.to_string(),
                    },
                ],
            )
        };

        Self {
            chats: vec![
                chat("firstriend", "ava1", true, "Первый чат", "Конец первого чата"),
                chat("secondriend", "ava2", false, "Второй чат", "Конец второго чата"),
                chat("thirdFriend", "ava3", false, "Третий чат", "Конец третьего чата"),
            ],
        }
    }
}

#[async_trait]
impl ChatSource for MockChatSource {
    async fn fetch_chat_list(&self) -> Result<Vec<RemoteChat>, SourceError> {
        Ok(self.chats.iter().map(|(chat, _)| chat.clone()).collect())
    }

    async fn fetch_messages(&self, chat_name: &str) -> Result<Vec<RemoteMessage>, SourceError> {
        self.chats
            .iter()
            .find(|(chat, _)| chat.name == chat_name)
            .map(|(_, messages)| messages.clone())
            .ok_or_else(|| SourceError::ChatNotFound(chat_name.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub conversations: usize,
    pub messages: usize,
}

/// Copy every chat of `source` into `store` through its public operations.
///
/// The whole source is read before the first write, so a source failure
/// leaves the store untouched.
pub async fn seed_store(
    source: &dyn ChatSource,
    store: &ConversationStore,
) -> Result<SeedSummary, SeedError> {
    let mut fetched = Vec::new();
    for chat in source.fetch_chat_list().await? {
        let messages = source.fetch_messages(&chat.name).await?;
        fetched.push((chat, messages));
    }

    let mut summary = SeedSummary::default();
    for (chat, messages) in fetched {
        let conversation = store
            .create_conversation(&chat.name, chat.avatar.as_deref())
            .await?;

        for message in &messages {
            store
                .send_message(&conversation.id, &message.text, message.role)
                .await?;
        }
        if chat.is_pinned {
            store.toggle_pin(&conversation.id).await?;
        }

        summary.conversations += 1;
        summary.messages += messages.len();
    }

    tracing::info!(
        "Seeded {} conversations with {} messages",
        summary.conversations,
        summary.messages
    );
    Ok(summary)
}

/// Seed once per database, as recorded in the persisted settings. Returns
/// `None` when seeding is disabled or already done.
pub async fn seed_on_first_run(
    source: &dyn ChatSource,
    store: &ConversationStore,
) -> Result<Option<SeedSummary>, SeedError> {
    let db = store.database();
    let mut settings = SettingsService::load(db).await;
    if !settings.seed_on_first_run || settings.seeded {
        return Ok(None);
    }

    // Never import over data the user already has.
    let summary = if store.conversation_count().await? == 0 {
        Some(seed_store(source, store).await?)
    } else {
        None
    };

    settings.seeded = true;
    SettingsService::save(db, &settings).await?;
    Ok(summary)
}
