pub mod conversation;
pub mod database;
pub mod seed;
pub mod settings;
pub mod store;

pub use database::Database;
pub use seed::{seed_on_first_run, seed_store, ChatSource, MockChatSource, SeedSummary};
pub use settings::{SettingsService, StoreSettings};
pub use store::ConversationStore;
