use serde::{Deserialize, Serialize};

use super::conversation::DEFAULT_PREVIEW_LENGTH;
use super::database::Database;
use crate::error::StoreResult;

const SETTINGS_KEY: &str = "store_settings";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Import the built-in chat list the first time the store is opened.
    pub seed_on_first_run: bool,
    /// Set once the seed import has completed.
    #[serde(default)]
    pub seeded: bool,
    #[serde(default = "default_preview_length")]
    pub preview_length: usize,
}

fn default_preview_length() -> usize {
    DEFAULT_PREVIEW_LENGTH
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            seed_on_first_run: true,
            seeded: false,
            preview_length: DEFAULT_PREVIEW_LENGTH,
        }
    }
}

pub struct SettingsService;

impl SettingsService {
    pub async fn load(db: &Database) -> StoreSettings {
        match db.get_setting(SETTINGS_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable settings: {}", e);
                StoreSettings::default()
            }),
            Ok(None) => StoreSettings::default(),
            Err(e) => {
                tracing::warn!("Failed to load settings: {}", e);
                StoreSettings::default()
            }
        }
    }

    pub async fn save(db: &Database, settings: &StoreSettings) -> StoreResult<()> {
        let json = serde_json::to_string(settings)?;
        db.set_setting(SETTINGS_KEY, &json).await
    }
}
