use std::path::PathBuf;

use anyhow::{Context, Result};

pub const APP_NAME: &str = "tgchat";
pub const DB_FILE_NAME: &str = "tgchat.db";

/// Environment variable that overrides the database location.
pub const DB_PATH_ENV: &str = "TGCHAT_DB";

/// Resolve where the database file lives.
///
/// `$TGCHAT_DB` wins, then `$XDG_DATA_HOME/tgchat/tgchat.db`, then
/// `$HOME/.local/share/tgchat/tgchat.db`.
pub fn db_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(data_dir()?.join(APP_NAME).join(DB_FILE_NAME))
}

fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("XDG_DATA_HOME") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = std::env::var("HOME").context("HOME not set")?;
    Ok(PathBuf::from(home).join(".local/share"))
}
