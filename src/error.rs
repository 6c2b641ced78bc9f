use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn conversation_not_found(id: &str) -> Self {
        StoreError::NotFound {
            entity: "Conversation",
            id: id.to_string(),
        }
    }

    pub fn message_not_found(id: &str) -> Self {
        StoreError::NotFound {
            entity: "Message",
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Storage(format!("storage task failed: {}", err))
    }
}

impl From<chrono::ParseError> for StoreError {
    fn from(err: chrono::ParseError) -> Self {
        StoreError::Storage(format!("corrupt timestamp: {}", err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Storage(format!("corrupt settings value: {}", err))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
