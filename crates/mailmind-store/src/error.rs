use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for mailmind_core::MailmindError {
    fn from(e: StoreError) -> Self {
        mailmind_core::MailmindError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
