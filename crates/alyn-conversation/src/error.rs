use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("conversation log I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConversationError>;
