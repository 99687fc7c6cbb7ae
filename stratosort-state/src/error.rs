use thiserror::Error;

/// Outcome of a single disk write, shared by every caller whose save request
/// was coalesced into that write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("state save failed after {attempts} attempt(s): {message}")]
pub struct SaveFailure {
    pub message: String,
    pub attempts: u32,
}

impl SaveFailure {
    pub fn new(message: impl Into<String>, attempts: u32) -> Self {
        Self {
            message: message.into(),
            attempts,
        }
    }
}

pub type SaveOutcome = std::result::Result<(), SaveFailure>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Save(#[from] SaveFailure),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
