use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ContractError>;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("all {capacity} image slots are occupied")]
    SlotFull { capacity: usize },

    #[error("slot index {index} is out of range (0..{capacity})")]
    SlotIndexOutOfRange { index: usize, capacity: usize },

    #[error("prompt text is empty")]
    EmptyPrompt,

    #[error("{count} reference images attached; at most {max} are supported")]
    TooManyReferenceImages { count: usize, max: usize },

    #[error("image edit mode needs at least one reference image")]
    MissingReferenceImage,

    #[error("worker count {count} is outside 1..={max}")]
    InvalidWorkerCount { count: usize, max: usize },

    #[error("unknown aspect ratio '{0}'")]
    UnknownAspectRatio(String),

    #[error("unknown generation mode '{0}'")]
    UnknownMode(String),

    /// Every candidate name from the first one onward was already taken.
    #[error(
        "no free file name after {attempts} attempts starting at {}",
        first_candidate.display()
    )]
    NamingExhausted {
        first_candidate: PathBuf,
        attempts: u32,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
