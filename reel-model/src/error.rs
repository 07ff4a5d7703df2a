use std::fmt::{self, Display};

/// Errors produced by model builders and persisted-value parsing.
#[derive(Debug)]
pub enum ModelError {
    InvalidTrigger(String),
    UnknownState(String),
    Data(serde_json::Error),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidTrigger(msg) => {
                write!(f, "invalid trigger: {msg}")
            }
            ModelError::UnknownState(raw) => {
                write!(f, "unknown persisted state '{raw}'")
            }
            ModelError::Data(err) => write!(f, "invalid job data: {err}"),
        }
    }
}

impl std::error::Error for ModelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ModelError::Data(err) => Some(err),
            ModelError::InvalidTrigger(_) | ModelError::UnknownState(_) => None,
        }
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Data(err)
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
