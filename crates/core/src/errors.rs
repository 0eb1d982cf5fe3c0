use thiserror::Error;

/// Failure to load a module. A failed load installs nothing.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModuleError {
    #[error("failed to read module `{path}`: {message}")]
    Read { path: String, message: String },
    #[error("unsupported module format for `{path}` (expected .toml or .json)")]
    UnsupportedFormat { path: String },
    #[error("failed to parse {format} module: {message}")]
    Parse { format: String, message: String },
    #[error("invalid module: {0}")]
    Validation(String),
}

/// Failure to (de)serialize runtime state or an intent document.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("failed to serialize runtime state: {0}")]
    Serialize(String),
    #[error("failed to restore runtime state: {0}")]
    Restore(String),
    #[error("invalid intent document: {0}")]
    InvalidIntent(String),
    #[error("invalid level: {0}")]
    InvalidLevel(String),
}

/// Failure reported by an action handler.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// Eligible for another attempt when the action is registered as retryable.
    #[error("{0}")]
    Retryable(String),
    /// Never retried.
    #[error("{0}")]
    Fatal(String),
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(message) | Self::Fatal(message) => message,
        }
    }
}
