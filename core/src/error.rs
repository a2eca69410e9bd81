use thiserror::Error;

/// Error taxonomy from the error-handling design: each variant maps to one
/// row of that table so callers can decide retry/absorb/abort behavior by
/// matching on the variant rather than on message text.
#[derive(Error, Debug)]
pub enum DeployBotError {
    #[error("transient io error: {0}")]
    TransientIo(#[from] std::io::Error),

    #[error("parse error in {context}: {message}")]
    Parse { context: String, message: String },

    #[error("external call to {what} timed out after {timeout_s}s")]
    ExternalTimeout { what: String, timeout_s: u64 },

    #[error("contract violation: {0}")]
    Contract(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DeployBotError>;

impl serde::Serialize for DeployBotError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
