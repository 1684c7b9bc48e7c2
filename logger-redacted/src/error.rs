use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Invalid masking rule set: {0}")]
    InvalidRuleSet(#[from] serde_json::Error),

    #[error("Invalid log filter `{directive}`: {reason}")]
    InvalidFilter { directive: String, reason: String },

    #[error("Global subscriber already installed: {0}")]
    SubscriberInit(String),
}

pub type Result<T> = std::result::Result<T, LoggerError>;
