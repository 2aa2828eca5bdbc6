use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid condition '{input}': {reason}")]
    InvalidCondition { input: String, reason: String },

    #[error("Unknown condition operator: {0}")]
    UnknownOperator(String),

    #[error("Slice condition on '{0}' is a grouping key and cannot be checked")]
    SliceNotCheckable(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Invalid granularity: {0}ms (must be positive)")]
    InvalidGranularity(i64),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to load entries from '{source_id}': {reason}")]
    Load { source_id: String, reason: String },

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl EngineError {
    pub fn invalid_condition(input: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidCondition {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
