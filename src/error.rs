use thiserror::Error;

use crate::prod::GenerationFailure;

#[derive(Error, Debug)]
pub enum ObsmithError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Schema load error: {0}")]
    SchemaLoad(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationFailure),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("SQLite error: {0}")]
    Sqlite(String),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, ObsmithError>;

// Helper conversions
impl From<rusqlite::Error> for ObsmithError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e.to_string())
    }
}

impl From<config::ConfigError> for ObsmithError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<serde_json::Error> for ObsmithError {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(format!("invalid rng state: {e}"))
    }
}

#[cfg(feature = "mysql")]
impl From<mysql_async::Error> for ObsmithError {
    fn from(e: mysql_async::Error) -> Self {
        Self::Connection(e.to_string())
    }
}
