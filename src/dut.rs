//! The device under test: one live session to the engine being fuzzed.

use thiserror::Error;

use crate::error::Result;

/// How the driver should react to a failed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Rejected for a reason invalid-but-plausible SQL is expected to hit.
    ExpectedInvalid,
    /// The session is unusable and must be re-established.
    Broken,
    /// Anything else, which is what we are looking for.
    Unclassified,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{code}] {message}")]
pub struct Failure {
    pub code: i64,
    pub message: String,
    pub category: Category,
}

impl Failure {
    pub fn new(code: i64, message: impl Into<String>, category: Category) -> Self {
        Self {
            code,
            message: message.into(),
            category,
        }
    }
}

pub trait Dut {
    /// Runs `sql` to completion, discarding any rows.
    fn test(&mut self, sql: &str) -> std::result::Result<(), Failure>;

    /// Codes of unclassified failures that still mean the connection was lost.
    fn reconnect_codes(&self) -> &'static [i64] {
        &[]
    }
}

/// Knows how to open sessions against one engine.
pub trait Target {
    fn name(&self) -> &str;
    fn connect(&self) -> Result<Box<dyn Dut>>;
}
