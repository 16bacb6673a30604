//! Run settings.
//!
//! Built-in defaults are overridden first by an optional TOML file and then by
//! `OBSMITH_*` environment variables, where `__` separates a section from its
//! key (`OBSMITH_DRIVER__REPORT_PATH=bugs.tsv`).

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{ObsmithError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub generation: GenerationSettings,
    pub driver: DriverSettings,
    pub impedance: ImpedanceSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Attempts a single production gets before giving up.
    pub retry_limit: u32,
    pub depth_ceiling: u32,
    /// Whole-statement attempts before generation is considered fatal.
    pub statement_attempts: u32,
    pub weights: StatementWeights,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            retry_limit: 100,
            depth_ceiling: 20,
            statement_attempts: 100,
            weights: StatementWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct StatementWeights {
    pub select: u32,
    pub insert: u32,
    pub update: u32,
    pub delete: u32,
}

impl Default for StatementWeights {
    fn default() -> Self {
        Self {
            select: 88,
            insert: 4,
            update: 4,
            delete: 4,
        }
    }
}

impl StatementWeights {
    pub fn as_array(&self) -> [u32; 4] {
        [self.select, self.insert, self.update, self.delete]
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    pub reconnect_backoff_ms: u64,
    pub report_path: PathBuf,
    /// Backend errors that mean the connection went away are recorded as
    /// bugs before the session is re-established.
    pub connection_loss_is_bug: bool,
    pub progress_columns: u64,
    pub graph_dir: PathBuf,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            reconnect_backoff_ms: 1000,
            report_path: PathBuf::from("bug_log.txt"),
            connection_loss_is_bug: true,
            progress_columns: 80,
            graph_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImpedanceSettings {
    pub min_samples: u64,
    pub max_error_rate: f64,
}

impl Default for ImpedanceSettings {
    fn default() -> Self {
        Self {
            min_samples: 100,
            max_error_rate: 0.99,
        }
    }
}

impl Settings {
    pub fn load(file: Option<&Path>) -> Result<Settings> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("OBSMITH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let generation = &self.generation;
        if generation.retry_limit == 0 {
            return Err(ObsmithError::Config("retry_limit must be at least 1".into()));
        }
        if generation.depth_ceiling == 0 {
            return Err(ObsmithError::Config("depth_ceiling must be at least 1".into()));
        }
        if generation.statement_attempts == 0 {
            return Err(ObsmithError::Config(
                "statement_attempts must be at least 1".into(),
            ));
        }
        if generation.weights.as_array().iter().all(|w| *w == 0) {
            return Err(ObsmithError::Config(
                "at least one statement weight must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.impedance.max_error_rate) {
            return Err(ObsmithError::Config(
                "max_error_rate must lie between 0 and 1".into(),
            ));
        }
        if self.driver.progress_columns == 0 {
            return Err(ObsmithError::Config(
                "progress_columns must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
