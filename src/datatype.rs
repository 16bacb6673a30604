//! The canonical type vocabulary shared by every backend.
//!
//! Schema loaders see whatever type names the catalog of their engine uses
//! (`BIGINT`, `MEDIUMTEXT`, `LONGBLOB`, ...). Generation only ever reasons about
//! the handful of canonical families below, so each loader maps native names
//! into this vocabulary before interning them in the [`crate::construct::TypeKeeper`].

// used to print out readable forms of a data type
use std::fmt;

use crate::error::{ObsmithError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Integer,
    Double,
    Varchar,
    Timestamp,
    Bit,
    Binary,
    Enum,
    Set,
}

impl DataType {
    pub const ALL: [DataType; 8] = [
        DataType::Integer,
        DataType::Double,
        DataType::Varchar,
        DataType::Timestamp,
        DataType::Bit,
        DataType::Binary,
        DataType::Enum,
        DataType::Set,
    ];

    /// The canonical name, which is also the key used for type interning.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Double => "DOUBLE",
            DataType::Varchar => "VARCHAR",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Bit => "BIT",
            DataType::Binary => "BINARY",
            DataType::Enum => "ENUM",
            DataType::Set => "SET",
        }
    }

    pub fn from_name(name: &str) -> Option<DataType> {
        DataType::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Maps a MySQL/OceanBase `DATA_TYPE` into the canonical vocabulary.
    /// Anything outside the known families is a load error.
    pub fn from_native(native: &str) -> Result<DataType> {
        let native = native.trim().to_uppercase();
        let canonical = match native.as_str() {
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" => DataType::Integer,
            "DOUBLE" | "FLOAT" | "NUMERIC" | "DECIMAL" => DataType::Double,
            "VARCHAR" | "CHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" => DataType::Varchar,
            "DATE" | "TIME" | "DATETIME" | "TIMESTAMP" | "YEAR" => DataType::Timestamp,
            "BIT" => DataType::Bit,
            "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
                DataType::Binary
            }
            "ENUM" => DataType::Enum,
            "SET" => DataType::Set,
            _ => {
                return Err(ObsmithError::SchemaLoad(format!(
                    "Unhandled data type: {native}"
                )));
            }
        };
        Ok(canonical)
    }

    /// Maps a declared SQLite column type. The declared type is free text, so
    /// the exact native names are tried first (after dropping any `(n, m)`
    /// suffix) and SQLite's affinity rules are the fallback.
    pub fn from_sqlite_declared(declared: &str) -> Result<DataType> {
        let upper = declared.trim().to_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();
        if base.is_empty() {
            return Ok(DataType::Binary);
        }
        if let Ok(canonical) = DataType::from_native(base) {
            return Ok(canonical);
        }
        if upper.contains("INT") {
            Ok(DataType::Integer)
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Ok(DataType::Varchar)
        } else if upper.contains("BLOB") {
            Ok(DataType::Binary)
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Ok(DataType::Double)
        } else {
            Err(ObsmithError::SchemaLoad(format!(
                "Unhandled data type: {declared}"
            )))
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
