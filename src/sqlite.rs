//! SQLite as a fuzzing target, through rusqlite.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use tracing::{debug, info};

use crate::construct::{Schema, SqlType, Table, TypeKeeper};
use crate::datatype::DataType;
use crate::dut::{Category, Dut, Failure, Target};
use crate::error::Result;

lazy_static! {
    // diagnostics that random but well-typed SQL runs into all the time
    static ref EXPECTED: Regex = Regex::new(
        r"(?i)syntax error|no such (table|column|function)|ambiguous column name|misuse of aggregate|wrong number of arguments|no tables specified|too many terms|incomplete input"
    )
    .expect("static pattern");
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Reads tables and views from `sqlite_master`, their columns from
/// `pragma table_info`, and registers the builtin vocabulary.
pub fn load_schema(path: &Path, exclude_catalog: bool, types: Arc<TypeKeeper>) -> Result<Schema> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut schema = Schema::new(types);
    let relations: Vec<(String, String)> = {
        let mut stmt = conn.prepare(
            "select type, name from sqlite_master \
             where type in ('table', 'view') and name not like 'sqlite_%' \
             order by name",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    for (kind, name) in relations {
        let columns = table_columns(&conn, &schema, &name)?;
        let base_table = kind == "table";
        debug!(table = %name, columns = columns.len(), base_table, "loaded relation");
        schema.add_table(Table::new(name, "main", base_table, base_table, columns));
    }
    if !exclude_catalog {
        let text = schema.sql_type(DataType::Varchar);
        let integer = schema.sql_type(DataType::Integer);
        let columns = vec![
            (String::from("type"), text.clone()),
            (String::from("name"), text.clone()),
            (String::from("tbl_name"), text.clone()),
            (String::from("rootpage"), integer),
            (String::from("sql"), text),
        ];
        schema.add_table(Table::new("sqlite_master", "main", false, false, columns));
    }
    schema.register_common_builtins();
    info!(path = %path.display(), tables = schema.tables().len(), "schema loaded");
    Ok(schema)
}

fn table_columns(conn: &Connection, schema: &Schema, table: &str) -> Result<Vec<(String, SqlType)>> {
    let mut stmt = conn.prepare(&format!("pragma table_info({})", quote_ident(table)))?;
    let rows = stmt.query_map([], |row| {
        let name: String = row.get(1)?;
        let declared: String = row.get(2)?;
        Ok((name, declared))
    })?;
    let mut columns = Vec::new();
    for row in rows {
        let (name, declared) = row?;
        let data_type = DataType::from_sqlite_declared(&declared)?;
        columns.push((name, schema.sql_type(data_type)));
    }
    Ok(columns)
}

fn classify(e: rusqlite::Error) -> Failure {
    let code = e.sqlite_error().map_or(-1, |err| i64::from(err.extended_code));
    let message = e.to_string();
    let category = match e.sqlite_error_code() {
        Some(ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::SystemIoFailure) => {
            Category::Broken
        }
        Some(ErrorCode::ConstraintViolation) => Category::ExpectedInvalid,
        _ if EXPECTED.is_match(&message) => Category::ExpectedInvalid,
        _ => Category::Unclassified,
    };
    Failure::new(code, message, category)
}

pub struct SqliteDut {
    conn: Connection,
}

impl SqliteDut {
    pub fn open(path: &Path) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Ok(Self {
            conn: Connection::open_with_flags(path, flags)?,
        })
    }
}

impl Dut for SqliteDut {
    fn test(&mut self, sql: &str) -> std::result::Result<(), Failure> {
        let mut stmt = self.conn.prepare(sql).map_err(classify)?;
        let mut rows = stmt.query([]).map_err(classify)?;
        while rows.next().map_err(classify)?.is_some() {}
        Ok(())
    }
}

pub struct SqliteTarget {
    path: PathBuf,
}

impl SqliteTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Target for SqliteTarget {
    fn name(&self) -> &str {
        "sqlite"
    }
    fn connect(&self) -> Result<Box<dyn Dut>> {
        Ok(Box::new(SqliteDut::open(&self.path)?))
    }
}
