//! Deduplicated record of the bugs found during a run.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use chrono::TimeDelta;
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::Result;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("static pattern");
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BugKey {
    pub code: i64,
    pub message: String,
}

impl BugKey {
    /// Messages are compared with runs of whitespace collapsed, so the same
    /// diagnostic wrapped differently is still the same bug.
    pub fn new(code: i64, message: &str) -> Self {
        Self {
            code,
            message: WHITESPACE.replace_all(message.trim(), " ").into_owned(),
        }
    }

    /// Short digest of the key, stable across runs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.code.to_le_bytes());
        hasher.update(self.message.as_bytes());
        hasher.finalize().to_hex()[..12].to_owned()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BugRecord {
    pub count: u64,
    pub statements: Vec<String>,
}

#[derive(Debug, Default)]
pub struct BugLedger {
    bugs: BTreeMap<BugKey, BugRecord>,
}

impl BugLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, code: i64, message: &str, sql: &str) {
        let record = self.bugs.entry(BugKey::new(code, message)).or_default();
        record.count += 1;
        record.statements.push(sql.to_owned());
    }

    pub fn get(&self, code: i64, message: &str) -> Option<&BugRecord> {
        self.bugs.get(&BugKey::new(code, message))
    }

    /// Occurrences over all keys.
    pub fn total(&self) -> u64 {
        self.bugs.values().map(|r| r.count).sum()
    }
    pub fn len(&self) -> usize {
        self.bugs.len()
    }
    pub fn is_empty(&self) -> bool {
        self.bugs.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&BugKey, &BugRecord)> {
        self.bugs.iter()
    }

    pub fn write_summary(&self, w: &mut dyn Write, elapsed: TimeDelta) -> io::Result<()> {
        writeln!(w, "bugs found: {}", self.total())?;
        writeln!(w, "number\terr_no\ttype-of-error\tfingerprint")?;
        for (key, record) in &self.bugs {
            writeln!(
                w,
                "{}\t{}\t{}\t{}",
                record.count,
                key.code,
                key.message,
                key.fingerprint()
            )?;
        }
        let seconds = elapsed.num_seconds();
        writeln!(
            w,
            "elapsed: {:02}:{:02}:{:02}",
            seconds / 3600,
            (seconds % 3600) / 60,
            seconds % 60
        )
    }

    /// Rewrites `path` with one tab-separated row per triggering statement,
    /// grouped by bug.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(b"err_no\terr_info\tsql_info\n")?;
        for (key, record) in &self.bugs {
            for sql in &record.statements {
                write!(out, "{}\t{}\t{}\n\n", key.code, key.message, sql)?;
            }
            out.write_all(b"\n\n")?;
        }
        out.flush()?;
        Ok(())
    }
}
