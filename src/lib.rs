//! Obsmith – a schema-aware random SQL generator for fuzzing database engines.
//!
//! Obsmith loads the catalog of a target (OceanBase/MySQL or SQLite), generates
//! random but type-correct statements over it, runs them, and keeps a
//! deduplicated ledger of the failures that look like engine bugs.
//!
//! Generation is a bounded stochastic backtracking search:
//! * A [`construct::TypeKeeper`] interns type identities so type matching is a
//!   pointer comparison.
//! * A [`scope::Scope`] is a chain of binding frames, the root filled once from
//!   the [`construct::Schema`], inner frames holding correlation names.
//! * Every grammar rule in [`grammar`] carries a [`prod::Prod`] with its level
//!   and retry counter. A rule makes a random choice, checks it, and retries a
//!   bounded number of times before handing the failure to its parent.
//!
//! Execution is the [`driver::Driver`] loop: each statement is rendered, sent
//! to a [`dut::Dut`] and classified as success, expected-invalid, broken
//! session or bug. Broken sessions are replaced, bugs go into the
//! [`ledger::BugLedger`], and the ledger is reported on every way a run ends.
//!
//! ## Modules
//! * [`construct`] – Type registry, tables, columns, operators, routines and the schema.
//! * [`datatype`] – The canonical type vocabulary and native type mappings.
//! * [`scope`] – Chained symbol tables.
//! * [`prod`] – Production nodes, the retry protocol and the [`prod::Generator`].
//! * [`impedance`] – Feedback that blacklists productions the target keeps rejecting.
//! * [`grammar`] – Statements and expressions, rendering, the statement factory.
//! * [`dut`] – The device-under-test contract and failure taxonomy.
//! * [`sqlite`], [`mysql`] – Backends: schema loaders and sessions.
//! * [`ledger`] – Deduplicated bugs, the summary and the report file.
//! * [`logger`] – Observers: progress, query dump, GraphML dump.
//! * [`settings`] – Layered configuration.
//! * [`driver`] – The main loop and its recovery policy.
//!
//! ## Connection strings
//! ```
//! use obsmith::mysql::ConnInfo;
//! let info = ConnInfo::parse("oceanbase://alice:secret#dbhost:3306/mydb").unwrap();
//! assert_eq!(info.user, "alice");
//! assert_eq!(info.port, Some(3306));
//! assert_eq!(info.db, "mydb");
//! ```

pub mod construct;
pub mod datatype;
pub mod driver;
pub mod dut;
pub mod error;
pub mod grammar;
pub mod impedance;
pub mod ledger;
pub mod logger;
pub mod mysql;
pub mod prod;
pub mod scope;
pub mod settings;
pub mod sqlite;
