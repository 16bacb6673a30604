//! OceanBase and MySQL as fuzzing targets, through mysql_async.
//!
//! Connection strings look like `oceanbase://user:password#host:port/db`.
//! The client is asynchronous, so each session owns a current-thread tokio
//! runtime and blocks on it; the fuzzer itself stays single-threaded.

use crate::error::{ObsmithError, Result};

pub const SCHEME: &str = "oceanbase://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnInfo {
    pub user: String,
    pub password: String,
    pub host: String,
    /// `None` leaves the client default.
    pub port: Option<u16>,
    pub db: String,
}

impl ConnInfo {
    pub fn parse(conninfo: &str) -> Result<ConnInfo> {
        let rest = conninfo.strip_prefix(SCHEME).ok_or_else(|| {
            ObsmithError::Config(format!(
                "connection string must start with {SCHEME}: {conninfo}"
            ))
        })?;
        let (credentials, location) = rest.rsplit_once('#').ok_or_else(|| {
            ObsmithError::Config(format!(
                "connection string lacks a '#' between user and host: {conninfo}"
            ))
        })?;
        let (user, password) = credentials.split_once(':').unwrap_or((credentials, ""));
        let (address, db) = location.split_once('/').unwrap_or((location, ""));
        let (host, port) = match address.split_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    ObsmithError::Config(format!("invalid port '{port}' in {conninfo}: {e}"))
                })?;
                (host, Some(port))
            }
            None => (address, None),
        };
        Ok(ConnInfo {
            user: user.to_owned(),
            password: password.to_owned(),
            host: host.to_owned(),
            port,
            db: db.to_owned(),
        })
    }
}

#[cfg(feature = "mysql")]
pub use session::{MysqlDut, MysqlTarget, classify, load_schema};

#[cfg(feature = "mysql")]
mod session {
    use std::sync::Arc;

    use mysql_async::prelude::Queryable;
    use mysql_async::{Conn, DriverError, OptsBuilder};
    use tokio::runtime::{Builder, Runtime};
    use tracing::{debug, info, warn};

    use super::ConnInfo;
    use crate::construct::{Schema, Table, TypeKeeper};
    use crate::datatype::DataType;
    use crate::dut::{Category, Dut, Failure, Target};
    use crate::error::{ObsmithError, Result};

    /// Server errors random SQL is expected to provoke.
    const EXPECTED: &[i64] = &[
        1064, // syntax error
        1054, // unknown column
        1247, // reference not supported
        1052, // ambiguous column
        1093, // update target in from clause
        1062, // duplicate entry
        1364, // field without default value
        1048, // column cannot be null
        1235, // not supported yet
        3105, // value for generated column not allowed
        1264, // out of range value
        1406, // data too long
    ];

    const SERVER_GONE: i64 = 2006;
    const LOST_CONNECTION: i64 = 2013;

    fn runtime() -> Result<Runtime> {
        Ok(Builder::new_current_thread().enable_all().build()?)
    }

    fn opts(info: &ConnInfo) -> OptsBuilder {
        let mut opts = OptsBuilder::default()
            .ip_or_hostname(info.host.clone())
            .user(Some(info.user.clone()))
            .pass(Some(info.password.clone()));
        if let Some(port) = info.port {
            opts = opts.tcp_port(port);
        }
        if !info.db.is_empty() {
            opts = opts.db_name(Some(info.db.clone()));
        }
        opts
    }

    /// Sorts a client error into the categories the driver acts on.
    pub fn classify(e: mysql_async::Error) -> Failure {
        match e {
            mysql_async::Error::Server(err) => {
                let code = i64::from(err.code);
                let category = if EXPECTED.contains(&code) {
                    Category::ExpectedInvalid
                } else {
                    Category::Unclassified
                };
                Failure::new(code, err.message, category)
            }
            // the client surfaces connection loss as the classic client codes
            mysql_async::Error::Io(_) => Failure::new(
                LOST_CONNECTION,
                "Lost connection to MySQL server during query",
                Category::Unclassified,
            ),
            mysql_async::Error::Driver(DriverError::ConnectionClosed) => Failure::new(
                SERVER_GONE,
                "MySQL server has gone away",
                Category::Unclassified,
            ),
            other => Failure::new(-1, other.to_string(), Category::Unclassified),
        }
    }

    /// Reads base tables and views of the connected database from
    /// `information_schema`, and registers the builtin vocabulary.
    pub fn load_schema(info: &ConnInfo, types: Arc<TypeKeeper>) -> Result<Schema> {
        let runtime = runtime()?;
        runtime.block_on(async {
            let mut conn = Conn::new(opts(info)).await?;
            let mut schema = Schema::new(types);
            let relations: Vec<(String, String, String)> = conn
                .query(
                    "select table_schema, table_name, table_type from information_schema.tables \
                     where table_schema = database() order by table_name",
                )
                .await?;
            for (owner, name, kind) in relations {
                let base_table = match kind.as_str() {
                    "BASE TABLE" => true,
                    "VIEW" => false,
                    _ => {
                        debug!(table = %name, kind = %kind, "skipping relation");
                        continue;
                    }
                };
                let described: Vec<(String, String)> = conn
                    .exec(
                        "select column_name, data_type from information_schema.columns \
                         where table_schema = ? and table_name = ? order by ordinal_position",
                        (owner.as_str(), name.as_str()),
                    )
                    .await?;
                let mut columns = Vec::with_capacity(described.len());
                for (column, native) in described {
                    let data_type = DataType::from_native(&native)?;
                    columns.push((column, schema.sql_type(data_type)));
                }
                schema.add_table(Table::new(name, owner, base_table, base_table, columns));
            }
            schema.register_common_builtins();
            if let Err(e) = conn.disconnect().await {
                warn!(error = %e, "disconnect after schema load failed");
            }
            info!(host = %info.host, db = %info.db, tables = schema.tables().len(), "schema loaded");
            Ok::<_, ObsmithError>(schema)
        })
    }

    pub struct MysqlDut {
        runtime: Runtime,
        conn: Option<Conn>,
    }

    impl MysqlDut {
        pub fn connect(info: &ConnInfo) -> Result<Self> {
            let runtime = runtime()?;
            let conn = runtime.block_on(Conn::new(opts(info)))?;
            Ok(Self {
                runtime,
                conn: Some(conn),
            })
        }
    }

    impl Dut for MysqlDut {
        fn test(&mut self, sql: &str) -> std::result::Result<(), Failure> {
            let Some(conn) = self.conn.as_mut() else {
                return Err(Failure::new(
                    SERVER_GONE,
                    "MySQL server has gone away",
                    Category::Broken,
                ));
            };
            self.runtime.block_on(conn.query_drop(sql)).map_err(classify)
        }
        fn reconnect_codes(&self) -> &'static [i64] {
            &[SERVER_GONE, LOST_CONNECTION]
        }
    }

    impl Drop for MysqlDut {
        fn drop(&mut self) {
            if let Some(conn) = self.conn.take() {
                if let Err(e) = self.runtime.block_on(conn.disconnect()) {
                    debug!(error = %e, "disconnect failed");
                }
            }
        }
    }

    pub struct MysqlTarget {
        info: ConnInfo,
    }

    impl MysqlTarget {
        pub fn new(info: ConnInfo) -> Self {
            Self { info }
        }
    }

    impl Target for MysqlTarget {
        fn name(&self) -> &str {
            "oceanbase"
        }
        fn connect(&self) -> Result<Box<dyn Dut>> {
            Ok(Box::new(MysqlDut::connect(&self.info)?))
        }
    }
}
