use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use obsmith::construct::{Schema, TypeKeeper};
use obsmith::driver::{Driver, RunStatus, conclude, install_interrupt_handler};
use obsmith::dut::Target;
use obsmith::error::{ObsmithError, Result};
use obsmith::ledger::BugLedger;
use obsmith::logger::{AstLogger, ProgressLogger, QueryDumper};
use obsmith::mysql::ConnInfo;
use obsmith::settings::Settings;
use obsmith::sqlite::{self, SqliteTarget};

#[derive(Parser, Debug)]
#[command(name = "obsmith", version, about = "Random SQL query generator for fuzzing database engines")]
struct Args {
    /// PostgreSQL connection string
    #[arg(long, value_name = "CONNINFO")]
    target: Option<String>,
    /// SQLite database file to fuzz
    #[arg(long, value_name = "FILE")]
    sqlite: Option<PathBuf>,
    /// OceanBase/MySQL target: oceanbase://user:password#host:port/database
    #[arg(long, value_name = "CONNINFO")]
    mysql: Option<String>,
    /// MonetDB connection string
    #[arg(long, value_name = "CONNINFO")]
    monetdb: Option<String>,
    /// Seed for the random generator, the process id when absent
    #[arg(long)]
    seed: Option<u64>,
    /// Generator state as logged at the end of an earlier run
    #[arg(long, value_name = "JSON")]
    rng_state: Option<String>,
    /// Stop after this many statements
    #[arg(long)]
    max_queries: Option<u64>,
    /// Print statements instead of executing them
    #[arg(long)]
    dry_run: bool,
    /// Print every statement as it is generated
    #[arg(long)]
    dump_all_queries: bool,
    /// Write every statement tree as a GraphML file
    #[arg(long)]
    dump_all_graphs: bool,
    /// Leave catalog tables out of the schema
    #[arg(long)]
    exclude_catalog: bool,
    /// Show progress while running, and the run counters when interrupted.
    /// An interrupt always stops the run and writes the bug summary and report.
    #[arg(long)]
    verbose: bool,
    /// Settings file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

enum Backend {
    Sqlite(PathBuf),
    Mysql(String),
}

impl Args {
    fn backend(&self) -> Result<Backend> {
        if let Some(path) = &self.sqlite {
            return Ok(Backend::Sqlite(path.clone()));
        }
        if let Some(conninfo) = &self.mysql {
            return Ok(Backend::Mysql(conninfo.clone()));
        }
        if self.monetdb.is_some() {
            return Err(ObsmithError::Config(
                "compiled without MonetDB support".into(),
            ));
        }
        // PostgreSQL is the target when none is named
        Err(ObsmithError::Config(
            "compiled without PostgreSQL support, use --sqlite or --mysql".into(),
        ))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[cfg(feature = "mysql")]
fn mysql_backend(conninfo: &str, types: Arc<TypeKeeper>) -> Result<(Schema, Box<dyn Target>)> {
    use obsmith::mysql::{MysqlTarget, load_schema};

    let info = ConnInfo::parse(conninfo)?;
    let schema = load_schema(&info, types)?;
    Ok((schema, Box::new(MysqlTarget::new(info))))
}

#[cfg(not(feature = "mysql"))]
fn mysql_backend(conninfo: &str, _types: Arc<TypeKeeper>) -> Result<(Schema, Box<dyn Target>)> {
    ConnInfo::parse(conninfo)?;
    Err(ObsmithError::Config(
        "compiled without OceanBase/MySQL support".into(),
    ))
}

fn run(args: &Args, settings: &Settings, started: DateTime<Utc>) -> Result<ExitCode> {
    let types = Arc::new(TypeKeeper::new());
    let (schema, target): (Schema, Box<dyn Target>) = match args.backend()? {
        Backend::Sqlite(path) => {
            let schema = sqlite::load_schema(&path, args.exclude_catalog, types)?;
            (schema, Box::new(SqliteTarget::new(path)))
        }
        Backend::Mysql(conninfo) => mysql_backend(&conninfo, types)?,
    };

    let seed = args.seed.unwrap_or_else(|| u64::from(std::process::id()));
    let mut driver = Driver::new(&schema, settings, ChaCha8Rng::seed_from_u64(seed))?
        .with_max_queries(args.max_queries);
    if let Some(state) = &args.rng_state {
        driver.generator().restore_rng(state)?;
    }
    info!(seed, target = target.name(), "generator ready");

    if args.verbose {
        let progress = Arc::clone(driver.progress());
        let impedance = Arc::clone(driver.impedance());
        let columns = settings.driver.progress_columns;
        driver = driver.with_logger(Box::new(ProgressLogger::new(progress, impedance, columns)));
    }
    if args.dump_all_queries && !args.dry_run {
        driver = driver.with_logger(Box::new(QueryDumper));
    }
    if args.dump_all_graphs {
        driver = driver.with_logger(Box::new(AstLogger::new(&settings.driver.graph_dir)));
    }
    install_interrupt_handler(driver.interrupt(started, !args.dry_run, args.verbose))?;

    let status = if args.dry_run {
        driver.dry_run(&mut io::stdout().lock())
    } else {
        driver.run(target.as_ref())
    };
    Ok(driver.conclude(status, started, !args.dry_run))
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();
    let started = Utc::now();
    let settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            let defaults = Settings::default();
            let report = (!args.dry_run).then_some(defaults.driver.report_path.as_path());
            return conclude(&BugLedger::new(), RunStatus::Fatal(e), started, report);
        }
    };
    match run(&args, &settings, started) {
        Ok(code) => code,
        Err(e) => {
            let report = (!args.dry_run).then_some(settings.driver.report_path.as_path());
            conclude(&BugLedger::new(), RunStatus::Fatal(e), started, report)
        }
    }
}
