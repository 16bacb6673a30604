use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use obsmith::construct::{Schema, Table, TypeKeeper};
use obsmith::datatype::DataType;
use obsmith::driver::{Driver, RunStatus};
use obsmith::dut::{Category, Dut, Failure, Target};
use obsmith::error::{ObsmithError, Result};
use obsmith::logger::Progress;
use obsmith::settings::{Settings, StatementWeights};

const LOST: i64 = 2013;

/// What the stub engine answers to the statement with the given number.
type Script = fn(u64) -> std::result::Result<(), Failure>;

struct StubTarget {
    script: Script,
    statements: Arc<AtomicU64>,
    connects: Arc<AtomicU64>,
    refuse: bool,
}

impl StubTarget {
    fn new(script: Script) -> Self {
        Self {
            script,
            statements: Arc::new(AtomicU64::new(0)),
            connects: Arc::new(AtomicU64::new(0)),
            refuse: false,
        }
    }
}

struct StubDut {
    script: Script,
    statements: Arc<AtomicU64>,
}

impl Dut for StubDut {
    fn test(&mut self, _sql: &str) -> std::result::Result<(), Failure> {
        let n = self.statements.fetch_add(1, Ordering::SeqCst);
        (self.script)(n)
    }
    fn reconnect_codes(&self) -> &'static [i64] {
        &[LOST]
    }
}

impl Target for StubTarget {
    fn name(&self) -> &str {
        "stub"
    }
    fn connect(&self) -> Result<Box<dyn Dut>> {
        if self.refuse {
            return Err(ObsmithError::Connection("refused".into()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubDut {
            script: self.script,
            statements: Arc::clone(&self.statements),
        }))
    }
}

fn schema() -> Schema {
    let mut schema = Schema::new(Arc::new(TypeKeeper::new()));
    let int = schema.sql_type(DataType::Integer);
    let text = schema.sql_type(DataType::Varchar);
    schema.add_table(Table::new(
        "items",
        "main",
        true,
        true,
        vec![("id".to_string(), int), ("label".to_string(), text)],
    ));
    schema.register_common_builtins();
    schema
}

// exit codes are compared by their Debug form
fn exit(code: ExitCode) -> String {
    format!("{code:?}")
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.driver.reconnect_backoff_ms = 0;
    settings
}

fn driver<'s>(schema: &'s Schema, settings: &Settings, budget: u64) -> Driver<'s> {
    Driver::new(schema, settings, ChaCha8Rng::seed_from_u64(17))
        .expect("driver")
        .with_max_queries(Some(budget))
}

#[test]
fn budget_of_healthy_statements_completes() {
    let schema = schema();
    let target = StubTarget::new(|_| Ok(()));
    let mut driver = driver(&schema, &settings(), 5);
    let status = driver.run(&target);
    assert!(matches!(status, RunStatus::Completed), "{status:?}");
    assert_eq!(Progress::get(&driver.progress().executed), 5);
    assert_eq!(driver.reconnects(), 0);
    assert!(driver.ledger().is_empty());
    assert_eq!(target.connects.load(Ordering::SeqCst), 1);
}

#[test]
fn expected_invalid_is_noise() {
    let schema = schema();
    let mut settings = settings();
    settings.generation.weights = StatementWeights {
        select: 1,
        insert: 0,
        update: 0,
        delete: 0,
    };
    let target = StubTarget::new(|_| {
        Err(Failure::new(1064, "syntax error", Category::ExpectedInvalid))
    });
    let mut driver = driver(&schema, &settings, 5);
    let status = driver.run(&target);
    assert!(matches!(status, RunStatus::Completed), "{status:?}");
    assert_eq!(Progress::get(&driver.progress().expected_invalid), 5);
    assert_eq!(driver.reconnects(), 0);
    assert!(driver.ledger().is_empty());
    // every statement was a query_spec rejected by the target
    assert_eq!(driver.impedance().stats("query_spec").bad, 5);
}

#[test]
fn a_target_rejecting_everything_keeps_the_run_going() {
    let schema = schema();
    let settings = settings();
    let budget = 3 * settings.impedance.min_samples;
    let target = StubTarget::new(|_| {
        Err(Failure::new(1064, "syntax error", Category::ExpectedInvalid))
    });
    let mut driver = driver(&schema, &settings, budget);
    let status = driver.run(&target);
    assert!(matches!(status, RunStatus::Completed), "{status:?}");
    assert_eq!(Progress::get(&driver.progress().expected_invalid), budget);
    // blacklisted, yet still the root of most statements
    assert!(!driver.impedance().matched("query_spec"));
    assert!(driver.ledger().is_empty());
}

#[test]
fn broken_session_is_replaced() {
    let schema = schema();
    let target = StubTarget::new(|n| {
        if n == 2 {
            Err(Failure::new(-1, "socket closed", Category::Broken))
        } else {
            Ok(())
        }
    });
    let mut driver = driver(&schema, &settings(), 5);
    let status = driver.run(&target);
    assert!(matches!(status, RunStatus::Completed), "{status:?}");
    assert_eq!(driver.reconnects(), 1);
    assert_eq!(Progress::get(&driver.progress().broken), 1);
    assert_eq!(Progress::get(&driver.progress().executed), 5);
    assert!(driver.ledger().is_empty());
    assert_eq!(target.connects.load(Ordering::SeqCst), 2);
}

#[test]
fn unclassified_failures_are_deduplicated_bugs() {
    let schema = schema();
    let target = StubTarget::new(|_| {
        Err(Failure::new(4016, "Internal  error", Category::Unclassified))
    });
    let mut driver = driver(&schema, &settings(), 5);
    let status = driver.run(&target);
    assert!(matches!(status, RunStatus::Completed), "{status:?}");
    assert_eq!(driver.ledger().len(), 1);
    assert_eq!(driver.ledger().total(), 5);
    assert_eq!(Progress::get(&driver.progress().bugs), 5);
    assert_eq!(driver.reconnects(), 0);
}

#[test]
fn lost_connection_is_recorded_then_replaced() {
    let schema = schema();
    let target = StubTarget::new(|n| {
        if n == 0 {
            Err(Failure::new(LOST, "Lost connection", Category::Unclassified))
        } else {
            Ok(())
        }
    });
    let mut driver = driver(&schema, &settings(), 5);
    let status = driver.run(&target);
    assert!(matches!(status, RunStatus::Completed), "{status:?}");
    assert_eq!(driver.ledger().get(LOST, "Lost connection").map(|r| r.count), Some(1));
    assert_eq!(driver.reconnects(), 1);
    assert_eq!(Progress::get(&driver.progress().executed), 4);
}

#[test]
fn lost_connection_can_be_treated_as_broken() {
    let schema = schema();
    let mut settings = settings();
    settings.driver.connection_loss_is_bug = false;
    let target = StubTarget::new(|n| {
        if n == 0 {
            Err(Failure::new(LOST, "Lost connection", Category::Unclassified))
        } else {
            Ok(())
        }
    });
    let mut driver = driver(&schema, &settings, 5);
    let status = driver.run(&target);
    assert!(matches!(status, RunStatus::Completed), "{status:?}");
    assert!(driver.ledger().is_empty());
    assert_eq!(Progress::get(&driver.progress().broken), 1);
    assert_eq!(driver.reconnects(), 1);
}

#[test]
fn refused_first_connection_is_fatal() {
    let schema = schema();
    let mut target = StubTarget::new(|_| Ok(()));
    target.refuse = true;
    let mut driver = driver(&schema, &settings(), 5);
    assert!(matches!(
        driver.run(&target),
        RunStatus::Fatal(ObsmithError::Connection(_))
    ));
}

#[test]
fn interrupt_stops_before_the_next_statement() {
    let schema = schema();
    let target = StubTarget::new(|_| Ok(()));
    let mut driver = driver(&schema, &settings(), 5);
    driver.interrupt_flag().store(true, Ordering::SeqCst);
    assert!(matches!(driver.run(&target), RunStatus::Interrupted));
    assert_eq!(target.statements.load(Ordering::SeqCst), 0);
}

#[test]
fn dry_run_prints_terminated_statements() {
    let schema = schema();
    let mut driver = driver(&schema, &settings(), 3);
    let mut out = Vec::new();
    assert!(matches!(driver.dry_run(&mut out), RunStatus::Completed));
    let text = String::from_utf8(out).expect("utf8");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|line| line.ends_with(';')));
}

#[test]
fn conclude_writes_the_report() {
    let schema = schema();
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = settings();
    settings.driver.report_path = dir.path().join("bug_log.txt");
    let target = StubTarget::new(|n| {
        if n % 2 == 0 {
            Err(Failure::new(4016, "Internal error", Category::Unclassified))
        } else {
            Ok(())
        }
    });
    let mut driver = driver(&schema, &settings, 4);
    let status = driver.run(&target);
    let started = Utc::now();
    let _ = driver.conclude(status, started, true);
    let report = std::fs::read_to_string(&settings.driver.report_path).expect("report");
    assert!(report.starts_with("err_no\terr_info\tsql_info\n"));
    assert_eq!(report.matches("4016\tInternal error\t").count(), 2);
}

#[test]
fn healthy_budget_exits_cleanly_with_an_empty_report() {
    let schema = schema();
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = settings();
    settings.driver.report_path = dir.path().join("bug_log.txt");
    let target = StubTarget::new(|_| Ok(()));
    let started = Utc::now();
    let mut driver = driver(&schema, &settings, 5);
    let status = driver.run(&target);
    assert_eq!(exit(driver.conclude(status, started, true)), exit(ExitCode::SUCCESS));
    let report = std::fs::read_to_string(&settings.driver.report_path).expect("report");
    assert_eq!(report, "err_no\terr_info\tsql_info\n");
}

#[test]
fn abnormal_endings_still_write_the_report() {
    let schema = schema();
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = settings();
    let started = Utc::now();

    settings.driver.report_path = dir.path().join("interrupted.txt");
    let target = StubTarget::new(|_| {
        Err(Failure::new(4016, "Internal error", Category::Unclassified))
    });
    let mut driver = driver(&schema, &settings, 100);
    driver.interrupt_flag().store(true, Ordering::SeqCst);
    let status = driver.run(&target);
    assert!(matches!(status, RunStatus::Interrupted));
    assert_eq!(exit(driver.conclude(status, started, true)), exit(ExitCode::FAILURE));
    assert!(settings.driver.report_path.exists());

    settings.driver.report_path = dir.path().join("fatal.txt");
    let mut target = StubTarget::new(|_| Ok(()));
    target.refuse = true;
    let mut driver = self::driver(&schema, &settings, 5);
    let status = driver.run(&target);
    assert!(matches!(status, RunStatus::Fatal(_)));
    assert_eq!(exit(driver.conclude(status, started, true)), exit(ExitCode::FAILURE));
    let report = std::fs::read_to_string(&settings.driver.report_path).expect("report");
    assert_eq!(report, "err_no\terr_info\tsql_info\n");
}

#[test]
fn second_interrupt_reports_what_was_recorded() {
    let schema = schema();
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = settings();
    settings.driver.report_path = dir.path().join("bug_log.txt");
    let target = StubTarget::new(|n| {
        if n < 3 {
            Err(Failure::new(4016, "Internal error", Category::Unclassified))
        } else {
            Ok(())
        }
    });
    let mut driver = driver(&schema, &settings, 6);
    let status = driver.run(&target);
    let interrupt = driver.interrupt(Utc::now(), true, false);

    let mut first = Vec::new();
    assert!(interrupt.request_stop(&mut first));
    assert!(driver.interrupt_flag().load(Ordering::SeqCst));
    let first = String::from_utf8(first).expect("utf8");
    assert!(!first.contains("queries:"), "counters only when verbose: {first}");
    assert!(!interrupt.request_stop(&mut Vec::new()));

    assert_eq!(interrupt.conclude_now().map(exit), Some(exit(ExitCode::FAILURE)));
    let report = std::fs::read_to_string(&settings.driver.report_path).expect("report");
    assert_eq!(report.matches("4016\tInternal error\t").count(), 3);
    // concluded once, whoever gets there first
    assert!(interrupt.conclude_now().is_none());
    assert_eq!(exit(driver.conclude(status, Utc::now(), true)), exit(ExitCode::FAILURE));
}

#[test]
fn verbose_interrupt_prints_the_counters() {
    let schema = schema();
    let driver = driver(&schema, &settings(), 5);
    let interrupt = driver.interrupt(Utc::now(), false, true);
    let mut out = Vec::new();
    assert!(interrupt.request_stop(&mut out));
    let out = String::from_utf8(out).expect("utf8");
    assert!(out.contains("queries: 0"), "{out}");
}

#[test]
fn seeded_drivers_agree() {
    let schema = schema();
    let mut first = driver(&schema, &settings(), 10);
    let mut second = driver(&schema, &settings(), 10);
    let (mut a, mut b) = (Vec::new(), Vec::new());
    first.dry_run(&mut a);
    second.dry_run(&mut b);
    assert_eq!(a, b);
}
