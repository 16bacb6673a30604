//! The generate, render, execute and classify loop.
//!
//! The driver owns the one live session to the target. Statements the target
//! rejects as invalid are noise, a broken session is replaced after a backoff,
//! and every other failure is a bug that goes into the ledger. Schema and
//! scope outlive any number of sessions.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info, warn};

use crate::construct::Schema;
use crate::dut::{Category, Dut, Failure, Target};
use crate::error::{ObsmithError, Result};
use crate::grammar::{Statement, statement_factory};
use crate::impedance::{Impedance, ImpedanceFeedback};
use crate::ledger::BugLedger;
use crate::logger::{Logger, Progress};
use crate::prod::Generator;
use crate::scope::Scope;
use crate::settings::{DriverSettings, Settings};

#[derive(Debug)]
pub enum RunStatus {
    /// The query budget was used up.
    Completed,
    Interrupted,
    Fatal(ObsmithError),
}

enum Session {
    Finished(RunStatus),
    /// The session is gone. `immediate` skips the backoff before the first
    /// attempt to replace it.
    Reconnect { immediate: bool },
}

pub struct Driver<'s> {
    generator: Generator<'s>,
    scope: Scope<'static>,
    settings: DriverSettings,
    max_queries: Option<u64>,
    loggers: Vec<Box<dyn Logger>>,
    // shared with the signal listener, which may have to report on its own
    ledger: Arc<Mutex<BugLedger>>,
    impedance: Arc<Impedance>,
    progress: Arc<Progress>,
    interrupted: Arc<AtomicBool>,
    concluded: Arc<AtomicBool>,
}

impl<'s> Driver<'s> {
    pub fn new(schema: &'s Schema, settings: &Settings, rng: ChaCha8Rng) -> Result<Self> {
        let impedance = Arc::new(Impedance::new(&settings.impedance));
        let generator = Generator::new(schema, &settings.generation, Arc::clone(&impedance), rng)?;
        let mut scope = Scope::root();
        schema.fill_scope(&mut scope)?;
        Ok(Self {
            generator,
            scope,
            settings: settings.driver.clone(),
            max_queries: None,
            loggers: vec![Box::new(ImpedanceFeedback::new(Arc::clone(&impedance)))],
            ledger: Arc::new(Mutex::new(BugLedger::new())),
            impedance,
            progress: Arc::new(Progress::default()),
            interrupted: Arc::new(AtomicBool::new(false)),
            concluded: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_logger(mut self, logger: Box<dyn Logger>) -> Self {
        self.loggers.push(logger);
        self
    }
    /// `None` runs until interrupted.
    pub fn with_max_queries(mut self, max_queries: Option<u64>) -> Self {
        self.max_queries = max_queries;
        self
    }

    pub fn generator(&mut self) -> &mut Generator<'s> {
        &mut self.generator
    }
    pub fn ledger(&self) -> MutexGuard<'_, BugLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
    pub fn impedance(&self) -> &Arc<Impedance> {
        &self.impedance
    }
    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }
    pub fn interrupt_flag(&self) -> &Arc<AtomicBool> {
        &self.interrupted
    }
    pub fn reconnects(&self) -> u64 {
        Progress::get(&self.progress.reconnects)
    }

    /// The handle a signal listener uses to stop this run. `persist` and
    /// `verbose` mean what they mean for [`Driver::conclude`] and the CLI.
    pub fn interrupt(&self, started: DateTime<Utc>, persist: bool, verbose: bool) -> Interrupt {
        Interrupt {
            progress: Arc::clone(&self.progress),
            interrupted: Arc::clone(&self.interrupted),
            concluded: Arc::clone(&self.concluded),
            ledger: Arc::clone(&self.ledger),
            report: persist.then(|| self.settings.report_path.clone()),
            started,
            verbose,
        }
    }

    pub fn run(&mut self, target: &dyn Target) -> RunStatus {
        let mut dut = match target.connect() {
            Ok(dut) => dut,
            Err(e) => return RunStatus::Fatal(e),
        };
        info!(target = target.name(), "connected");
        loop {
            match self.session(dut.as_mut()) {
                Session::Finished(status) => return status,
                Session::Reconnect { immediate } => {
                    drop(dut);
                    dut = match self.reconnect(target, immediate) {
                        Ok(dut) => dut,
                        Err(status) => return status,
                    };
                }
            }
        }
    }

    fn budget_spent(&self) -> bool {
        self.max_queries
            .is_some_and(|max| Progress::get(&self.progress.queries) >= max)
    }

    fn next_statement(&mut self) -> Result<Statement> {
        let statement = statement_factory(&mut self.generator, &self.scope)?;
        self.notify(|logger| logger.generated(&statement));
        Ok(statement)
    }

    fn session(&mut self, dut: &mut dyn Dut) -> Session {
        loop {
            if self.interrupted.load(Ordering::SeqCst) {
                return Session::Finished(RunStatus::Interrupted);
            }
            if self.budget_spent() {
                return Session::Finished(RunStatus::Completed);
            }
            let statement = match self.next_statement() {
                Ok(statement) => statement,
                Err(e) => return Session::Finished(RunStatus::Fatal(e)),
            };
            let sql = statement.to_string();
            let failure = match dut.test(&sql) {
                Ok(()) => {
                    Progress::bump(&self.progress.queries);
                    Progress::bump(&self.progress.executed);
                    self.notify(|logger| logger.executed(&statement));
                    continue;
                }
                Err(failure) => failure,
            };

            let lost = failure.category == Category::Unclassified
                && dut.reconnect_codes().contains(&failure.code);
            let failure = if lost && !self.settings.connection_loss_is_bug {
                Failure {
                    category: Category::Broken,
                    ..failure
                }
            } else {
                failure
            };
            match failure.category {
                Category::ExpectedInvalid => {
                    Progress::bump(&self.progress.queries);
                    Progress::bump(&self.progress.expected_invalid);
                    self.notify(|logger| logger.error(&statement, &failure));
                }
                Category::Broken => {
                    Progress::bump(&self.progress.broken);
                    warn!(code = failure.code, message = %failure.message, "session broken");
                    self.notify(|logger| logger.error(&statement, &failure));
                    return Session::Reconnect { immediate: false };
                }
                Category::Unclassified => {
                    Progress::bump(&self.progress.queries);
                    Progress::bump(&self.progress.bugs);
                    debug!(code = failure.code, message = %failure.message, %sql, "bug");
                    self.ledger().record(failure.code, &failure.message, &sql);
                    self.notify(|logger| logger.error(&statement, &failure));
                    if lost {
                        warn!(code = failure.code, "connection lost, reconnecting");
                        return Session::Reconnect { immediate: true };
                    }
                }
            }
        }
    }

    /// Replaces the session, retrying for as long as it takes unless the run
    /// is interrupted.
    fn reconnect(&self, target: &dyn Target, immediate: bool) -> std::result::Result<Box<dyn Dut>, RunStatus> {
        let backoff = Duration::from_millis(self.settings.reconnect_backoff_ms);
        let mut wait = !immediate;
        loop {
            if wait {
                thread::sleep(backoff);
            }
            if self.interrupted.load(Ordering::SeqCst) {
                return Err(RunStatus::Interrupted);
            }
            wait = true;
            match target.connect() {
                Ok(dut) => {
                    Progress::bump(&self.progress.reconnects);
                    info!(target = target.name(), reconnects = self.reconnects(), "reconnected");
                    return Ok(dut);
                }
                Err(e) => warn!(error = %e, "reconnect failed"),
            }
        }
    }

    /// Generates and prints statements without executing them.
    pub fn dry_run(&mut self, out: &mut dyn Write) -> RunStatus {
        loop {
            if self.interrupted.load(Ordering::SeqCst) {
                return RunStatus::Interrupted;
            }
            if self.budget_spent() {
                return RunStatus::Completed;
            }
            let statement = match self.next_statement() {
                Ok(statement) => statement,
                Err(e) => return RunStatus::Fatal(e),
            };
            if let Err(e) = writeln!(out, "{statement};") {
                return RunStatus::Fatal(e.into());
            }
            Progress::bump(&self.progress.queries);
        }
    }

    fn notify(&mut self, mut event: impl FnMut(&mut dyn Logger) -> Result<()>) {
        for logger in &mut self.loggers {
            if let Err(e) = event(logger.as_mut()) {
                warn!(logger = logger.name(), error = %e, "observer failed");
            }
        }
    }

    /// Prints the summary, writes the report unless `persist` is off, and
    /// turns `status` into the process exit code.
    pub fn conclude(&self, status: RunStatus, started: DateTime<Utc>, persist: bool) -> ExitCode {
        match self.generator.rng_state() {
            Ok(state) => debug!(%state, "final rng state"),
            Err(e) => debug!(error = %e, "rng state unavailable"),
        }
        if self.concluded.swap(true, Ordering::SeqCst) {
            // the signal listener ended the run and is about to exit
            return ExitCode::FAILURE;
        }
        let report = persist.then_some(self.settings.report_path.as_path());
        conclude(&self.ledger(), status, started, report)
    }
}

/// What the signal listener needs to stop a run, or to end it on the spot
/// when the driver does not get there.
#[derive(Clone)]
pub struct Interrupt {
    progress: Arc<Progress>,
    interrupted: Arc<AtomicBool>,
    concluded: Arc<AtomicBool>,
    ledger: Arc<Mutex<BugLedger>>,
    report: Option<PathBuf>,
    started: DateTime<Utc>,
    verbose: bool,
}

impl Interrupt {
    /// Asks the driver to stop at its next cancellation point. False when a
    /// stop had already been asked for.
    pub fn request_stop(&self, err: &mut dyn Write) -> bool {
        if self.interrupted.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = writeln!(err, "\nstopping after the current statement, interrupt again to quit now");
        if self.verbose {
            let _ = self.progress.write_report(err);
        }
        true
    }

    /// Summary and report from the bugs recorded so far, without waiting for
    /// the driver. `None` when the run has already been concluded.
    pub fn conclude_now(&self) -> Option<ExitCode> {
        if self.concluded.swap(true, Ordering::SeqCst) {
            return None;
        }
        let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        Some(conclude(
            &ledger,
            RunStatus::Interrupted,
            self.started,
            self.report.as_deref(),
        ))
    }
}

/// Ends a run: summary on stderr, report file, exit code. Used on every
/// termination path, including failures before a driver exists.
pub fn conclude(
    ledger: &BugLedger,
    status: RunStatus,
    started: DateTime<Utc>,
    report: Option<&Path>,
) -> ExitCode {
    let mut healthy = true;
    if let Err(e) = ledger.write_summary(&mut io::stderr().lock(), Utc::now() - started) {
        error!(error = %e, "writing summary failed");
    }
    if let Some(path) = report {
        match ledger.persist(path) {
            Ok(()) => info!(path = %path.display(), bugs = ledger.total(), "report written"),
            Err(e) => {
                error!(path = %path.display(), error = %e, "writing report failed");
                healthy = false;
            }
        }
    }
    match status {
        RunStatus::Completed if healthy => ExitCode::SUCCESS,
        RunStatus::Completed => ExitCode::FAILURE,
        RunStatus::Interrupted => {
            warn!("run interrupted");
            ExitCode::FAILURE
        }
        RunStatus::Fatal(e) => {
            error!(error = %e, "run aborted");
            ExitCode::FAILURE
        }
    }
}

/// The first SIGINT/SIGTERM asks the driver to stop at its next cancellation
/// point. A second one concludes the run from the listener and exits, for
/// when the driver is stuck in a statement.
#[cfg(unix)]
pub fn install_interrupt_handler(interrupt: Interrupt) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::spawn(move || {
        for signal in signals.forever() {
            debug!(signal, "signal received");
            if !interrupt.request_stop(&mut io::stderr().lock())
                && interrupt.conclude_now().is_some()
            {
                std::process::exit(1);
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn install_interrupt_handler(_interrupt: Interrupt) -> Result<()> {
    debug!("interrupt handling is not available on this platform");
    Ok(())
}
