//! Impedance matching between the grammar and the target.
//!
//! Some productions keep producing SQL the target rejects, for instance a
//! function the engine does not have. Occurrences of every production kind in
//! accepted and rejected statements are counted here, and a kind that is
//! rejected almost every time it appears is blacklisted so the generator stops
//! choosing it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use crate::construct::OtherHasher;
use crate::dut::{Category, Failure};
use crate::error::Result;
use crate::grammar::{Production, Statement};
use crate::logger::Logger;
use crate::settings::ImpedanceSettings;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KindStats {
    pub retries: u64,
    pub limited: u64,
    pub failed: u64,
    pub ok: u64,
    pub bad: u64,
}

#[derive(Debug)]
pub struct Impedance {
    stats: Mutex<HashMap<&'static str, KindStats, OtherHasher>>,
    min_samples: u64,
    max_error_rate: f64,
}

impl Impedance {
    pub fn new(settings: &ImpedanceSettings) -> Self {
        Self {
            stats: Mutex::new(HashMap::default()),
            min_samples: settings.min_samples,
            max_error_rate: settings.max_error_rate,
        }
    }

    fn update(&self, kind: &'static str, bump: impl FnOnce(&mut KindStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        bump(stats.entry(kind).or_default());
    }

    pub fn retry(&self, kind: &'static str) {
        self.update(kind, |s| s.retries += 1);
    }
    pub fn limit(&self, kind: &'static str) {
        self.update(kind, |s| s.limited += 1);
    }
    pub fn fail(&self, kind: &'static str) {
        self.update(kind, |s| s.failed += 1);
    }

    pub fn stats(&self, kind: &str) -> KindStats {
        let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.get(kind).copied().unwrap_or_default()
    }

    /// False once `kind` appeared in enough rejected statements and nearly
    /// never in accepted ones.
    pub fn matched(&self, kind: &str) -> bool {
        let KindStats { ok, bad, .. } = self.stats(kind);
        if bad < self.min_samples {
            return true;
        }
        let error_rate = bad as f64 / (ok + bad) as f64;
        error_rate <= self.max_error_rate
    }

    pub fn record_accepted(&self, kinds: &HashSet<&'static str>) {
        for kind in kinds {
            self.update(*kind, |s| s.ok += 1);
        }
    }
    pub fn record_rejected(&self, kinds: &HashSet<&'static str>) {
        for kind in kinds {
            self.update(*kind, |s| s.bad += 1);
        }
    }

    pub fn write_report(&self, w: &mut dyn Write) -> io::Result<()> {
        let stats: BTreeMap<&'static str, KindStats> = {
            let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.iter().map(|(k, v)| (*k, *v)).collect()
        };
        writeln!(w, "impedance report:")?;
        for (kind, s) in stats {
            let blacklisted = if self.matched(kind) { "" } else { " (blacklisted)" };
            writeln!(
                w,
                "  {kind}: ok={} bad={} retries={} limited={} failed={}{blacklisted}",
                s.ok, s.bad, s.retries, s.limited, s.failed
            )?;
        }
        Ok(())
    }
}

/// Every production kind occurring in `root`, each listed once.
pub fn kinds_of(root: &dyn Production) -> HashSet<&'static str> {
    let mut kinds = HashSet::new();
    let mut pending = vec![root];
    while let Some(node) = pending.pop() {
        kinds.insert(node.prod().kind());
        pending.extend(node.children());
    }
    kinds
}

/// Feeds the outcome of every executed statement back into the generator.
pub struct ImpedanceFeedback {
    impedance: Arc<Impedance>,
}

impl ImpedanceFeedback {
    pub fn new(impedance: Arc<Impedance>) -> Self {
        Self { impedance }
    }
}

impl Logger for ImpedanceFeedback {
    fn name(&self) -> &str {
        "impedance"
    }
    fn executed(&mut self, statement: &Statement) -> Result<()> {
        self.impedance.record_accepted(&kinds_of(statement));
        Ok(())
    }
    fn error(&mut self, statement: &Statement, failure: &Failure) -> Result<()> {
        // only rejections say anything about the grammar
        if failure.category == Category::ExpectedInvalid {
            self.impedance.record_rejected(&kinds_of(statement));
        }
        Ok(())
    }
}
