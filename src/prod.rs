//! The production-tree engine.
//!
//! Every grammar rule instance carries a [`Prod`]: its kind, its level in the
//! tree and a retry counter. Construction is a bounded generate-and-test
//! search. A production makes a cheap random choice, checks it, and on failure
//! tries again with a different choice until its retry budget or the depth
//! ceiling is exhausted. Failures are plain values. A child that ran out of
//! retries makes its parent try again, while a child with nothing to choose
//! from fails its ancestors up to the nearest one that has an alternative.
//! A statement that fails is restarted from scratch by the statement factory.

use std::collections::HashMap;
use std::sync::Arc;

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::construct::{OtherHasher, Schema, SqlType};
use crate::error::{ObsmithError, Result};
use crate::impedance::Impedance;
use crate::settings::GenerationSettings;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationFailure {
    #[error("{kind}: retry limit exceeded after {retries} attempts at level {level}")]
    RetryLimit {
        kind: &'static str,
        retries: u32,
        level: u32,
    },
    #[error("{kind}: depth ceiling reached at level {level}")]
    TooDeep { kind: &'static str, level: u32 },
    #[error("{kind}: impedance mismatch")]
    ImpedanceMismatch { kind: &'static str },
    #[error("{kind}: {reason}")]
    NoCandidates { kind: &'static str, reason: String },
}

impl GenerationFailure {
    /// True when the failed construct cannot be built here at all, so the
    /// caller should pick a different construct rather than try again.
    pub fn rules_out_choice(&self) -> bool {
        matches!(
            self,
            GenerationFailure::NoCandidates { .. } | GenerationFailure::ImpedanceMismatch { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GenerationFailure::RetryLimit { kind, .. }
            | GenerationFailure::TooDeep { kind, .. }
            | GenerationFailure::ImpedanceMismatch { kind }
            | GenerationFailure::NoCandidates { kind, .. } => *kind,
        }
    }
}

pub type Generated<T> = std::result::Result<T, GenerationFailure>;

/// Why a single construction attempt did not produce a node.
#[derive(Debug)]
pub enum Backtrack {
    /// Try again with a fresh random choice.
    Retry,
    /// Give up on this production altogether.
    Fatal(GenerationFailure),
}

// a child that ran out of luck is a reason to try again; one that had
// nothing to choose from fails the same way on every attempt
impl From<GenerationFailure> for Backtrack {
    fn from(failure: GenerationFailure) -> Self {
        match failure {
            GenerationFailure::NoCandidates { .. } => Backtrack::Fatal(failure),
            _ => Backtrack::Retry,
        }
    }
}

/// The result of one attempt: the built node, or a [`Backtrack`].
pub type Outcome<T> = std::result::Result<T, Backtrack>;

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub retry_limit: u32,
    pub depth_ceiling: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prod {
    kind: &'static str,
    level: u32,
    retries: u32,
}

impl Prod {
    /// A node under `parent`, or a root when there is none. Nodes deeper than
    /// the ceiling are never constructed.
    pub fn new(g: &Generator, parent: Option<&Prod>, kind: &'static str) -> Generated<Prod> {
        let level = parent.map_or(0, |p| p.level + 1);
        if level > g.limits.depth_ceiling {
            g.impedance.limit(kind);
            return Err(GenerationFailure::TooDeep { kind, level });
        }
        Ok(Prod {
            kind,
            level,
            retries: 0,
        })
    }

    /// Like [`Prod::new`], for a construct the caller may replace by a plainer
    /// one. Kinds the impedance feedback has given up on are refused here.
    pub fn alternative(g: &Generator, parent: &Prod, kind: &'static str) -> Generated<Prod> {
        let prod = Prod::new(g, Some(parent), kind)?;
        prod.matched(g)?;
        Ok(prod)
    }
    pub fn kind(&self) -> &'static str {
        self.kind
    }
    pub fn level(&self) -> u32 {
        self.level
    }
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Records a failed attempt. Another attempt is allowed as long as fewer
    /// than `retry_limit` attempts were made and the node sits above the depth
    /// ceiling.
    pub fn retry(&mut self, g: &Generator) -> Generated<()> {
        g.impedance.retry(self.kind);
        self.retries += 1;
        if self.retries < g.limits.retry_limit && self.level < g.limits.depth_ceiling {
            Ok(())
        } else {
            g.impedance.limit(self.kind);
            Err(GenerationFailure::RetryLimit {
                kind: self.kind,
                retries: self.retries,
                level: self.level,
            })
        }
    }

    pub fn matched(&self, g: &Generator) -> Generated<()> {
        if g.impedance.matched(self.kind) {
            Ok(())
        } else {
            Err(GenerationFailure::ImpedanceMismatch { kind: self.kind })
        }
    }

    /// Checks that an assembled fragment has the type its slot asked for.
    pub fn match_type(&self, g: &Generator, expected: &SqlType, actual: &SqlType) -> Generated<()> {
        if expected == actual {
            Ok(())
        } else {
            g.impedance.fail(self.kind);
            Err(GenerationFailure::ImpedanceMismatch { kind: self.kind })
        }
    }

    /// A failure no amount of retrying will fix.
    pub fn fail(&self, g: &Generator, reason: impl Into<String>) -> GenerationFailure {
        g.impedance.fail(self.kind);
        GenerationFailure::NoCandidates {
            kind: self.kind,
            reason: reason.into(),
        }
    }

    /// Runs `build` until it produces a node, retrying on [`Backtrack::Retry`]
    /// within the bounds of [`Prod::retry`].
    pub fn attempt<'s, T>(
        &mut self,
        g: &mut Generator<'s>,
        mut build: impl FnMut(&mut Generator<'s>, &Prod) -> Outcome<T>,
    ) -> Generated<T> {
        loop {
            match build(g, self) {
                Ok(node) => return Ok(node),
                Err(Backtrack::Retry) => self.retry(g)?,
                Err(Backtrack::Fatal(failure)) => return Err(failure),
            }
        }
    }
}

/// Everything a production needs while choosing: the catalog, the search
/// bounds, the impedance feedback and the random source.
pub struct Generator<'s> {
    schema: &'s Schema,
    limits: Limits,
    statement_kinds: WeightedIndex<u32>,
    statement_attempts: u32,
    impedance: Arc<Impedance>,
    rng: ChaCha8Rng,
    aliases: HashMap<&'static str, u32, OtherHasher>,
}

impl<'s> Generator<'s> {
    pub fn new(
        schema: &'s Schema,
        settings: &GenerationSettings,
        impedance: Arc<Impedance>,
        rng: ChaCha8Rng,
    ) -> Result<Self> {
        let statement_kinds = WeightedIndex::new(settings.weights.as_array())
            .map_err(|e| ObsmithError::Config(format!("statement weights: {e}")))?;
        Ok(Self {
            schema,
            limits: Limits {
                retry_limit: settings.retry_limit,
                depth_ceiling: settings.depth_ceiling,
            },
            statement_kinds,
            statement_attempts: settings.statement_attempts,
            impedance,
            rng,
            aliases: HashMap::default(),
        })
    }

    pub fn seeded(
        schema: &'s Schema,
        settings: &GenerationSettings,
        impedance: Arc<Impedance>,
        seed: u64,
    ) -> Result<Self> {
        Self::new(schema, settings, impedance, ChaCha8Rng::seed_from_u64(seed))
    }

    pub fn schema(&self) -> &'s Schema {
        self.schema
    }
    pub fn limits(&self) -> Limits {
        self.limits
    }
    pub fn impedance(&self) -> &Arc<Impedance> {
        &self.impedance
    }
    pub fn statement_attempts(&self) -> u32 {
        self.statement_attempts
    }

    /// Index into select/insert/update/delete, drawn by the configured weights.
    pub fn statement_kind(&mut self) -> usize {
        self.statement_kinds.sample(&mut self.rng)
    }

    /// The generator state as JSON, enough to replay from this point.
    pub fn rng_state(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.rng)?)
    }
    pub fn restore_rng(&mut self, state: &str) -> Result<()> {
        self.rng = serde_json::from_str(state)?;
        Ok(())
    }

    pub fn d6(&mut self) -> u32 {
        self.rng.gen_range(1..=6)
    }
    pub fn d9(&mut self) -> u32 {
        self.rng.gen_range(1..=9)
    }
    pub fn d12(&mut self) -> u32 {
        self.rng.gen_range(1..=12)
    }
    pub fn d20(&mut self) -> u32 {
        self.rng.gen_range(1..=20)
    }
    pub fn d42(&mut self) -> u32 {
        self.rng.gen_range(1..=42)
    }
    pub fn d100(&mut self) -> u32 {
        self.rng.gen_range(1..=100)
    }
    pub fn coin(&mut self) -> bool {
        self.rng.gen_bool(0.5)
    }
    pub fn below(&mut self, bound: u32) -> u32 {
        self.rng.gen_range(0..bound.max(1))
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    /// Fresh correlation name such as `ref_3`, unique within a statement.
    pub fn next_alias(&mut self, prefix: &'static str) -> String {
        let counter = self.aliases.entry(prefix).or_insert(0);
        let alias = format!("{prefix}_{counter}");
        *counter += 1;
        alias
    }
    pub fn reset_aliases(&mut self) {
        self.aliases.clear();
    }
}
