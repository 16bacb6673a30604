//! Observers of the generate/execute loop.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::dut::{Category, Failure};
use crate::error::Result;
use crate::grammar::{Production, Statement};
use crate::impedance::Impedance;

/// Called by the driver at each state of an iteration. A failing observer is
/// reported and otherwise ignored.
pub trait Logger {
    fn name(&self) -> &str;
    fn generated(&mut self, _statement: &Statement) -> Result<()> {
        Ok(())
    }
    fn executed(&mut self, _statement: &Statement) -> Result<()> {
        Ok(())
    }
    fn error(&mut self, _statement: &Statement, _failure: &Failure) -> Result<()> {
        Ok(())
    }
}

/// Run counters. Only the driver thread writes them, the interrupt listener
/// reads them.
#[derive(Debug, Default)]
pub struct Progress {
    pub queries: AtomicU64,
    pub executed: AtomicU64,
    pub expected_invalid: AtomicU64,
    pub broken: AtomicU64,
    pub bugs: AtomicU64,
    pub reconnects: AtomicU64,
    pub nodes: AtomicU64,
    pub height: AtomicU64,
}

impl Progress {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn write_report(&self, w: &mut dyn Write) -> io::Result<()> {
        let queries = Self::get(&self.queries);
        let per_query = |total: u64| if queries == 0 { 0.0 } else { total as f64 / queries as f64 };
        writeln!(
            w,
            "queries: {queries} (executed {}, expected invalid {}, broken {}, bugs {}), reconnects: {}",
            Self::get(&self.executed),
            Self::get(&self.expected_invalid),
            Self::get(&self.broken),
            Self::get(&self.bugs),
            Self::get(&self.reconnects),
        )?;
        writeln!(
            w,
            "AST stats (avg): height = {:.2} nodes = {:.2}",
            per_query(Self::get(&self.height)),
            per_query(Self::get(&self.nodes)),
        )
    }
}

/// Node count and height of a statement tree.
pub fn measure(root: &dyn Production) -> (u64, u64) {
    let children = root.children();
    children.iter().fold((1, 1), |(nodes, height), child| {
        let (n, h) = measure(*child);
        (nodes + n, height.max(h + 1))
    })
}

/// One character per statement on stderr and a report every few columns.
pub struct ProgressLogger {
    progress: Arc<Progress>,
    impedance: Arc<Impedance>,
    columns: u64,
    column: u64,
    errors: HashMap<String, u64>,
}

impl ProgressLogger {
    pub fn new(progress: Arc<Progress>, impedance: Arc<Impedance>, columns: u64) -> Self {
        Self {
            progress,
            impedance,
            columns: columns.max(1),
            column: 0,
            errors: HashMap::new(),
        }
    }

    fn tick(&mut self, mark: char) -> Result<()> {
        let mut err = io::stderr().lock();
        write!(err, "{mark}")?;
        self.column += 1;
        if self.column >= self.columns {
            self.column = 0;
            writeln!(err)?;
            self.report(&mut err)?;
        }
        err.flush()?;
        Ok(())
    }

    fn report(&self, w: &mut dyn Write) -> io::Result<()> {
        self.progress.write_report(w)?;
        let mut errors: Vec<(&String, &u64)> = self.errors.iter().collect();
        errors.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        writeln!(w, "error details:")?;
        for (message, count) in errors.into_iter().take(10) {
            writeln!(w, "{count}\t{message}")?;
        }
        self.impedance.write_report(w)
    }
}

impl Logger for ProgressLogger {
    fn name(&self) -> &str {
        "progress"
    }
    fn generated(&mut self, statement: &Statement) -> Result<()> {
        let (nodes, height) = measure(statement);
        self.progress.nodes.fetch_add(nodes, Ordering::Relaxed);
        self.progress.height.fetch_add(height, Ordering::Relaxed);
        Ok(())
    }
    fn executed(&mut self, _statement: &Statement) -> Result<()> {
        self.tick('.')
    }
    fn error(&mut self, _statement: &Statement, failure: &Failure) -> Result<()> {
        let first_line = failure.message.lines().next().unwrap_or("").to_owned();
        *self.errors.entry(first_line).or_default() += 1;
        match failure.category {
            Category::ExpectedInvalid => self.tick('S'),
            Category::Broken => self.tick('C'),
            Category::Unclassified => self.tick('e'),
        }
    }
}

/// Prints every generated statement to stdout.
pub struct QueryDumper;

impl Logger for QueryDumper {
    fn name(&self) -> &str {
        "query dump"
    }
    fn generated(&mut self, statement: &Statement) -> Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{statement};")?;
        out.flush()?;
        Ok(())
    }
}

/// Writes every generated tree as a GraphML file.
pub struct AstLogger {
    dir: PathBuf,
    queries: u64,
}

impl AstLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            queries: 0,
        }
    }

    fn write_graph(w: &mut dyn Write, root: &dyn Production) -> io::Result<()> {
        writeln!(w, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        writeln!(w, r#"<graphml xmlns="http://graphml.graphdrawing.org/xmlns">"#)?;
        writeln!(w, r#"<key id="label" for="node" attr.name="label" attr.type="string"/>"#)?;
        writeln!(w, r#"<key id="sql" for="node" attr.name="sql" attr.type="string"/>"#)?;
        writeln!(w, r#"<graph id="ast" edgedefault="directed">"#)?;
        let mut next_id = 0u64;
        let mut pending: Vec<(Option<u64>, &dyn Production)> = vec![(None, root)];
        while let Some((parent, node)) = pending.pop() {
            let id = next_id;
            next_id += 1;
            writeln!(
                w,
                r#"<node id="n{id}"><data key="label">{}</data><data key="sql">{}</data></node>"#,
                node.prod().kind(),
                escape(&node.to_string())
            )?;
            if let Some(parent) = parent {
                writeln!(w, r#"<edge source="n{parent}" target="n{id}"/>"#)?;
            }
            pending.extend(node.children().into_iter().rev().map(|child| (Some(id), child)));
        }
        writeln!(w, "</graph>")?;
        writeln!(w, "</graphml>")
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl Logger for AstLogger {
    fn name(&self) -> &str {
        "graph dump"
    }
    fn generated(&mut self, statement: &Statement) -> Result<()> {
        let path = self.dir.join(format!("obsmith-{}.graphml", self.queries));
        self.queries += 1;
        let mut out = BufWriter::new(File::create(path)?);
        Self::write_graph(&mut out, statement)?;
        out.flush()?;
        Ok(())
    }
}
