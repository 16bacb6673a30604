//! Chained symbol tables consulted while generating.
//!
//! The root frame holds everything a schema loader registered. Productions that
//! introduce names (correlation names of table references, columns of derived
//! tables) push a child frame laid over the one they were handed and bind into
//! it, so the enclosing frames never change. Popping a frame is dropping it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::construct::{Operator, OtherHasher, Routine, SqlType, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Table,
    Column,
    Operator,
    Routine,
    Aggregate,
}

/// A column visible through a correlation name, e.g. `ref_0.id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBinding {
    pub relation: String,
    pub name: String,
    pub ty: SqlType,
}

#[derive(Debug, Clone)]
pub enum Binding {
    Table(Arc<Table>),
    Column(ColumnBinding),
    Operator(Arc<Operator>),
    Routine(Arc<Routine>),
    Aggregate(Arc<Routine>),
}

impl Binding {
    pub fn kind(&self) -> BindingKind {
        match self {
            Binding::Table(_) => BindingKind::Table,
            Binding::Column(_) => BindingKind::Column,
            Binding::Operator(_) => BindingKind::Operator,
            Binding::Routine(_) => BindingKind::Routine,
            Binding::Aggregate(_) => BindingKind::Aggregate,
        }
    }
    /// Tables have no single result type and only match an unconstrained lookup.
    pub fn result_type(&self) -> Option<&SqlType> {
        match self {
            Binding::Table(_) => None,
            Binding::Column(c) => Some(&c.ty),
            Binding::Operator(o) => Some(&o.result),
            Binding::Routine(r) | Binding::Aggregate(r) => Some(&r.result),
        }
    }
}

#[derive(Debug, Default)]
pub struct Scope<'p> {
    parent: Option<&'p Scope<'p>>,
    frame: HashMap<BindingKind, Vec<Binding>, OtherHasher>,
    filled: bool,
}

impl<'p> Scope<'p> {
    pub fn root() -> Scope<'static> {
        Scope {
            parent: None,
            frame: HashMap::default(),
            filled: false,
        }
    }

    /// Enters a nested frame laid over this one.
    pub fn push(&self) -> Scope<'_> {
        Scope {
            parent: Some(self),
            frame: HashMap::default(),
            filled: false,
        }
    }

    pub fn bind(&mut self, binding: Binding) {
        self.frame.entry(binding.kind()).or_default().push(binding);
    }

    /// Every visible binding of `kind` whose result type is `ty`, innermost
    /// frame first. `None` accepts any result type. Finding nothing is not an
    /// error, the asking production decides what an empty answer means.
    pub fn candidates_for(&self, ty: Option<&SqlType>, kind: BindingKind) -> Vec<&Binding> {
        let mut found = Vec::new();
        let mut current: Option<&Scope> = Some(self);
        while let Some(scope) = current {
            if let Some(bindings) = scope.frame.get(&kind) {
                found.extend(
                    bindings
                        .iter()
                        .filter(|b| ty.is_none() || b.result_type() == ty),
                );
            }
            current = scope.parent;
        }
        found
    }

    /// Bindings introduced by this frame alone.
    pub fn local(&self, kind: BindingKind) -> &[Binding] {
        self.frame.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of frames from here to the root, the root itself being 1.
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut current = self.parent;
        while let Some(scope) = current {
            depth += 1;
            current = scope.parent;
        }
        depth
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
    pub fn is_filled(&self) -> bool {
        self.filled
    }
    pub(crate) fn mark_filled(&mut self) {
        self.filled = true;
    }
}
