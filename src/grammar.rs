//! The SQL grammar as productions.
//!
//! Each rule is a struct owning its [`Prod`] and its children. Constructors
//! draw random choices through the [`Generator`] and resolve names and types
//! through the [`Scope`] they are handed. Rendering is `Display`, a depth-first
//! walk that emits single-line SQL without a trailing semicolon.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::construct::{Operator, Routine, SqlType, Table};
use crate::datatype::DataType;
use crate::error::{ObsmithError, Result};
use crate::prod::{Backtrack, Generated, Generator, Prod};
use crate::scope::{Binding, BindingKind, ColumnBinding, Scope};

/// A node of a generated statement.
pub trait Production: fmt::Display {
    fn prod(&self) -> &Prod;
    fn children(&self) -> Vec<&dyn Production>;
}

const WORDS: &[&str] = &[
    "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel", "india", "juliet",
    "kilo", "lima", "mike", "", " ", "%", "_", "0", "NULL",
];

// ------------- scope helpers -------------
fn visible_columns<'a>(scope: &'a Scope, ty: Option<&SqlType>) -> Vec<&'a ColumnBinding> {
    scope
        .candidates_for(ty, BindingKind::Column)
        .into_iter()
        .filter_map(|b| match b {
            Binding::Column(c) => Some(c),
            _ => None,
        })
        .collect()
}

fn visible_operators(scope: &Scope, ty: Option<&SqlType>) -> Vec<Arc<Operator>> {
    scope
        .candidates_for(ty, BindingKind::Operator)
        .into_iter()
        .filter_map(|b| match b {
            Binding::Operator(o) => Some(Arc::clone(o)),
            _ => None,
        })
        .collect()
}

fn visible_routines(scope: &Scope, ty: Option<&SqlType>, kind: BindingKind) -> Vec<Arc<Routine>> {
    scope
        .candidates_for(ty, kind)
        .into_iter()
        .filter_map(|b| match b {
            Binding::Routine(r) | Binding::Aggregate(r) => Some(Arc::clone(r)),
            _ => None,
        })
        .collect()
}

fn visible_tables(scope: &Scope) -> Vec<Arc<Table>> {
    scope
        .candidates_for(None, BindingKind::Table)
        .into_iter()
        .filter_map(|b| match b {
            Binding::Table(t) => Some(Arc::clone(t)),
            _ => None,
        })
        .collect()
}

fn bind_all(scope: &mut Scope, refs: Vec<ColumnBinding>) {
    for column in refs {
        scope.bind(Binding::Column(column));
    }
}

fn join<T: fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ------------- literals -------------
fn literal(g: &mut Generator, ty: &SqlType) -> String {
    match DataType::from_name(ty.name()) {
        Some(DataType::Integer) => g.d100().to_string(),
        Some(DataType::Double) => format!("{}.{}", g.d100(), g.d100()),
        Some(DataType::Varchar) => format!("'{}'", g.pick(WORDS).copied().unwrap_or("")),
        Some(DataType::Timestamp) => timestamp(g),
        Some(DataType::Bit) => format!("b'{}'", g.below(2)),
        Some(DataType::Binary) => {
            let bytes: String = (0..g.d6()).map(|_| format!("{:02x}", g.below(256))).collect();
            format!("x'{bytes}'")
        }
        _ => String::from("NULL"),
    }
}

fn timestamp(g: &mut Generator) -> String {
    let year = 1970 + g.below(60) as i32;
    let (month, day) = (g.d12(), 1 + g.below(28));
    let (hour, minute, second) = (g.below(24), g.below(60), g.below(60));
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .map_or_else(
            || String::from("NULL"),
            |ts| format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S")),
        )
}

// ------------- value expressions -------------
#[derive(Debug)]
pub enum ValueExpr {
    Column(ColumnRef),
    Const(ConstExpr),
    Binop(Box<BinopExpr>),
    Funcall(Box<Funcall>),
    Coalesce(Box<Coalesce>),
    Case(Box<CaseExpr>),
    Subselect(Box<AtomicSubselect>),
}

impl ValueExpr {
    /// Picks a kind of expression of type `ty`, or of any type when `ty` is
    /// `None`. Compound expressions become rarer the deeper the tree gets, and
    /// one that cannot be built here gives way to a column or a constant.
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope, ty: Option<&SqlType>) -> Generated<Self> {
        match Self::compound(g, parent, scope, ty) {
            Ok(Some(expr)) => return Ok(expr),
            Ok(None) => {}
            Err(failure) if failure.rules_out_choice() => {}
            Err(failure) => return Err(failure),
        }
        if !visible_columns(scope, ty).is_empty() && g.d20() > 1 {
            return Ok(ValueExpr::Column(ColumnRef::new(g, parent, scope, ty)?));
        }
        Ok(ValueExpr::Const(ConstExpr::new(g, parent, ty)?))
    }

    fn compound(
        g: &mut Generator,
        parent: &Prod,
        scope: &Scope,
        ty: Option<&SqlType>,
    ) -> Generated<Option<Self>> {
        let level = parent.level() + 1;
        if level < g.d6() && g.d42() == 1 {
            return Ok(Some(ValueExpr::Coalesce(Box::new(Coalesce::new(
                g, parent, scope, ty,
            )?))));
        }
        if level < g.d6() && g.d9() == 1 {
            return Ok(Some(ValueExpr::Binop(Box::new(BinopExpr::new(
                g, parent, scope, ty,
            )?))));
        }
        if level < g.d6() && g.d6() == 1 {
            return Ok(Some(ValueExpr::Funcall(Box::new(Funcall::new(
                g, parent, scope, ty,
            )?))));
        }
        if g.d12() == 1 {
            return Ok(Some(ValueExpr::Subselect(Box::new(AtomicSubselect::new(
                g, parent, scope, ty,
            )?))));
        }
        if level < g.d6() && g.d9() == 1 {
            return Ok(Some(ValueExpr::Case(Box::new(CaseExpr::new(
                g, parent, scope, ty,
            )?))));
        }
        Ok(None)
    }

    pub fn ty(&self) -> &SqlType {
        match self {
            ValueExpr::Column(e) => e.ty(),
            ValueExpr::Const(e) => e.ty(),
            ValueExpr::Binop(e) => e.ty(),
            ValueExpr::Funcall(e) => e.ty(),
            ValueExpr::Coalesce(e) => e.ty(),
            ValueExpr::Case(e) => e.ty(),
            ValueExpr::Subselect(e) => e.ty(),
        }
    }

    fn inner(&self) -> &dyn Production {
        match self {
            ValueExpr::Column(e) => e,
            ValueExpr::Const(e) => e,
            ValueExpr::Binop(e) => &**e,
            ValueExpr::Funcall(e) => &**e,
            ValueExpr::Coalesce(e) => &**e,
            ValueExpr::Case(e) => &**e,
            ValueExpr::Subselect(e) => &**e,
        }
    }
}

impl Production for ValueExpr {
    fn prod(&self) -> &Prod {
        self.inner().prod()
    }
    fn children(&self) -> Vec<&dyn Production> {
        self.inner().children()
    }
}
impl fmt::Display for ValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self.inner(), f)
    }
}

#[derive(Debug)]
pub struct ColumnRef {
    prod: Prod,
    column: ColumnBinding,
}
impl ColumnRef {
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope, ty: Option<&SqlType>) -> Generated<Self> {
        let prod = Prod::new(g, Some(parent), "column_reference")?;
        let candidates = visible_columns(scope, ty);
        let column = match g.pick(&candidates) {
            Some(column) => (*column).clone(),
            None => return Err(prod.fail(g, "no visible column of the requested type")),
        };
        Ok(ColumnRef { prod, column })
    }
    pub fn ty(&self) -> &SqlType {
        &self.column.ty
    }
}
impl Production for ColumnRef {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        Vec::new()
    }
}
impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.column.relation, self.column.name)
    }
}

#[derive(Debug)]
pub struct ConstExpr {
    prod: Prod,
    ty: SqlType,
    text: String,
}
impl ConstExpr {
    pub fn new(g: &mut Generator, parent: &Prod, ty: Option<&SqlType>) -> Generated<Self> {
        let prod = Prod::new(g, Some(parent), "const_expr")?;
        let schema = g.schema();
        let ty = match ty {
            Some(ty) => ty.clone(),
            None => match g.pick(&schema.literal_types) {
                Some(ty) => ty.clone(),
                None => return Err(prod.fail(g, "no type has literals")),
            },
        };
        let text = literal(g, &ty);
        Ok(ConstExpr { prod, ty, text })
    }
    pub fn ty(&self) -> &SqlType {
        &self.ty
    }
}
impl Production for ConstExpr {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        Vec::new()
    }
}
impl fmt::Display for ConstExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

#[derive(Debug)]
pub struct BinopExpr {
    prod: Prod,
    op: Arc<Operator>,
    lhs: ValueExpr,
    rhs: ValueExpr,
}
impl BinopExpr {
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope, ty: Option<&SqlType>) -> Generated<Self> {
        let mut prod = Prod::alternative(g, parent, "binop_expr")?;
        let operators = visible_operators(scope, ty);
        if operators.is_empty() {
            return Err(prod.fail(g, "no operator yields the requested type"));
        }
        let (op, lhs, rhs) = prod.attempt(g, |g, p| {
            let op = g.pick(&operators).cloned().ok_or(Backtrack::Retry)?;
            let lhs = ValueExpr::new(g, p, scope, Some(&op.left))?;
            let rhs = ValueExpr::new(g, p, scope, Some(&op.right))?;
            p.match_type(g, &op.left, lhs.ty())?;
            p.match_type(g, &op.right, rhs.ty())?;
            Ok((op, lhs, rhs))
        })?;
        Ok(BinopExpr { prod, op, lhs, rhs })
    }
    pub fn ty(&self) -> &SqlType {
        &self.op.result
    }
}
impl Production for BinopExpr {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        vec![&self.lhs, &self.rhs]
    }
}
impl fmt::Display for BinopExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(({}) {} ({}))", self.lhs, self.op.name, self.rhs)
    }
}

#[derive(Debug)]
pub struct Funcall {
    prod: Prod,
    routine: Arc<Routine>,
    args: Vec<ValueExpr>,
}
impl Funcall {
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope, ty: Option<&SqlType>) -> Generated<Self> {
        Self::build(g, parent, scope, ty, "funcall", BindingKind::Routine)
    }
    /// A call to an aggregate, as used by ungrouped aggregate queries.
    pub fn aggregate(g: &mut Generator, parent: &Prod, scope: &Scope, ty: Option<&SqlType>) -> Generated<Self> {
        Self::build(g, parent, scope, ty, "aggregate", BindingKind::Aggregate)
    }
    fn build(
        g: &mut Generator,
        parent: &Prod,
        scope: &Scope,
        ty: Option<&SqlType>,
        kind: &'static str,
        binding: BindingKind,
    ) -> Generated<Self> {
        let mut prod = Prod::alternative(g, parent, kind)?;
        let routines = visible_routines(scope, ty, binding);
        if routines.is_empty() {
            return Err(prod.fail(g, "no routine yields the requested type"));
        }
        let (routine, args) = prod.attempt(g, |g, p| {
            let routine = g.pick(&routines).cloned().ok_or(Backtrack::Retry)?;
            let mut args = Vec::with_capacity(routine.argtypes.len());
            for argtype in &routine.argtypes {
                let arg = ValueExpr::new(g, p, scope, Some(argtype))?;
                p.match_type(g, argtype, arg.ty())?;
                args.push(arg);
            }
            Ok((routine, args))
        })?;
        Ok(Funcall {
            prod,
            routine,
            args,
        })
    }
    pub fn ty(&self) -> &SqlType {
        &self.routine.result
    }
    pub fn is_aggregate(&self) -> bool {
        self.routine.aggregate
    }
}
impl Production for Funcall {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        self.args.iter().map(|a| a as &dyn Production).collect()
    }
}
impl fmt::Display for Funcall {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({})", self.routine.ident(), join(&self.args))
    }
}

#[derive(Debug)]
pub struct Coalesce {
    prod: Prod,
    first: ValueExpr,
    second: ValueExpr,
}
impl Coalesce {
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope, ty: Option<&SqlType>) -> Generated<Self> {
        let mut prod = Prod::alternative(g, parent, "coalesce")?;
        let (first, second) = prod.attempt(g, |g, p| {
            let first = ValueExpr::new(g, p, scope, ty)?;
            let ty = first.ty().clone();
            let second = ValueExpr::new(g, p, scope, Some(&ty))?;
            p.match_type(g, &ty, second.ty())?;
            Ok((first, second))
        })?;
        Ok(Coalesce {
            prod,
            first,
            second,
        })
    }
    pub fn ty(&self) -> &SqlType {
        self.first.ty()
    }
}
impl Production for Coalesce {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        vec![&self.first, &self.second]
    }
}
impl fmt::Display for Coalesce {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "coalesce({}, {})", self.first, self.second)
    }
}

#[derive(Debug)]
pub struct CaseExpr {
    prod: Prod,
    condition: BoolExpr,
    true_expr: ValueExpr,
    false_expr: ValueExpr,
}
impl CaseExpr {
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope, ty: Option<&SqlType>) -> Generated<Self> {
        let mut prod = Prod::alternative(g, parent, "case_expr")?;
        let (condition, true_expr, false_expr) = prod.attempt(g, |g, p| {
            let condition = BoolExpr::new(g, p, scope)?;
            let true_expr = ValueExpr::new(g, p, scope, ty)?;
            let ty = true_expr.ty().clone();
            let false_expr = ValueExpr::new(g, p, scope, Some(&ty))?;
            p.match_type(g, &ty, false_expr.ty())?;
            Ok((condition, true_expr, false_expr))
        })?;
        Ok(CaseExpr {
            prod,
            condition,
            true_expr,
            false_expr,
        })
    }
    pub fn ty(&self) -> &SqlType {
        self.true_expr.ty()
    }
}
impl Production for CaseExpr {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        vec![&self.condition, &self.true_expr, &self.false_expr]
    }
}
impl fmt::Display for CaseExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "case when {} then {} else {} end",
            self.condition, self.true_expr, self.false_expr
        )
    }
}

/// `(select ref.c from t as ref limit 1 offset n)`
#[derive(Debug)]
pub struct AtomicSubselect {
    prod: Prod,
    table: Arc<Table>,
    column: String,
    ty: SqlType,
    alias: String,
    offset: u32,
}
impl AtomicSubselect {
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope, ty: Option<&SqlType>) -> Generated<Self> {
        let prod = Prod::alternative(g, parent, "atomic_subselect")?;
        let choices: Vec<(Arc<Table>, usize)> = visible_tables(scope)
            .into_iter()
            .flat_map(|table| {
                let matching: Vec<usize> = table
                    .columns()
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| ty.is_none_or(|ty| c.ty() == ty))
                    .map(|(i, _)| i)
                    .collect();
                matching.into_iter().map(move |i| (Arc::clone(&table), i))
            })
            .collect();
        let (table, index) = match g.pick(&choices) {
            Some((table, index)) => (Arc::clone(table), *index),
            None => return Err(prod.fail(g, "no table has a column of the requested type")),
        };
        let column = &table.columns()[index];
        let (column, ty) = (column.name().to_owned(), column.ty().clone());
        let alias = g.next_alias("ref");
        let offset = g.d100();
        Ok(AtomicSubselect {
            prod,
            table,
            column,
            ty,
            alias,
            offset,
        })
    }
    pub fn ty(&self) -> &SqlType {
        &self.ty
    }
}
impl Production for AtomicSubselect {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        Vec::new()
    }
}
impl fmt::Display for AtomicSubselect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "(select {alias}.{} from {} as {alias} limit 1 offset {})",
            self.column,
            self.table,
            self.offset,
            alias = self.alias
        )
    }
}

// ------------- boolean expressions -------------
#[derive(Debug)]
pub enum BoolExpr {
    Truth(TruthValue),
    Null(NullPredicate),
    Comparison(ComparisonOp),
    Term(Box<BoolTerm>),
    Exists(Box<ExistsPredicate>),
}

impl BoolExpr {
    /// A condition over `scope`. Whatever cannot be built here gives way to a
    /// truth value.
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope) -> Generated<Self> {
        match Self::compound(g, parent, scope) {
            Ok(Some(expr)) => return Ok(expr),
            Ok(None) => {}
            Err(failure) if failure.rules_out_choice() => {}
            Err(failure) => return Err(failure),
        }
        Ok(BoolExpr::Truth(TruthValue::new(g, parent)?))
    }

    fn compound(g: &mut Generator, parent: &Prod, scope: &Scope) -> Generated<Option<Self>> {
        let level = parent.level() + 1;
        if level > g.d100() {
            return Ok(None);
        }
        let expr = if g.d6() < 4 {
            BoolExpr::Comparison(ComparisonOp::new(g, parent, scope)?)
        } else if g.d6() < 4 {
            BoolExpr::Term(Box::new(BoolTerm::new(g, parent, scope)?))
        } else if g.d6() < 4 {
            BoolExpr::Null(NullPredicate::new(g, parent, scope)?)
        } else if g.d6() < 4 {
            return Ok(None);
        } else {
            BoolExpr::Exists(Box::new(ExistsPredicate::new(g, parent, scope)?))
        };
        Ok(Some(expr))
    }

    fn inner(&self) -> &dyn Production {
        match self {
            BoolExpr::Truth(e) => e,
            BoolExpr::Null(e) => e,
            BoolExpr::Comparison(e) => e,
            BoolExpr::Term(e) => &**e,
            BoolExpr::Exists(e) => &**e,
        }
    }
}

impl Production for BoolExpr {
    fn prod(&self) -> &Prod {
        self.inner().prod()
    }
    fn children(&self) -> Vec<&dyn Production> {
        self.inner().children()
    }
}
impl fmt::Display for BoolExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self.inner(), f)
    }
}

#[derive(Debug)]
pub struct TruthValue {
    prod: Prod,
    literal: String,
}
impl TruthValue {
    pub fn new(g: &mut Generator, parent: &Prod) -> Generated<Self> {
        let prod = Prod::new(g, Some(parent), "truth_value")?;
        let schema = g.schema();
        let literal = if g.d6() < 4 {
            schema.true_literal.clone()
        } else {
            schema.false_literal.clone()
        };
        Ok(TruthValue { prod, literal })
    }
}
impl Production for TruthValue {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        Vec::new()
    }
}
impl fmt::Display for TruthValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.literal)
    }
}

#[derive(Debug)]
pub struct NullPredicate {
    prod: Prod,
    negated: bool,
    expr: ValueExpr,
}
impl NullPredicate {
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope) -> Generated<Self> {
        let mut prod = Prod::alternative(g, parent, "null_predicate")?;
        let expr = prod.attempt(g, |g, p| Ok(ValueExpr::new(g, p, scope, None)?))?;
        let negated = g.coin();
        Ok(NullPredicate {
            prod,
            negated,
            expr,
        })
    }
}
impl Production for NullPredicate {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        vec![&self.expr]
    }
}
impl fmt::Display for NullPredicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let not = if self.negated { "not " } else { "" };
        write!(f, "({}) is {not}NULL", self.expr)
    }
}

/// A binary operator yielding the boolean type.
#[derive(Debug)]
pub struct ComparisonOp {
    prod: Prod,
    op: Arc<Operator>,
    lhs: ValueExpr,
    rhs: ValueExpr,
}
impl ComparisonOp {
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope) -> Generated<Self> {
        let mut prod = Prod::alternative(g, parent, "comparison_op")?;
        let booltype = g.schema().booltype.clone();
        let operators = visible_operators(scope, Some(&booltype));
        if operators.is_empty() {
            return Err(prod.fail(g, "no operator yields the boolean type"));
        }
        let (op, lhs, rhs) = prod.attempt(g, |g, p| {
            let op = g.pick(&operators).cloned().ok_or(Backtrack::Retry)?;
            let lhs = ValueExpr::new(g, p, scope, Some(&op.left))?;
            let rhs = ValueExpr::new(g, p, scope, Some(&op.right))?;
            p.match_type(g, &op.left, lhs.ty())?;
            p.match_type(g, &op.right, rhs.ty())?;
            Ok((op, lhs, rhs))
        })?;
        Ok(ComparisonOp { prod, op, lhs, rhs })
    }
}
impl Production for ComparisonOp {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        vec![&self.lhs, &self.rhs]
    }
}
impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}) {} ({})", self.lhs, self.op.name, self.rhs)
    }
}

#[derive(Debug)]
pub struct BoolTerm {
    prod: Prod,
    op: &'static str,
    lhs: BoolExpr,
    rhs: BoolExpr,
}
impl BoolTerm {
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope) -> Generated<Self> {
        let mut prod = Prod::alternative(g, parent, "bool_term")?;
        let op = if g.coin() { "or" } else { "and" };
        let (lhs, rhs) = prod.attempt(g, |g, p| {
            let lhs = BoolExpr::new(g, p, scope)?;
            let rhs = BoolExpr::new(g, p, scope)?;
            Ok((lhs, rhs))
        })?;
        Ok(BoolTerm { prod, op, lhs, rhs })
    }
}
impl Production for BoolTerm {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        vec![&self.lhs, &self.rhs]
    }
}
impl fmt::Display for BoolTerm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}) {} ({})", self.lhs, self.op, self.rhs)
    }
}

/// `exists (subquery)`, correlated with the scope it appears in.
#[derive(Debug)]
pub struct ExistsPredicate {
    prod: Prod,
    subquery: QuerySpec,
}
impl ExistsPredicate {
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope) -> Generated<Self> {
        let mut prod = Prod::alternative(g, parent, "exists_predicate")?;
        let subquery = prod.attempt(g, |g, p| Ok(QuerySpec::new(g, Some(p), scope)?))?;
        Ok(ExistsPredicate { prod, subquery })
    }
}
impl Production for ExistsPredicate {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        vec![&self.subquery]
    }
}
impl fmt::Display for ExistsPredicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EXISTS ({})", self.subquery)
    }
}

// ------------- table references -------------
#[derive(Debug)]
pub enum TableRef {
    Named(NamedTable),
    Derived(Box<DerivedTable>),
    Joined(Box<JoinedTable>),
}

impl TableRef {
    /// A derived or joined table where one can be built, a named table
    /// otherwise.
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope) -> Generated<Self> {
        match Self::compound(g, parent, scope) {
            Ok(Some(table)) => return Ok(table),
            Ok(None) => {}
            Err(failure) if failure.rules_out_choice() => {}
            Err(failure) => return Err(failure),
        }
        Ok(TableRef::Named(NamedTable::new(g, parent, scope)?))
    }

    fn compound(g: &mut Generator, parent: &Prod, scope: &Scope) -> Generated<Option<Self>> {
        let level = parent.level() + 1;
        if level < 3 + g.d6() {
            if g.d6() > 3 && level < g.d6() {
                return Ok(Some(TableRef::Derived(Box::new(DerivedTable::new(
                    g, parent, scope,
                )?))));
            }
            if g.d6() > 3 {
                return Ok(Some(TableRef::Joined(Box::new(JoinedTable::new(
                    g, parent, scope,
                )?))));
            }
        }
        Ok(None)
    }

    /// The columns this reference makes visible, under their correlation names.
    pub fn refs(&self) -> Vec<ColumnBinding> {
        match self {
            TableRef::Named(t) => t.refs(),
            TableRef::Derived(t) => t.refs(),
            TableRef::Joined(t) => t.refs(),
        }
    }

    fn inner(&self) -> &dyn Production {
        match self {
            TableRef::Named(t) => t,
            TableRef::Derived(t) => &**t,
            TableRef::Joined(t) => &**t,
        }
    }
}

impl Production for TableRef {
    fn prod(&self) -> &Prod {
        self.inner().prod()
    }
    fn children(&self) -> Vec<&dyn Production> {
        self.inner().children()
    }
}
impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self.inner(), f)
    }
}

#[derive(Debug)]
pub struct NamedTable {
    prod: Prod,
    table: Arc<Table>,
    alias: String,
}
impl NamedTable {
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope) -> Generated<Self> {
        let prod = Prod::new(g, Some(parent), "table_or_query_name")?;
        let tables = visible_tables(scope);
        let table = match g.pick(&tables) {
            Some(table) => Arc::clone(table),
            None => return Err(prod.fail(g, "no table is visible")),
        };
        let alias = g.next_alias("ref");
        Ok(NamedTable { prod, table, alias })
    }
    fn refs(&self) -> Vec<ColumnBinding> {
        self.table
            .columns()
            .iter()
            .map(|c| ColumnBinding {
                relation: self.alias.clone(),
                name: c.name().to_owned(),
                ty: c.ty().clone(),
            })
            .collect()
    }
}
impl Production for NamedTable {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        Vec::new()
    }
}
impl fmt::Display for NamedTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} as {}", self.table, self.alias)
    }
}

/// A subquery in the from clause. It only sees the scope enclosing the query
/// it belongs to, never its siblings.
#[derive(Debug)]
pub struct DerivedTable {
    prod: Prod,
    query: QuerySpec,
    alias: String,
}
impl DerivedTable {
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope) -> Generated<Self> {
        let mut prod = Prod::alternative(g, parent, "table_subquery")?;
        let query = prod.attempt(g, |g, p| Ok(QuerySpec::new(g, Some(p), scope)?))?;
        let alias = g.next_alias("subq");
        Ok(DerivedTable { prod, query, alias })
    }
    fn refs(&self) -> Vec<ColumnBinding> {
        self.query
            .columns()
            .into_iter()
            .map(|(name, ty)| ColumnBinding {
                relation: self.alias.clone(),
                name,
                ty,
            })
            .collect()
    }
}
impl Production for DerivedTable {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        vec![&self.query]
    }
}
impl fmt::Display for DerivedTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}) as {}", self.query, self.alias)
    }
}

#[derive(Debug)]
pub struct JoinedTable {
    prod: Prod,
    join_type: &'static str,
    lhs: TableRef,
    rhs: TableRef,
    condition: BoolExpr,
}
impl JoinedTable {
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope) -> Generated<Self> {
        let mut prod = Prod::alternative(g, parent, "joined_table")?;
        let (lhs, rhs, condition) = prod.attempt(g, |g, p| {
            let lhs = TableRef::new(g, p, scope)?;
            let rhs = TableRef::new(g, p, scope)?;
            let mut both = scope.push();
            bind_all(&mut both, lhs.refs());
            bind_all(&mut both, rhs.refs());
            let condition = BoolExpr::new(g, p, &both)?;
            Ok((lhs, rhs, condition))
        })?;
        let join_type = if g.coin() { "inner" } else { "left" };
        Ok(JoinedTable {
            prod,
            join_type,
            lhs,
            rhs,
            condition,
        })
    }
    fn refs(&self) -> Vec<ColumnBinding> {
        let mut refs = self.lhs.refs();
        refs.extend(self.rhs.refs());
        refs
    }
}
impl Production for JoinedTable {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        vec![&self.lhs, &self.rhs, &self.condition]
    }
}
impl fmt::Display for JoinedTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // a join on the right needs parentheses to keep its own on clause
        match &self.rhs {
            TableRef::Joined(_) => write!(
                f,
                "{} {} join ({}) on ({})",
                self.lhs, self.join_type, self.rhs, self.condition
            ),
            _ => write!(
                f,
                "{} {} join {} on ({})",
                self.lhs, self.join_type, self.rhs, self.condition
            ),
        }
    }
}

// ------------- queries -------------
#[derive(Debug)]
pub struct SelectList {
    prod: Prod,
    items: Vec<(ValueExpr, String)>,
}
impl SelectList {
    /// An aggregate list holds aggregate calls only.
    pub fn new(g: &mut Generator, parent: &Prod, scope: &Scope, aggregate: bool) -> Generated<Self> {
        let mut prod = Prod::new(g, Some(parent), "select_list")?;
        let items = prod.attempt(g, |g, p| {
            let mut items = Vec::new();
            let mut aggregate = aggregate;
            loop {
                let expr = if aggregate {
                    match Funcall::aggregate(g, p, scope, None) {
                        Ok(call) => Some(ValueExpr::Funcall(Box::new(call))),
                        // no usable aggregate: make it a plain query instead
                        Err(failure) if failure.rules_out_choice() && items.is_empty() => {
                            aggregate = false;
                            None
                        }
                        Err(failure) => return Err(failure.into()),
                    }
                } else {
                    None
                };
                let expr = match expr {
                    Some(expr) => expr,
                    None => ValueExpr::new(g, p, scope, None)?,
                };
                let alias = format!("c{}", items.len());
                items.push((expr, alias));
                if g.d6() <= 3 {
                    break;
                }
            }
            Ok(items)
        })?;
        Ok(SelectList { prod, items })
    }
    pub fn columns(&self) -> Vec<(String, SqlType)> {
        self.items
            .iter()
            .map(|(expr, alias)| (alias.clone(), expr.ty().clone()))
            .collect()
    }
}
impl Production for SelectList {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        self.items.iter().map(|(e, _)| e as &dyn Production).collect()
    }
}
impl fmt::Display for SelectList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let items = self.items.iter().map(|(expr, alias)| format!("{expr} as {alias}"));
        write!(f, "{}", join(items))
    }
}

#[derive(Debug)]
pub struct QuerySpec {
    prod: Prod,
    distinct: bool,
    select_list: SelectList,
    from: TableRef,
    search: BoolExpr,
    limit: Option<u32>,
}
impl QuerySpec {
    /// A query over a frame pushed onto `scope`, so outer names stay visible
    /// for correlation. Without a parent this is a top-level statement.
    pub fn new(g: &mut Generator, parent: Option<&Prod>, scope: &Scope) -> Generated<Self> {
        let mut prod = Prod::new(g, parent, "query_spec")?;
        let (from, select_list, search) = prod.attempt(g, |g, p| {
            let from = TableRef::new(g, p, scope)?;
            let mut inner = scope.push();
            bind_all(&mut inner, from.refs());
            let aggregate = g.d100() <= 10;
            let select_list = SelectList::new(g, p, &inner, aggregate)?;
            let search = BoolExpr::new(g, p, &inner)?;
            Ok((from, select_list, search))
        })?;
        let distinct = g.d100() == 1;
        let limit = if g.d6() > 2 { Some(g.d100()) } else { None };
        Ok(QuerySpec {
            prod,
            distinct,
            select_list,
            from,
            search,
            limit,
        })
    }
    pub fn columns(&self) -> Vec<(String, SqlType)> {
        self.select_list.columns()
    }
}
impl Production for QuerySpec {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        vec![&self.select_list, &self.from, &self.search]
    }
}
impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let distinct = if self.distinct { "distinct " } else { "" };
        write!(
            f,
            "select {distinct}{} from {} where {}",
            self.select_list, self.from, self.search
        )?;
        if let Some(limit) = self.limit {
            write!(f, " limit {limit}")?;
        }
        Ok(())
    }
}

// ------------- modifying statements -------------
fn modifiable_tables(scope: &Scope) -> Vec<Arc<Table>> {
    visible_tables(scope)
        .into_iter()
        .filter(|t| t.insertable() && t.base_table())
        .collect()
}

#[derive(Debug)]
pub struct InsertStmt {
    prod: Prod,
    table: Arc<Table>,
    values: Vec<ValueExpr>,
}
impl InsertStmt {
    pub fn new(g: &mut Generator, scope: &Scope) -> Generated<Self> {
        let mut prod = Prod::new(g, None, "insert_stmt")?;
        let victims = modifiable_tables(scope);
        if victims.is_empty() {
            return Err(prod.fail(g, "no insertable table"));
        }
        let (table, values) = prod.attempt(g, |g, p| {
            let table = g.pick(&victims).cloned().ok_or(Backtrack::Retry)?;
            let mut values = Vec::with_capacity(table.columns().len());
            for column in table.columns() {
                let value = ValueExpr::new(g, p, scope, Some(column.ty()))?;
                p.match_type(g, column.ty(), value.ty())?;
                values.push(value);
            }
            Ok((table, values))
        })?;
        Ok(InsertStmt {
            prod,
            table,
            values,
        })
    }
}
impl Production for InsertStmt {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        self.values.iter().map(|v| v as &dyn Production).collect()
    }
}
impl fmt::Display for InsertStmt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "insert into {} ({}) values ({})",
            self.table,
            join(self.table.columns().iter().map(|c| c.name())),
            join(&self.values)
        )
    }
}

/// Binds the columns of a modified table under its correlation name.
fn target_scope<'a>(scope: &'a Scope, table: &Table, alias: &str) -> Scope<'a> {
    let mut inner = scope.push();
    for column in table.columns() {
        inner.bind(Binding::Column(ColumnBinding {
            relation: alias.to_owned(),
            name: column.name().to_owned(),
            ty: column.ty().clone(),
        }));
    }
    inner
}

#[derive(Debug)]
pub struct UpdateStmt {
    prod: Prod,
    table: Arc<Table>,
    alias: String,
    set_list: Vec<(String, ValueExpr)>,
    search: BoolExpr,
}
impl UpdateStmt {
    pub fn new(g: &mut Generator, scope: &Scope) -> Generated<Self> {
        let mut prod = Prod::new(g, None, "update_stmt")?;
        let victims = modifiable_tables(scope);
        if victims.iter().all(|t| t.columns().is_empty()) {
            return Err(prod.fail(g, "no updatable table"));
        }
        let (table, alias, set_list, search) = prod.attempt(g, |g, p| {
            let table = g.pick(&victims).cloned().ok_or(Backtrack::Retry)?;
            if table.columns().is_empty() {
                return Err(Backtrack::Retry);
            }
            let alias = g.next_alias("ref");
            let inner = target_scope(scope, &table, &alias);
            let mut set_list = Vec::new();
            for column in table.columns() {
                if g.d6() < 4 {
                    let value = ValueExpr::new(g, p, &inner, Some(column.ty()))?;
                    set_list.push((column.name().to_owned(), value));
                }
            }
            if set_list.is_empty() {
                let index = g.below(table.columns().len() as u32) as usize;
                let column = &table.columns()[index];
                let value = ValueExpr::new(g, p, &inner, Some(column.ty()))?;
                set_list.push((column.name().to_owned(), value));
            }
            let search = BoolExpr::new(g, p, &inner)?;
            Ok((table, alias, set_list, search))
        })?;
        Ok(UpdateStmt {
            prod,
            table,
            alias,
            set_list,
            search,
        })
    }
}
impl Production for UpdateStmt {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        let mut children: Vec<&dyn Production> =
            self.set_list.iter().map(|(_, v)| v as &dyn Production).collect();
        children.push(&self.search);
        children
    }
}
impl fmt::Display for UpdateStmt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let assignments = self
            .set_list
            .iter()
            .map(|(column, value)| format!("{column} = {value}"));
        write!(
            f,
            "update {} as {} set {} where {}",
            self.table,
            self.alias,
            join(assignments),
            self.search
        )
    }
}

#[derive(Debug)]
pub struct DeleteStmt {
    prod: Prod,
    table: Arc<Table>,
    alias: String,
    search: BoolExpr,
}
impl DeleteStmt {
    pub fn new(g: &mut Generator, scope: &Scope) -> Generated<Self> {
        let mut prod = Prod::new(g, None, "delete_stmt")?;
        let victims = modifiable_tables(scope);
        if victims.is_empty() {
            return Err(prod.fail(g, "no table to delete from"));
        }
        let (table, alias, search) = prod.attempt(g, |g, p| {
            let table = g.pick(&victims).cloned().ok_or(Backtrack::Retry)?;
            let alias = g.next_alias("ref");
            let inner = target_scope(scope, &table, &alias);
            let search = BoolExpr::new(g, p, &inner)?;
            Ok((table, alias, search))
        })?;
        Ok(DeleteStmt {
            prod,
            table,
            alias,
            search,
        })
    }
}
impl Production for DeleteStmt {
    fn prod(&self) -> &Prod {
        &self.prod
    }
    fn children(&self) -> Vec<&dyn Production> {
        vec![&self.search]
    }
}
impl fmt::Display for DeleteStmt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "delete from {} as {} where {}",
            self.table, self.alias, self.search
        )
    }
}

// ------------- statements -------------
#[derive(Debug)]
pub enum Statement {
    Select(QuerySpec),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
}

impl Statement {
    fn inner(&self) -> &dyn Production {
        match self {
            Statement::Select(s) => s,
            Statement::Insert(s) => s,
            Statement::Update(s) => s,
            Statement::Delete(s) => s,
        }
    }
}

impl Production for Statement {
    fn prod(&self) -> &Prod {
        self.inner().prod()
    }
    fn children(&self) -> Vec<&dyn Production> {
        self.inner().children()
    }
}
impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self.inner(), f)
    }
}

/// Generates one statement over a fresh frame of `root`. A statement whose
/// construction fails is thrown away and a new kind is drawn, up to the
/// configured number of whole-statement attempts.
pub fn statement_factory(g: &mut Generator, root: &Scope) -> Result<Statement> {
    let mut last_failure = None;
    for attempt in 0..g.statement_attempts() {
        g.reset_aliases();
        let scope = root.push();
        let built = match g.statement_kind() {
            0 => QuerySpec::new(g, None, &scope).map(Statement::Select),
            1 => InsertStmt::new(g, &scope).map(Statement::Insert),
            2 => UpdateStmt::new(g, &scope).map(Statement::Update),
            _ => DeleteStmt::new(g, &scope).map(Statement::Delete),
        };
        match built {
            Ok(statement) => return Ok(statement),
            Err(failure) => {
                debug!(attempt, %failure, "statement abandoned");
                last_failure = Some(failure);
            }
        }
    }
    Err(last_failure.map_or_else(
        || ObsmithError::Invariant("no statement attempts were made".into()),
        ObsmithError::Generation,
    ))
}
