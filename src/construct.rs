use std::sync::{Arc, Mutex, PoisonError, Weak};

// keepers use HashMap with a fast hasher, keys are type names
use core::hash::{BuildHasherDefault, Hasher};
use std::collections::HashMap;
use std::hash::Hash;
use seahash::SeaHasher;

// used to print out readable forms of a construct
use std::fmt;

// our own stuff that we need
use crate::datatype::DataType;
use crate::error::{ObsmithError, Result};
use crate::scope::{Binding, Scope};

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

// ------------- SqlType -------------
/// An interned type identity. Two `SqlType`s are equal only when they were
/// handed out by the same [`TypeKeeper`] for the same name, so comparisons are
/// pointer comparisons.
#[derive(Clone)]
pub struct SqlType {
    name: Arc<str>,
}

impl SqlType {
    pub fn name(&self) -> &str {
        &self.name
    }
}
impl PartialEq for SqlType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.name, &other.name)
    }
}
impl Eq for SqlType {}
impl Hash for SqlType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.name) as *const u8 as usize).hash(state);
    }
}
impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
impl fmt::Debug for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SqlType({})", self.name)
    }
}

/// Owns the canonical instance of every type name seen during a run.
#[derive(Debug, Default)]
pub struct TypeKeeper {
    kept: Mutex<HashMap<String, SqlType, OtherHasher>>,
}
impl TypeKeeper {
    pub fn new() -> Self {
        Self::default()
    }
    /// Returns the canonical type for `name`, keeping a new one on first use.
    pub fn get(&self, name: &str) -> SqlType {
        let mut kept = self.kept.lock().unwrap_or_else(PoisonError::into_inner);
        kept.entry(name.to_owned())
            .or_insert_with(|| SqlType {
                name: Arc::from(name),
            })
            .clone()
    }
    pub fn len(&self) -> usize {
        self.kept.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ------------- Column -------------
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    ty: SqlType,
    table: Weak<Table>,
}
impl Column {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn ty(&self) -> &SqlType {
        &self.ty
    }
    /// The owning table, as long as the schema holding it is alive.
    pub fn table(&self) -> Option<Arc<Table>> {
        self.table.upgrade()
    }
}

// ------------- Table -------------
#[derive(Debug)]
pub struct Table {
    name: String,
    schema: String,
    columns: Vec<Column>,
    insertable: bool,
    base_table: bool,
}
impl Table {
    /// Columns are given in catalog order and keep that order.
    pub fn new(
        name: impl Into<String>,
        schema: impl Into<String>,
        insertable: bool,
        base_table: bool,
        columns: Vec<(String, SqlType)>,
    ) -> Arc<Table> {
        let name = name.into();
        let schema = schema.into();
        Arc::new_cyclic(|me| Table {
            name,
            schema,
            columns: columns
                .into_iter()
                .map(|(name, ty)| Column {
                    name,
                    ty,
                    table: Weak::clone(me),
                })
                .collect(),
            insertable,
            base_table,
        })
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn schema(&self) -> &str {
        &self.schema
    }
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
    pub fn insertable(&self) -> bool {
        self.insertable
    }
    pub fn base_table(&self) -> bool {
        self.base_table
    }
}
impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ------------- Operator -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub name: String,
    pub left: SqlType,
    pub right: SqlType,
    pub result: SqlType,
}
impl Operator {
    pub fn new(name: impl Into<String>, left: SqlType, right: SqlType, result: SqlType) -> Self {
        Self {
            name: name.into(),
            left,
            right,
            result,
        }
    }
}

// ------------- Routine -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routine {
    pub schema: String,
    pub name: String,
    pub result: SqlType,
    pub argtypes: Vec<SqlType>,
    pub aggregate: bool,
}
impl Routine {
    /// A built-in has an empty schema.
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        result: SqlType,
        argtypes: Vec<SqlType>,
        aggregate: bool,
    ) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            result,
            argtypes,
            aggregate,
        }
    }
    pub fn ident(&self) -> String {
        if self.schema.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.schema, self.name)
        }
    }
}

// ------------- Schema -------------
// This holds what a schema loader found in the catalog of the target, and is
// created once per run and then only read.
#[derive(Debug)]
pub struct Schema {
    types: Arc<TypeKeeper>,
    tables: Vec<Arc<Table>>,
    operators: Vec<Arc<Operator>>,
    routines: Vec<Arc<Routine>>,
    aggregates: Vec<Arc<Routine>>,
    pub booltype: SqlType,
    pub inttype: SqlType,
    pub true_literal: String,
    pub false_literal: String,
    // types we know how to write literals for
    pub literal_types: Vec<SqlType>,
}

impl Schema {
    pub fn new(types: Arc<TypeKeeper>) -> Self {
        let inttype = types.get(DataType::Integer.name());
        let literal_types = [DataType::Integer, DataType::Double, DataType::Varchar]
            .iter()
            .map(|t| types.get(t.name()))
            .collect();
        Self {
            booltype: inttype.clone(),
            inttype,
            true_literal: String::from("1"),
            false_literal: String::from("0"),
            literal_types,
            tables: Vec::new(),
            operators: Vec::new(),
            routines: Vec::new(),
            aggregates: Vec::new(),
            types,
        }
    }
    pub fn types(&self) -> &Arc<TypeKeeper> {
        &self.types
    }
    pub fn sql_type(&self, data_type: DataType) -> SqlType {
        self.types.get(data_type.name())
    }
    pub fn tables(&self) -> &[Arc<Table>] {
        &self.tables
    }
    pub fn operators(&self) -> &[Arc<Operator>] {
        &self.operators
    }
    pub fn routines(&self) -> &[Arc<Routine>] {
        &self.routines
    }
    pub fn aggregates(&self) -> &[Arc<Routine>] {
        &self.aggregates
    }
    pub fn add_table(&mut self, table: Arc<Table>) {
        self.tables.push(table);
    }
    pub fn register_operator(&mut self, operator: Operator) {
        self.operators.push(Arc::new(operator));
    }
    pub fn register_routine(&mut self, routine: Routine) {
        self.routines.push(Arc::new(routine));
    }
    pub fn register_aggregate(&mut self, mut routine: Routine) {
        routine.aggregate = true;
        self.aggregates.push(Arc::new(routine));
    }

    /// Registers the operators, functions and aggregates both supported
    /// backends understand. Booleans are integers there.
    pub fn register_common_builtins(&mut self) {
        let int = self.sql_type(DataType::Integer);
        let double = self.sql_type(DataType::Double);
        let varchar = self.sql_type(DataType::Varchar);

        for name in [
            "*", "/", "+", "-", ">>", "<<", "&", "|", "<", "<=", ">", ">=", "=", "<>", "AND", "OR",
        ] {
            self.register_operator(Operator::new(name, int.clone(), int.clone(), int.clone()));
        }

        let scalar = [
            ("abs", &int, vec![&int]),
            ("hex", &varchar, vec![&varchar]),
            ("length", &int, vec![&varchar]),
            ("lower", &varchar, vec![&varchar]),
            ("ltrim", &varchar, vec![&varchar]),
            ("rtrim", &varchar, vec![&varchar]),
            ("trim", &varchar, vec![&varchar]),
            ("quote", &varchar, vec![&varchar]),
            ("round", &int, vec![&double]),
            ("upper", &varchar, vec![&varchar]),
            ("instr", &int, vec![&varchar, &varchar]),
            ("substr", &varchar, vec![&varchar, &int]),
            ("substr", &varchar, vec![&varchar, &int, &int]),
            ("replace", &varchar, vec![&varchar, &varchar, &varchar]),
        ];
        let scalar: Vec<Routine> = scalar
            .into_iter()
            .map(|(name, result, args)| {
                Routine::new("", name, result.clone(), args.into_iter().cloned().collect(), false)
            })
            .collect();
        for routine in scalar {
            self.register_routine(routine);
        }

        let aggregates = [
            ("avg", &int, &int),
            ("avg", &double, &double),
            ("count", &int, &int),
            ("group_concat", &varchar, &varchar),
            ("max", &double, &double),
            ("max", &int, &int),
            ("sum", &double, &double),
            ("sum", &int, &int),
        ];
        let aggregates: Vec<Routine> = aggregates
            .into_iter()
            .map(|(name, result, arg)| Routine::new("", name, result.clone(), vec![arg.clone()], true))
            .collect();
        for routine in aggregates {
            self.register_aggregate(routine);
        }
    }

    /// Binds everything this schema knows into the root frame of `scope`.
    /// Must happen exactly once, before any generation.
    pub fn fill_scope(&self, scope: &mut Scope) -> Result<()> {
        if !scope.is_root() {
            return Err(ObsmithError::Invariant(
                "only a root scope can be filled from a schema".into(),
            ));
        }
        if scope.is_filled() {
            return Err(ObsmithError::Invariant("scope was already filled".into()));
        }
        for table in &self.tables {
            scope.bind(Binding::Table(Arc::clone(table)));
        }
        for operator in &self.operators {
            scope.bind(Binding::Operator(Arc::clone(operator)));
        }
        for routine in &self.routines {
            scope.bind(Binding::Routine(Arc::clone(routine)));
        }
        for aggregate in &self.aggregates {
            scope.bind(Binding::Aggregate(Arc::clone(aggregate)));
        }
        scope.mark_filled();
        Ok(())
    }
}
