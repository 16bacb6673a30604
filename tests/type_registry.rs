use std::sync::Arc;

use obsmith::construct::{Routine, Schema, Table, TypeKeeper};
use obsmith::datatype::DataType;
use obsmith::error::ObsmithError;

#[test]
fn same_name_yields_identical_type() {
    let types = TypeKeeper::new();
    let a = types.get("INTEGER");
    let b = types.get("INTEGER");
    let c = types.get("VARCHAR");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(types.len(), 2);
}

#[test]
fn types_from_different_keepers_differ() {
    // identity is the interned instance, not the spelling
    let first = TypeKeeper::new().get("INTEGER");
    let second = TypeKeeper::new().get("INTEGER");
    assert_eq!(first.name(), second.name());
    assert_ne!(first, second);
}

#[test]
fn columns_reach_their_table() {
    let types = Arc::new(TypeKeeper::new());
    let schema = Schema::new(Arc::clone(&types));
    let table = Table::new(
        "orders",
        "main",
        true,
        true,
        vec![
            ("id".to_string(), schema.sql_type(DataType::Integer)),
            ("note".to_string(), schema.sql_type(DataType::Varchar)),
        ],
    );
    let names: Vec<&str> = table.columns().iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["id", "note"], "catalog order is kept");
    let owner = table.columns()[1].table().expect("table still alive");
    assert_eq!(owner.name(), "orders");
    assert_eq!(table.columns()[0].ty(), &types.get("INTEGER"));
}

#[test]
fn schema_booleans_are_integers() {
    let schema = Schema::new(Arc::new(TypeKeeper::new()));
    assert_eq!(schema.booltype, schema.inttype);
    assert_eq!(schema.true_literal, "1");
    assert_eq!(schema.false_literal, "0");
    assert_eq!(schema.literal_types.len(), 3);
}

#[test]
fn builtins_split_routines_and_aggregates() {
    let mut schema = Schema::new(Arc::new(TypeKeeper::new()));
    schema.register_common_builtins();
    assert!(schema.routines().iter().all(|r| !r.aggregate));
    assert!(schema.aggregates().iter().all(|r| r.aggregate));
    assert!(schema.operators().iter().any(|o| o.name == "="));
    assert!(schema.aggregates().iter().any(|r| r.name == "count"));
}

#[test]
fn routine_ident_is_schema_qualified() {
    let types = TypeKeeper::new();
    let int = types.get("INTEGER");
    let builtin = Routine::new("", "abs", int.clone(), vec![int.clone()], false);
    let owned = Routine::new("shop", "discount", int.clone(), vec![int], false);
    assert_eq!(builtin.ident(), "abs");
    assert_eq!(owned.ident(), "shop.discount");
}

#[test]
fn native_types_map_to_canonical() {
    assert_eq!(DataType::from_native("bigint").unwrap(), DataType::Integer);
    assert_eq!(DataType::from_native("DECIMAL").unwrap(), DataType::Double);
    assert_eq!(DataType::from_native("mediumtext").unwrap(), DataType::Varchar);
    assert_eq!(DataType::from_native("DATETIME").unwrap(), DataType::Timestamp);
    assert_eq!(DataType::from_native("LONGBLOB").unwrap(), DataType::Binary);
    assert_eq!(DataType::from_native("enum").unwrap(), DataType::Enum);
}

#[test]
fn unknown_native_type_fails_the_load() {
    match DataType::from_native("JSON") {
        Err(ObsmithError::SchemaLoad(message)) => {
            assert_eq!(message, "Unhandled data type: JSON");
        }
        other => panic!("expected a schema load error, got {other:?}"),
    }
}

#[test]
fn sqlite_declared_types_fall_back_to_affinity() {
    assert_eq!(DataType::from_sqlite_declared("VARCHAR(20)").unwrap(), DataType::Varchar);
    assert_eq!(DataType::from_sqlite_declared("unsigned big int").unwrap(), DataType::Integer);
    assert_eq!(DataType::from_sqlite_declared("real").unwrap(), DataType::Double);
    assert_eq!(DataType::from_sqlite_declared("").unwrap(), DataType::Binary);
    assert!(DataType::from_sqlite_declared("geometry").is_err());
}

#[test]
fn canonical_names_round_trip() {
    for data_type in DataType::ALL {
        assert_eq!(DataType::from_name(data_type.name()), Some(data_type));
    }
}
