use std::sync::Arc;

use obsmith::construct::{Schema, Table, TypeKeeper};
use obsmith::datatype::DataType;
use obsmith::error::ObsmithError;
use obsmith::scope::{Binding, BindingKind, ColumnBinding, Scope};

fn schema() -> Schema {
    let mut schema = Schema::new(Arc::new(TypeKeeper::new()));
    let int = schema.sql_type(DataType::Integer);
    let text = schema.sql_type(DataType::Varchar);
    schema.add_table(Table::new(
        "people",
        "main",
        true,
        true,
        vec![("id".to_string(), int), ("name".to_string(), text)],
    ));
    schema.register_common_builtins();
    schema
}

fn column(relation: &str, name: &str, schema: &Schema, data_type: DataType) -> Binding {
    Binding::Column(ColumnBinding {
        relation: relation.to_string(),
        name: name.to_string(),
        ty: schema.sql_type(data_type),
    })
}

#[test]
fn filled_root_sees_the_whole_schema() {
    let schema = schema();
    let mut root = Scope::root();
    schema.fill_scope(&mut root).expect("fill");
    assert!(root.is_filled());
    assert_eq!(root.candidates_for(None, BindingKind::Table).len(), 1);
    assert_eq!(
        root.candidates_for(None, BindingKind::Operator).len(),
        schema.operators().len()
    );
    assert_eq!(
        root.candidates_for(None, BindingKind::Aggregate).len(),
        schema.aggregates().len()
    );
}

#[test]
fn filling_twice_is_an_error() {
    let schema = schema();
    let mut root = Scope::root();
    schema.fill_scope(&mut root).expect("first fill");
    assert!(matches!(
        schema.fill_scope(&mut root),
        Err(ObsmithError::Invariant(_))
    ));
}

#[test]
fn only_the_root_can_be_filled() {
    let schema = schema();
    let root = Scope::root();
    let mut nested = root.push();
    assert!(matches!(
        schema.fill_scope(&mut nested),
        Err(ObsmithError::Invariant(_))
    ));
}

#[test]
fn lookup_filters_by_result_type() {
    let schema = schema();
    let mut root = Scope::root();
    schema.fill_scope(&mut root).expect("fill");
    let mut frame = root.push();
    frame.bind(column("ref_0", "id", &schema, DataType::Integer));
    frame.bind(column("ref_0", "name", &schema, DataType::Varchar));

    let text = schema.sql_type(DataType::Varchar);
    let found = frame.candidates_for(Some(&text), BindingKind::Column);
    assert_eq!(found.len(), 1);
    match found[0] {
        Binding::Column(c) => assert_eq!(c.name, "name"),
        other => panic!("unexpected binding {other:?}"),
    }
    let timestamp = schema.sql_type(DataType::Timestamp);
    assert!(frame.candidates_for(Some(&timestamp), BindingKind::Column).is_empty());
}

#[test]
fn inner_frames_come_first_and_leave_outer_untouched() {
    let schema = schema();
    let mut root = Scope::root();
    schema.fill_scope(&mut root).expect("fill");
    let mut outer = root.push();
    outer.bind(column("ref_0", "id", &schema, DataType::Integer));
    {
        let mut inner = outer.push();
        inner.bind(column("ref_1", "id", &schema, DataType::Integer));
        assert_eq!(inner.depth(), 3);

        let found = inner.candidates_for(None, BindingKind::Column);
        let relations: Vec<&str> = found
            .iter()
            .filter_map(|b| match b {
                Binding::Column(c) => Some(c.relation.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(relations, vec!["ref_1", "ref_0"]);
        assert_eq!(inner.local(BindingKind::Column).len(), 1);
    }
    // the inner frame is gone and never wrote through
    assert_eq!(outer.candidates_for(None, BindingKind::Column).len(), 1);
    assert_eq!(outer.depth(), 2);
    assert!(root.local(BindingKind::Column).is_empty());
}

#[test]
fn tables_only_match_unconstrained_lookups() {
    let schema = schema();
    let mut root = Scope::root();
    schema.fill_scope(&mut root).expect("fill");
    let int = schema.sql_type(DataType::Integer);
    assert!(root.candidates_for(Some(&int), BindingKind::Table).is_empty());
}
