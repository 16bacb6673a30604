use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};

use obsmith::construct::{Schema, Table, TypeKeeper};
use obsmith::datatype::DataType;
use obsmith::grammar::statement_factory;
use obsmith::impedance::Impedance;
use obsmith::ledger::BugKey;
use obsmith::prod::Generator;
use obsmith::scope::Scope;
use obsmith::settings::{GenerationSettings, ImpedanceSettings};

// a catalog with a few tables of mixed column types
fn synthetic_schema(tables: usize) -> Schema {
    let mut schema = Schema::new(Arc::new(TypeKeeper::new()));
    let kinds = [DataType::Integer, DataType::Double, DataType::Varchar, DataType::Timestamp];
    for t in 0..tables {
        let columns = (0..6)
            .map(|c| (format!("c{c}"), schema.sql_type(kinds[(t + c) % kinds.len()])))
            .collect();
        schema.add_table(Table::new(format!("t{t}"), "main", true, true, columns));
    }
    schema.register_common_builtins();
    schema
}

pub fn criterion_benchmark(c: &mut Criterion) {
    for tables in [1, 10, 100] {
        let schema = synthetic_schema(tables);
        let mut root = Scope::root();
        schema.fill_scope(&mut root).expect("fill");
        let impedance = Arc::new(Impedance::new(&ImpedanceSettings::default()));
        let mut g = Generator::seeded(&schema, &GenerationSettings::default(), impedance, 1)
            .expect("generator");
        c.bench_function(&format!("generate and render, {tables} tables"), |b| {
            b.iter(|| {
                let statement = statement_factory(&mut g, &root).expect("statement");
                black_box(statement.to_string())
            })
        });
    }

    c.bench_function("bug fingerprint", |b| {
        b.iter(|| BugKey::new(black_box(4016), "Internal error\n  at plan").fingerprint())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
