use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use vartab::clause::ListClause;
use vartab::construct::{Variable, VariableEntity};
use vartab::context::Context;
use vartab::datatype::{Value, ValueType};
use vartab::join::JoinTable;
use vartab::memory::{StaticDatasource, StaticValueTable};
use vartab::table::{TableRef, Timestamps, ValueSetWriter, ValueTable, ValueTableWriter};
use vartab::view::View;

fn at(day: u32) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).single()
}

fn participant(id: &str) -> VariableEntity {
    VariableEntity::new("Participant", id)
}

fn fill(table: &StaticValueTable, name: &str, rows: &[(&str, i64)]) {
    let variable = Variable::builder(name, ValueType::Integer, "Participant").build().unwrap();
    let mut writer = table.writer();
    writer.write_variable(&variable).unwrap();
    for (id, value) in rows {
        writer.value_set_writer(&participant(id)).unwrap().write_value(&variable, Value::integer(*value)).unwrap();
    }
}

fn setup() -> (Arc<Context>, Arc<StaticValueTable>, Arc<StaticValueTable>) {
    let context = Arc::new(Context::default());
    let datasource = StaticDatasource::new("study");
    let visits = datasource.static_table("visits", "Participant").unwrap();
    let labs = datasource.static_table("labs", "Participant").unwrap();
    fill(&visits, "weight", &[("1", 80), ("2", 62)]);
    fill(&labs, "glucose", &[("2", 5), ("3", 7)]);
    fill(&labs, "weight", &[("2", 63), ("3", 90)]);
    context.add_datasource(datasource).unwrap();
    (context, visits, labs)
}

#[test]
fn timestamps_aggregate_over_constituents() {
    let (_, visits, labs) = setup();
    visits.set_timestamps(Timestamps::new(at(1), at(3))).unwrap();
    labs.set_timestamps(Timestamps::new(None, at(8))).unwrap();
    let join = JoinTable::new(vec![visits as TableRef, labs as TableRef]).unwrap();
    assert_eq!(join.name(), "visits-labs");
    assert_eq!(join.timestamps().created(), at(1));
    assert_eq!(join.timestamps().last_update(), at(8));
}

#[test]
fn views_over_joins() {
    let (context, visits, labs) = setup();
    let join: TableRef = JoinTable::named("all", vec![visits as TableRef, labs as TableRef]).unwrap();
    let ratio = Variable::builder("ratio", ValueType::Decimal, "Participant")
        .scripted()
        .script("$('glucose').isNull() ? null : $('weight') / $('glucose')")
        .build()
        .unwrap();
    let view = View::builder("V", join).list(ListClause::new().add(ratio).unwrap()).build(&context).unwrap();
    let entities = view.variable_entities();
    assert_eq!(entities, vec![participant("1"), participant("2"), participant("3")]);
    let weights = view.values("weight", &entities).unwrap();
    assert_eq!(weights, vec![Value::integer(80), Value::integer(62), Value::integer(90)]);
    let ratios = view.values("ratio", &entities).unwrap();
    assert!(ratios[0].is_null());
    assert_eq!(ratios[1], ValueType::Decimal.parse("12.4").unwrap());
    assert!((ratios[2].as_f64().unwrap() - 90.0 / 7.0).abs() < 1e-9);
}
