use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use vartab::clause::{ListClause, NameSelectClause, ScriptWhereClause, StaticWhereClause};
use vartab::construct::{Variable, VariableEntity};
use vartab::context::{Context, Settings};
use vartab::datatype::{Value, ValueType};
use vartab::memory::{StaticDatasource, StaticValueTable};
use vartab::table::{TableRef, ValueSetWriter, ValueTable, ValueTableWriter};
use vartab::view::View;
use vartab::VartabError;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_test_writer().try_init();
}

fn participant(id: &str) -> VariableEntity {
    VariableEntity::new("Participant", id)
}

// T holds E (80 kg, 180 cm, answers A and C) and F (60 kg, 165 cm, answer C)
fn setup() -> TableRef {
    init_tracing();
    let table = StaticValueTable::new("T", "Participant");
    let weight = Variable::builder("weight", ValueType::Integer, "Participant").unit("kg").build().unwrap();
    let height = Variable::builder("height", ValueType::Integer, "Participant").unit("cm").build().unwrap();
    let answers = Variable::builder("answers", ValueType::Text, "Participant").repeatable(true).build().unwrap();
    let mut writer = table.writer();
    for variable in [&weight, &height, &answers] {
        writer.write_variable(variable).unwrap();
    }
    let rows = [("E", 80, 180, vec!["A", "C"]), ("F", 60, 165, vec!["C"])];
    for (id, w, h, a) in rows {
        let mut row = writer.value_set_writer(&participant(id)).unwrap();
        row.write_value(&weight, Value::integer(w)).unwrap();
        row.write_value(&height, Value::integer(h)).unwrap();
        let a = ValueType::Text.sequence_of(a.into_iter().map(Value::text).collect()).unwrap();
        row.write_value(&answers, a).unwrap();
    }
    table
}

fn derived(name: &str, value_type: ValueType, script: &str) -> Variable {
    Variable::builder(name, value_type, "Participant").scripted().script(script).build().unwrap()
}

#[test]
fn weight_in_pounds() {
    let context = Arc::new(Context::default());
    let list = ListClause::new().add(derived("weight_lbs", ValueType::Decimal, "$('weight') * 2.2")).unwrap();
    let view = View::builder("V", setup()).select(NameSelectClause::new(["weight"])).list(list).build(&context).unwrap();
    let names: Vec<String> = view.variables().iter().map(|v| v.name().to_string()).collect();
    assert_eq!(names, vec!["weight", "weight_lbs"]);
    let value_set = Arc::clone(&view).value_set(&participant("E")).unwrap();
    assert_eq!(value_set.value("weight").unwrap(), Value::integer(80));
    assert_eq!(value_set.value("weight_lbs").unwrap(), ValueType::Decimal.parse("176").unwrap());
}

#[test]
fn rejected_entities_are_not_in_the_view() {
    let context = Arc::new(Context::default());
    let view = View::builder("V", setup())
        .select(NameSelectClause::new(["weight"]))
        .where_clause(StaticWhereClause::predicate(|e: &VariableEntity| e.identifier() != "E"))
        .build(&context)
        .unwrap();
    assert!(!view.has_value_set(&participant("E")));
    assert!(view.has_value_set(&participant("F")));
    let err = Arc::clone(&view).value_set(&participant("E")).unwrap_err();
    assert!(matches!(err, VartabError::NoSuchValueSet { .. }), "got {err:?}");
    assert_eq!(view.variable_entities(), vec![participant("F")]);
}

#[test]
fn script_where_clause() {
    let context = Arc::new(Context::default());
    let clause = ScriptWhereClause::new("tall", "$('height') > 170", &context);
    clause.initialise().unwrap();
    let view = View::builder("V", setup()).where_clause(clause).build(&context).unwrap();
    assert_eq!(view.variable_entities(), vec![participant("E")]);
}

#[test]
fn vector_and_scalar_agree() {
    let context = Arc::new(Context::new(Settings { vector_batch_size: 1, ..Default::default() }));
    let list = ListClause::new()
        .add(derived("bmi", ValueType::Decimal, "var m = $('height') / 100;\n$('weight') / (m * m)"))
        .and_then(|l| l.add(derived("bmi_rounded", ValueType::Decimal, "$('bmi').round(1)")))
        .and_then(|l| l.add(derived("heavy", ValueType::Boolean, "$('weight').gt(70)")))
        .unwrap();
    let view = View::builder("V", setup()).list(list).build(&context).unwrap();
    let entities = view.variable_entities();
    for variable in ["bmi", "bmi_rounded", "heavy"] {
        let vector = view.values(variable, &entities).unwrap();
        let scalar: Vec<Value> = entities
            .iter()
            .map(|e| Arc::clone(&view).value_set(e).unwrap().value(variable).unwrap())
            .collect();
        assert_eq!(vector, scalar, "{variable}");
    }
    let heavy = view.values("heavy", &entities).unwrap();
    assert_eq!(heavy, vec![Value::boolean(true), Value::boolean(false)]);
    let rounded = view.values("bmi_rounded", &entities).unwrap();
    assert_eq!(rounded[0], ValueType::Decimal.parse("24.7").unwrap());
}

#[test]
fn any_of_a_sequence() {
    let context = Arc::new(Context::default());
    let list = ListClause::new()
        .add(derived("answered_a_or_b", ValueType::Boolean, "$('answers').any('A', 'B')"))
        .and_then(|l| l.add(derived("neither", ValueType::Boolean, "$('answers').any('A', 'B').not()")))
        .and_then(|l| l.add(derived("count", ValueType::Integer, "$('answers').size()")))
        .unwrap();
    let view = View::builder("V", setup()).list(list).build(&context).unwrap();
    let e = Arc::clone(&view).value_set(&participant("E")).unwrap();
    let f = Arc::clone(&view).value_set(&participant("F")).unwrap();
    assert_eq!(e.value("answered_a_or_b").unwrap(), Value::boolean(true));
    assert_eq!(e.value("neither").unwrap(), Value::boolean(false));
    assert_eq!(f.value("neither").unwrap(), Value::boolean(true));
    assert_eq!(e.value("count").unwrap(), Value::integer(2));
}

#[test]
fn results_are_coerced_to_the_declared_variable() {
    let context = Arc::new(Context::default());
    let list = ListClause::new()
        .add(derived("answer", ValueType::Text, "$('answers')"))
        .and_then(|l| l.add(derived("stones", ValueType::Integer, "$('weight') / 32")))
        .unwrap();
    let view = View::builder("V", setup()).list(list).build(&context).unwrap();
    let e = Arc::clone(&view).value_set(&participant("E")).unwrap();
    let f = Arc::clone(&view).value_set(&participant("F")).unwrap();
    assert!(matches!(e.value("answer"), Err(VartabError::TypeMismatch(_))));
    assert_eq!(f.value("answer").unwrap(), Value::text("C"));
    // 80 / 32 = 2.5 and 60 / 32 = 1.875
    assert_eq!(e.value("stones").unwrap(), Value::integer(3));
    assert_eq!(f.value("stones").unwrap(), Value::integer(2));
}

#[test]
fn units_follow_values() {
    let context = Arc::new(Context::default());
    let list = ListClause::new().add(derived("weight_lb", ValueType::Decimal, "$('weight').toUnit('lb').round(1)")).unwrap();
    let view = View::builder("V", setup()).list(list).build(&context).unwrap();
    let value = Arc::clone(&view).value_set(&participant("F")).unwrap().value("weight_lb").unwrap();
    assert_eq!(value, ValueType::Decimal.parse("132.3").unwrap());
}

#[test]
fn scripts_reach_other_tables() {
    init_tracing();
    let context = Arc::new(Context::default());
    let datasource = StaticDatasource::new("study");
    let baseline = datasource.static_table("baseline", "Participant").unwrap();
    let followup = datasource.static_table("followup", "Participant").unwrap();
    let weight = Variable::builder("weight", ValueType::Integer, "Participant").unit("kg").build().unwrap();
    for (table, value) in [(&baseline, 80), (&followup, 77)] {
        let mut writer = table.writer();
        writer.write_variable(&weight).unwrap();
        writer.value_set_writer(&participant("E")).unwrap().write_value(&weight, Value::integer(value)).unwrap();
    }
    context.add_datasource(datasource).unwrap();
    let list = ListClause::new()
        .add(derived("loss", ValueType::Integer, "$('weight') - $('study.followup:weight')"))
        .unwrap();
    let view = View::builder("V", baseline as TableRef).list(list).build(&context).unwrap();
    view.validate_scripts().unwrap();
    let value_set = Arc::clone(&view).value_set(&participant("E")).unwrap();
    assert_eq!(value_set.value("loss").unwrap(), Value::integer(3));
}

#[test]
fn compile_errors_name_the_line() {
    let context = Arc::new(Context::default());
    let list = ListClause::new()
        .add(derived("bmi", ValueType::Decimal, "var w = $('weight');\nw.multiply(;\n"))
        .unwrap();
    match View::builder("V", setup()).list(list).build(&context) {
        Err(VartabError::Compile { script, line, .. }) => {
            assert_eq!(script, "bmi");
            assert_eq!(line, 2);
        }
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("compiled a broken script"),
    }
}
