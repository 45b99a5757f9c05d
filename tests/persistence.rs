use vartab::construct::{Attribute, AttributeAware, Category, Variable};
use vartab::datatype::{Value, ValueType};
use vartab::memory::StaticValueTable;
use vartab::persist::{value_from_json, value_to_json, variables_from_json, variables_to_json};
use vartab::table::{ValueTable, ValueTableWriter};

fn smoking() -> Variable {
    Variable::builder("smoking", ValueType::Integer, "Participant")
        .occurrence_group("habits")
        .add_category(Category::new("0").with_attribute(Attribute::text("label", "never").with_locale("en")))
        .add_category(Category::new("1").with_attribute(Attribute::text("label", "current").with_locale("en")))
        .add_category(Category::new("9").missing(true))
        .add_attribute(Attribute::text("label", "Smoking status").with_locale("en"))
        .add_attribute(Attribute::text("label", "Statut tabagique").with_locale("fr"))
        .build()
        .unwrap()
}

#[test]
fn table_metadata_round_trip() {
    let table = StaticValueTable::new("T", "Participant");
    let derived = Variable::builder("pack_years", ValueType::Decimal, "Participant")
        .scripted()
        .script("$('packs') * $('years')")
        .with(|b| b.unit("pack-year"))
        .build()
        .unwrap();
    let mut writer = table.writer();
    writer.write_variable(&smoking()).unwrap();
    writer.write_variable(&derived).unwrap();

    let json = variables_to_json(&table.variables()).unwrap();
    let restored = variables_from_json(&json).unwrap();
    assert_eq!(restored, table.variables());
    assert_eq!(restored[1].script().as_deref(), Some("$('packs') * $('years')"));
    assert!(restored[0].is_missing_value(&Value::integer(9)));
    let french = restored[0].localized_attribute("label", Some("fr")).unwrap();
    assert_eq!(french.value(), &Value::text("Statut tabagique"));
}

#[test]
fn json_keeps_the_value_type() {
    let decimal = ValueType::Decimal.parse("1.50").unwrap();
    let json = value_to_json(&decimal).unwrap();
    assert!(json.contains("\"type\":\"decimal\""), "{json}");
    let restored = value_from_json(&json).unwrap();
    assert_eq!(restored.value_type(), ValueType::Decimal);
    assert_eq!(restored, decimal);

    let sequence = ValueType::Text
        .sequence_of(vec![Value::text("a,b"), ValueType::Text.null_value(), Value::text("back\\slash")])
        .unwrap();
    assert_eq!(value_from_json(&value_to_json(&sequence).unwrap()).unwrap(), sequence);
}
