// Metadata accessors on variables obtained with `$var`.
use crate::construct::{AttributeAware, Variable};
use crate::datatype::{Value, ValueType};
use crate::error::Result;
use crate::methods::{arg_value, no_such_method};
use crate::script::ScriptValue;

fn optional_text(text: Option<&str>) -> ScriptValue {
    ScriptValue::of(match text {
        Some(t) => Value::text(t),
        None => ValueType::Text.null_value(),
    })
}

fn text_arg(name: &str, args: &[ScriptValue], i: usize) -> Result<Option<String>> {
    match args.get(i) {
        Some(a) => Ok(arg_value(name, a)?.render()),
        None => Ok(None),
    }
}

pub(super) fn invoke(variable: &Variable, name: &str, args: &[ScriptValue]) -> Result<ScriptValue> {
    Ok(match name {
        "name" => ScriptValue::text(variable.name()),
        "type" => ScriptValue::text(variable.value_type().name()),
        "unit" => optional_text(variable.unit()),
        "repeatable" => ScriptValue::boolean(variable.is_repeatable()),
        "entityType" => ScriptValue::text(variable.entity_type()),
        "occurrenceGroup" => optional_text(variable.occurrence_group()),
        "isDerived" => ScriptValue::boolean(variable.is_derived()),
        "categories" => ScriptValue::Array(
            variable.categories().iter().map(|c| ScriptValue::text(c.name())).collect(),
        ),
        "attribute" => {
            let Some(attribute) = text_arg(name, args, 0)? else {
                return Ok(ScriptValue::Null);
            };
            let locale = text_arg(name, args, 1)?;
            let found = match &locale {
                Some(l) => variable.localized_attribute(&attribute, Some(l)),
                None => variable.attribute(&attribute),
            };
            match found {
                Ok(a) => ScriptValue::of(a.value().clone()),
                Err(_) => ScriptValue::Null,
            }
        }
        _ => return Err(no_such_method("variable", name)),
    })
}

#[cfg(test)]
mod tests {
    use crate::construct::{Attribute, Variable};
    use crate::datatype::ValueType;
    use crate::methods::testing::*;
    use crate::script::ScriptValue;

    fn weight() -> ScriptValue {
        let variable = Variable::builder("weight", ValueType::Decimal, "Participant")
            .unit("kg")
            .add_attribute(Attribute::text("label", "Weight").with_locale("en"))
            .add_attribute(Attribute::text("label", "Poids").with_locale("fr"))
            .add_categories(["light", "heavy"])
            .build()
            .expect("variable");
        ScriptValue::Variable(Box::new(variable))
    }

    #[test]
    fn exposes_metadata() {
        assert_eq!(rendered(weight(), "name", vec![]).as_deref(), Some("weight"));
        assert_eq!(rendered(weight(), "type", vec![]).as_deref(), Some("decimal"));
        assert_eq!(rendered(weight(), "unit", vec![]).as_deref(), Some("kg"));
        assert_eq!(rendered(weight(), "repeatable", vec![]).as_deref(), Some("false"));
        assert_eq!(rendered(weight(), "entityType", vec![]).as_deref(), Some("Participant"));
        assert_eq!(rendered(weight(), "occurrenceGroup", vec![]), None);
    }

    #[test]
    fn localized_attributes() {
        let label = ScriptValue::text("label");
        assert_eq!(rendered(weight(), "attribute", vec![label.clone(), ScriptValue::text("fr")]).as_deref(), Some("Poids"));
        assert_eq!(rendered(weight(), "attribute", vec![label]).as_deref(), Some("Weight"));
        assert!(run(weight(), "attribute", vec![ScriptValue::text("missing")]).expect("null").is_null());
    }

    #[test]
    fn categories_are_listed_in_order() {
        let categories = run(weight(), "categories", vec![]).expect("array");
        let value = categories.to_value().expect("sequence").expect("not null");
        assert_eq!(value.render().as_deref(), Some("\"light\",\"heavy\""));
    }
}
