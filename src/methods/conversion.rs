// Type conversion and value mapping.
use crate::datatype::ValueType;
use crate::error::{Result, VartabError};
use crate::methods::Call;
use crate::script::ScriptValue;

pub(super) fn invoke(call: &Call) -> Option<Result<ScriptValue>> {
    Some(match call.name {
        "type" => convert(call),
        "map" => map(call),
        "value" => Ok(call.same_unit(call.value.clone())),
        _ => return None,
    })
}

/// `type()` names the value type; `type('integer')` converts to it.
fn convert(call: &Call) -> Result<ScriptValue> {
    if call.args.is_empty() {
        return Ok(ScriptValue::text(call.value_type().name()));
    }
    let target = ValueType::for_name(&call.arg_text(0)?)?;
    Ok(call.same_unit(target.convert(call.value)?))
}

/// Looks the rendered value up among the keys of an object. Values with no
/// entry map to the optional default, or null.
fn map(call: &Call) -> Result<ScriptValue> {
    let ScriptValue::Object(entries) = call.arg(0)? else {
        return Err(VartabError::InvalidArgument(String::from("map() expects an object")));
    };
    let default = call.args.get(1).cloned().unwrap_or(ScriptValue::Null);
    let lookup = |key: Option<String>| {
        key.and_then(|k| entries.iter().find(|(name, _)| *name == k).map(|(_, v)| v.clone()))
            .unwrap_or_else(|| default.clone())
    };
    if call.value.is_null() {
        return Ok(ScriptValue::Null);
    }
    Ok(match call.value.elements() {
        Some(elements) => ScriptValue::Array(elements.iter().map(|e| lookup(e.render())).collect()),
        None => lookup(call.value.render()),
    })
}

#[cfg(test)]
mod tests {
    use crate::datatype::ValueType;
    use crate::methods::testing::*;
    use crate::script::ScriptValue;

    fn sexes() -> ScriptValue {
        ScriptValue::Object(vec![
            (String::from("1"), ScriptValue::text("male")),
            (String::from("2"), ScriptValue::text("female")),
        ])
    }

    #[test]
    fn type_names_and_conversions() {
        assert_eq!(rendered(int(3), "type", vec![]).as_deref(), Some("integer"));
        let converted = run(ScriptValue::text("42"), "type", vec![ScriptValue::text("integer")]).expect("converts");
        assert_eq!(converted.value().map(|v| v.value_type()), Some(ValueType::Integer));
        assert!(run(ScriptValue::text("x"), "type", vec![ScriptValue::text("integer")]).is_err());
    }

    #[test]
    fn mapping_with_and_without_default() {
        assert_eq!(rendered(int(2), "map", vec![sexes()]).as_deref(), Some("female"));
        assert!(run(int(9), "map", vec![sexes()]).expect("maps").is_null());
        assert_eq!(rendered(int(9), "map", vec![sexes(), ScriptValue::text("unknown")]).as_deref(), Some("unknown"));
    }

    #[test]
    fn mapping_sequences_maps_each_element() {
        let codes = ScriptValue::of(ValueType::Integer.sequence_value_of(Some("1,2")).expect("sequence"));
        let mapped = run(codes, "map", vec![sexes()]).expect("maps");
        let value = mapped.into_value(ValueType::Text, true).expect("sequence");
        assert_eq!(value.render().as_deref(), Some("\"male\",\"female\""));
    }
}
