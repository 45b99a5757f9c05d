// Null tests and three-valued boolean logic.
use crate::datatype::{Value, ValueType};
use crate::error::Result;
use crate::methods::{Call, arg_value};
use crate::script::ScriptValue;

pub(super) fn invoke(call: &Call) -> Option<Result<ScriptValue>> {
    let boolean = call.value_type() == ValueType::Boolean;
    Some(match call.name {
        "isNull" => Ok(ScriptValue::boolean(call.value.is_null())),
        "isNotNull" => Ok(ScriptValue::boolean(!call.value.is_null())),
        "whenNull" => when_null(call),
        "not" if boolean => Ok(ScriptValue::of(map_booleans(call.value, |b| b.map(|b| !b)))),
        "and" if boolean => logic(call, false),
        "or" if boolean => logic(call, true),
        _ => return None,
    })
}

fn map_booleans(value: &Value, f: impl Fn(Option<bool>) -> Option<bool>) -> Value {
    let apply = |v: &Value| match f(v.as_bool()) {
        Some(b) => Value::boolean(b),
        None => ValueType::Boolean.null_value(),
    };
    if value.is_null() {
        return value.clone();
    }
    match value.elements() {
        Some(elements) => ValueType::Boolean
            .sequence_of(elements.iter().map(apply).collect())
            .unwrap_or_else(|_| value.clone()),
        None => apply(value),
    }
}

/// Replaces the receiver, or its null elements, with the argument.
fn when_null(call: &Call) -> Result<ScriptValue> {
    let replacement = call.arg(0)?;
    if call.value.is_null() {
        return match replacement {
            ScriptValue::Null => Ok(call.same_unit(call.value.clone())),
            ScriptValue::Value(v, _) => Ok(call.same_unit(call.value_type().convert(v)?)),
            other => Ok(other.clone()),
        };
    }
    let Some(elements) = call.value.elements() else {
        return Ok(call.same_unit(call.value.clone()));
    };
    let replacement = call.value_type().convert(&arg_value(call.name, replacement)?)?;
    let replaced = elements.iter().map(|e| if e.is_null() { replacement.clone() } else { e.clone() }).collect();
    Ok(call.same_unit(call.value_type().sequence_of(replaced)?))
}

/// `and` is false as soon as one operand is false, `or` true as soon as one is
/// true; otherwise a null operand makes the result null.
fn logic(call: &Call, short_circuit: bool) -> Result<ScriptValue> {
    let mut operands = vec![call.value.clone()];
    for value in call.arg_values()? {
        operands.push(ValueType::Boolean.convert(&value)?);
    }
    let mut unknown = false;
    for operand in &operands {
        match operand.as_bool() {
            Some(b) if b == short_circuit => return Ok(ScriptValue::boolean(short_circuit)),
            Some(_) => {}
            None => unknown = true,
        }
    }
    Ok(if unknown {
        ScriptValue::of(ValueType::Boolean.null_value())
    } else {
        ScriptValue::boolean(!short_circuit)
    })
}
