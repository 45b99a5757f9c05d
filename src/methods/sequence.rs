// Sequence access and membership tests.
use crate::datatype::{Value, ValueType};
use crate::error::Result;
use crate::methods::Call;
use crate::methods::compare::equals;
use crate::script::ScriptValue;

pub(super) fn invoke(call: &Call) -> Option<Result<ScriptValue>> {
    // membership works on scalars too, as one-element sequences
    match call.name {
        "any" => return Some(any(call)),
        "all" => return Some(all(call)),
        "asSequence" => return Some(Ok(call.same_unit(call.value.as_sequence()))),
        _ => {}
    }
    if !call.value.is_sequence() {
        return None;
    }
    Some(match call.name {
        "size" => Ok(ScriptValue::of(Value::integer(call.value.size() as i64))),
        "valueAt" => call.optional_i64(0, 0).map(|i| element(call, usize::try_from(i).ok())),
        "first" => Ok(element(call, Some(0))),
        "last" => Ok(element(call, call.value.size().checked_sub(1))),
        "join" => join(call),
        _ => return None,
    })
}

fn elements(value: &Value) -> Vec<Value> {
    match value.elements() {
        Some(elements) => elements.to_vec(),
        None if value.is_null() => Vec::new(),
        None => vec![value.clone()],
    }
}

/// The element at `index`, null when out of range.
fn element(call: &Call, index: Option<usize>) -> ScriptValue {
    let found = index.and_then(|i| call.value.elements().and_then(|e| e.get(i))).cloned();
    call.same_unit(found.unwrap_or_else(|| call.value_type().null_value()))
}

/// True when some element equals one of the arguments.
fn any(call: &Call) -> Result<ScriptValue> {
    let wanted = call.arg_values()?;
    let present = elements(call.value);
    Ok(ScriptValue::boolean(present.iter().any(|e| !e.is_null() && wanted.iter().any(|w| equals(e, w)))))
}

/// True when every argument equals some element.
fn all(call: &Call) -> Result<ScriptValue> {
    let wanted = call.arg_values()?;
    let present = elements(call.value);
    if present.is_empty() {
        return Ok(ScriptValue::boolean(false));
    }
    Ok(ScriptValue::boolean(wanted.iter().all(|w| present.iter().any(|e| equals(e, w)))))
}

/// Joins the rendered elements, nulls as empty texts.
fn join(call: &Call) -> Result<ScriptValue> {
    let separator = match call.args.first() {
        Some(_) => call.arg_text(0)?,
        None => String::new(),
    };
    if call.value.is_null() {
        return Ok(ScriptValue::of(ValueType::Text.null_value()));
    }
    let parts: Vec<String> = elements(call.value).iter().map(|e| e.render().unwrap_or_default()).collect();
    Ok(ScriptValue::text(parts.join(&separator)))
}
