// Equality and ordering across compatible types.
use std::cmp::Ordering;

use crate::datatype::{Value, ValueType};
use crate::error::{Result, VartabError};
use crate::methods::Call;
use crate::script::ScriptValue;

/// Orders two non-null values. Numbers compare numerically whatever their
/// type, dates with datetimes; anything else is converted to `a`'s type.
pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering> {
    if a.is_null() || b.is_null() {
        return Err(VartabError::NullComparison);
    }
    let (ta, tb) = (a.value_type(), b.value_type());
    if !a.is_sequence() && !b.is_sequence() {
        if ta.is_numeric() && tb.is_numeric() {
            if let (Some(x), Some(y)) = (a.as_decimal(), b.as_decimal()) {
                return Ok(x.cmp(&y));
            }
        }
        if ta.is_date_time() && tb.is_date_time() {
            if let (Some(x), Some(y)) = (a.as_datetime(), b.as_datetime()) {
                return Ok(x.cmp(&y));
            }
        }
    }
    if ta == tb {
        return a.compare_to(b);
    }
    a.compare_to(&ta.convert(b)?)
}

/// Equality that never fails: incomparable values are simply unequal.
pub(crate) fn equals(a: &Value, b: &Value) -> bool {
    match (a.is_null(), b.is_null()) {
        (true, true) => true,
        (false, false) => compare_values(a, b).map(|o| o == Ordering::Equal).unwrap_or(false),
        _ => false,
    }
}

pub(super) fn invoke(call: &Call) -> Option<Result<ScriptValue>> {
    Some(match call.name {
        "eq" => call.arg_values().map(|args| ScriptValue::boolean(args.iter().any(|a| equals(call.value, a)))),
        "compare" => compare(call),
        "gt" => ordered(call, |o| o == Ordering::Greater),
        "ge" => ordered(call, |o| o != Ordering::Less),
        "lt" => ordered(call, |o| o == Ordering::Less),
        "le" => ordered(call, |o| o != Ordering::Greater),
        _ => return None,
    })
}

/// -1, 0 or 1. Comparing with a null fails.
fn compare(call: &Call) -> Result<ScriptValue> {
    let other = call.arg_value(0)?;
    let ordering = compare_values(call.value, &other)?;
    Ok(ScriptValue::of(Value::integer(match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    })))
}

/// A boolean test of the ordering; null when either side is null.
fn ordered(call: &Call, test: impl Fn(Ordering) -> bool) -> Result<ScriptValue> {
    let other = call.arg_value(0)?;
    if call.value.is_null() || other.is_null() {
        return Ok(ScriptValue::of(ValueType::Boolean.null_value()));
    }
    Ok(ScriptValue::boolean(test(compare_values(call.value, &other)?)))
}
