// Arithmetic, rounding and reductions over numbers.
use bigdecimal::{BigDecimal, ToPrimitive};
use tracing::debug;

use std::cmp::Ordering;
use std::str::FromStr;

use crate::datatype::{Value, ValueType};
use crate::error::{Result, VartabError};
use crate::methods::{Call, compare::compare_values};
use crate::script::ScriptValue;

// quotients keep at most this many fractional digits
const DIVISION_SCALE: i64 = 15;

#[derive(Clone, Copy, PartialEq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

pub(super) fn invoke(call: &Call) -> Option<Result<ScriptValue>> {
    if !call.value_type().is_numeric() {
        return None;
    }
    if call.value.is_sequence() {
        return match call.name {
            "sum" | "avg" | "min" | "max" => Some(reduce(call)),
            _ => None,
        };
    }
    Some(match call.name {
        "plus" => fold(call, Op::Add),
        "minus" => fold(call, Op::Sub),
        "multiply" => fold(call, Op::Mul),
        "div" => fold(call, Op::Div),
        "modulo" => fold(call, Op::Rem),
        "negate" => unary(call, |d| -d),
        "abs" => unary(call, |d| if d < zero() { -d } else { d }),
        "round" => round(call),
        "floor" => to_integer(call, floor),
        "ceil" => to_integer(call, ceil),
        "pow" => pow(call),
        "sqrt" => sqrt(call),
        "sum" | "min" | "max" => Ok(call.same_unit(call.value.clone())),
        "avg" => ValueType::Decimal.convert(call.value).map(|v| call.same_unit(v)),
        _ => return None,
    })
}

fn zero() -> BigDecimal {
    BigDecimal::from(0)
}

/// Drops trailing fractional zeros and caps the scale of quotients.
fn tidy(d: BigDecimal) -> BigDecimal {
    let (_, scale) = d.as_bigint_and_exponent();
    let d = if scale > DIVISION_SCALE { d.with_scale(DIVISION_SCALE) } else { d };
    let text = d.to_string();
    if !text.contains('.') || text.contains(['e', 'E']) {
        return d;
    }
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    BigDecimal::from_str(trimmed).unwrap_or(d)
}

fn decimal_of(call: &Call, value: &Value) -> Result<Option<BigDecimal>> {
    if value.is_null() {
        return Ok(None);
    }
    let value = if value.value_type().is_numeric() { value.clone() } else { ValueType::Decimal.convert(value)? };
    value
        .as_decimal()
        .map(Some)
        .ok_or_else(|| VartabError::TypeMismatch(format!("{}() expects numbers", call.name)))
}

fn apply_integer(op: Op, a: i64, b: i64) -> Option<i64> {
    match op {
        Op::Add => a.checked_add(b),
        Op::Sub => a.checked_sub(b),
        Op::Mul => a.checked_mul(b),
        Op::Rem => a.checked_rem(b),
        Op::Div => None,
    }
}

fn apply_decimal(op: Op, a: &BigDecimal, b: &BigDecimal) -> Option<BigDecimal> {
    match op {
        Op::Add => Some(a + b),
        Op::Sub => Some(a - b),
        Op::Mul => Some(a * b),
        Op::Div | Op::Rem if *b == zero() => None,
        Op::Div => Some(tidy(a / b)),
        Op::Rem => {
            let quotient = (a / b).with_scale(0);
            Some(a - &(b * &quotient))
        }
    }
}

/// Applies `op` left to right over the receiver and every argument. Integer
/// operands stay integers except under division; a zero divisor or a null
/// operand yields null.
fn fold(call: &Call, op: Op) -> Result<ScriptValue> {
    let args = call.arg_values()?;
    let integer_result = op != Op::Div
        && call.value_type() == ValueType::Integer
        && args.iter().all(|a| a.value_type() == ValueType::Integer);
    let null_type = if integer_result { ValueType::Integer } else { ValueType::Decimal };
    let keeps_unit = matches!(op, Op::Add | Op::Sub);
    let wrap = |v: Value| if keeps_unit { call.same_unit(v) } else { ScriptValue::of(v) };

    if integer_result {
        let mut acc = call.value.as_i64();
        let mut overflowed = false;
        for arg in &args {
            acc = match (acc, arg.as_i64()) {
                (Some(_), Some(0)) if op == Op::Rem => None,
                (Some(a), Some(b)) => match apply_integer(op, a, b) {
                    Some(r) => Some(r),
                    None => {
                        overflowed = true;
                        break;
                    }
                },
                _ => None,
            };
        }
        if !overflowed {
            return Ok(wrap(acc.map(Value::integer).unwrap_or_else(|| null_type.null_value())));
        }
        debug!("integer overflow in {}(), continuing with decimals", call.name);
    }

    let mut acc = decimal_of(call, call.value)?;
    for arg in &args {
        let b = decimal_of(call, arg)?;
        acc = match (acc, b) {
            (Some(a), Some(b)) => apply_decimal(op, &a, &b),
            _ => None,
        };
    }
    Ok(wrap(acc.map(Value::decimal).unwrap_or_else(|| ValueType::Decimal.null_value())))
}

fn unary(call: &Call, f: impl Fn(BigDecimal) -> BigDecimal) -> Result<ScriptValue> {
    if call.value.is_null() {
        return Ok(call.same_unit(call.value.clone()));
    }
    if let Some(i) = call.value.as_i64().filter(|_| call.value_type() == ValueType::Integer) {
        let result = f(BigDecimal::from(i));
        if let Some(v) = result.to_i64() {
            return Ok(call.same_unit(Value::integer(v)));
        }
    }
    let d = decimal_of(call, call.value)?.unwrap_or_else(zero);
    Ok(call.same_unit(Value::decimal(f(d))))
}

fn power_of_ten(digits: i64) -> Result<BigDecimal> {
    if !(0..=18).contains(&digits) {
        return Err(VartabError::InvalidArgument(format!("cannot round to {} digits", digits)));
    }
    Ok(BigDecimal::from(10i64.pow(digits as u32)))
}

/// Rounds half away from zero to the given number of fractional digits.
fn round_half_up(d: &BigDecimal, digits: i64) -> Result<BigDecimal> {
    let factor = power_of_ten(digits)?;
    let half = BigDecimal::from(1) / BigDecimal::from(2);
    let shifted = d * &factor;
    let adjusted = if shifted < zero() { shifted - half } else { shifted + half };
    Ok((adjusted.with_scale(0) / factor).with_scale(digits))
}

fn round(call: &Call) -> Result<ScriptValue> {
    let digits = call.optional_i64(0, 0)?;
    if call.value.is_null() || call.value_type() == ValueType::Integer {
        return Ok(call.same_unit(call.value.clone()));
    }
    let d = decimal_of(call, call.value)?.unwrap_or_else(zero);
    Ok(call.same_unit(Value::decimal(round_half_up(&d, digits)?)))
}

fn floor(d: &BigDecimal) -> BigDecimal {
    let truncated = d.with_scale(0);
    if truncated > *d { truncated - BigDecimal::from(1) } else { truncated }
}

fn ceil(d: &BigDecimal) -> BigDecimal {
    let truncated = d.with_scale(0);
    if truncated < *d { truncated + BigDecimal::from(1) } else { truncated }
}

fn to_integer(call: &Call, f: fn(&BigDecimal) -> BigDecimal) -> Result<ScriptValue> {
    let Some(d) = decimal_of(call, call.value)? else {
        return Ok(call.same_unit(ValueType::Integer.null_value()));
    };
    let result = f(&d);
    Ok(call.same_unit(match result.to_i64() {
        Some(i) => Value::integer(i),
        None => Value::decimal(result),
    }))
}

fn pow(call: &Call) -> Result<ScriptValue> {
    let exponent = call.arg_value(0)?;
    let (Some(base), Some(e)) = (decimal_of(call, call.value)?, decimal_of(call, &exponent)?) else {
        return Ok(ScriptValue::of(ValueType::Decimal.null_value()));
    };
    if let Some(n) = e.to_i64().filter(|n| BigDecimal::from(*n) == e && (-64..=64).contains(n)) {
        if call.value_type() == ValueType::Integer && n >= 0 {
            if let Some(i) = call.value.as_i64().and_then(|i| i.checked_pow(n as u32)) {
                return Ok(ScriptValue::of(Value::integer(i)));
            }
        }
        let mut result = BigDecimal::from(1);
        for _ in 0..n.unsigned_abs() {
            result = result * &base;
        }
        if n < 0 {
            if result == zero() {
                return Ok(ScriptValue::of(ValueType::Decimal.null_value()));
            }
            result = tidy(BigDecimal::from(1) / result);
        }
        return Ok(ScriptValue::of(Value::decimal(result)));
    }
    let (Some(b), Some(x)) = (call.value.as_f64(), exponent.as_f64()) else {
        return Ok(ScriptValue::of(ValueType::Decimal.null_value()));
    };
    Ok(ScriptValue::of(Value::from_f64(b.powf(x)).unwrap_or_else(|| ValueType::Decimal.null_value())))
}

fn sqrt(call: &Call) -> Result<ScriptValue> {
    let result = call.value.as_f64().filter(|f| *f >= 0.0).and_then(|f| Value::from_f64(f.sqrt()));
    Ok(ScriptValue::of(result.unwrap_or_else(|| ValueType::Decimal.null_value())))
}

/// Reductions over the non-null elements of a sequence. An empty or all-null
/// sequence reduces to null.
fn reduce(call: &Call) -> Result<ScriptValue> {
    let elements: Vec<&Value> = call.value.elements().unwrap_or(&[]).iter().filter(|v| !v.is_null()).collect();
    let value_type = call.value_type();
    if elements.is_empty() {
        let null_type = if call.name == "avg" { ValueType::Decimal } else { value_type };
        return Ok(ScriptValue::of(null_type.null_value()));
    }
    let result = match call.name {
        "min" | "max" => {
            let wanted = if call.name == "min" { Ordering::Less } else { Ordering::Greater };
            let mut best = elements[0];
            for candidate in &elements[1..] {
                if compare_values(candidate, best)? == wanted {
                    best = *candidate;
                }
            }
            best.clone()
        }
        _ => {
            let mut total = zero();
            for element in &elements {
                total += element.as_decimal().unwrap_or_else(zero);
            }
            if call.name == "avg" {
                Value::decimal(tidy(total / BigDecimal::from(elements.len() as i64)))
            } else if value_type == ValueType::Integer {
                total.to_i64().map(Value::integer).unwrap_or(Value::decimal(total))
            } else {
                Value::decimal(total)
            }
        }
    };
    Ok(call.same_unit(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::testing::*;

    #[test]
    fn integer_arithmetic_stays_integer() {
        let result = run(int(7), "plus", vec![int(3), int(2)]).expect("adds");
        assert_eq!(result.value().map(|v| v.value_type()), Some(ValueType::Integer));
        assert_eq!(rendered(int(7), "minus", vec![int(10)]).as_deref(), Some("-3"));
        assert_eq!(rendered(int(7), "modulo", vec![int(4)]).as_deref(), Some("3"));
    }

    #[test]
    fn decimal_multiplication_is_exact() {
        let product = run(int(80), "multiply", vec![dec("2.2")]).expect("multiplies");
        assert_eq!(product.value(), Some(&Value::decimal(BigDecimal::from(176))));
    }

    #[test]
    fn division_yields_decimals() {
        assert_eq!(rendered(int(7), "div", vec![int(2)]).as_deref(), Some("3.5"));
        assert_eq!(rendered(int(1), "div", vec![int(3)]).as_deref(), Some("0.333333333333333"));
    }

    #[test]
    fn division_by_zero_is_null() {
        assert!(run(int(1), "div", vec![int(0)]).expect("no panic").is_null());
        assert!(run(dec("1.5"), "modulo", vec![int(0)]).expect("no panic").is_null());
        assert!(run(int(1), "modulo", vec![int(0)]).expect("no panic").is_null());
    }

    #[test]
    fn nulls_propagate() {
        let null = ScriptValue::of(ValueType::Decimal.null_value());
        assert!(run(null.clone(), "plus", vec![int(1)]).expect("null").is_null());
        assert!(run(int(1), "plus", vec![null]).expect("null").is_null());
    }

    #[test]
    fn rounding() {
        assert_eq!(rendered(dec("2.345"), "round", vec![int(2)]).as_deref(), Some("2.35"));
        assert_eq!(rendered(dec("-2.5"), "round", vec![]).as_deref(), Some("-3"));
        assert_eq!(rendered(dec("-2.5"), "floor", vec![]).as_deref(), Some("-3"));
        assert_eq!(rendered(dec("2.1"), "ceil", vec![]).as_deref(), Some("3"));
        assert_eq!(rendered(dec("-2.1"), "abs", vec![]).as_deref(), Some("2.1"));
    }

    #[test]
    fn powers() {
        assert_eq!(rendered(int(2), "pow", vec![int(10)]).as_deref(), Some("1024"));
        assert_eq!(rendered(int(2), "pow", vec![int(-2)]).as_deref(), Some("0.25"));
        assert_eq!(rendered(int(9), "sqrt", vec![]).as_deref(), Some("3"));
    }

    #[test]
    fn extreme_exponents_fall_back_to_floating_point() {
        assert!(run(int(2), "pow", vec![int(i64::MIN)]).is_ok());
        assert!(run(int(2), "pow", vec![int(i64::MAX)]).is_ok());
        assert!(rendered(int(-2), "pow", vec![int(-64)]).is_some());
    }

    #[test]
    fn reductions_skip_nulls() {
        let sequence = ScriptValue::of(ValueType::Integer.sequence_value_of(Some("4,null,1,7")).expect("sequence"));
        assert_eq!(rendered(sequence.clone(), "sum", vec![]).as_deref(), Some("12"));
        assert_eq!(rendered(sequence.clone(), "avg", vec![]).as_deref(), Some("4"));
        assert_eq!(rendered(sequence.clone(), "min", vec![]).as_deref(), Some("1"));
        assert_eq!(rendered(sequence, "max", vec![]).as_deref(), Some("7"));
        let empty = ScriptValue::of(ValueType::Integer.sequence_value_of(Some("")).expect("empty"));
        assert!(run(empty, "sum", vec![]).expect("null").is_null());
    }
}
