// Units of measure and conversions between them.
use bigdecimal::BigDecimal;

use std::str::FromStr;

use crate::datatype::{Value, ValueType};
use crate::error::{Result, VartabError};
use crate::methods::Call;
use crate::script::ScriptValue;

#[derive(Clone, Copy, PartialEq)]
enum Dimension {
    Mass,
    Length,
    Time,
    Volume,
    Temperature,
}

// symbol, dimension, factor to the base unit, offset added before scaling
const UNITS: &[(&str, Dimension, &str, &str)] = &[
    ("kg", Dimension::Mass, "1", "0"),
    ("g", Dimension::Mass, "0.001", "0"),
    ("mg", Dimension::Mass, "0.000001", "0"),
    ("lb", Dimension::Mass, "0.45359237", "0"),
    ("lbs", Dimension::Mass, "0.45359237", "0"),
    ("oz", Dimension::Mass, "0.028349523125", "0"),
    ("m", Dimension::Length, "1", "0"),
    ("cm", Dimension::Length, "0.01", "0"),
    ("mm", Dimension::Length, "0.001", "0"),
    ("km", Dimension::Length, "1000", "0"),
    ("in", Dimension::Length, "0.0254", "0"),
    ("ft", Dimension::Length, "0.3048", "0"),
    ("s", Dimension::Time, "1", "0"),
    ("ms", Dimension::Time, "0.001", "0"),
    ("min", Dimension::Time, "60", "0"),
    ("h", Dimension::Time, "3600", "0"),
    ("d", Dimension::Time, "86400", "0"),
    ("l", Dimension::Volume, "1", "0"),
    ("L", Dimension::Volume, "1", "0"),
    ("ml", Dimension::Volume, "0.001", "0"),
    ("mL", Dimension::Volume, "0.001", "0"),
    ("K", Dimension::Temperature, "1", "0"),
    ("C", Dimension::Temperature, "1", "273.15"),
    ("°C", Dimension::Temperature, "1", "273.15"),
    ("F", Dimension::Temperature, "0.5555555555555556", "459.67"),
    ("°F", Dimension::Temperature, "0.5555555555555556", "459.67"),
];

struct Unit {
    dimension: Dimension,
    factor: BigDecimal,
    offset: BigDecimal,
}

fn unit(symbol: &str) -> Result<Unit> {
    let (_, dimension, factor, offset) = UNITS
        .iter()
        .find(|(s, ..)| *s == symbol)
        .ok_or_else(|| VartabError::InvalidArgument(format!("unknown unit '{}'", symbol)))?;
    let number = |text: &str| {
        BigDecimal::from_str(text).map_err(|_| VartabError::InvalidArgument(format!("bad factor for unit '{}'", symbol)))
    };
    Ok(Unit { dimension: *dimension, factor: number(factor)?, offset: number(offset)? })
}

pub(super) fn invoke(call: &Call) -> Option<Result<ScriptValue>> {
    Some(match call.name {
        "unit" if call.args.is_empty() => Ok(ScriptValue::of(match call.unit {
            Some(u) => Value::text(u),
            None => ValueType::Text.null_value(),
        })),
        "unit" => call.arg_text(0).map(|u| ScriptValue::Value(call.value.clone(), Some(u))),
        "toUnit" if call.value_type().is_numeric() => to_unit(call),
        _ => return None,
    })
}

/// Converts through the base unit of the dimension: `(x + offset) * factor`.
fn to_unit(call: &Call) -> Result<ScriptValue> {
    let target_symbol = call.arg_text(0)?;
    let source_symbol = call
        .unit
        .ok_or_else(|| VartabError::InvalidArgument(format!("cannot convert to {} a value without unit", target_symbol)))?;
    let (source, target) = (unit(source_symbol)?, unit(&target_symbol)?);
    if source.dimension != target.dimension {
        return Err(VartabError::InvalidArgument(format!(
            "cannot convert {} to {}",
            source_symbol, target_symbol
        )));
    }
    let Some(x) = call.value.as_decimal() else {
        return Ok(ScriptValue::Value(ValueType::Decimal.null_value(), Some(target_symbol)));
    };
    let base = (x + &source.offset) * &source.factor;
    let converted = base / &target.factor - &target.offset;
    Ok(ScriptValue::Value(Value::decimal(converted.with_scale(10).normalized_text()?), Some(target_symbol)))
}

trait NormalizedText {
    fn normalized_text(self) -> Result<BigDecimal>;
}

impl NormalizedText for BigDecimal {
    /// Drops trailing fractional zeros.
    fn normalized_text(self) -> Result<BigDecimal> {
        let text = self.to_string();
        if !text.contains('.') {
            return Ok(self);
        }
        let trimmed = text.trim_end_matches('0').trim_end_matches('.');
        BigDecimal::from_str(trimmed).map_err(|e| VartabError::Evaluation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use crate::datatype::{Value, ValueType};
    use crate::methods::testing::*;
    use crate::script::ScriptValue;

    fn measured(text: &str, unit: &str) -> ScriptValue {
        ScriptValue::with_unit(ValueType::Decimal.parse(text).expect("decimal"), Some(unit))
    }

    #[test]
    fn reports_the_carried_unit() {
        assert_eq!(rendered(measured("80", "kg"), "unit", vec![]).as_deref(), Some("kg"));
        assert_eq!(rendered(int(80), "unit", vec![]), None);
        let declared = run(int(80), "unit", vec![ScriptValue::text("kg")]).expect("declares");
        assert_eq!(declared.unit(), Some("kg"));
    }

    #[test]
    fn converts_within_a_dimension() {
        let grams = run(measured("1.5", "kg"), "toUnit", vec![ScriptValue::text("g")]).expect("converts");
        assert_eq!(grams.value(), Some(&ValueType::Decimal.parse("1500").expect("decimal")));
        assert_eq!(grams.unit(), Some("g"));
        let kelvin = run(measured("25", "C"), "toUnit", vec![ScriptValue::text("K")]).expect("converts");
        assert_eq!(kelvin.value(), Some(&ValueType::Decimal.parse("298.15").expect("decimal")));
        let fahrenheit = run(measured("100", "C"), "toUnit", vec![ScriptValue::text("F")]).expect("converts");
        let f = fahrenheit.value().and_then(Value::as_f64).expect("number");
        assert!((f - 212.0).abs() < 1e-6);
    }

    #[test]
    fn refuses_mismatched_or_missing_units() {
        assert!(run(measured("1", "kg"), "toUnit", vec![ScriptValue::text("m")]).is_err());
        assert!(run(int(1), "toUnit", vec![ScriptValue::text("m")]).is_err());
        assert!(run(measured("1", "kg"), "toUnit", vec![ScriptValue::text("stone")]).is_err());
    }
}
