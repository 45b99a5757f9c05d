//! Runtime values of the script engine.
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::construct::Variable;
use crate::datatype::{Value, ValueType};
use crate::error::{Result, VartabError};

/// What a script expression evaluates to.
#[derive(Debug, Clone)]
pub enum ScriptValue {
    /// The untyped `null` literal.
    Null,
    /// A typed value, with the unit of the variable it was read from.
    Value(Value, Option<String>),
    /// Variable metadata, as returned by `$var`.
    Variable(Box<Variable>),
    Regex(Regex, bool),
    Array(Vec<ScriptValue>),
    Object(Vec<(String, ScriptValue)>),
}

impl ScriptValue {
    pub fn of(value: Value) -> Self {
        ScriptValue::Value(value, None)
    }
    pub fn with_unit(value: Value, unit: Option<&str>) -> Self {
        ScriptValue::Value(value, unit.map(str::to_string))
    }
    pub fn boolean(b: bool) -> Self {
        Self::of(Value::boolean(b))
    }
    pub fn text(s: impl Into<String>) -> Self {
        Self::of(Value::text(s))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            ScriptValue::Value(v, _) => Some(v),
            _ => None,
        }
    }
    pub fn unit(&self) -> Option<&str> {
        match self {
            ScriptValue::Value(_, unit) => unit.as_deref(),
            _ => None,
        }
    }
    pub fn is_null(&self) -> bool {
        match self {
            ScriptValue::Null => true,
            ScriptValue::Value(v, _) => v.is_null(),
            _ => false,
        }
    }
    pub fn is_text(&self) -> bool {
        matches!(self, ScriptValue::Value(v, _) if v.value_type() == ValueType::Text && !v.is_sequence())
    }

    /// Nulls and `false` are falsy, as are empty texts and zeros.
    pub fn is_truthy(&self) -> bool {
        match self {
            ScriptValue::Null => false,
            ScriptValue::Value(v, _) => {
                if v.is_null() {
                    return false;
                }
                if v.is_sequence() {
                    return v.size() > 0;
                }
                match v.value_type() {
                    ValueType::Boolean => v.as_bool().unwrap_or(false),
                    ValueType::Integer | ValueType::Decimal => v.as_f64().map(|f| f != 0.0).unwrap_or(false),
                    ValueType::Text => v.as_str().map(|s| !s.is_empty()).unwrap_or(false),
                    _ => true,
                }
            }
            _ => true,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            ScriptValue::Null => String::from("null"),
            ScriptValue::Value(v, _) if v.is_sequence() => format!("{} sequence", v.value_type()),
            ScriptValue::Value(v, _) => v.value_type().to_string(),
            ScriptValue::Variable(_) => String::from("variable"),
            ScriptValue::Regex(..) => String::from("regular expression"),
            ScriptValue::Array(_) => String::from("array"),
            ScriptValue::Object(_) => String::from("object"),
        }
    }

    /// The typed value, converting arrays into sequences whose type is the
    /// type of their first non-null element. `None` for the untyped null.
    pub fn to_value(&self) -> Result<Option<Value>> {
        match self {
            ScriptValue::Null => Ok(None),
            ScriptValue::Value(v, _) => Ok(Some(v.clone())),
            ScriptValue::Array(items) => {
                let values = items.iter().map(|i| i.to_value()).collect::<Result<Vec<_>>>()?;
                let element_type = values
                    .iter()
                    .flatten()
                    .find(|v| !v.is_null())
                    .or_else(|| values.iter().flatten().next())
                    .map(|v| v.value_type())
                    .unwrap_or(ValueType::Text);
                sequence(element_type, values).map(Some)
            }
            other => Err(VartabError::TypeMismatch(format!("a {} is not a value", other.type_name()))),
        }
    }

    /// Coerces the result of a script into a value of `value_type`, wrapping it
    /// into a sequence when `repeatable`. A non-repeatable variable accepts a
    /// sequence of exactly one value.
    pub fn into_value(self, value_type: ValueType, repeatable: bool) -> Result<Value> {
        let value = match &self {
            ScriptValue::Array(items) => {
                let values = items.iter().map(|i| i.to_value()).collect::<Result<Vec<_>>>()?;
                sequence(value_type, values)?
            }
            _ => match self.to_value()? {
                Some(v) => value_type.convert(&v)?,
                None => value_type.null_value(),
            },
        };
        if repeatable {
            return Ok(value.as_sequence());
        }
        if value.is_null() {
            return Ok(value_type.null_value());
        }
        match value.elements() {
            None => Ok(value),
            Some([single]) => Ok(single.clone()),
            Some(elements) => Err(VartabError::TypeMismatch(format!(
                "a sequence of {} values cannot be the value of a variable that is not repeatable",
                elements.len()
            ))),
        }
    }
}

fn sequence(value_type: ValueType, values: Vec<Option<Value>>) -> Result<Value> {
    let mut elements = Vec::with_capacity(values.len());
    for value in values {
        let element = match value {
            None => value_type.null_value(),
            Some(v) if v.is_sequence() => {
                return Err(VartabError::TypeMismatch(String::from("sequences cannot be nested")));
            }
            Some(v) => value_type.convert(&v)?,
        };
        elements.push(element);
    }
    value_type.sequence_of(elements)
}

/// Evaluation environment shared by all statements of one run.
#[derive(Debug, Clone, Copy)]
pub struct Env {
    now: DateTime<Utc>,
}

impl Env {
    pub fn new() -> Self {
        Self { now: Utc::now() }
    }
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}
