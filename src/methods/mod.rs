//! The method library of the script engine.
//!
//! Methods are looked up by name on the receiver. Each family inspects the
//! receiver type and either handles the call or passes, so that a name such as
//! `sum` can mean one thing on a sequence and another on a scalar.
mod boolean;
mod compare;
mod conversion;
mod datetime;
mod global;
mod numeric;
mod sequence;
mod text;
mod units;
mod variable;

pub use compare::compare_values;
pub use global::call;

use crate::datatype::{Value, ValueType};
use crate::error::{Result, VartabError};
use crate::script::{Env, ScriptValue};

/// A method call on a typed value.
pub(crate) struct Call<'a> {
    pub value: &'a Value,
    pub unit: Option<&'a str>,
    pub name: &'a str,
    pub args: &'a [ScriptValue],
    pub env: &'a Env,
}

impl Call<'_> {
    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }
    pub fn arg(&self, i: usize) -> Result<&ScriptValue> {
        self.args.get(i).ok_or_else(|| {
            VartabError::InvalidArgument(format!("{}() expects at least {} argument(s)", self.name, i + 1))
        })
    }
    /// Argument `i` as a typed value; the untyped null becomes a text null.
    pub fn arg_value(&self, i: usize) -> Result<Value> {
        arg_value(self.name, self.arg(i)?)
    }
    pub fn arg_values(&self) -> Result<Vec<Value>> {
        self.args.iter().map(|a| arg_value(self.name, a)).collect()
    }
    pub fn arg_text(&self, i: usize) -> Result<String> {
        self.arg_value(i)?
            .render()
            .ok_or_else(|| VartabError::InvalidArgument(format!("{}() expects a text argument", self.name)))
    }
    pub fn optional_i64(&self, i: usize, default: i64) -> Result<i64> {
        match self.args.get(i) {
            None => Ok(default),
            Some(a) => arg_value(self.name, a)?
                .as_i64()
                .ok_or_else(|| VartabError::InvalidArgument(format!("{}() expects an integer argument", self.name))),
        }
    }
    /// The result, keeping the receiver's unit.
    pub fn same_unit(&self, value: Value) -> ScriptValue {
        ScriptValue::with_unit(value, self.unit)
    }
}

pub(crate) fn arg_value(method: &str, arg: &ScriptValue) -> Result<Value> {
    match arg {
        ScriptValue::Null => Ok(ValueType::Text.null_value()),
        ScriptValue::Value(v, _) => Ok(v.clone()),
        ScriptValue::Array(_) => arg.to_value().map(|v| v.unwrap_or_else(|| ValueType::Text.null_sequence())),
        other => Err(VartabError::TypeMismatch(format!(
            "{}() cannot take a {} argument",
            method,
            other.type_name()
        ))),
    }
}

pub(crate) fn no_such_method(receiver: &str, name: &str) -> VartabError {
    VartabError::Evaluation(format!("no method '{}' on {}", name, receiver))
}

/// Invokes method `name` on `receiver`.
pub fn invoke(receiver: &ScriptValue, name: &str, args: &[ScriptValue], env: &Env) -> Result<ScriptValue> {
    match receiver {
        ScriptValue::Value(value, unit) => invoke_value(value, unit.as_deref(), name, args, env),
        ScriptValue::Null => Ok(match name {
            "isNull" => ScriptValue::boolean(true),
            "isNotNull" => ScriptValue::boolean(false),
            "whenNull" => args.first().cloned().unwrap_or(ScriptValue::Null),
            "eq" => ScriptValue::boolean(args.iter().any(|a| a.is_null())),
            "any" | "all" => ScriptValue::boolean(false),
            "concat" => return invoke_value(&Value::text(""), None, name, args, env),
            _ => ScriptValue::Null,
        }),
        ScriptValue::Variable(variable) => variable::invoke(variable, name, args),
        ScriptValue::Array(_) => match receiver.to_value()? {
            Some(value) => invoke_value(&value, None, name, args, env),
            None => Ok(ScriptValue::Null),
        },
        other => Err(no_such_method(&other.type_name(), name)),
    }
}

fn invoke_value(value: &Value, unit: Option<&str>, name: &str, args: &[ScriptValue], env: &Env) -> Result<ScriptValue> {
    let call = Call { value, unit, name, args, env };
    boolean::invoke(&call)
        .or_else(|| compare::invoke(&call))
        .or_else(|| conversion::invoke(&call))
        .or_else(|| sequence::invoke(&call))
        .or_else(|| numeric::invoke(&call))
        .or_else(|| text::invoke(&call))
        .or_else(|| datetime::invoke(&call))
        .or_else(|| units::invoke(&call))
        .unwrap_or_else(|| {
            let receiver = ScriptValue::Value(value.clone(), None).type_name();
            Err(no_such_method(&receiver, name))
        })
}
