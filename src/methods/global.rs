// Functions called without a receiver.
use crate::datatype::{Value, ValueType};
use crate::error::{Result, VartabError};
use crate::methods::arg_value;
use crate::script::{Env, ScriptValue};

fn type_arg(name: &str, args: &[ScriptValue], i: usize) -> Result<Option<ValueType>> {
    match args.get(i) {
        None => Ok(None),
        Some(a) => {
            let text = arg_value(name, a)?
                .render()
                .ok_or_else(|| VartabError::InvalidArgument(format!("{}() expects a type name", name)))?;
            ValueType::for_name(&text).map(Some)
        }
    }
}

/// Calls the global function `name`.
pub fn call(name: &str, args: &[ScriptValue], env: &Env) -> Result<ScriptValue> {
    match name {
        "now" => Ok(ScriptValue::of(Value::datetime(env.now()))),
        "today" => Ok(ScriptValue::of(Value::date(env.now().date_naive()))),
        "newValue" => {
            let value = args
                .first()
                .ok_or_else(|| VartabError::InvalidArgument(String::from("newValue() expects a value")))?;
            match type_arg(name, args, 1)? {
                Some(value_type) => {
                    let sequence = matches!(value, ScriptValue::Array(_)) || value.value().is_some_and(Value::is_sequence);
                    value.clone().into_value(value_type, sequence).map(ScriptValue::of)
                }
                None => Ok(value.clone()),
            }
        }
        "newSequence" => {
            let value = args.first().cloned().unwrap_or(ScriptValue::Array(Vec::new()));
            let items = match value {
                ScriptValue::Array(items) => items,
                other => vec![other],
            };
            let value_type = match type_arg(name, args, 1)? {
                Some(t) => t,
                None => match ScriptValue::Array(items.clone()).to_value()? {
                    Some(v) => v.value_type(),
                    None => ValueType::Text,
                },
            };
            ScriptValue::Array(items).into_value(value_type, true).map(ScriptValue::of)
        }
        _ => Err(VartabError::Evaluation(format!("no function '{}'", name))),
    }
}
