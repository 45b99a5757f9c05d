// Text manipulation and pattern matching.
use regex::Regex;

use crate::datatype::{Value, ValueType};
use crate::error::{Result, VartabError};
use crate::methods::Call;
use crate::script::{ScriptValue, parser::pattern};

fn is_textual(value_type: ValueType) -> bool {
    matches!(value_type, ValueType::Text | ValueType::Locale | ValueType::Enumerated)
}

pub(super) fn invoke(call: &Call) -> Option<Result<ScriptValue>> {
    if call.name == "concat" {
        return Some(concat(call));
    }
    if !is_textual(call.value_type()) || call.value.is_sequence() {
        return None;
    }
    Some(match call.name {
        "matches" => matches(call),
        "trim" => transform(call, |s| s.trim().to_string()),
        "upperCase" => transform(call, |s| s.to_uppercase()),
        "lowerCase" => transform(call, |s| s.to_lowercase()),
        "capitalize" => transform(call, |s| {
            let mut chars = s.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }),
        "replace" => replace(call),
        "length" => Ok(ScriptValue::of(match call.value.as_str() {
            Some(s) => Value::integer(s.chars().count() as i64),
            None => ValueType::Integer.null_value(),
        })),
        "substring" => substring(call),
        _ => return None,
    })
}

fn render_arg(value: &ScriptValue) -> String {
    match value {
        ScriptValue::Value(v, _) => v.render().unwrap_or_default(),
        _ => String::new(),
    }
}

/// Nulls concatenate as empty texts.
fn concat(call: &Call) -> Result<ScriptValue> {
    let mut text = call.value.render().unwrap_or_default();
    for arg in call.args {
        text.push_str(&render_arg(arg));
    }
    Ok(ScriptValue::text(text))
}

fn regex_arg(arg: &ScriptValue) -> Result<(Regex, bool)> {
    match arg {
        ScriptValue::Regex(regex, global) => Ok((regex.clone(), *global)),
        ScriptValue::Value(v, _) => {
            let text = v.render().ok_or_else(|| VartabError::InvalidArgument(String::from("null pattern")))?;
            Ok((pattern(&text)?, false))
        }
        other => Err(VartabError::TypeMismatch(format!("a {} is not a pattern", other.type_name()))),
    }
}

/// True when any of the patterns matches; a null text matches nothing.
fn matches(call: &Call) -> Result<ScriptValue> {
    let Some(text) = call.value.as_str() else {
        return Ok(ScriptValue::boolean(false));
    };
    for arg in call.args {
        if regex_arg(arg)?.0.is_match(text) {
            return Ok(ScriptValue::boolean(true));
        }
    }
    Ok(ScriptValue::boolean(false))
}

fn transform(call: &Call, f: impl Fn(&str) -> String) -> Result<ScriptValue> {
    Ok(ScriptValue::of(match call.value.as_str() {
        Some(s) => Value::text(f(s)),
        None => ValueType::Text.null_value(),
    }))
}

/// Replaces the first match, or every match of a global pattern.
fn replace(call: &Call) -> Result<ScriptValue> {
    let (regex, global) = regex_arg(call.arg(0)?)?;
    let replacement = call.arg_text(1)?;
    transform(call, |s| {
        if global {
            regex.replace_all(s, replacement.as_str()).into_owned()
        } else {
            regex.replace(s, replacement.as_str()).into_owned()
        }
    })
}

/// Characters from `start` up to, not including, `end`.
fn substring(call: &Call) -> Result<ScriptValue> {
    let start = call.optional_i64(0, 0)?.max(0) as usize;
    let end = match call.args.get(1) {
        Some(_) => Some(call.optional_i64(1, 0)?.max(0) as usize),
        None => None,
    };
    transform(call, |s| {
        let chars = s.chars().skip(start);
        match end {
            Some(end) => chars.take(end.saturating_sub(start)).collect(),
            None => chars.collect(),
        }
    })
}
