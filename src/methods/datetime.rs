// Calendar fields, date arithmetic and formatting.
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Timelike, Utc};

use std::fmt::Write;

use crate::datatype::{Value, ValueType};
use crate::error::{Result, VartabError};
use crate::methods::Call;
use crate::script::ScriptValue;

pub(super) fn invoke(call: &Call) -> Option<Result<ScriptValue>> {
    if !call.value_type().is_date_time() || call.value.is_sequence() {
        return None;
    }
    Some(match call.name {
        "year" => field(call, |d| d.year() as i64),
        "month" => field(call, |d| d.month() as i64),
        "dayOfMonth" => field(call, |d| d.day() as i64),
        "dayOfWeek" => field(call, |d| d.weekday().number_from_monday() as i64),
        "dayOfYear" => field(call, |d| d.ordinal() as i64),
        "weekOfYear" => field(call, |d| d.iso_week().week() as i64),
        "hourOfDay" => field(call, |d| d.hour() as i64),
        "minute" => field(call, |d| d.minute() as i64),
        "second" => field(call, |d| d.second() as i64),
        "add" => add(call),
        "format" => format(call),
        "before" => relative(call, |a, b| a < b),
        "after" => relative(call, |a, b| a > b),
        _ => return None,
    })
}

fn field(call: &Call, f: impl Fn(&DateTime<Utc>) -> i64) -> Result<ScriptValue> {
    Ok(ScriptValue::of(match call.value.as_datetime() {
        Some(dt) => Value::integer(f(&dt)),
        None => ValueType::Integer.null_value(),
    }))
}

fn shift_date(date: NaiveDate, amount: i64, unit: &str) -> Option<NaiveDate> {
    match unit {
        "days" | "day" => date.checked_add_signed(Duration::try_days(amount)?),
        "weeks" | "week" => date.checked_add_signed(Duration::try_weeks(amount)?),
        "months" | "month" | "years" | "year" => {
            let months = if unit.starts_with("year") { amount.checked_mul(12)? } else { amount };
            let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
            if months < 0 { date.checked_sub_months(magnitude) } else { date.checked_add_months(magnitude) }
        }
        _ => None,
    }
}

/// `add(amount[, unit])` where unit is one of days (default), weeks, months,
/// years and, for datetimes, hours, minutes or seconds.
fn add(call: &Call) -> Result<ScriptValue> {
    let amount = call.optional_i64(0, 0)?;
    let unit = match call.args.get(1) {
        Some(_) => call.arg_text(1)?,
        None => String::from("days"),
    };
    let invalid = || VartabError::InvalidArgument(format!("cannot add {} {} to a {}", amount, unit, call.value_type()));
    if call.value.is_null() {
        return Ok(ScriptValue::of(call.value.clone()));
    }
    let shifted = match call.value_type() {
        ValueType::Date => {
            let date = call.value.as_date().ok_or_else(invalid)?;
            Value::date(shift_date(date, amount, &unit).ok_or_else(invalid)?)
        }
        _ => {
            let dt = call.value.as_datetime().ok_or_else(invalid)?;
            let shifted = match unit.as_str() {
                "hours" | "hour" => Duration::try_hours(amount).and_then(|d| dt.checked_add_signed(d)),
                "minutes" | "minute" => Duration::try_minutes(amount).and_then(|d| dt.checked_add_signed(d)),
                "seconds" | "second" => Duration::try_seconds(amount).and_then(|d| dt.checked_add_signed(d)),
                _ => shift_date(dt.date_naive(), amount, &unit)
                    .and_then(|d| d.and_hms_milli_opt(dt.hour(), dt.minute(), dt.second(), dt.timestamp_subsec_millis()))
                    .map(|n| n.and_utc()),
            };
            Value::datetime(shifted.ok_or_else(invalid)?)
        }
    };
    Ok(ScriptValue::of(shifted))
}

/// Formats with strftime patterns, for instance `%d.%m.%Y`.
fn format(call: &Call) -> Result<ScriptValue> {
    let pattern = call.arg_text(0)?;
    if StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error)) {
        return Err(VartabError::InvalidArgument(format!("bad date format '{}'", pattern)));
    }
    let Some(dt) = call.value.as_datetime() else {
        return Ok(ScriptValue::of(ValueType::Text.null_value()));
    };
    // a date has no time fields to fill, chrono reports that as a fmt error
    let mut text = String::new();
    let written = match call.value_type() {
        ValueType::Date => write!(text, "{}", dt.date_naive().format(&pattern)),
        _ => write!(text, "{}", dt.format(&pattern)),
    };
    written.map_err(|_| {
        VartabError::InvalidArgument(format!("format '{}' does not apply to a {} value", pattern, call.value_type()))
    })?;
    Ok(ScriptValue::of(Value::text(text)))
}

fn relative(call: &Call, test: impl Fn(DateTime<Utc>, DateTime<Utc>) -> bool) -> Result<ScriptValue> {
    let other = call.arg_value(0)?;
    let other = if other.value_type().is_date_time() {
        other
    } else {
        ValueType::Date.convert(&other).or_else(|_| ValueType::DateTime.convert(&other))?
    };
    Ok(ScriptValue::of(match (call.value.as_datetime(), other.as_datetime()) {
        (Some(a), Some(b)) => Value::boolean(test(a, b)),
        _ => ValueType::Boolean.null_value(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::datatype::ValueType;
    use crate::methods::testing::*;
    use crate::script::ScriptValue;

    fn date(text: &str) -> ScriptValue {
        ScriptValue::of(ValueType::Date.parse(text).expect("date"))
    }

    fn datetime(text: &str) -> ScriptValue {
        ScriptValue::of(ValueType::DateTime.parse(text).expect("datetime"))
    }

    #[test]
    fn calendar_fields() {
        assert_eq!(rendered(date("2024-03-10"), "year", vec![]).as_deref(), Some("2024"));
        assert_eq!(rendered(date("2024-03-10"), "dayOfWeek", vec![]).as_deref(), Some("7"));
        assert_eq!(rendered(date("2024-03-10"), "dayOfYear", vec![]).as_deref(), Some("70"));
        assert_eq!(rendered(datetime("2024-03-10T13:45:00Z"), "hourOfDay", vec![]).as_deref(), Some("13"));
        assert_eq!(rendered(ScriptValue::of(ValueType::Date.null_value()), "month", vec![]), None);
    }

    #[test]
    fn adding_periods() {
        assert_eq!(rendered(date("2024-01-31"), "add", vec![int(1), ScriptValue::text("months")]).as_deref(), Some("2024-02-29"));
        assert_eq!(rendered(date("2024-01-01"), "add", vec![int(-1)]).as_deref(), Some("2023-12-31"));
        assert_eq!(
            rendered(datetime("2024-01-01T23:30:00Z"), "add", vec![int(1), ScriptValue::text("hours")]).as_deref(),
            Some("2024-01-02T00:30:00.000Z")
        );
        assert!(run(date("2024-01-01"), "add", vec![int(1), ScriptValue::text("fortnights")]).is_err());
    }

    #[test]
    fn formatting() {
        assert_eq!(rendered(date("2024-03-10"), "format", vec![ScriptValue::text("%d.%m.%Y")]).as_deref(), Some("10.03.2024"));
        assert!(run(date("2024-03-10"), "format", vec![ScriptValue::text("%Q")]).is_err());
        assert!(run(date("2024-03-10"), "format", vec![ScriptValue::text("%H:%M")]).is_err());
        assert_eq!(
            rendered(datetime("2024-03-10T13:45:00Z"), "format", vec![ScriptValue::text("%H:%M")]).as_deref(),
            Some("13:45")
        );
    }

    #[test]
    fn ordering_between_dates_and_datetimes() {
        assert_eq!(rendered(date("2024-03-10"), "before", vec![datetime("2024-03-10T00:00:01Z")]).as_deref(), Some("true"));
        assert_eq!(rendered(date("2024-03-10"), "after", vec![ScriptValue::text("2024-03-11")]).as_deref(), Some("false"));
    }
}
