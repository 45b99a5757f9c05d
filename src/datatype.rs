// used for dates and timestamps
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Timelike, Utc};
// used for decimal numbers
use bigdecimal::{BigDecimal, FromPrimitive, RoundingMode, ToPrimitive};
// used for the canonical text form of binary values
use base64::{Engine as _, engine::general_purpose::STANDARD};
// so regular expressions don't have to be recompiled
use lazy_static::lazy_static;
use regex::Regex;

// used when resolving a value type from a foreign runtime object
use std::any::Any;
use std::cmp::Ordering;
// used to print out readable forms of a value
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, VartabError};

lazy_static! {
    static ref LOCALE: Regex = Regex::new(r"^([a-zA-Z]{2,3})(?:[_-]([a-zA-Z]{2}))?$").unwrap();
}

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

// ------------- ValueType -------------
/// A primitive data kind. Each variant is its own singleton, so value types
/// compare by identity simply by comparing the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Binary,
    Locale,
    Enumerated,
}

impl ValueType {
    pub const ALL: [ValueType; 9] = [
        ValueType::Text,
        ValueType::Integer,
        ValueType::Decimal,
        ValueType::Boolean,
        ValueType::Date,
        ValueType::DateTime,
        ValueType::Binary,
        ValueType::Locale,
        ValueType::Enumerated,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Text => "text",
            ValueType::Integer => "integer",
            ValueType::Decimal => "decimal",
            ValueType::Boolean => "boolean",
            ValueType::Date => "date",
            ValueType::DateTime => "datetime",
            ValueType::Binary => "binary",
            ValueType::Locale => "locale",
            ValueType::Enumerated => "enumerated",
        }
    }
    pub fn for_name(name: &str) -> Result<ValueType> {
        let wanted = name.trim();
        ValueType::ALL
            .iter()
            .find(|t| t.name().eq_ignore_ascii_case(wanted))
            .copied()
            .ok_or_else(|| VartabError::TypeMismatch(format!("unknown value type '{}'", name)))
    }
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueType::Integer | ValueType::Decimal)
    }
    pub fn is_date_time(&self) -> bool {
        matches!(self, ValueType::Date | ValueType::DateTime)
    }
    // text-like canonical forms are quoted inside sequences
    fn is_quoted(&self) -> bool {
        matches!(self, ValueType::Text | ValueType::Locale | ValueType::Enumerated)
    }

    pub fn null_value(self) -> Value {
        Value { value_type: self, payload: Payload::Null }
    }
    pub fn null_sequence(self) -> Value {
        Value { value_type: self, payload: Payload::NullSequence }
    }

    /// Parses the canonical string form. `None` yields the null value.
    pub fn value_of(self, text: Option<&str>) -> Result<Value> {
        match text {
            None => Ok(self.null_value()),
            Some(t) => self.parse(t),
        }
    }

    pub fn parse(self, text: &str) -> Result<Value> {
        let fail = || VartabError::Parse { text: text.to_string(), value_type: self.name() };
        let scalar = match self {
            ValueType::Text => Scalar::Text(text.to_string()),
            ValueType::Integer => Scalar::Integer(text.trim().parse::<i64>().map_err(|_| fail())?),
            ValueType::Decimal => {
                Scalar::Decimal(BigDecimal::from_str(text.trim()).map_err(|_| fail())?)
            }
            ValueType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Scalar::Boolean(true),
                "false" | "0" => Scalar::Boolean(false),
                _ => return Err(fail()),
            },
            ValueType::Date => Scalar::Date(parse_date(text.trim()).ok_or_else(fail)?),
            ValueType::DateTime => Scalar::DateTime(parse_datetime(text.trim()).ok_or_else(fail)?),
            ValueType::Binary => Scalar::Binary(STANDARD.decode(text.trim()).map_err(|_| fail())?),
            ValueType::Locale => {
                let captures = LOCALE.captures(text.trim()).ok_or_else(fail)?;
                let language = captures[1].to_ascii_lowercase();
                match captures.get(2) {
                    Some(country) => {
                        Scalar::Text(format!("{}_{}", language, country.as_str().to_ascii_uppercase()))
                    }
                    None => Scalar::Text(language),
                }
            }
            ValueType::Enumerated => {
                let code = text.trim();
                if code.is_empty() {
                    return Err(fail());
                }
                Scalar::Text(code.to_string())
            }
        };
        Ok(Value { value_type: self, payload: Payload::Scalar(scalar) })
    }

    /// Renders a value to its canonical string; nulls (and null sequences) render to `None`.
    pub fn render(self, value: &Value) -> Option<String> {
        match &value.payload {
            Payload::Null | Payload::NullSequence => None,
            Payload::Scalar(s) => Some(render_scalar(s)),
            Payload::Sequence(values) => {
                let mut s = String::new();
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        s.push(',');
                    }
                    match v.scalar() {
                        None => s.push_str("null"),
                        Some(scalar) if self.is_quoted() => {
                            s.push('"');
                            s.push_str(&render_scalar(scalar).replace('"', "\"\""));
                            s.push('"');
                        }
                        Some(scalar) => s.push_str(&render_scalar(scalar)),
                    }
                }
                Some(s)
            }
        }
    }

    /// Builds a sequence, checking that every element is of this type and not itself a sequence.
    pub fn sequence_of(self, values: Vec<Value>) -> Result<Value> {
        for v in &values {
            if v.value_type != self || v.is_sequence() {
                return Err(VartabError::TypeMismatch(format!(
                    "cannot put a {} value in a {} sequence",
                    v.value_type.name(),
                    self.name()
                )));
            }
        }
        Ok(Value { value_type: self, payload: Payload::Sequence(values) })
    }

    /// Parses the text encoding of a sequence, see [`ValueType::render`].
    pub fn sequence_value_of(self, text: Option<&str>) -> Result<Value> {
        let Some(text) = text else {
            return Ok(self.null_sequence());
        };
        let mut values = Vec::new();
        for element in split_sequence(text)? {
            values.push(self.value_of(element.as_deref())?);
        }
        self.sequence_of(values)
    }

    /// Total order over non-null values of this type.
    pub fn compare(self, a: &Value, b: &Value) -> Result<Ordering> {
        if a.value_type != self || b.value_type != self {
            return Err(VartabError::TypeMismatch(format!(
                "cannot compare {} with {} as {}",
                a.value_type.name(),
                b.value_type.name(),
                self.name()
            )));
        }
        match (&a.payload, &b.payload) {
            (Payload::Scalar(x), Payload::Scalar(y)) => Ok(self.compare_scalars(x, y)),
            (Payload::Sequence(xs), Payload::Sequence(ys)) => {
                for (x, y) in xs.iter().zip(ys.iter()) {
                    let ordering = match (x.scalar(), y.scalar()) {
                        (None, None) => Ordering::Equal,
                        (None, Some(_)) => Ordering::Less,
                        (Some(_), None) => Ordering::Greater,
                        (Some(x), Some(y)) => self.compare_scalars(x, y),
                    };
                    if ordering != Ordering::Equal {
                        return Ok(ordering);
                    }
                }
                Ok(xs.len().cmp(&ys.len()))
            }
            (Payload::Null, _) | (_, Payload::Null) | (Payload::NullSequence, _) | (_, Payload::NullSequence) => {
                Err(VartabError::NullComparison)
            }
            _ => Err(VartabError::TypeMismatch(String::from("cannot compare a sequence with a scalar"))),
        }
    }

    fn compare_scalars(self, a: &Scalar, b: &Scalar) -> Ordering {
        match (a, b) {
            (Scalar::Text(x), Scalar::Text(y)) if self == ValueType::Enumerated => {
                // numeric codes sort first and numerically, the rest lexically
                match (x.parse::<i64>(), y.parse::<i64>()) {
                    (Ok(i), Ok(j)) => i.cmp(&j).then_with(|| x.cmp(y)),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                }
            }
            (Scalar::Text(x), Scalar::Text(y)) => x.cmp(y),
            (Scalar::Integer(x), Scalar::Integer(y)) => x.cmp(y),
            (Scalar::Decimal(x), Scalar::Decimal(y)) => x.cmp(y),
            (Scalar::Boolean(x), Scalar::Boolean(y)) => x.cmp(y),
            (Scalar::Date(x), Scalar::Date(y)) => x.cmp(y),
            (Scalar::DateTime(x), Scalar::DateTime(y)) => x.cmp(y),
            (Scalar::Binary(x), Scalar::Binary(y)) => x.cmp(y),
            // payloads always match their type, the remaining arms are unreachable in practice
            _ => a.rank().cmp(&b.rank()),
        }
    }

    /// Converts a value of any type into this type.
    pub fn convert(self, value: &Value) -> Result<Value> {
        if value.value_type == self {
            return Ok(value.clone());
        }
        match &value.payload {
            Payload::Null => Ok(self.null_value()),
            Payload::NullSequence => Ok(self.null_sequence()),
            Payload::Sequence(values) => {
                let converted = values.iter().map(|v| self.convert(v)).collect::<Result<Vec<_>>>()?;
                self.sequence_of(converted)
            }
            Payload::Scalar(scalar) => self.convert_scalar(value.value_type, scalar),
        }
    }

    fn convert_scalar(self, from: ValueType, scalar: &Scalar) -> Result<Value> {
        let mismatch = || {
            VartabError::TypeMismatch(format!("cannot convert {} to {}", from.name(), self.name()))
        };
        let converted = match (self, scalar) {
            (ValueType::Text, s) => Scalar::Text(render_scalar(s)),
            (_, Scalar::Text(s)) => return self.parse(s),
            (ValueType::Integer, Scalar::Decimal(d)) => {
                Scalar::Integer(d.with_scale_round(0, RoundingMode::HalfUp).to_i64().ok_or_else(mismatch)?)
            }
            (ValueType::Integer, Scalar::Boolean(b)) => Scalar::Integer(i64::from(*b)),
            (ValueType::Decimal, Scalar::Integer(i)) => Scalar::Decimal(BigDecimal::from(*i)),
            (ValueType::Decimal, Scalar::Boolean(b)) => Scalar::Decimal(BigDecimal::from(i64::from(*b))),
            (ValueType::Boolean, Scalar::Integer(i)) => Scalar::Boolean(*i != 0),
            (ValueType::Date, Scalar::DateTime(dt)) => Scalar::Date(dt.date_naive()),
            (ValueType::DateTime, Scalar::Date(d)) => {
                Scalar::DateTime(d.and_hms_opt(0, 0, 0).ok_or_else(mismatch)?.and_utc())
            }
            (ValueType::Enumerated, Scalar::Integer(i)) => Scalar::Text(i.to_string()),
            _ => return Err(mismatch()),
        };
        Ok(Value { value_type: self, payload: Payload::Scalar(converted) })
    }

    /// Converts a foreign runtime object into this type's domain.
    pub fn value_of_any(self, object: &dyn Any) -> Result<Value> {
        let natural = natural_value(object).ok_or_else(|| {
            VartabError::TypeMismatch(format!("cannot convert object to {}", self.name()))
        })?;
        self.convert(&natural)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS.iter().find_map(|f| NaiveDate::parse_from_str(text, f).ok())
}

fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
                .map(|dt| dt.and_utc())
        })?;
    truncate_millis(parsed)
}

// canonical datetimes carry millisecond precision
pub(crate) fn truncate_millis(dt: DateTime<Utc>) -> Option<DateTime<Utc>> {
    dt.with_nanosecond(dt.nanosecond() / 1_000_000 * 1_000_000)
}

fn render_scalar(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Text(s) => s.clone(),
        Scalar::Integer(i) => i.to_string(),
        Scalar::Decimal(d) => d.to_string(),
        Scalar::Boolean(b) => b.to_string(),
        Scalar::Date(d) => d.format("%Y-%m-%d").to_string(),
        Scalar::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        Scalar::Binary(bytes) => STANDARD.encode(bytes),
    }
}

// Splits the text encoding of a sequence into its elements, `None` marking nulls.
fn split_sequence(text: &str) -> Result<Vec<Option<String>>> {
    let mut elements = Vec::new();
    if text.trim().is_empty() {
        return Ok(elements);
    }
    let mut current = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();
    let finish = |current: &mut String, quoted: bool| -> Option<String> {
        let element = std::mem::take(current);
        if quoted {
            Some(element)
        } else {
            let trimmed = element.trim();
            if trimmed.is_empty() || trimmed == "null" { None } else { Some(trimmed.to_string()) }
        }
    };
    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else {
            match c {
                '"' => {
                    in_quotes = true;
                    quoted = true;
                }
                ',' => {
                    elements.push(finish(&mut current, quoted));
                    quoted = false;
                }
                c if quoted && c.is_whitespace() => (),
                c => current.push(c),
            }
        }
    }
    if in_quotes {
        return Err(VartabError::Parse { text: text.to_string(), value_type: "sequence" });
    }
    elements.push(finish(&mut current, quoted));
    Ok(elements)
}

// Maps a foreign object onto the value type it naturally belongs to.
fn natural_value(object: &dyn Any) -> Option<Value> {
    if let Some(v) = object.downcast_ref::<Value>() {
        return Some(v.clone());
    }
    if let Some(s) = object.downcast_ref::<String>() {
        return Some(Value::text(s.as_str()));
    }
    if let Some(s) = object.downcast_ref::<&'static str>() {
        return Some(Value::text(*s));
    }
    if let Some(b) = object.downcast_ref::<bool>() {
        return Some(Value::boolean(*b));
    }
    if let Some(i) = object.downcast_ref::<i64>() {
        return Some(Value::integer(*i));
    }
    if let Some(i) = object.downcast_ref::<i32>() {
        return Some(Value::integer(i64::from(*i)));
    }
    if let Some(i) = object.downcast_ref::<u32>() {
        return Some(Value::integer(i64::from(*i)));
    }
    if let Some(d) = object.downcast_ref::<BigDecimal>() {
        return Some(Value::decimal(d.clone()));
    }
    if let Some(f) = object.downcast_ref::<f64>() {
        return Value::from_f64(*f);
    }
    if let Some(f) = object.downcast_ref::<f32>() {
        return Value::from_f64(f64::from(*f));
    }
    if let Some(d) = object.downcast_ref::<NaiveDate>() {
        return Some(Value::date(*d));
    }
    if let Some(dt) = object.downcast_ref::<DateTime<Utc>>() {
        return Some(Value::datetime(*dt));
    }
    if let Some(dt) = object.downcast_ref::<NaiveDateTime>() {
        return Some(Value::datetime(dt.and_utc()));
    }
    if let Some(bytes) = object.downcast_ref::<Vec<u8>>() {
        return Some(Value::binary(bytes.clone()));
    }
    None
}

// ------------- ValueTypeRegistry -------------
type Predicate = fn(&dyn Any) -> bool;

/// Resolves value types by name or by the runtime type of a candidate object.
/// Registrations are tested in order and the first match wins.
pub struct ValueTypeRegistry {
    registrations: Vec<(Predicate, ValueType)>,
}

impl ValueTypeRegistry {
    pub fn empty() -> Self {
        Self { registrations: Vec::new() }
    }
    pub fn register(&mut self, predicate: Predicate, value_type: ValueType) {
        self.registrations.push((predicate, value_type));
    }
    pub fn for_name(&self, name: &str) -> Result<ValueType> {
        ValueType::for_name(name)
    }
    pub fn for_object(&self, object: &dyn Any) -> Result<ValueType> {
        if let Some(v) = object.downcast_ref::<Value>() {
            return Ok(v.value_type());
        }
        self.registrations
            .iter()
            .find(|(predicate, _)| predicate(object))
            .map(|(_, t)| *t)
            .ok_or_else(|| VartabError::TypeMismatch(String::from("no value type for object")))
    }
    pub fn value_of(&self, object: &dyn Any) -> Result<Value> {
        self.for_object(object)?.value_of_any(object)
    }
}

impl Default for ValueTypeRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(|o| o.is::<String>() || o.is::<&'static str>(), ValueType::Text);
        registry.register(|o| o.is::<bool>(), ValueType::Boolean);
        registry.register(|o| o.is::<i64>() || o.is::<i32>() || o.is::<u32>(), ValueType::Integer);
        registry.register(|o| o.is::<f64>() || o.is::<f32>() || o.is::<BigDecimal>(), ValueType::Decimal);
        registry.register(|o| o.is::<NaiveDate>(), ValueType::Date);
        registry.register(|o| o.is::<DateTime<Utc>>() || o.is::<NaiveDateTime>(), ValueType::DateTime);
        registry.register(|o| o.is::<Vec<u8>>(), ValueType::Binary);
        registry
    }
}

// ------------- Value -------------
#[derive(Debug, Clone)]
pub enum Scalar {
    Text(String),
    Integer(i64),
    Decimal(BigDecimal),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Binary(Vec<u8>),
}
impl Scalar {
    fn rank(&self) -> u8 {
        match self {
            Scalar::Text(_) => 0,
            Scalar::Integer(_) => 1,
            Scalar::Decimal(_) => 2,
            Scalar::Boolean(_) => 3,
            Scalar::Date(_) => 4,
            Scalar::DateTime(_) => 5,
            Scalar::Binary(_) => 6,
        }
    }
}

#[derive(Debug, Clone)]
enum Payload {
    Null,
    NullSequence,
    Scalar(Scalar),
    Sequence(Vec<Value>),
}

/// An immutable typed datum, possibly null, possibly a sequence.
#[derive(Debug, Clone)]
pub struct Value {
    value_type: ValueType,
    payload: Payload,
}

impl Value {
    pub fn text(s: impl Into<String>) -> Value {
        Value { value_type: ValueType::Text, payload: Payload::Scalar(Scalar::Text(s.into())) }
    }
    pub fn integer(i: i64) -> Value {
        Value { value_type: ValueType::Integer, payload: Payload::Scalar(Scalar::Integer(i)) }
    }
    pub fn decimal(d: BigDecimal) -> Value {
        Value { value_type: ValueType::Decimal, payload: Payload::Scalar(Scalar::Decimal(d)) }
    }
    /// `None` for NaN and infinities.
    pub fn from_f64(f: f64) -> Option<Value> {
        if !f.is_finite() {
            return None;
        }
        // the shortest round-trip rendering avoids binary expansion noise
        BigDecimal::from_str(&f.to_string())
            .ok()
            .or_else(|| BigDecimal::from_f64(f))
            .map(Value::decimal)
    }
    pub fn boolean(b: bool) -> Value {
        Value { value_type: ValueType::Boolean, payload: Payload::Scalar(Scalar::Boolean(b)) }
    }
    pub fn date(d: NaiveDate) -> Value {
        Value { value_type: ValueType::Date, payload: Payload::Scalar(Scalar::Date(d)) }
    }
    pub fn datetime(dt: DateTime<Utc>) -> Value {
        let dt = truncate_millis(dt).unwrap_or(dt);
        Value { value_type: ValueType::DateTime, payload: Payload::Scalar(Scalar::DateTime(dt)) }
    }
    pub fn binary(bytes: Vec<u8>) -> Value {
        Value { value_type: ValueType::Binary, payload: Payload::Scalar(Scalar::Binary(bytes)) }
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }
    pub fn is_null(&self) -> bool {
        matches!(self.payload, Payload::Null | Payload::NullSequence)
    }
    pub fn is_sequence(&self) -> bool {
        matches!(self.payload, Payload::Sequence(_) | Payload::NullSequence)
    }
    pub fn scalar(&self) -> Option<&Scalar> {
        match &self.payload {
            Payload::Scalar(s) => Some(s),
            _ => None,
        }
    }
    /// Elements of a non-null sequence.
    pub fn elements(&self) -> Option<&[Value]> {
        match &self.payload {
            Payload::Sequence(values) => Some(values),
            _ => None,
        }
    }
    /// Sequence length; a scalar counts as one and a null as zero.
    pub fn size(&self) -> usize {
        match &self.payload {
            Payload::Null | Payload::NullSequence => 0,
            Payload::Scalar(_) => 1,
            Payload::Sequence(values) => values.len(),
        }
    }
    /// Wraps a scalar into a one-element sequence; sequences are returned as is.
    pub fn as_sequence(&self) -> Value {
        match &self.payload {
            Payload::Null => self.value_type.null_sequence(),
            Payload::Scalar(_) => Value {
                value_type: self.value_type,
                payload: Payload::Sequence(vec![self.clone()]),
            },
            _ => self.clone(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.scalar()? {
            Scalar::Integer(i) => Some(*i),
            Scalar::Decimal(d) => d.with_scale(0).to_i64(),
            _ => None,
        }
    }
    pub fn as_decimal(&self) -> Option<BigDecimal> {
        match self.scalar()? {
            Scalar::Integer(i) => Some(BigDecimal::from(*i)),
            Scalar::Decimal(d) => Some(d.clone()),
            _ => None,
        }
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self.scalar()? {
            Scalar::Integer(i) => i.to_f64(),
            Scalar::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self.scalar()? {
            Scalar::Boolean(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self.scalar()? {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self.scalar()? {
            Scalar::Date(d) => Some(*d),
            Scalar::DateTime(dt) => Some(dt.date_naive()),
            _ => None,
        }
    }
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self.scalar()? {
            Scalar::DateTime(dt) => Some(*dt),
            Scalar::Date(d) => d.and_hms_opt(0, 0, 0).map(|n| n.and_utc()),
            _ => None,
        }
    }
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self.scalar()? {
            Scalar::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Canonical string, `None` when null.
    pub fn render(&self) -> Option<String> {
        self.value_type.render(self)
    }
    pub fn compare_to(&self, other: &Value) -> Result<Ordering> {
        self.value_type.compare(self, other)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if self.value_type != other.value_type {
            return false;
        }
        match (&self.payload, &other.payload) {
            (Payload::Null, Payload::Null) | (Payload::NullSequence, Payload::NullSequence) => true,
            (Payload::Sequence(xs), Payload::Sequence(ys)) => xs == ys,
            (Payload::Scalar(_), Payload::Scalar(_)) => {
                self.compare_to(other).map(|o| o == Ordering::Equal).unwrap_or(false)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.render() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "null"),
        }
    }
}
