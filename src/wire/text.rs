//! Text format rendering and parsing.
//!
//! Output follows what a stock Postgres server prints with `DateStyle = ISO`
//! and `IntervalStyle = postgres`, so clients that only speak the text format
//! see familiar values.

use std::fmt::Write;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::wire::binary::{time_from_micros, time_micros};
use crate::wire::error::WireError;
use crate::wire::oid_cache::OidCache;
use crate::wire::types::{BaseType, PgType, TypeKind};
use crate::wire::value::{Interval, TimeTz, Value};

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;

/// Renders `value` in the text format. NULL has no text form and yields `None`.
pub fn format_text(
    oids: &OidCache,
    ty: &PgType,
    value: &Value,
) -> Result<Option<String>, WireError> {
    if value.is_null() {
        return Ok(None);
    }
    let ty = ty.resolve();
    let text = match (&ty.kind, value) {
        (TypeKind::Array(element), Value::Array(items)) => format_array(oids, element, items)?,
        (TypeKind::Composite(fields), Value::Record(items)) => {
            let mut out = String::from("(");
            for (i, (field, item)) in fields.iter().zip(items).enumerate() {
                if i > 0 {
                    out.push(',');
                }
                if let Some(text) = format_text(oids, &field.ty, item)? {
                    push_quoted(&mut out, &text, |c| {
                        matches!(c, ',' | '(' | ')' | '"' | '\\') || c.is_whitespace()
                    });
                }
            }
            out.push(')');
            out
        }
        (_, value) => format_scalar(oids, value),
    };
    Ok(Some(text))
}

/// Parses a text-format value of type `ty`.
pub fn parse_text(oids: &OidCache, ty: &PgType, input: &str) -> Result<Value, WireError> {
    let ty = ty.resolve();
    match &ty.kind {
        TypeKind::Base(base) => parse_scalar(oids, ty, *base, input),
        TypeKind::Array(element) => parse_array(oids, ty, element, input),
        TypeKind::Enum(labels) => {
            if labels.iter().any(|l| l == input) {
                Ok(Value::Text(input.to_string()))
            } else {
                Err(WireError::text(&ty.name, input))
            }
        }
        TypeKind::Composite(_) => Err(WireError::invalid(
            &ty.name,
            "record input in text format is not supported",
        )),
        TypeKind::Domain(base) => parse_text(oids, base, input),
    }
}

fn format_scalar(oids: &OidCache, value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(v) => if *v { "t" } else { "f" }.to_string(),
        Value::Int16(v) => v.to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::Float32(v) => {
            special_float(f64::from(*v)).map_or_else(|| v.to_string(), str::to_string)
        }
        Value::Float64(v) => special_float(*v).map_or_else(|| v.to_string(), str::to_string),
        Value::Numeric(v) => v.to_string(),
        Value::Text(v) | Value::Bits(v) => v.clone(),
        Value::Bytes(v) => {
            let mut out = String::with_capacity(2 + v.len() * 2);
            out.push_str("\\x");
            for b in v {
                let _ = write!(out, "{b:02x}");
            }
            out
        }
        Value::Date(v) => v.format("%Y-%m-%d").to_string(),
        Value::Time(v) => format_time(*v),
        Value::TimeTz(v) => format!("{}{}", format_time(v.time), format_offset(v.offset)),
        Value::Timestamp(v) => format!("{} {}", v.format("%Y-%m-%d"), format_time(v.time())),
        Value::TimestampTz(v) => {
            format!("{} {}+00", v.format("%Y-%m-%d"), format_time(v.time()))
        }
        Value::Interval(v) => format_interval(v),
        Value::Uuid(v) => v.hyphenated().to_string(),
        Value::Id(id) => oids.to_oid(id).to_string(),
        Value::Xid(v) => v.to_string(),
        Value::Array(_) | Value::Record(_) => String::new(),
    }
}

fn special_float(v: f64) -> Option<&'static str> {
    if v.is_nan() {
        Some("NaN")
    } else if v == f64::INFINITY {
        Some("Infinity")
    } else if v == f64::NEG_INFINITY {
        Some("-Infinity")
    } else {
        None
    }
}

/// `HH:MM:SS` with a fractional part only when there is one.
fn format_time(time: NaiveTime) -> String {
    let micros = time_micros(time);
    let (h, rest) = (micros / MICROS_PER_HOUR, micros % MICROS_PER_HOUR);
    let (m, rest) = (rest / MICROS_PER_MINUTE, rest % MICROS_PER_MINUTE);
    let (s, frac) = (rest / MICROS_PER_SECOND, rest % MICROS_PER_SECOND);
    let mut out = format!("{h:02}:{m:02}:{s:02}");
    if frac != 0 {
        let digits = format!("{frac:06}");
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }
    out
}

fn format_offset(offset: FixedOffset) -> String {
    let secs = offset.local_minus_utc();
    let sign = if secs < 0 { '-' } else { '+' };
    let secs = secs.abs();
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    match (m, s) {
        (0, 0) => format!("{sign}{h:02}"),
        (_, 0) => format!("{sign}{h:02}:{m:02}"),
        _ => format!("{sign}{h:02}:{m:02}:{s:02}"),
    }
}

fn format_interval(v: &Interval) -> String {
    let mut parts = Vec::new();
    let plural = |n: i64, unit: &str| {
        if n.abs() == 1 {
            format!("{n} {unit}")
        } else {
            format!("{n} {unit}s")
        }
    };
    let (years, months) = (v.months / 12, v.months % 12);
    if years != 0 {
        parts.push(plural(i64::from(years), "year"));
    }
    if months != 0 {
        parts.push(plural(i64::from(months), "mon"));
    }
    if v.days != 0 {
        parts.push(plural(i64::from(v.days), "day"));
    }
    if v.micros != 0 || parts.is_empty() {
        let sign = if v.micros < 0 { "-" } else { "" };
        let micros = v.micros.unsigned_abs();
        let hours = micros / MICROS_PER_HOUR as u64;
        let rest = micros % MICROS_PER_HOUR as u64;
        let minutes = rest / MICROS_PER_MINUTE as u64;
        let rest = rest % MICROS_PER_MINUTE as u64;
        let seconds = rest / MICROS_PER_SECOND as u64;
        let frac = rest % MICROS_PER_SECOND as u64;
        let mut time = format!("{sign}{hours:02}:{minutes:02}:{seconds:02}");
        if frac != 0 {
            let digits = format!("{frac:06}");
            time.push('.');
            time.push_str(digits.trim_end_matches('0'));
        }
        parts.push(time);
    }
    parts.join(" ")
}

fn format_array(oids: &OidCache, element: &PgType, items: &[Value]) -> Result<String, WireError> {
    let mut out = String::from("{");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match format_text(oids, element, item)? {
            None => out.push_str("NULL"),
            Some(text) if text.eq_ignore_ascii_case("NULL") || text.is_empty() => {
                push_quoted(&mut out, &text, |_| true)
            }
            Some(text) => push_quoted(&mut out, &text, |c| {
                matches!(c, ',' | '{' | '}' | '"' | '\\') || c.is_whitespace()
            }),
        }
    }
    out.push('}');
    Ok(out)
}

/// Appends `text`, double-quoting and escaping it if any character needs it.
fn push_quoted(out: &mut String, text: &str, special: impl Fn(char) -> bool) {
    if !text.is_empty() && !text.chars().any(&special) {
        out.push_str(text);
        return;
    }
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

fn parse_scalar(
    oids: &OidCache,
    ty: &PgType,
    base: BaseType,
    input: &str,
) -> Result<Value, WireError> {
    let bad = || WireError::text(base.name(), input);
    let trimmed = input.trim();
    let value = match base {
        BaseType::Bool => match trimmed.to_ascii_lowercase().as_str() {
            "t" | "true" | "y" | "yes" | "on" | "1" => Value::Bool(true),
            "f" | "false" | "n" | "no" | "off" | "0" => Value::Bool(false),
            _ => return Err(bad()),
        },
        BaseType::Int2 => Value::Int16(trimmed.parse().map_err(|_| bad())?),
        BaseType::Int4 => Value::Int32(trimmed.parse().map_err(|_| bad())?),
        BaseType::Int8 => Value::Int64(trimmed.parse().map_err(|_| bad())?),
        BaseType::Float4 => Value::Float32(parse_float(trimmed).ok_or_else(bad)? as f32),
        BaseType::Float8 => Value::Float64(parse_float(trimmed).ok_or_else(bad)?),
        BaseType::Numeric => {
            let v = Decimal::from_str(trimmed)
                .or_else(|_| Decimal::from_scientific(trimmed))
                .map_err(|_| bad())?;
            Value::Numeric(match ty.numeric_scale() {
                Some(scale) => v.round_dp_with_strategy(
                    u32::from(scale),
                    RoundingStrategy::MidpointAwayFromZero,
                ),
                None => v,
            })
        }
        BaseType::InternalChar => Value::Text(input.chars().take(1).collect()),
        base if base.is_textual() => Value::Text(input.to_string()),
        BaseType::Bytea => Value::Bytes(parse_bytea(input).ok_or_else(bad)?),
        BaseType::Bit | BaseType::VarBit => {
            if !trimmed.chars().all(|c| c == '0' || c == '1') {
                return Err(bad());
            }
            Value::Bits(trimmed.to_string())
        }
        BaseType::Date => Value::Date(
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|_| bad())?,
        ),
        BaseType::Time => Value::Time(parse_time(trimmed).ok_or_else(bad)?),
        BaseType::TimeTz => {
            let split = trimmed
                .rfind(['+', '-'])
                .filter(|i| *i > 0)
                .ok_or_else(bad)?;
            let time = parse_time(&trimmed[..split]).ok_or_else(bad)?;
            let offset = parse_offset(&trimmed[split..]).map_err(|e| e.into_wire(base, input))?;
            Value::TimeTz(TimeTz { time, offset })
        }
        BaseType::Timestamp => Value::Timestamp(parse_timestamp(trimmed).ok_or_else(bad)?),
        BaseType::TimestampTz => Value::TimestampTz(
            parse_timestamptz(trimmed).map_err(|e| e.into_wire(base, input))?,
        ),
        BaseType::Interval => {
            Value::Interval(parse_interval(trimmed).map_err(|e| e.into_wire(base, input))?)
        }
        BaseType::Uuid => Value::Uuid(Uuid::parse_str(trimmed).map_err(|_| bad())?),
        base if base.is_oid_family() => {
            let oid: u32 = trimmed.parse().map_err(|_| bad())?;
            Value::Id(oids.to_id(oid))
        }
        BaseType::Xid => Value::Xid(trimmed.parse().map_err(|_| bad())?),
        _ => return Err(WireError::UnhandledOid(ty.oid)),
    };
    Ok(value)
}

fn parse_float(input: &str) -> Option<f64> {
    match input.to_ascii_lowercase().as_str() {
        "nan" => Some(f64::NAN),
        "infinity" | "inf" => Some(f64::INFINITY),
        "-infinity" | "-inf" => Some(f64::NEG_INFINITY),
        other => other.parse().ok(),
    }
}

fn parse_bytea(input: &str) -> Option<Vec<u8>> {
    let Some(hex) = input.strip_prefix("\\x") else {
        return Some(input.as_bytes().to_vec());
    };
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

fn parse_time(input: &str) -> Option<NaiveTime> {
    let input = input.trim();
    if input == "24:00:00" {
        return time_from_micros(0).ok();
    }
    NaiveTime::parse_from_str(input, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(input, "%H:%M"))
        .ok()
}

/// Why a date/time field was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldError {
    Syntax,
    Overflow,
}

impl FieldError {
    fn into_wire(self, base: BaseType, input: &str) -> WireError {
        match self {
            FieldError::Syntax => WireError::text(base.name(), input),
            FieldError::Overflow => WireError::FieldOutOfRange {
                type_name: base.name().to_string(),
                input: input.to_string(),
            },
        }
    }
}

/// `+HH`, `+HH:MM` or `+HH:MM:SS`.
fn parse_offset(input: &str) -> Result<FixedOffset, FieldError> {
    let (sign, rest) = match input.as_bytes().first() {
        Some(b'+') => (1, &input[1..]),
        Some(b'-') => (-1, &input[1..]),
        _ => return Err(FieldError::Syntax),
    };
    let mut parts = rest
        .split(':')
        .map(|p| p.parse::<u32>().map_err(|_| FieldError::Syntax));
    let h = parts.next().ok_or(FieldError::Syntax)??;
    let m = parts.next().unwrap_or(Ok(0))?;
    let s = parts.next().unwrap_or(Ok(0))?;
    if parts.next().is_some() {
        return Err(FieldError::Syntax);
    }
    let seconds = h
        .checked_mul(3600)
        .and_then(|v| v.checked_add(m.checked_mul(60)?))
        .and_then(|v| v.checked_add(s))
        .and_then(|v| i32::try_from(v).ok())
        .ok_or(FieldError::Overflow)?;
    FixedOffset::east_opt(sign * seconds).ok_or(FieldError::Overflow)
}

fn parse_timestamp(input: &str) -> Option<NaiveDateTime> {
    let input = input.replacen('T', " ", 1);
    NaiveDateTime::parse_from_str(&input, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&input, "%Y-%m-%d %H:%M"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(&input, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

fn parse_timestamptz(input: &str) -> Result<DateTime<Utc>, FieldError> {
    let input = input.replacen('T', " ", 1);
    // Trailing zone: Z, or the last sign after the time part.
    if let Some(naive) = input.strip_suffix('Z').and_then(parse_timestamp) {
        return Ok(naive.and_utc());
    }
    let time_start = input.find(' ').ok_or(FieldError::Syntax)?;
    let Some(split) = input[time_start..].rfind(['+', '-']).map(|i| i + time_start) else {
        return parse_timestamp(&input)
            .map(|naive| naive.and_utc())
            .ok_or(FieldError::Syntax);
    };
    let naive = parse_timestamp(&input[..split]).ok_or(FieldError::Syntax)?;
    let offset = parse_offset(input[split..].trim())?;
    naive
        .checked_sub_signed(chrono::Duration::seconds(i64::from(offset.local_minus_utc())))
        .map(|utc| utc.and_utc())
        .ok_or(FieldError::Overflow)
}

/// Parses the `postgres` interval style plus plain `N unit` lists.
fn parse_interval(input: &str) -> Result<Interval, FieldError> {
    let mut interval = Interval::default();
    let mut tokens = input.split_whitespace();
    while let Some(token) = tokens.next() {
        if token.contains(':') {
            let negative = token.starts_with('-');
            let time =
                parse_time(token.trim_start_matches(['-', '+'])).ok_or(FieldError::Syntax)?;
            let micros = time_micros(time);
            let micros = if negative { -micros } else { micros };
            interval.micros = interval
                .micros
                .checked_add(micros)
                .ok_or(FieldError::Overflow)?;
            continue;
        }
        let amount: f64 = token.parse().map_err(|_| FieldError::Syntax)?;
        if !amount.is_finite() {
            return Err(FieldError::Syntax);
        }
        let unit = tokens.next().ok_or(FieldError::Syntax)?.to_ascii_lowercase();
        let unit = unit.trim_end_matches('s');
        match unit {
            "year" => interval.months = add_i32(interval.months, amount * 12.0)?,
            "mon" | "month" => interval.months = add_i32(interval.months, amount)?,
            "week" => interval.days = add_i32(interval.days, amount * 7.0)?,
            "day" => interval.days = add_i32(interval.days, amount)?,
            "hour" => {
                interval.micros = add_i64(interval.micros, amount * MICROS_PER_HOUR as f64)?
            }
            "minute" | "min" => {
                interval.micros = add_i64(interval.micros, amount * MICROS_PER_MINUTE as f64)?
            }
            "second" | "sec" => {
                interval.micros = add_i64(interval.micros, amount * MICROS_PER_SECOND as f64)?
            }
            _ => return Err(FieldError::Syntax),
        }
    }
    Ok(interval)
}

/// Adds the whole part of `amount` to an interval field.
fn add_i32(field: i32, amount: f64) -> Result<i32, FieldError> {
    let amount = amount.trunc();
    if !(f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&amount) {
        return Err(FieldError::Overflow);
    }
    field.checked_add(amount as i32).ok_or(FieldError::Overflow)
}

fn add_i64(field: i64, amount: f64) -> Result<i64, FieldError> {
    let amount = amount.trunc();
    // 2^63 is the first float past i64::MAX.
    if !(i64::MIN as f64..i64::MAX as f64).contains(&amount) {
        return Err(FieldError::Overflow);
    }
    field.checked_add(amount as i64).ok_or(FieldError::Overflow)
}

fn parse_array(
    oids: &OidCache,
    ty: &PgType,
    element: &PgType,
    input: &str,
) -> Result<Value, WireError> {
    let bad = || WireError::text(&ty.name, input);
    let body = input
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(bad)?;
    if body.trim().is_empty() {
        return Ok(Value::Array(Vec::new()));
    }

    let mut items = Vec::new();
    let mut chars = body.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let mut text = String::new();
        let quoted = chars.peek() == Some(&'"');
        if quoted {
            chars.next();
            loop {
                match chars.next().ok_or_else(bad)? {
                    '"' => break,
                    '\\' => text.push(chars.next().ok_or_else(bad)?),
                    c => text.push(c),
                }
            }
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }
        } else {
            while let Some(c) = chars.peek().copied() {
                if c == ',' {
                    break;
                }
                if c == '{' || c == '"' {
                    return Err(WireError::UnsupportedDimensions(2));
                }
                text.push(c);
                chars.next();
            }
            text = text.trim().to_string();
        }

        items.push(if !quoted && text.eq_ignore_ascii_case("NULL") {
            Value::Null
        } else {
            parse_text(oids, element, &text)?
        });

        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(_) => return Err(bad()),
        }
    }
    Ok(Value::Array(items))
}
