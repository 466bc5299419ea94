//! Value conversion between built-in types.

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use crate::wire::error::WireError;
use crate::wire::oid_cache::OidCache;
use crate::wire::text::{format_text, parse_text};
use crate::wire::types::{BaseType, PgType};
use crate::wire::value::Value;

/// Converts `value` so that it can be encoded as `target`.
///
/// Numeric conversions are done directly; everything else goes through the
/// text form of the value, the same route an explicit SQL cast takes.
pub fn cast(oids: &OidCache, value: &Value, target: &PgType) -> Result<Value, WireError> {
    let Some(base) = target.base_type() else {
        return Ok(value.clone());
    };
    if value.fits(base) {
        return Ok(value.clone());
    }
    if let Some(converted) = cast_numeric(value, base)? {
        return Ok(converted);
    }

    let source = value
        .natural_type()
        .map(PgType::base)
        .ok_or_else(|| mismatch(value, target))?;
    let text = format_text(oids, &source, value)?.unwrap_or_default();
    if base.is_textual() {
        return Ok(Value::Text(text));
    }
    parse_text(oids, target, &text).map_err(|_| mismatch(value, target))
}

fn cast_numeric(value: &Value, target: BaseType) -> Result<Option<Value>, WireError> {
    let out_of_range = || WireError::OutOfRange(target.name().to_string());
    let as_int = match value {
        Value::Int16(v) => Some(i64::from(*v)),
        Value::Int32(v) => Some(i64::from(*v)),
        Value::Int64(v) => Some(*v),
        _ => None,
    };
    let as_float = match value {
        Value::Float32(v) => Some(f64::from(*v)),
        Value::Float64(v) => Some(*v),
        Value::Numeric(v) => v.to_f64(),
        _ => as_int.map(|v| v as f64),
    };

    let converted = match (target, as_int) {
        (BaseType::Int2, Some(v)) => Value::Int16(i16::try_from(v).map_err(|_| out_of_range())?),
        (BaseType::Int4, Some(v)) => Value::Int32(i32::try_from(v).map_err(|_| out_of_range())?),
        (BaseType::Int8, Some(v)) => Value::Int64(v),
        (BaseType::Numeric, Some(v)) => Value::Numeric(Decimal::from(v)),
        (BaseType::Float4, _) => match as_float {
            Some(v) => Value::Float32(v as f32),
            None => return Ok(None),
        },
        (BaseType::Float8, _) => match as_float {
            Some(v) => Value::Float64(v),
            None => return Ok(None),
        },
        (BaseType::Numeric, None) => match value {
            Value::Float32(_) | Value::Float64(_) => Value::Numeric(
                as_float
                    .and_then(Decimal::from_f64)
                    .ok_or_else(out_of_range)?,
            ),
            _ => return Ok(None),
        },
        (BaseType::Int2 | BaseType::Int4 | BaseType::Int8, None) => {
            let Some(v) = as_float else {
                return Ok(None);
            };
            let rounded = v.round();
            if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
                return Err(out_of_range());
            }
            return cast_numeric(&Value::Int64(rounded as i64), target);
        }
        _ => return Ok(None),
    };
    Ok(Some(converted))
}

fn mismatch(value: &Value, target: &PgType) -> WireError {
    WireError::TypeMismatch {
        type_name: target.name.clone(),
        value: value.kind(),
    }
}
