//! Typed SQL values exchanged with the engine.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::wire::types::BaseType;

/// An object identifier as the engine knows it.
///
/// Raw OIDs are passed through unchanged; internal identifiers are assigned
/// public OIDs by the [`OidCache`](crate::wire::OidCache).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Id {
    Oid(u32),
    Internal(String),
}

/// `interval`: months, days and a sub-day part are kept apart as Postgres does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub micros: i64,
}

impl Interval {
    pub fn new(months: i32, days: i32, micros: i64) -> Self {
        Self {
            months,
            days,
            micros,
        }
    }
}

/// `timetz`: a local time of day and its UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeTz {
    pub time: NaiveTime,
    pub offset: FixedOffset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Numeric(Decimal),
    /// Any string-like value, including enum labels, JSON documents and `"char"`.
    Text(String),
    Bytes(Vec<u8>),
    /// A bit string stored as `0`/`1` characters.
    Bits(String),
    Date(NaiveDate),
    Time(NaiveTime),
    TimeTz(TimeTz),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Interval(Interval),
    Uuid(Uuid),
    Id(Id),
    Xid(u32),
    Array(Vec<Value>),
    Record(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// A short name of the runtime representation, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int16(_) => "int2",
            Value::Int32(_) => "int4",
            Value::Int64(_) => "int8",
            Value::Float32(_) => "float4",
            Value::Float64(_) => "float8",
            Value::Numeric(_) => "numeric",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytea",
            Value::Bits(_) => "bit",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::TimeTz(_) => "timetz",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Interval(_) => "interval",
            Value::Uuid(_) => "uuid",
            Value::Id(_) => "oid",
            Value::Xid(_) => "xid",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
        }
    }

    /// The built-in type a value naturally belongs to, if it is a scalar.
    pub fn natural_type(&self) -> Option<BaseType> {
        Some(match self {
            Value::Bool(_) => BaseType::Bool,
            Value::Int16(_) => BaseType::Int2,
            Value::Int32(_) => BaseType::Int4,
            Value::Int64(_) => BaseType::Int8,
            Value::Float32(_) => BaseType::Float4,
            Value::Float64(_) => BaseType::Float8,
            Value::Numeric(_) => BaseType::Numeric,
            Value::Text(_) => BaseType::Text,
            Value::Bytes(_) => BaseType::Bytea,
            Value::Bits(_) => BaseType::VarBit,
            Value::Date(_) => BaseType::Date,
            Value::Time(_) => BaseType::Time,
            Value::TimeTz(_) => BaseType::TimeTz,
            Value::Timestamp(_) => BaseType::Timestamp,
            Value::TimestampTz(_) => BaseType::TimestampTz,
            Value::Interval(_) => BaseType::Interval,
            Value::Uuid(_) => BaseType::Uuid,
            Value::Id(_) => BaseType::Oid,
            Value::Xid(_) => BaseType::Xid,
            Value::Null | Value::Array(_) | Value::Record(_) => return None,
        })
    }

    /// Whether this value can be encoded as `base` without a cast.
    pub fn fits(&self, base: BaseType) -> bool {
        match self {
            Value::Null => true,
            Value::Text(_) => base.is_textual(),
            Value::Bits(_) => matches!(base, BaseType::Bit | BaseType::VarBit),
            Value::Id(_) => base.is_oid_family(),
            other => other.natural_type() == Some(base),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Numeric(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
