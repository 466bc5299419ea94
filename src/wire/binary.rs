//! Binary wire format encoding and decoding.
//!
//! The outer length word and NULL marker belong to the enclosing message;
//! a NULL value encodes to zero bytes here.

use bytes::{BufMut, BytesMut};
use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc,
};
use uuid::Uuid;

use crate::wire::cast::cast;
use crate::wire::error::WireError;
use crate::wire::numeric::{decode_numeric, encode_numeric};
use crate::wire::oid_cache::OidCache;
use crate::wire::types::{BaseType, CompositeField, PgType, TypeKind};
use crate::wire::value::{Interval, TimeTz, Value};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// 2000-01-01, the Postgres date epoch.
pub(crate) fn pg_epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default()
}

pub(crate) fn pg_epoch() -> NaiveDateTime {
    pg_epoch_date().and_time(NaiveTime::MIN)
}

/// Encodes `value` as `ty` in binary format, appending to `dst`.
pub fn encode(
    oids: &OidCache,
    ty: &PgType,
    value: &Value,
    dst: &mut BytesMut,
) -> Result<(), WireError> {
    if value.is_null() {
        return Ok(());
    }

    let ty = ty.resolve();
    match &ty.kind {
        TypeKind::Base(base) => encode_scalar(oids, ty, *base, value, dst),
        TypeKind::Array(element) => encode_array(oids, element, value, dst),
        TypeKind::Composite(fields) => encode_record(oids, ty, fields, value, dst),
        TypeKind::Enum(_) => match value {
            Value::Text(label) => {
                dst.put_slice(label.as_bytes());
                Ok(())
            }
            other => Err(mismatch(ty, other)),
        },
        TypeKind::Domain(base) => encode(oids, base, value, dst),
    }
}

/// Decodes a binary value of type `ty` occupying all of `src`.
pub fn decode(oids: &OidCache, ty: &PgType, src: &[u8]) -> Result<Value, WireError> {
    let ty = ty.resolve();
    match &ty.kind {
        TypeKind::Base(base) => decode_scalar(oids, ty, *base, src),
        TypeKind::Array(element) => decode_array(oids, element, src),
        TypeKind::Composite(fields) => decode_record(oids, fields, src),
        TypeKind::Enum(_) => Ok(Value::Text(utf8(ty, src)?)),
        TypeKind::Domain(base) => decode(oids, base, src),
    }
}

/// Days since 2000-01-01, rounded towards negative infinity.
pub fn encode_date(date: NaiveDate, dst: &mut BytesMut) {
    let days = date.signed_duration_since(pg_epoch_date()).num_days();
    dst.put_u32(days as i32 as u32);
}

fn encode_scalar(
    oids: &OidCache,
    ty: &PgType,
    base: BaseType,
    value: &Value,
    dst: &mut BytesMut,
) -> Result<(), WireError> {
    match (base, value) {
        (BaseType::Bool, Value::Bool(v)) => dst.put_u8(u8::from(*v)),
        (BaseType::Int2, Value::Int16(v)) => dst.put_i16(*v),
        (BaseType::Int4, Value::Int32(v)) => dst.put_i32(*v),
        (BaseType::Int8, Value::Int64(v)) => dst.put_i64(*v),
        (BaseType::Float4, Value::Float32(v)) => dst.put_f32(*v),
        (BaseType::Float8, Value::Float64(v)) => dst.put_f64(*v),
        (BaseType::Numeric, Value::Numeric(v)) => encode_numeric(v, ty.numeric_scale(), dst),
        (BaseType::InternalChar, Value::Text(v)) => match v.as_bytes() {
            [] => dst.put_u8(0),
            [b] => dst.put_u8(*b),
            _ => {
                return Err(WireError::invalid(
                    "\"char\"",
                    "found multiple characters during binary wire formatting",
                ));
            }
        },
        (BaseType::Jsonb, Value::Text(v)) => {
            dst.put_u8(1);
            dst.put_slice(v.as_bytes());
        }
        (base, Value::Text(v)) if base.is_textual() => dst.put_slice(v.as_bytes()),
        (BaseType::Bytea, Value::Bytes(v)) => dst.put_slice(v),
        (BaseType::Bit, Value::Bits(bits)) => {
            let declared = if ty.typmod >= 0 {
                ty.typmod
            } else {
                bits.len() as i32
            };
            dst.put_i32(declared);
            pack_bits(bits, dst)?;
        }
        (BaseType::VarBit, Value::Bits(bits)) => {
            dst.put_i32(bits.len() as i32);
            pack_bits(bits, dst)?;
        }
        (BaseType::Date, Value::Date(v)) => encode_date(*v, dst),
        (BaseType::Time, Value::Time(v)) => dst.put_i64(time_micros(*v)),
        (BaseType::TimeTz, Value::TimeTz(v)) => {
            dst.put_i64(time_micros(v.time));
            // Postgres stores the zone as seconds west of UTC.
            dst.put_i32(-v.offset.local_minus_utc());
        }
        (BaseType::Timestamp, Value::Timestamp(v)) => dst.put_i64(timestamp_micros(*v)?),
        (BaseType::TimestampTz, Value::TimestampTz(v)) => {
            dst.put_i64(timestamp_micros(v.naive_utc())?)
        }
        (BaseType::Interval, Value::Interval(v)) => {
            dst.put_i64(v.micros);
            dst.put_i32(v.days);
            dst.put_i32(v.months);
        }
        (base, Value::Id(id)) if base.is_oid_family() => dst.put_u32(oids.to_oid(id)),
        (BaseType::Xid, Value::Xid(v)) => dst.put_u32(*v),
        (BaseType::Uuid, Value::Uuid(v)) => dst.put_slice(v.as_bytes()),
        (_, other) => return Err(mismatch(ty, other)),
    }
    Ok(())
}

fn encode_array(
    oids: &OidCache,
    element: &PgType,
    value: &Value,
    dst: &mut BytesMut,
) -> Result<(), WireError> {
    let Value::Array(items) = value else {
        return Err(mismatch(element, value));
    };

    let mut dimensions = 0;
    let mut level = items.as_slice();
    while let Some(first) = level.first() {
        dimensions += 1;
        match first {
            Value::Array(inner) => level = inner,
            _ => break,
        }
    }
    if dimensions > 1 {
        return Err(WireError::UnsupportedDimensions(dimensions));
    }

    let has_null = items.iter().any(Value::is_null);
    dst.put_i32(dimensions);
    dst.put_i32(i32::from(has_null));
    dst.put_u32(element.oid);
    if dimensions == 0 {
        return Ok(());
    }

    dst.put_i32(items.len() as i32);
    dst.put_i32(1); // lower bound
    for item in items {
        if item.is_null() {
            dst.put_i32(-1);
        } else {
            put_framed(dst, |dst| encode(oids, element, item, dst))?;
        }
    }
    Ok(())
}

fn encode_record(
    oids: &OidCache,
    ty: &PgType,
    fields: &[CompositeField],
    value: &Value,
    dst: &mut BytesMut,
) -> Result<(), WireError> {
    let Value::Record(items) = value else {
        return Err(mismatch(ty, value));
    };
    if items.len() != fields.len() {
        return Err(WireError::invalid(
            &ty.name,
            format!("expected {} fields, got {}", fields.len(), items.len()),
        ));
    }

    dst.put_i32(items.len() as i32);
    for (field, item) in fields.iter().zip(items) {
        dst.put_u32(field.ty.oid);
        if item.is_null() {
            dst.put_i32(-1);
            continue;
        }
        let needs_cast = field.ty.base_type().is_some_and(|base| !item.fits(base));
        if needs_cast {
            let item = cast(oids, item, &field.ty)?;
            put_framed(dst, |dst| encode(oids, &field.ty, &item, dst))?;
        } else {
            put_framed(dst, |dst| encode(oids, &field.ty, item, dst))?;
        }
    }
    Ok(())
}

fn decode_scalar(
    oids: &OidCache,
    ty: &PgType,
    base: BaseType,
    src: &[u8],
) -> Result<Value, WireError> {
    let mut r = Reader::new(src);
    let value = match base {
        BaseType::Bool => Value::Bool(r.u8()? != 0),
        BaseType::Int2 => Value::Int16(r.i16()?),
        BaseType::Int4 => Value::Int32(r.i32()?),
        BaseType::Int8 => Value::Int64(r.i64()?),
        BaseType::Float4 => Value::Float32(r.f32()?),
        BaseType::Float8 => Value::Float64(r.f64()?),
        BaseType::Numeric => Value::Numeric(decode_numeric(&mut r)?),
        BaseType::InternalChar => match src {
            [] | [0] => Value::Text(String::new()),
            _ => Value::Text(utf8(ty, &src[..1])?),
        },
        BaseType::Jsonb => {
            let version = r.u8()?;
            if version != 1 {
                return Err(WireError::invalid(
                    "jsonb",
                    format!("unsupported jsonb version number {version}"),
                ));
            }
            Value::Text(utf8(ty, r.rest())?)
        }
        base if base.is_textual() => Value::Text(utf8(ty, src)?),
        BaseType::Bytea => Value::Bytes(src.to_vec()),
        BaseType::Bit | BaseType::VarBit => {
            let len = r.i32()?;
            if len < 0 {
                return Err(WireError::InvalidLength(len));
            }
            let packed = r.take((len as usize).div_ceil(8))?;
            Value::Bits(unpack_bits(packed, len as usize))
        }
        BaseType::Date => {
            let days = r.i32()?;
            let date = pg_epoch_date()
                .checked_add_signed(Duration::days(i64::from(days)))
                .ok_or_else(|| WireError::OutOfRange("date".into()))?;
            Value::Date(date)
        }
        BaseType::Time => Value::Time(time_from_micros(r.i64()?)?),
        BaseType::TimeTz => {
            let time = time_from_micros(r.i64()?)?;
            let west = r.i32()?;
            let offset = FixedOffset::east_opt(-west)
                .ok_or_else(|| WireError::invalid("timetz", format!("invalid zone {west}")))?;
            Value::TimeTz(TimeTz { time, offset })
        }
        BaseType::Timestamp => Value::Timestamp(timestamp_from_micros(r.i64()?)?),
        BaseType::TimestampTz => {
            let naive = timestamp_from_micros(r.i64()?)?;
            Value::TimestampTz(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        }
        BaseType::Interval => {
            let micros = r.i64()?;
            let days = r.i32()?;
            let months = r.i32()?;
            Value::Interval(Interval::new(months, days, micros))
        }
        base if base.is_oid_family() => Value::Id(oids.to_id(r.u32()?)),
        BaseType::Xid => Value::Xid(r.u32()?),
        BaseType::Uuid => {
            let bytes = r.take(16)?;
            Value::Uuid(
                Uuid::from_slice(bytes).map_err(|e| WireError::invalid("uuid", e.to_string()))?,
            )
        }
        _ => return Err(WireError::UnhandledOid(ty.oid)),
    };
    Ok(value)
}

fn decode_array(oids: &OidCache, element: &PgType, src: &[u8]) -> Result<Value, WireError> {
    let mut r = Reader::new(src);
    let dimensions = r.i32()?;
    let _has_null = r.i32()?;
    let _element_oid = r.u32()?;
    match dimensions {
        0 => return Ok(Value::Array(Vec::new())),
        1 => {}
        n => return Err(WireError::UnsupportedDimensions(n)),
    }

    let count = r.i32()?;
    let _lower_bound = r.i32()?;
    if count < 0 {
        return Err(WireError::InvalidLength(count));
    }

    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        items.push(match r.nullable()? {
            None => Value::Null,
            Some(bytes) => decode(oids, element, bytes)?,
        });
    }
    Ok(Value::Array(items))
}

fn decode_record(
    oids: &OidCache,
    fields: &[CompositeField],
    src: &[u8],
) -> Result<Value, WireError> {
    let mut r = Reader::new(src);
    let count = r.i32()?;
    if count < 0 || count as usize != fields.len() {
        return Err(WireError::invalid(
            "record",
            format!("expected {} fields, got {count}", fields.len()),
        ));
    }

    let mut items = Vec::with_capacity(fields.len());
    for field in fields {
        let _oid = r.u32()?;
        items.push(match r.nullable()? {
            None => Value::Null,
            Some(bytes) => decode(oids, &field.ty, bytes)?,
        });
    }
    Ok(Value::Record(items))
}

/// Writes an int32 length followed by whatever `body` appends.
fn put_framed(
    dst: &mut BytesMut,
    body: impl FnOnce(&mut BytesMut) -> Result<(), WireError>,
) -> Result<(), WireError> {
    let at = dst.len();
    dst.put_i32(0);
    body(dst)?;
    let len = (dst.len() - at - 4) as i32;
    dst[at..at + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Packs a `0`/`1` string into bytes, zero padding the last byte on the right.
fn pack_bits(bits: &str, dst: &mut BytesMut) -> Result<(), WireError> {
    for chunk in bits.as_bytes().chunks(8) {
        let mut byte = 0u8;
        for (i, bit) in chunk.iter().enumerate() {
            match bit {
                b'0' => {}
                b'1' => byte |= 0x80 >> i,
                _ => return Err(WireError::text("bit", bits)),
            }
        }
        dst.put_u8(byte);
    }
    Ok(())
}

fn unpack_bits(packed: &[u8], len: usize) -> String {
    (0..len)
        .map(|i| {
            if packed[i / 8] & (0x80 >> (i % 8)) != 0 {
                '1'
            } else {
                '0'
            }
        })
        .collect()
}

pub(crate) fn time_micros(time: NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight()) * MICROS_PER_SECOND
        + i64::from(time.nanosecond() / 1000)
}

pub(crate) fn time_from_micros(micros: i64) -> Result<NaiveTime, WireError> {
    let secs = micros.div_euclid(MICROS_PER_SECOND);
    let nanos = micros.rem_euclid(MICROS_PER_SECOND) * 1000;
    u32::try_from(secs)
        .ok()
        .and_then(|secs| NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos as u32))
        .ok_or_else(|| WireError::OutOfRange("time".into()))
}

fn timestamp_micros(ts: NaiveDateTime) -> Result<i64, WireError> {
    ts.signed_duration_since(pg_epoch())
        .num_microseconds()
        .ok_or_else(|| WireError::OutOfRange("timestamp".into()))
}

fn timestamp_from_micros(micros: i64) -> Result<NaiveDateTime, WireError> {
    pg_epoch()
        .checked_add_signed(Duration::microseconds(micros))
        .ok_or_else(|| WireError::OutOfRange("timestamp".into()))
}

fn utf8(ty: &PgType, src: &[u8]) -> Result<String, WireError> {
    String::from_utf8(src.to_vec()).map_err(|e| WireError::invalid(&ty.name, e.to_string()))
}

fn mismatch(ty: &PgType, value: &Value) -> WireError {
    WireError::TypeMismatch {
        type_name: ty.name.clone(),
        value: value.kind(),
    }
}

/// Bounds-checked big-endian reader over a complete value.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.buf.len() < n {
            return Err(WireError::ShortBuffer {
                needed: n,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn i16(&mut self) -> Result<i16, WireError> {
        self.array().map(i16::from_be_bytes)
    }

    pub(crate) fn u16(&mut self) -> Result<u16, WireError> {
        self.array().map(u16::from_be_bytes)
    }

    pub(crate) fn i32(&mut self) -> Result<i32, WireError> {
        self.array().map(i32::from_be_bytes)
    }

    pub(crate) fn u32(&mut self) -> Result<u32, WireError> {
        self.array().map(u32::from_be_bytes)
    }

    pub(crate) fn i64(&mut self) -> Result<i64, WireError> {
        self.array().map(i64::from_be_bytes)
    }

    pub(crate) fn f32(&mut self) -> Result<f32, WireError> {
        self.array().map(f32::from_be_bytes)
    }

    pub(crate) fn f64(&mut self) -> Result<f64, WireError> {
        self.array().map(f64::from_be_bytes)
    }

    /// An int32 length followed by that many bytes; -1 is NULL.
    pub(crate) fn nullable(&mut self) -> Result<Option<&'a [u8]>, WireError> {
        match self.i32()? {
            -1 => Ok(None),
            len if len < 0 => Err(WireError::InvalidLength(len)),
            len => self.take(len as usize).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn enc(ty: &PgType, value: &Value) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode(&OidCache::new(), ty, value, &mut buf).unwrap();
        buf.to_vec()
    }

    fn round_trip(ty: &PgType, value: Value) {
        let oids = OidCache::new();
        let mut buf = BytesMut::new();
        encode(&oids, ty, &value, &mut buf).unwrap();
        assert_eq!(decode(&oids, ty, &buf).unwrap(), value, "{}", ty.name);
    }

    fn base(b: BaseType) -> PgType {
        PgType::base(b)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_null_encodes_to_nothing() {
        assert!(enc(&base(BaseType::Int4), &Value::Null).is_empty());
        assert!(enc(&PgType::array_of(BaseType::Int4), &Value::Null).is_empty());
    }

    #[test]
    fn test_date_epoch() {
        let days = |d: NaiveDate| {
            let mut buf = BytesMut::new();
            encode_date(d, &mut buf);
            i32::from_be_bytes(buf[..].try_into().unwrap())
        };
        assert_eq!(days(date(2000, 1, 1)), 0);
        assert_eq!(days(date(2000, 1, 2)), 1);
        assert_eq!(days(date(1999, 12, 31)), -1);
    }

    #[test]
    fn test_array_with_null() {
        let value = Value::Array(vec![Value::Int32(1), Value::Null, Value::Int32(3)]);
        let mut expected = BytesMut::new();
        expected.put_i32(1); // ndim
        expected.put_i32(1); // has null
        expected.put_u32(23); // int4
        expected.put_i32(3); // count
        expected.put_i32(1); // lower bound
        expected.put_i32(4);
        expected.put_i32(1);
        expected.put_i32(-1);
        expected.put_i32(4);
        expected.put_i32(3);
        assert_eq!(
            enc(&PgType::array_of(BaseType::Int4), &value),
            expected.to_vec()
        );
    }

    #[test]
    fn test_empty_array() {
        let bytes = enc(&PgType::array_of(BaseType::Text), &Value::Array(vec![]));
        assert_eq!(bytes, vec![0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 25]);
    }

    #[test]
    fn test_multidimensional_array_rejected() {
        let value = Value::Array(vec![Value::Array(vec![Value::Int32(1)])]);
        let mut buf = BytesMut::new();
        let err = encode(
            &OidCache::new(),
            &PgType::array_of(BaseType::Int4),
            &value,
            &mut buf,
        )
        .unwrap_err();
        assert_eq!(err, WireError::UnsupportedDimensions(2));
    }

    #[test]
    fn test_bits() {
        let bit = base(BaseType::Bit).with_typmod(10);
        assert_eq!(
            enc(&bit, &Value::Bits("1010101011".into())),
            vec![0, 0, 0, 10, 0b1010_1010, 0b1100_0000]
        );
        assert_eq!(
            enc(&base(BaseType::VarBit), &Value::Bits("101".into())),
            vec![0, 0, 0, 3, 0b1010_0000]
        );
        round_trip(&bit, Value::Bits("1010101011".into()));
        round_trip(&base(BaseType::VarBit), Value::Bits("0".into()));
    }

    #[test]
    fn test_internal_char() {
        let ty = base(BaseType::InternalChar);
        assert_eq!(enc(&ty, &Value::Text(String::new())), vec![0]);
        assert_eq!(enc(&ty, &Value::Text("a".into())), vec![b'a']);
        let mut buf = BytesMut::new();
        assert!(encode(&OidCache::new(), &ty, &Value::Text("ab".into()), &mut buf).is_err());
    }

    #[test]
    fn test_jsonb_version_byte() {
        assert_eq!(
            enc(&base(BaseType::Jsonb), &Value::Text("{}".into())),
            vec![1, b'{', b'}']
        );
    }

    #[test]
    fn test_timetz_zone_is_seconds_west() {
        let value = Value::TimeTz(TimeTz {
            time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            offset: FixedOffset::east_opt(2 * 3600).unwrap(),
        });
        let bytes = enc(&base(BaseType::TimeTz), &value);
        assert_eq!(i64::from_be_bytes(bytes[..8].try_into().unwrap()), 36_000_000_000);
        assert_eq!(i32::from_be_bytes(bytes[8..].try_into().unwrap()), -7200);
    }

    #[test]
    fn test_interval_layout() {
        let value = Value::Interval(Interval::new(14, 3, 4_000_000));
        let mut expected = BytesMut::new();
        expected.put_i64(4_000_000);
        expected.put_i32(3);
        expected.put_i32(14);
        assert_eq!(enc(&base(BaseType::Interval), &value), expected.to_vec());
    }

    #[test]
    fn test_domain_and_enum() {
        let domain = PgType::domain(90_000, "us_postal", base(BaseType::Text));
        assert_eq!(enc(&domain, &Value::Text("94110".into())), b"94110".to_vec());

        let mood = PgType::enumeration(90_001, "mood", vec!["sad".into(), "happy".into()]);
        assert_eq!(enc(&mood, &Value::Text("happy".into())), b"happy".to_vec());
        round_trip(&mood, Value::Text("sad".into()));
    }

    #[test]
    fn test_record_casts_mismatched_fields() {
        let ty = PgType::composite(
            90_002,
            "pair",
            vec![
                CompositeField {
                    name: "a".into(),
                    ty: base(BaseType::Int8),
                },
                CompositeField {
                    name: "b".into(),
                    ty: base(BaseType::Text),
                },
            ],
        );
        let value = Value::Record(vec![Value::Int32(7), Value::Null]);

        let mut expected = BytesMut::new();
        expected.put_i32(2);
        expected.put_u32(20);
        expected.put_i32(8);
        expected.put_i64(7);
        expected.put_u32(25);
        expected.put_i32(-1);
        assert_eq!(enc(&ty, &value), expected.to_vec());

        let oids = OidCache::new();
        assert_eq!(
            decode(&oids, &ty, &expected).unwrap(),
            Value::Record(vec![Value::Int64(7), Value::Null])
        );
    }

    #[test]
    fn test_type_mismatch() {
        let mut buf = BytesMut::new();
        let err = encode(
            &OidCache::new(),
            &base(BaseType::Int4),
            &Value::Text("1".into()),
            &mut buf,
        )
        .unwrap_err();
        assert!(matches!(err, WireError::TypeMismatch { .. }));
    }

    #[test]
    fn test_scalar_round_trips() {
        round_trip(&base(BaseType::Bool), Value::Bool(true));
        round_trip(&base(BaseType::Bool), Value::Bool(false));
        for v in [0, -1, i16::MIN, i16::MAX] {
            round_trip(&base(BaseType::Int2), Value::Int16(v));
        }
        for v in [0, -1, i32::MIN, i32::MAX] {
            round_trip(&base(BaseType::Int4), Value::Int32(v));
        }
        for v in [0, -1, i64::MIN, i64::MAX] {
            round_trip(&base(BaseType::Int8), Value::Int64(v));
        }
        for v in [0.0, -1.5, f32::MIN, f32::MAX] {
            round_trip(&base(BaseType::Float4), Value::Float32(v));
        }
        for v in [0.0, -2.25, f64::MIN, f64::MAX] {
            round_trip(&base(BaseType::Float8), Value::Float64(v));
        }
        for v in ["0", "-1", "123.45", "79228162514264337593543950335"] {
            round_trip(
                &base(BaseType::Numeric),
                Value::Numeric(Decimal::from_str(v).unwrap()),
            );
        }
        round_trip(&base(BaseType::Text), Value::Text("héllo".into()));
        round_trip(&base(BaseType::Text), Value::Text(String::new()));
        round_trip(&base(BaseType::Bytea), Value::Bytes(vec![0, 1, 255]));
        round_trip(&base(BaseType::Date), Value::Date(date(2000, 1, 1)));
        round_trip(&base(BaseType::Date), Value::Date(date(1969, 7, 20)));
        round_trip(
            &base(BaseType::Time),
            Value::Time(NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap()),
        );
        round_trip(
            &base(BaseType::Timestamp),
            Value::Timestamp(date(1999, 12, 31).and_hms_micro_opt(23, 59, 59, 1).unwrap()),
        );
        round_trip(
            &base(BaseType::TimestampTz),
            Value::TimestampTz(date(2024, 2, 29).and_hms_opt(12, 0, 0).unwrap().and_utc()),
        );
        round_trip(
            &base(BaseType::TimeTz),
            Value::TimeTz(TimeTz {
                time: NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
                offset: FixedOffset::west_opt(5 * 3600 + 1800).unwrap(),
            }),
        );
        round_trip(
            &base(BaseType::Interval),
            Value::Interval(Interval::new(-1, 0, i64::MIN)),
        );
        round_trip(&base(BaseType::Uuid), Value::Uuid(Uuid::from_u128(0x1234)));
        round_trip(&base(BaseType::Xid), Value::Xid(u32::MAX));
        round_trip(
            &base(BaseType::Regclass),
            Value::Id(crate::wire::Id::Internal("table:t".into())),
        );
        round_trip(&base(BaseType::Jsonb), Value::Text("[1,2]".into()));
    }

    #[test]
    fn test_short_buffer() {
        let err = decode(&OidCache::new(), &base(BaseType::Int8), &[0, 0, 0]).unwrap_err();
        assert_eq!(
            err,
            WireError::ShortBuffer {
                needed: 8,
                remaining: 3
            }
        );
    }
}
