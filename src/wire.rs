//! Conversion between typed SQL values and their Postgres wire representations.
//!
//! Every column value and bind parameter crosses the wire in one of two
//! formats chosen per column by the client:
//!
//! ```text
//!                      +-------------+
//!        Value  -----> |   binary    | -----> big-endian bytes
//!     (engine)  <----- |   text      | <----- UTF-8 text
//!                      +-------------+
//!                            ^
//!                            |  PgType (oid, kind, typmod)
//! ```
//!
//! ## Terminology
//!
//! - **PgType**: type descriptor driving the codec (base, array, composite, domain, enum)
//! - **Value**: the engine-side representation of a single datum
//! - **OidCache**: process-wide mapping from engine identifiers to public OIDs

pub mod binary;
pub mod cast;
pub mod error;
pub mod numeric;
pub mod oid_cache;
pub mod text;
pub mod types;
pub mod value;

use bytes::{Bytes, BytesMut};

pub use error::WireError;
pub use oid_cache::OidCache;
pub use types::{BaseType, CompositeField, Oid, PgType, TypeKind, oid};
pub use value::{Id, Interval, TimeTz, Value};

use crate::protocol::FormatCode;

/// Encodes a column value for a DataRow; `None` is SQL NULL.
pub fn encode_value(
    oids: &OidCache,
    ty: &PgType,
    format: FormatCode,
    value: &Value,
) -> Result<Option<Bytes>, WireError> {
    if value.is_null() {
        return Ok(None);
    }
    match format {
        FormatCode::Text => Ok(text::format_text(oids, ty, value)?.map(Bytes::from)),
        FormatCode::Binary => {
            let mut buf = BytesMut::new();
            binary::encode(oids, ty, value, &mut buf)?;
            Ok(Some(buf.freeze()))
        }
    }
}

/// Decodes a bind parameter sent in `format`; `None` is SQL NULL.
pub fn decode_value(
    oids: &OidCache,
    ty: &PgType,
    format: FormatCode,
    raw: Option<&[u8]>,
) -> Result<Value, WireError> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    match format {
        FormatCode::Text => {
            let text = std::str::from_utf8(raw)
                .map_err(|e| WireError::invalid(&ty.name, e.to_string()))?;
            text::parse_text(oids, ty, text)
        }
        FormatCode::Binary => binary::decode(oids, ty, raw),
    }
}
