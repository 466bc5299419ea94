//! `numeric` in Postgres's base-10000 digit layout.
//!
//! ```text
//! +---------+--------+------+--------+-------------------+
//! | ndigits | weight | sign | dscale | digit * ndigits   |
//! |  int16  | int16  | int16|  int16 | int16 (0..=9999)  |
//! +---------+--------+------+--------+-------------------+
//! ```
//!
//! `weight` is the power of 10000 of the first digit; `dscale` is the number
//! of decimal digits shown after the point.

use std::fmt::Write;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};
use rust_decimal::Decimal;

use crate::wire::binary::Reader;
use crate::wire::error::WireError;

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;

/// Encodes `value`, taking the display scale from `scale` when the column
/// declares one and from the literal's fractional digits otherwise.
pub fn encode_numeric(value: &Decimal, scale: Option<u16>, dst: &mut BytesMut) {
    if value.is_zero() {
        dst.put_slice(&[0; 8]);
        return;
    }

    let text = value.to_string();
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.as_str()),
    };
    let (int_part, fract_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let dscale = scale.map_or(fract_part.len() as i16, |s| s as i16);

    let int_part = if int_part == "0" {
        String::new()
    } else {
        let pad = (4 - int_part.len() % 4) % 4;
        format!("{}{int_part}", "0".repeat(pad))
    };
    let fract_part = {
        let pad = (4 - fract_part.len() % 4) % 4;
        format!("{fract_part}{}", "0".repeat(pad))
    };

    let int_groups = (int_part.len() / 4) as i16;
    let fract_groups = (fract_part.len() / 4) as i16;

    dst.put_i16(int_groups + fract_groups);
    dst.put_i16(int_groups - 1);
    dst.put_u16(if negative { NUMERIC_NEG } else { NUMERIC_POS });
    dst.put_i16(dscale);

    let digits = int_part.as_bytes().chunks(4).chain(fract_part.as_bytes().chunks(4));
    for group in digits {
        let digit = group
            .iter()
            .fold(0i16, |acc, d| acc * 10 + i16::from(d - b'0'));
        dst.put_i16(digit);
    }
}

pub fn decode_numeric(src: &mut Reader<'_>) -> Result<Decimal, WireError> {
    let ndigits = src.i16()?;
    let weight = src.i16()?;
    let sign = src.u16()?;
    let dscale = src.i16()?;

    if sign == NUMERIC_NAN {
        return Err(WireError::invalid("numeric", "NaN is not supported"));
    }
    if sign != NUMERIC_POS && sign != NUMERIC_NEG {
        return Err(WireError::invalid("numeric", format!("invalid sign 0x{sign:04x}")));
    }
    if ndigits < 0 || dscale < 0 {
        return Err(WireError::invalid("numeric", "negative digit count or scale"));
    }

    let mut digits = Vec::with_capacity(ndigits as usize);
    for _ in 0..ndigits {
        let digit = src.i16()?;
        if !(0..10000).contains(&digit) {
            return Err(WireError::invalid("numeric", format!("invalid digit {digit}")));
        }
        digits.push(digit);
    }
    let digit_at = |i: i32| -> i16 {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let weight = i32::from(weight);
    let mut int_part = String::new();
    for i in 0..=weight {
        let digit = digit_at(i);
        if i == 0 {
            let _ = write!(int_part, "{digit}");
        } else {
            let _ = write!(int_part, "{digit:04}");
        }
    }
    if int_part.is_empty() {
        int_part.push('0');
    }

    let mut fract_part = String::new();
    for _ in 0..(-1 - weight).max(0) {
        fract_part.push_str("0000");
    }
    for i in (weight + 1).max(0)..i32::from(ndigits) {
        let _ = write!(fract_part, "{:04}", digit_at(i));
    }
    let dscale = dscale as usize;
    if fract_part.len() > dscale {
        fract_part.truncate(dscale);
    } else {
        fract_part.extend(std::iter::repeat_n('0', dscale - fract_part.len()));
    }

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }
    text.push_str(&int_part);
    if !fract_part.is_empty() {
        text.push('.');
        text.push_str(&fract_part);
    }
    Decimal::from_str(&text).map_err(|e| WireError::invalid("numeric", e.to_string()))
}
