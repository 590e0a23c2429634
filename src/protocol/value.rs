//! Text- and binary-protocol codecs for [`Value`].
//!
//! The text protocol carries every field as a length-encoded string (or
//! the `0xFB` NULL sentinel); the binary protocol uses native
//! little-endian widths with a per-row null bitmap.

use crate::constant::ColumnType;
use crate::error::{Error, Result, eyre};
use crate::protocol::command::ColumnDefinition;
use crate::protocol::primitive::*;
use crate::value::{Date, DateTime, Time, Value};

/// NULL marker for a length-encoded string in the text protocol.
pub const TEXT_NULL: u8 = 0xFB;

// ============================================================================
// NULL bitmap
// ============================================================================

/// Per-row (or per-parameter-set) bitmap of NULL fields.
///
/// Result-set rows place field `k` at bit `k + 2`; statement parameters
/// use no offset.
#[derive(Debug, Clone, Copy)]
pub struct NullBitmap<'a> {
    bitmap: &'a [u8],
    offset: usize,
}

impl<'a> NullBitmap<'a> {
    pub fn for_result_set(bitmap: &'a [u8]) -> Self {
        Self { bitmap, offset: 2 }
    }

    pub fn for_parameters(bitmap: &'a [u8]) -> Self {
        Self { bitmap, offset: 0 }
    }

    pub fn is_null(&self, idx: usize) -> bool {
        let bit = idx + self.offset;
        let byte = bit >> 3;
        if byte >= self.bitmap.len() {
            return false;
        }
        (self.bitmap[byte] & (1 << (bit & 7))) != 0
    }
}

/// Bitmap length for a result-set row of `num_columns` fields (offset 2).
pub fn result_set_bitmap_len(num_columns: usize) -> usize {
    (num_columns + 7 + 2) / 8
}

/// Bitmap length for `num_params` statement parameters (offset 0).
pub fn parameter_bitmap_len(num_params: usize) -> usize {
    num_params.div_ceil(8)
}

/// Append the parameter null bitmap: bit `k` set iff `params[k]` is NULL.
pub fn write_parameter_null_bitmap(out: &mut Vec<u8>, params: &[Value]) {
    let start = out.len();
    out.resize(start + parameter_bitmap_len(params.len()), 0);
    for (i, param) in params.iter().enumerate() {
        if param.is_null() {
            out[start + (i >> 3)] |= 1 << (i & 7);
        }
    }
}

// ============================================================================
// Binary protocol
// ============================================================================

/// The `(type, flag)` pair advertised for a parameter ahead of its value.
///
/// Narrow integers are widened to the advertised wire type: TINYINT-sized
/// values travel as LONG, everything wider as LONGLONG. The flag byte is
/// 0x01 for unsigned variants.
pub fn param_type_and_flag(value: &Value) -> (ColumnType, u8) {
    match value {
        Value::Null => (ColumnType::MYSQL_TYPE_NULL, 0x00),
        Value::Decimal(_) => (ColumnType::MYSQL_TYPE_DECIMAL, 0x00),
        Value::Int8(_) => (ColumnType::MYSQL_TYPE_LONG, 0x00),
        Value::UInt8(_) => (ColumnType::MYSQL_TYPE_LONG, 0x01),
        Value::Int16(_) | Value::Int32(_) | Value::Int64(_) => {
            (ColumnType::MYSQL_TYPE_LONGLONG, 0x00)
        }
        Value::UInt16(_) | Value::UInt32(_) | Value::UInt64(_) => {
            (ColumnType::MYSQL_TYPE_LONGLONG, 0x01)
        }
        Value::Float(_) => (ColumnType::MYSQL_TYPE_FLOAT, 0x00),
        Value::Double(_) => (ColumnType::MYSQL_TYPE_DOUBLE, 0x00),
        Value::Year(_) => (ColumnType::MYSQL_TYPE_YEAR, 0x00),
        Value::DateTime(_) => (ColumnType::MYSQL_TYPE_DATETIME, 0x00),
        Value::Date(_) => (ColumnType::MYSQL_TYPE_DATE, 0x00),
        Value::Time(_) => (ColumnType::MYSQL_TYPE_TIME, 0x00),
        Value::Bytes(_) => (ColumnType::MYSQL_TYPE_BLOB, 0x00),
        Value::Text(_) => (ColumnType::MYSQL_TYPE_STRING, 0x00),
    }
}

/// Append the two type bytes per parameter.
pub fn write_parameter_types(out: &mut Vec<u8>, params: &[Value]) {
    for param in params {
        let (column_type, flag) = param_type_and_flag(param);
        write_u8(out, column_type as u8);
        write_u8(out, flag);
    }
}

/// Append the binary encodings of all non-NULL parameters in order.
pub fn write_parameter_values(out: &mut Vec<u8>, params: &[Value]) {
    for param in params {
        write_binary_value(out, param);
    }
}

/// Binary-encode one value at the width its advertised type implies.
/// NULL writes nothing; it travels in the bitmap.
pub fn write_binary_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => {}
        // Advertised as DECIMAL; the value itself travels as its
        // canonical decimal string.
        Value::Decimal(d) => write_lenenc_bytes(out, d.to_string().as_bytes()),
        Value::Int8(v) => write_u32_le(out, *v as i32 as u32),
        Value::UInt8(v) => write_u32_le(out, *v as u32),
        Value::Int16(v) => write_u64_le(out, *v as i64 as u64),
        Value::UInt16(v) => write_u64_le(out, *v as u64),
        Value::Int32(v) => write_u64_le(out, *v as i64 as u64),
        Value::UInt32(v) => write_u64_le(out, *v as u64),
        Value::Int64(v) => write_u64_le(out, *v as u64),
        Value::UInt64(v) => write_u64_le(out, *v),
        Value::Float(v) => write_u32_le(out, v.to_bits()),
        Value::Double(v) => write_u64_le(out, v.to_bits()),
        Value::Year(v) => write_u16_le(out, *v),
        Value::Date(d) => {
            write_u8(out, 4);
            write_u16_le(out, d.year);
            write_u8(out, d.month);
            write_u8(out, d.day);
        }
        // Always the extended form with microseconds.
        Value::DateTime(dt) => {
            write_u8(out, 11);
            write_u16_le(out, dt.year);
            write_u8(out, dt.month);
            write_u8(out, dt.day);
            write_u8(out, dt.hour);
            write_u8(out, dt.minute);
            write_u8(out, dt.second);
            write_u32_le(out, dt.micro);
        }
        Value::Time(t) => {
            write_u8(out, 12);
            write_u8(out, 0); // sign
            write_u32_le(out, 0); // days
            write_u8(out, t.hour);
            write_u8(out, t.minute);
            write_u8(out, t.second);
            write_u32_le(out, t.micro);
        }
        Value::Bytes(b) => write_lenenc_bytes(out, b),
        Value::Text(s) => write_lenenc_bytes(out, s.as_bytes()),
    }
}

/// Decode a binary-protocol row payload into one value per column.
///
/// The payload starts with the 0x00 row header, then the null bitmap
/// (offset 2), then the non-NULL fields back to back.
pub fn read_binary_row(payload: &[u8], columns: &[ColumnDefinition]) -> Result<Vec<Value>> {
    let (header, data) = read_u8(payload)?;
    if header != 0x00 {
        return Err(Error::UnexpectedPacket(header));
    }

    let (bitmap_bytes, mut data) = read_fixed_bytes(data, result_set_bitmap_len(columns.len()))?;
    let bitmap = NullBitmap::for_result_set(bitmap_bytes);

    let mut values = Vec::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        if bitmap.is_null(idx) {
            values.push(Value::Null);
            continue;
        }
        let (value, rest) = read_binary_value(data, column)?;
        values.push(value);
        data = rest;
    }
    Ok(values)
}

/// Decode one binary field according to its column's type and flags.
pub fn read_binary_value<'a>(
    data: &'a [u8],
    column: &ColumnDefinition,
) -> Result<(Value, &'a [u8])> {
    let unsigned = column.is_unsigned();

    match column.column_type {
        ColumnType::MYSQL_TYPE_NULL => Ok((Value::Null, data)),

        ColumnType::MYSQL_TYPE_TINY => {
            let (v, rest) = read_u8(data)?;
            let value = if unsigned {
                Value::UInt8(v)
            } else {
                Value::Int8(v as i8)
            };
            Ok((value, rest))
        }

        ColumnType::MYSQL_TYPE_SHORT => {
            let (v, rest) = read_u16_le(data)?;
            let value = if unsigned {
                Value::UInt16(v)
            } else {
                Value::Int16(v as i16)
            };
            Ok((value, rest))
        }

        ColumnType::MYSQL_TYPE_YEAR => {
            let (v, rest) = read_u16_le(data)?;
            Ok((Value::Year(v), rest))
        }

        ColumnType::MYSQL_TYPE_LONG | ColumnType::MYSQL_TYPE_INT24 => {
            let (v, rest) = read_u32_le(data)?;
            let value = if unsigned {
                Value::UInt32(v)
            } else {
                Value::Int32(v as i32)
            };
            Ok((value, rest))
        }

        ColumnType::MYSQL_TYPE_LONGLONG => {
            let (v, rest) = read_u64_le(data)?;
            let value = if unsigned {
                Value::UInt64(v)
            } else {
                Value::Int64(v as i64)
            };
            Ok((value, rest))
        }

        ColumnType::MYSQL_TYPE_FLOAT => {
            let (v, rest) = read_u32_le(data)?;
            Ok((Value::Float(f32::from_bits(v)), rest))
        }

        ColumnType::MYSQL_TYPE_DOUBLE => {
            let (v, rest) = read_u64_le(data)?;
            Ok((Value::Double(f64::from_bits(v)), rest))
        }

        ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_DATETIME => {
            let (len, data) = read_u8(data)?;
            let mut dt = DateTime::default();
            match len {
                0 => Ok((Value::DateTime(dt), data)),
                4 | 7 | 11 => {
                    let (year, data) = read_u16_le(data)?;
                    let (month, data) = read_u8(data)?;
                    let (day, mut data) = read_u8(data)?;
                    dt.year = year;
                    dt.month = month;
                    dt.day = day;
                    if len >= 7 {
                        let (hour, rest) = read_u8(data)?;
                        let (minute, rest) = read_u8(rest)?;
                        let (second, rest) = read_u8(rest)?;
                        dt.hour = hour;
                        dt.minute = minute;
                        dt.second = second;
                        data = rest;
                    }
                    if len == 11 {
                        let (micro, rest) = read_u32_le(data)?;
                        dt.micro = micro;
                        data = rest;
                    }
                    Ok((Value::DateTime(dt), data))
                }
                n => Err(Error::Decode(eyre!("invalid datetime length {n}"))),
            }
        }

        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => {
            let (len, data) = read_u8(data)?;
            match len {
                0 => Ok((Value::Date(Date::default()), data)),
                4 => {
                    let (year, data) = read_u16_le(data)?;
                    let (month, data) = read_u8(data)?;
                    let (day, data) = read_u8(data)?;
                    Ok((Value::Date(Date { year, month, day }), data))
                }
                n => Err(Error::Decode(eyre!("invalid date length {n}"))),
            }
        }

        ColumnType::MYSQL_TYPE_TIME => {
            let (len, data) = read_u8(data)?;
            match len {
                0 => Ok((Value::Time(Time::default()), data)),
                8 | 12 => {
                    // Sign and day count are not representable; drop them.
                    let (_sign, data) = read_u8(data)?;
                    let (_days, data) = read_u32_le(data)?;
                    let (hour, data) = read_u8(data)?;
                    let (minute, data) = read_u8(data)?;
                    let (second, mut data) = read_u8(data)?;
                    let mut time = Time {
                        hour,
                        minute,
                        second,
                        micro: 0,
                    };
                    if len == 12 {
                        let (micro, rest) = read_u32_le(data)?;
                        time.micro = micro;
                        data = rest;
                    }
                    Ok((Value::Time(time), data))
                }
                n => Err(Error::Decode(eyre!("invalid time length {n}"))),
            }
        }

        ColumnType::MYSQL_TYPE_DECIMAL
        | ColumnType::MYSQL_TYPE_NEWDECIMAL
        | ColumnType::MYSQL_TYPE_TIMESTAMP2
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIME2 => Err(Error::Decode(eyre!(
            "{:?} is not supported in the binary protocol",
            column.column_type
        ))),

        ColumnType::MYSQL_TYPE_VARCHAR
        | ColumnType::MYSQL_TYPE_VAR_STRING
        | ColumnType::MYSQL_TYPE_STRING
        | ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB
        | ColumnType::MYSQL_TYPE_GEOMETRY
        | ColumnType::MYSQL_TYPE_JSON
        | ColumnType::MYSQL_TYPE_ENUM
        | ColumnType::MYSQL_TYPE_SET
        | ColumnType::MYSQL_TYPE_BIT => {
            let (bytes, rest) = read_lenenc_bytes(data)?;
            Ok((string_value(bytes, column)?, rest))
        }
    }
}

// ============================================================================
// Text protocol
// ============================================================================

/// Decode a text-protocol row payload into one value per column.
pub fn read_text_row(payload: &[u8], columns: &[ColumnDefinition]) -> Result<Vec<Value>> {
    let mut data = payload;
    let mut values = Vec::with_capacity(columns.len());

    for column in columns {
        if data.first() == Some(&TEXT_NULL) {
            data = &data[1..];
            values.push(Value::Null);
            continue;
        }
        let (bytes, rest) = read_lenenc_bytes(data)?;
        data = rest;
        values.push(read_text_value(bytes, column)?);
    }

    if !data.is_empty() {
        return Err(Error::Decode(eyre!(
            "{} trailing bytes after {} fields",
            data.len(),
            columns.len()
        )));
    }
    Ok(values)
}

/// Decode one text field lexeme according to its column's type and flags.
pub fn read_text_value(bytes: &[u8], column: &ColumnDefinition) -> Result<Value> {
    use ColumnType::*;

    let unsigned = column.is_unsigned();

    // Some servers hand back an empty lexeme for numeric and temporal
    // fields; treat it as NULL rather than a parse failure.
    if bytes.is_empty()
        && matches!(
            column.column_type,
            MYSQL_TYPE_DECIMAL
                | MYSQL_TYPE_NEWDECIMAL
                | MYSQL_TYPE_TINY
                | MYSQL_TYPE_SHORT
                | MYSQL_TYPE_LONG
                | MYSQL_TYPE_INT24
                | MYSQL_TYPE_LONGLONG
                | MYSQL_TYPE_YEAR
                | MYSQL_TYPE_FLOAT
                | MYSQL_TYPE_DOUBLE
                | MYSQL_TYPE_TIMESTAMP
                | MYSQL_TYPE_DATETIME
                | MYSQL_TYPE_TIMESTAMP2
                | MYSQL_TYPE_DATETIME2
                | MYSQL_TYPE_DATE
                | MYSQL_TYPE_NEWDATE
                | MYSQL_TYPE_TIME
                | MYSQL_TYPE_TIME2
        )
    {
        return Ok(Value::Null);
    }

    let value = match column.column_type {
        MYSQL_TYPE_NULL => Value::Null,

        MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL => Value::Decimal(parse_lexeme(bytes)?),

        MYSQL_TYPE_TINY => {
            if unsigned {
                Value::UInt8(parse_lexeme(bytes)?)
            } else {
                Value::Int8(parse_lexeme(bytes)?)
            }
        }
        MYSQL_TYPE_SHORT => {
            if unsigned {
                Value::UInt16(parse_lexeme(bytes)?)
            } else {
                Value::Int16(parse_lexeme(bytes)?)
            }
        }
        MYSQL_TYPE_LONG | MYSQL_TYPE_INT24 => {
            if unsigned {
                Value::UInt32(parse_lexeme(bytes)?)
            } else {
                Value::Int32(parse_lexeme(bytes)?)
            }
        }
        MYSQL_TYPE_LONGLONG => {
            if unsigned {
                Value::UInt64(parse_lexeme(bytes)?)
            } else {
                Value::Int64(parse_lexeme(bytes)?)
            }
        }
        MYSQL_TYPE_YEAR => Value::Year(parse_lexeme(bytes)?),

        MYSQL_TYPE_FLOAT => Value::Float(parse_lexeme(bytes)?),
        MYSQL_TYPE_DOUBLE => Value::Double(parse_lexeme(bytes)?),

        MYSQL_TYPE_TIMESTAMP
        | MYSQL_TYPE_DATETIME
        | MYSQL_TYPE_TIMESTAMP2
        | MYSQL_TYPE_DATETIME2 => Value::DateTime(parse_datetime(lexeme(bytes)?)?),
        MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE => Value::Date(parse_date(lexeme(bytes)?)?),
        MYSQL_TYPE_TIME | MYSQL_TYPE_TIME2 => Value::Time(parse_time(lexeme(bytes)?)?),

        MYSQL_TYPE_GEOMETRY => Value::Bytes(bytes.to_vec()),

        MYSQL_TYPE_VARCHAR
        | MYSQL_TYPE_VAR_STRING
        | MYSQL_TYPE_STRING
        | MYSQL_TYPE_TINY_BLOB
        | MYSQL_TYPE_MEDIUM_BLOB
        | MYSQL_TYPE_LONG_BLOB
        | MYSQL_TYPE_BLOB
        | MYSQL_TYPE_JSON
        | MYSQL_TYPE_ENUM
        | MYSQL_TYPE_SET
        | MYSQL_TYPE_BIT => string_value(bytes, column)?,
    };
    Ok(value)
}

/// Encode one value as a text-protocol field: a length-encoded string of
/// its canonical rendering, or the bare `0xFB` sentinel for NULL.
pub fn write_text_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.push(TEXT_NULL),
        Value::Bytes(b) => write_lenenc_bytes(out, b),
        Value::Text(s) => write_lenenc_bytes(out, s.as_bytes()),
        Value::Decimal(d) => write_lenenc_bytes(out, d.to_string().as_bytes()),
        Value::Int8(v) => write_lenenc_bytes(out, v.to_string().as_bytes()),
        Value::UInt8(v) => write_lenenc_bytes(out, v.to_string().as_bytes()),
        Value::Int16(v) => write_lenenc_bytes(out, v.to_string().as_bytes()),
        Value::UInt16(v) => write_lenenc_bytes(out, v.to_string().as_bytes()),
        Value::Int32(v) => write_lenenc_bytes(out, v.to_string().as_bytes()),
        Value::UInt32(v) => write_lenenc_bytes(out, v.to_string().as_bytes()),
        Value::Int64(v) => write_lenenc_bytes(out, v.to_string().as_bytes()),
        Value::UInt64(v) => write_lenenc_bytes(out, v.to_string().as_bytes()),
        Value::Float(v) => write_lenenc_bytes(out, v.to_string().as_bytes()),
        Value::Double(v) => write_lenenc_bytes(out, v.to_string().as_bytes()),
        Value::Year(v) => write_lenenc_bytes(out, v.to_string().as_bytes()),
        Value::Date(v) => write_lenenc_bytes(out, v.to_string().as_bytes()),
        Value::Time(v) => write_lenenc_bytes(out, v.to_string().as_bytes()),
        Value::DateTime(v) => write_lenenc_bytes(out, v.to_string().as_bytes()),
    }
}

/// Encode a whole text row, field by field.
pub fn write_text_row(out: &mut Vec<u8>, values: &[Value]) {
    for value in values {
        write_text_value(out, value);
    }
}

// ============================================================================
// Lexeme parsing
// ============================================================================

fn string_value(bytes: &[u8], column: &ColumnDefinition) -> Result<Value> {
    if column.is_binary() {
        Ok(Value::Bytes(bytes.to_vec()))
    } else {
        Ok(Value::Text(lexeme(bytes)?.to_owned()))
    }
}

fn lexeme(bytes: &[u8]) -> Result<&str> {
    simdutf8::basic::from_utf8(bytes)
        .map_err(|_| Error::Decode(eyre!("field is not valid UTF-8")))
}

fn parse_lexeme<T>(bytes: &[u8]) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let s = lexeme(bytes)?;
    s.parse()
        .map_err(|e| Error::Decode(eyre!("bad lexeme {s:?}: {e}")))
}

fn parse_part<T>(part: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    part.parse()
        .map_err(|e| Error::Decode(eyre!("bad lexeme part {part:?}: {e}")))
}

fn parse_date(s: &str) -> Result<Date> {
    let mut parts = s.split('-');
    let (year, month, day) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(y), Some(m), Some(d), None) => (y, m, d),
        _ => return Err(Error::Decode(eyre!("bad date lexeme {s:?}"))),
    };
    Ok(Date {
        year: parse_part(year)?,
        month: parse_part(month)?,
        day: parse_part(day)?,
    })
}

fn parse_time(s: &str) -> Result<Time> {
    let (clock, frac) = match s.split_once('.') {
        Some((clock, frac)) => (clock, Some(frac)),
        None => (s, None),
    };

    let mut parts = clock.split(':');
    let (hour, minute, second) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(m), Some(sec), None) => (h, m, sec),
        _ => return Err(Error::Decode(eyre!("bad time lexeme {s:?}"))),
    };

    Ok(Time {
        hour: parse_part(hour)?,
        minute: parse_part(minute)?,
        second: parse_part(second)?,
        micro: match frac {
            Some(frac) => parse_micro(frac)?,
            None => 0,
        },
    })
}

fn parse_datetime(s: &str) -> Result<DateTime> {
    let (date, time) = s
        .split_once(' ')
        .ok_or_else(|| Error::Decode(eyre!("bad datetime lexeme {s:?}")))?;
    let date = parse_date(date)?;
    let time = parse_time(time)?;
    Ok(DateTime {
        year: date.year,
        month: date.month,
        day: date.day,
        hour: time.hour,
        minute: time.minute,
        second: time.second,
        micro: time.micro,
    })
}

/// Fractional seconds to microseconds: right-pad to six digits,
/// truncating anything finer than a microsecond.
fn parse_micro(frac: &str) -> Result<u32> {
    if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Decode(eyre!("bad fractional seconds {frac:?}")));
    }
    let mut micro = 0u32;
    for i in 0..6 {
        let digit = frac.as_bytes().get(i).map_or(0, |b| (b - b'0') as u32);
        micro = micro * 10 + digit;
    }
    Ok(micro)
}

#[cfg(test)]
#[path = "value_test.rs"]
mod value_test;
