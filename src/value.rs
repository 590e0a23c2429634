use std::fmt;

use rust_decimal::Decimal;

/// A single MySQL column value, owned.
///
/// This is the closed set of shapes the text and binary protocols can
/// produce. Every consumer is expected to match exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    /// DECIMAL / NEWDECIMAL (arbitrary-precision signed decimal)
    Decimal(Decimal),
    /// TINYINT
    Int8(i8),
    /// TINYINT UNSIGNED
    UInt8(u8),
    /// SMALLINT
    Int16(i16),
    /// SMALLINT UNSIGNED
    UInt16(u16),
    /// INT and MEDIUMINT
    Int32(i32),
    /// INT UNSIGNED and MEDIUMINT UNSIGNED
    UInt32(u32),
    /// BIGINT
    Int64(i64),
    /// BIGINT UNSIGNED
    UInt64(u64),
    /// FLOAT (IEEE-754 binary32)
    Float(f32),
    /// DOUBLE (IEEE-754 binary64)
    Double(f64),
    Year(u16),
    Date(Date),
    /// TIME of day; the wire's sign and day count are not represented
    Time(Time),
    /// DATETIME / TIMESTAMP as local wall-clock time
    DateTime(DateTime),
    /// Binary string (charset 63)
    Bytes(Vec<u8>),
    /// Text string (any charset other than 63, validated as UTF-8)
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Calendar date, `0000-00-00` allowed (MySQL zero date).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Time of day with microsecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub micro: u32,
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)?;
        if self.micro != 0 {
            write!(f, ".{:06}", self.micro)?;
        }
        Ok(())
    }
}

/// Local wall-clock date and time with microsecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub micro: u32,
}

impl DateTime {
    pub fn date(&self) -> Date {
        Date {
            year: self.year,
            month: self.month,
            day: self.day,
        }
    }

    pub fn time(&self) -> Time {
        Time {
            hour: self.hour,
            minute: self.minute,
            second: self.second,
            micro: self.micro,
        }
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date(), self.time())
    }
}
