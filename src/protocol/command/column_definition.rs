use crate::constant::{BINARY_CHARSET, ColumnFlags, ColumnType};
use crate::error::{Error, Result, eyre};
use crate::protocol::primitive::*;

/// Column metadata from a ColumnDefinition41 packet.
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub column_length: u32,
    pub column_type: ColumnType,
    pub flags: ColumnFlags,
    pub decimals: u8,
}

impl ColumnDefinition {
    pub fn is_unsigned(&self) -> bool {
        self.flags.contains(ColumnFlags::UNSIGNED_FLAG)
    }

    /// Charset 63 marks the column as binary; anything else is text.
    pub fn is_binary(&self) -> bool {
        self.charset == BINARY_CHARSET
    }
}

/// Parse a ColumnDefinition41 packet payload.
pub fn read_column_definition(payload: &[u8]) -> Result<ColumnDefinition> {
    // The catalog is always "def" and not retained.
    let (_catalog, data) = read_lenenc_bytes(payload)?;
    let (schema, data) = read_lenenc_bytes(data)?;
    let (table, data) = read_lenenc_bytes(data)?;
    let (org_table, data) = read_lenenc_bytes(data)?;
    let (name, data) = read_lenenc_bytes(data)?;
    let (org_name, data) = read_lenenc_bytes(data)?;

    // Length of the fixed tail, always 0x0C.
    let (_fixed_len, data) = read_lenenc_int(data)?;

    let (charset, data) = read_u16_le(data)?;
    let (column_length, data) = read_u32_le(data)?;
    let (type_byte, data) = read_u8(data)?;
    let (flags, data) = read_u16_le(data)?;
    let (decimals, _data) = read_u8(data)?;

    let column_type = ColumnType::from_u8(type_byte)
        .ok_or_else(|| Error::Decode(eyre!("unknown column type 0x{:02X}", type_byte)))?;

    Ok(ColumnDefinition {
        schema: String::from_utf8_lossy(schema).into_owned(),
        table: String::from_utf8_lossy(table).into_owned(),
        org_table: String::from_utf8_lossy(org_table).into_owned(),
        name: String::from_utf8_lossy(name).into_owned(),
        org_name: String::from_utf8_lossy(org_name).into_owned(),
        charset,
        column_length,
        column_type,
        flags: ColumnFlags::from_bits_truncate(flags),
        decimals,
    })
}

/// Encode a ColumnDefinition41 payload. The inverse of
/// [`read_column_definition`], used by tests and tooling that fabricate
/// result sets.
pub fn write_column_definition(out: &mut Vec<u8>, col: &ColumnDefinition) {
    write_lenenc_bytes(out, b"def");
    write_lenenc_bytes(out, col.schema.as_bytes());
    write_lenenc_bytes(out, col.table.as_bytes());
    write_lenenc_bytes(out, col.org_table.as_bytes());
    write_lenenc_bytes(out, col.name.as_bytes());
    write_lenenc_bytes(out, col.org_name.as_bytes());
    write_lenenc_int(out, 0x0C);
    write_u16_le(out, col.charset);
    write_u32_le(out, col.column_length);
    write_u8(out, col.column_type as u8);
    write_u16_le(out, col.flags.bits());
    write_u8(out, col.decimals);
    write_u16_le(out, 0); // reserved
}
