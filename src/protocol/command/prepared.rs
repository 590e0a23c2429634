use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::constant::CommandByte;
use crate::error::{Error, Result, eyre};
use crate::protocol::primitive::*;
use crate::protocol::value::{
    write_parameter_null_bitmap, write_parameter_types, write_parameter_values,
};
use crate::value::Value;

/// COM_STMT_PREPARE OK response body (zero-copy).
///
/// MySQL >= 5.7 and MariaDB both send at least 12 bytes, so the warning
/// count is always present.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct PrepareOk {
    statement_id: U32LE,
    num_columns: U16LE,
    num_params: U16LE,
    _reserved: u8,
    warning_count: U16LE,
}

impl PrepareOk {
    pub fn statement_id(&self) -> u32 {
        self.statement_id.get()
    }

    pub fn num_columns(&self) -> u16 {
        self.num_columns.get()
    }

    pub fn num_params(&self) -> u16 {
        self.num_params.get()
    }

    pub fn warning_count(&self) -> u16 {
        self.warning_count.get()
    }
}

/// Write COM_STMT_PREPARE.
pub fn write_prepare(out: &mut Vec<u8>, sql: &str) {
    write_u8(out, CommandByte::StmtPrepare as u8);
    out.extend_from_slice(sql.as_bytes());
}

/// Parse the COM_STMT_PREPARE OK response (status byte 0x00).
pub fn read_prepare_ok(payload: &[u8]) -> Result<&PrepareOk> {
    let (status, data) = read_u8(payload)?;
    if status != 0x00 {
        return Err(Error::UnexpectedPacket(status));
    }
    if data.len() < 11 {
        return Err(Error::Decode(eyre!(
            "prepare response too short: {} bytes",
            data.len()
        )));
    }
    PrepareOk::ref_from_bytes(&data[..11])
        .map_err(|e| Error::Decode(eyre!("prepare response cast failed: {e:?}")))
}

/// Write COM_STMT_EXECUTE.
///
/// Parameter types are derived from the values themselves; the null
/// bitmap (offset 0) travels first, then the new-params-bound flag and
/// the type bytes, then the non-NULL values.
pub fn write_execute(out: &mut Vec<u8>, statement_id: u32, params: &[Value]) {
    write_u8(out, CommandByte::StmtExecute as u8);
    write_u32_le(out, statement_id);

    // flags: CURSOR_TYPE_NO_CURSOR
    write_u8(out, 0x00);

    // iteration count, always 1
    write_u32_le(out, 1);

    if !params.is_empty() {
        write_parameter_null_bitmap(out, params);
        write_u8(out, 0x01); // new-params-bound flag
        write_parameter_types(out, params);
        write_parameter_values(out, params);
    }
}

/// The first response packet of COM_STMT_EXECUTE: an OK packet, an ERR
/// packet, or the column count of a result set.
pub fn read_execute_response(payload: &[u8]) -> Result<ExecuteResponse> {
    match payload.first() {
        None => Err(Error::UnexpectedPacket(0)),
        Some(0x00) => Ok(ExecuteResponse::Ok(
            crate::protocol::response::read_ok_payload(payload)?,
        )),
        Some(0xFF) => Err(crate::protocol::response::read_err_payload(payload)?.into()),
        Some(_) => {
            let (column_count, _rest) = read_lenenc_int(payload)?;
            Ok(ExecuteResponse::ResultSet { column_count })
        }
    }
}

#[derive(Debug)]
pub enum ExecuteResponse {
    Ok(crate::protocol::response::OkPayload),
    ResultSet { column_count: u64 },
}

/// Write COM_STMT_CLOSE. The server sends no reply.
pub fn write_close_statement(out: &mut Vec<u8>, statement_id: u32) {
    write_u8(out, CommandByte::StmtClose as u8);
    write_u32_le(out, statement_id);
}

/// Write COM_STMT_RESET.
pub fn write_reset_statement(out: &mut Vec<u8>, statement_id: u32) {
    write_u8(out, CommandByte::StmtReset as u8);
    write_u32_le(out, statement_id);
}
