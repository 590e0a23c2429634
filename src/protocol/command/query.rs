use crate::constant::CommandByte;
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::protocol::response::{OkPayload, read_err_payload, read_ok_payload};

/// Write COM_QUERY.
pub fn write_query(out: &mut Vec<u8>, sql: &str) {
    write_u8(out, CommandByte::Query as u8);
    out.extend_from_slice(sql.as_bytes());
}

/// The first response packet of COM_QUERY:
/// - 0xFF: ERR packet
/// - 0x00: OK packet (no result set follows)
/// - 0xFB: LOCAL INFILE request (not supported)
/// - otherwise: a length-encoded integer holding the column count
pub fn read_query_response(payload: &[u8]) -> Result<QueryResponse> {
    match payload.first() {
        None => Err(Error::UnexpectedPacket(0)),
        Some(0xFF) => Err(read_err_payload(payload)?.into()),
        Some(0x00) => Ok(QueryResponse::Ok(read_ok_payload(payload)?)),
        Some(0xFB) => Err(Error::Unsupported(
            "LOAD DATA LOCAL INFILE is not supported".to_string(),
        )),
        Some(_) => {
            let (column_count, _rest) = read_lenenc_int(payload)?;
            Ok(QueryResponse::ResultSet { column_count })
        }
    }
}

#[derive(Debug)]
pub enum QueryResponse {
    Ok(OkPayload),
    ResultSet { column_count: u64 },
}
