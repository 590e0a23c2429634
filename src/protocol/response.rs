use zerocopy::byteorder::little_endian::U16 as U16LE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::constant::ServerStatusFlags;
use crate::error::{Error, Result, eyre};
use crate::protocol::primitive::*;

/// First payload byte of an OK packet.
pub fn is_ok_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&0x00)
}

/// First payload byte of an ERR packet.
pub fn is_err_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&0xFF)
}

/// EOF packets are `0xFE` with a short payload. A longer `0xFE` payload
/// is a length-encoded integer in some other context, never EOF.
pub fn is_eof_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&0xFE) && payload.len() < 9
}

/// Parsed OK packet.
#[derive(Debug, Clone)]
pub struct OkPayload {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: ServerStatusFlags,
    pub warnings: u16,
    pub info: String,
}

/// Parse an OK packet payload (header byte 0x00, or 0xFE for the EOF
/// flavor some servers send at result-set end).
pub fn read_ok_payload(payload: &[u8]) -> Result<OkPayload> {
    let (header, data) = read_u8(payload)?;
    if header != 0x00 && header != 0xFE {
        return Err(Error::UnexpectedPacket(header));
    }

    let (affected_rows, data) = read_lenenc_int(data)?;
    let (last_insert_id, data) = read_lenenc_int(data)?;
    let (status_flags, data) = read_u16_le(data)?;
    let (warnings, data) = read_u16_le(data)?;

    Ok(OkPayload {
        affected_rows,
        last_insert_id,
        status_flags: ServerStatusFlags::from_bits_truncate(status_flags),
        warnings,
        info: String::from_utf8_lossy(data).into_owned(),
    })
}

/// Parsed ERR packet. Doubles as the error type surfaced to callers.
#[derive(Debug, Clone, thiserror::Error)]
#[error("ERROR {} ({}): {}", self.code, self.sql_state, self.message)]
pub struct ErrPayload {
    pub code: u16,
    pub sql_state: String,
    pub message: String,
}

/// Parse an ERR packet payload (header byte 0xFF).
///
/// The `#`-prefixed SQL-state block is only present once protocol 4.1 is
/// negotiated; pre-auth errors omit it.
pub fn read_err_payload(payload: &[u8]) -> Result<ErrPayload> {
    let (header, data) = read_u8(payload)?;
    if header != 0xFF {
        return Err(Error::UnexpectedPacket(header));
    }

    let (code, data) = read_u16_le(data)?;

    let (sql_state, message) = if data.first() == Some(&b'#') {
        let (state, rest) = read_fixed_bytes(&data[1..], 5)?;
        (String::from_utf8_lossy(state).into_owned(), rest)
    } else {
        (String::new(), data)
    };

    Ok(ErrPayload {
        code,
        sql_state,
        message: String::from_utf8_lossy(message).into_owned(),
    })
}

/// EOF packet body after the 0xFE header byte (zero-copy).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct EofPacket {
    warnings: U16LE,
    status_flags: U16LE,
}

impl EofPacket {
    pub fn warnings(&self) -> u16 {
        self.warnings.get()
    }

    pub fn status_flags(&self) -> ServerStatusFlags {
        ServerStatusFlags::from_bits_truncate(self.status_flags.get())
    }
}

/// Parse an EOF packet (header byte 0xFE, payload length < 9).
pub fn read_eof_packet(payload: &[u8]) -> Result<&EofPacket> {
    if !is_eof_packet(payload) {
        return Err(Error::UnexpectedPacket(payload.first().copied().unwrap_or(0)));
    }
    let data = &payload[1..];
    if data.len() < 4 {
        return Err(Error::Decode(eyre!(
            "EOF packet too short: {} bytes after header",
            data.len()
        )));
    }
    EofPacket::ref_from_bytes(&data[..4])
        .map_err(|e| Error::Decode(eyre!("EOF packet cast failed: {e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ok() {
        // DO 1 -> affected 0, insert id 0, autocommit, no warnings
        let payload = [0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];
        let ok = read_ok_payload(&payload).unwrap();
        assert_eq!(ok.affected_rows, 0);
        assert_eq!(ok.last_insert_id, 0);
        assert!(
            ok.status_flags
                .contains(ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT)
        );
        assert_eq!(ok.warnings, 0);
    }

    #[test]
    fn parse_ok_with_lenenc_counts() {
        // affected_rows = 300 (0xFC 2-byte form), last_insert_id = 7
        let payload = [0x00, 0xFC, 0x2C, 0x01, 0x07, 0x02, 0x00, 0x00, 0x00];
        let ok = read_ok_payload(&payload).unwrap();
        assert_eq!(ok.affected_rows, 300);
        assert_eq!(ok.last_insert_id, 7);
    }

    #[test]
    fn parse_err_with_sql_state() {
        let mut payload = vec![0xFF, 0x48, 0x04, b'#'];
        payload.extend_from_slice(b"42S02");
        payload.extend_from_slice(b"Table 'app.missing' doesn't exist");
        let err = read_err_payload(&payload).unwrap();
        assert_eq!(err.code, 0x0448);
        assert_eq!(err.sql_state, "42S02");
        assert_eq!(err.message, "Table 'app.missing' doesn't exist");
    }

    #[test]
    fn parse_err_without_sql_state() {
        let mut payload = vec![0xFF, 0x15, 0x04];
        payload.extend_from_slice(b"Access denied");
        let err = read_err_payload(&payload).unwrap();
        assert_eq!(err.code, 0x0415);
        assert_eq!(err.sql_state, "");
        assert_eq!(err.message, "Access denied");
    }

    #[test]
    fn eof_classification() {
        let eof = [0xFE, 0x00, 0x00, 0x02, 0x00];
        assert!(is_eof_packet(&eof));
        let parsed = read_eof_packet(&eof).unwrap();
        assert_eq!(parsed.warnings(), 0);
        assert!(
            parsed
                .status_flags()
                .contains(ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT)
        );

        // A 0xFE first byte with a long payload is not EOF.
        let long = [0xFE; 12];
        assert!(!is_eof_packet(&long));
        assert!(read_eof_packet(&long).is_err());
    }
}
