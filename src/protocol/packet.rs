use std::io::{Read, Write};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::Result;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_LEN: usize = 0xFF_FFFF;

/// MySQL packet header (zero-copy).
///
/// Wire layout:
/// - length: 3 bytes (little-endian, payload length of this frame only)
/// - sequence_id: 1 byte
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct PacketHeader {
    length: [u8; 3],
    pub sequence_id: u8,
}

impl PacketHeader {
    pub fn new(length: usize, sequence_id: u8) -> Self {
        debug_assert!(length <= MAX_PAYLOAD_LEN);
        let len = (length as u32).to_le_bytes();
        Self {
            length: [len[0], len[1], len[2]],
            sequence_id,
        }
    }

    pub fn length(&self) -> usize {
        u32::from_le_bytes([self.length[0], self.length[1], self.length[2], 0]) as usize
    }
}

/// Read one logical payload, reassembling frames while their declared
/// length is `0xFFFFFF`.
///
/// `buffer` ends up holding the concatenated payload; the returned value
/// is the sequence id of the final fragment. A transport that ends
/// mid-packet surfaces as `Error::Io`.
pub fn read_payload<R: Read>(reader: &mut R, buffer: &mut Vec<u8>) -> Result<u8> {
    buffer.clear();

    let mut header = PacketHeader::new(0, 0);
    let mut sequence_id;
    loop {
        reader.read_exact(header.as_mut_bytes())?;
        let length = header.length();
        sequence_id = header.sequence_id;

        let start = buffer.len();
        buffer.resize(start + length, 0);
        reader.read_exact(&mut buffer[start..])?;

        if length < MAX_PAYLOAD_LEN {
            break;
        }
    }

    Ok(sequence_id)
}

/// Write one logical payload as a sequence of frames.
///
/// Fragments carry `first_sequence_id`, `first_sequence_id + 1`, … and
/// at most `0xFFFFFF` payload bytes each. A payload whose length is an
/// exact multiple of `0xFFFFFF` is terminated by an empty frame so the
/// peer can tell the packet is complete.
pub fn write_payload<W: Write>(
    writer: &mut W,
    first_sequence_id: u8,
    payload: &[u8],
) -> Result<()> {
    let mut sequence_id = first_sequence_id;
    let mut remaining = payload;

    loop {
        let chunk_len = remaining.len().min(MAX_PAYLOAD_LEN);
        let (chunk, rest) = remaining.split_at(chunk_len);
        remaining = rest;

        let header = PacketHeader::new(chunk_len, sequence_id);
        writer.write_all(header.as_bytes())?;
        writer.write_all(chunk)?;

        if chunk_len < MAX_PAYLOAD_LEN {
            break;
        }
        sequence_id = sequence_id.wrapping_add(1);
    }

    writer.flush()?;
    Ok(())
}
