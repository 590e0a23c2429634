use crate::constant::CapabilityFlags;
use crate::protocol::primitive::*;

/// SSLRequest: the first 32 bytes of a handshake response, sent before
/// upgrading the transport to TLS. The real response follows on the
/// encrypted stream with the next sequence id.
pub fn write_ssl_request(out: &mut Vec<u8>, capability_flags: CapabilityFlags, max_packet_size: u32, charset: u8) {
    write_u32_le(out, (capability_flags | CapabilityFlags::CLIENT_SSL).bits());
    write_u32_le(out, max_packet_size);
    write_u8(out, charset);
    out.extend_from_slice(&[0u8; 23]);
}
