use crate::constant::{CapabilityFlags, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::protocol::response::read_err_payload;

// ============================================================================
// Initial handshake packet (server -> client)
// ============================================================================

/// Protocol::HandshakeV10, the first packet the server sends.
///
/// ```text
/// 1   [0a] protocol version
/// n   server version (null-terminated)
/// 4   connection id
/// 8   auth-plugin-data-part-1 (first 8 salt bytes)
/// 1   [00] filler
/// 2   capability flags (lower 2 bytes)
/// 1   character set
/// 2   status flags
/// 2   capability flags (upper 2 bytes)
/// 1   auth plugin data length
/// 10  reserved
/// n   auth-plugin-data-part-2 (remaining salt bytes + NUL)
/// n   auth plugin name (null-terminated)
/// ```
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Both salt parts concatenated, trailing NUL stripped (20 bytes in
    /// practice).
    pub auth_plugin_data: Vec<u8>,
    pub capability_flags: CapabilityFlags,
    pub charset: u8,
    pub status_flags: ServerStatusFlags,
    pub auth_plugin_name: String,
}

/// Parse the initial handshake.
///
/// A server may refuse the connection outright by answering with an ERR
/// packet instead of a greeting.
pub fn read_initial_handshake(payload: &[u8]) -> Result<InitialHandshake> {
    let (protocol_version, data) = read_u8(payload)?;
    if protocol_version == 0xFF {
        return Err(read_err_payload(payload)?.into());
    }

    let (server_version, data) = read_nul_terminated(data)?;
    let (connection_id, data) = read_u32_le(data)?;
    let (salt_1, data) = read_fixed_bytes(data, 8)?;
    let (_filler, data) = read_u8(data)?;
    let (cap_lower, data) = read_u16_le(data)?;
    let (charset, data) = read_u8(data)?;
    let (status_flags, data) = read_u16_le(data)?;
    let (cap_upper, data) = read_u16_le(data)?;
    let (auth_data_len, data) = read_u8(data)?;
    let (_reserved, data) = read_fixed_bytes(data, 10)?;

    let capability_flags =
        CapabilityFlags::from_bits_truncate(((cap_upper as u32) << 16) | cap_lower as u32);

    // Part 2 is max(13, auth_data_len - 8) bytes; the 13th is a NUL.
    let salt_2_len = (auth_data_len as usize).saturating_sub(9).max(12);
    let (salt_2, data) = read_fixed_bytes(data, salt_2_len)?;
    let data = match data.first() {
        Some(0) => &data[1..],
        _ => data,
    };

    let mut auth_plugin_data = Vec::with_capacity(salt_1.len() + salt_2.len());
    auth_plugin_data.extend_from_slice(salt_1);
    auth_plugin_data.extend_from_slice(salt_2);

    let auth_plugin_name = match data.iter().position(|&b| b == 0) {
        Some(i) => String::from_utf8_lossy(&data[..i]).into_owned(),
        None => String::from_utf8_lossy(data).into_owned(),
    };

    Ok(InitialHandshake {
        protocol_version,
        server_version: String::from_utf8_lossy(server_version).into_owned(),
        connection_id,
        auth_plugin_data,
        capability_flags,
        charset,
        status_flags: ServerStatusFlags::from_bits_truncate(status_flags),
        auth_plugin_name,
    })
}

// ============================================================================
// Handshake response packet (client -> server)
// ============================================================================

/// HandshakeResponse41, sent with sequence id 1 (2 after an SSLRequest).
#[derive(Debug, Clone)]
pub struct HandshakeResponse41<'a> {
    pub capability_flags: CapabilityFlags,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin_name: Option<&'a str>,
}

pub fn write_handshake_response(out: &mut Vec<u8>, response: &HandshakeResponse41) {
    write_u32_le(out, response.capability_flags.bits());
    write_u32_le(out, response.max_packet_size);
    write_u8(out, response.charset);
    out.extend_from_slice(&[0u8; 23]);

    write_nul_terminated(out, response.username);

    if response
        .capability_flags
        .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA)
    {
        write_lenenc_bytes(out, response.auth_response);
    } else {
        write_u8(out, response.auth_response.len() as u8);
        out.extend_from_slice(response.auth_response);
    }

    if let Some(db) = response.database {
        write_nul_terminated(out, db);
    }

    if let Some(plugin) = response.auth_plugin_name {
        if response
            .capability_flags
            .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH)
        {
            write_nul_terminated(out, plugin);
        }
    }
}

// ============================================================================
// Auth switch request (server -> client)
// ============================================================================

/// Sent by the server (0xFE, long form) when it wants a different
/// authentication method than the one the greeting advertised.
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest<'a> {
    pub plugin_name: &'a str,
    pub plugin_data: &'a [u8],
}

pub fn read_auth_switch_request(payload: &[u8]) -> Result<AuthSwitchRequest<'_>> {
    let (header, data) = read_u8(payload)?;
    if header != 0xFE {
        return Err(Error::UnexpectedPacket(header));
    }

    let (plugin_name, data) = read_nul_terminated(data)?;
    let plugin_data = match data.last() {
        Some(0) => &data[..data.len() - 1],
        _ => data,
    };

    Ok(AuthSwitchRequest {
        plugin_name: simdutf8::basic::from_utf8(plugin_name)
            .map_err(|_| Error::Decode(crate::error::eyre!("plugin name is not UTF-8")))?,
        plugin_data,
    })
}

// ============================================================================
// Authentication plugins
// ============================================================================

/// mysql_native_password: `SHA1(pw) XOR SHA1(salt + SHA1(SHA1(pw)))`.
///
/// An empty password produces an empty scramble.
pub fn scramble_native_password(password: &str, salt: &[u8]) -> Vec<u8> {
    use sha1::{Digest, Sha1};

    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(stage2);
    let token = hasher.finalize();

    stage1.iter().zip(token.iter()).map(|(a, b)| a ^ b).collect()
}

/// caching_sha2_password initial response:
/// `SHA256(pw) XOR SHA256(SHA256(SHA256(pw)) + salt)`.
///
/// Only the fast-auth path is supported; full auth needs an RSA or TLS
/// exchange this client does not implement.
pub fn scramble_caching_sha2(password: &str, salt: &[u8]) -> Vec<u8> {
    use sha2::{Digest, Sha256};

    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha256::digest(password.as_bytes());
    let stage2 = Sha256::digest(stage1);

    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(salt);
    let token = hasher.finalize();

    stage1.iter().zip(token.iter()).map(|(a, b)| a ^ b).collect()
}

/// Dispatch on the plugin name the server asked for.
pub fn scramble(plugin: &str, password: &str, salt: &[u8]) -> Result<Vec<u8>> {
    match plugin {
        "" | "mysql_native_password" => Ok(scramble_native_password(password, salt)),
        "caching_sha2_password" => Ok(scramble_caching_sha2(password, salt)),
        other => Err(Error::Unsupported(format!(
            "authentication plugin {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The canonical v10 greeting for a 5.7.19 server.
    fn greeting_payload(salt: &[u8; 20]) -> Vec<u8> {
        let mut payload = vec![0x0A];
        payload.extend_from_slice(b"5.7.19\0");
        payload.extend_from_slice(&1234u32.to_le_bytes());
        payload.extend_from_slice(&salt[..8]);
        payload.push(0x00);
        let caps = CapabilityFlags::all().bits();
        payload.extend_from_slice(&(caps as u16).to_le_bytes());
        payload.push(0x2D); // utf8mb4
        payload.extend_from_slice(&0x0002u16.to_le_bytes());
        payload.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
        payload.push(21); // auth plugin data length
        payload.extend_from_slice(&[0u8; 10]);
        payload.extend_from_slice(&salt[8..]);
        payload.push(0x00);
        payload.extend_from_slice(b"mysql_native_password\0");
        payload
    }

    #[test]
    fn parse_v10_greeting() {
        let salt: [u8; 20] = *b"abcdefghijklmnopqrst";
        let payload = greeting_payload(&salt);
        let greeting = read_initial_handshake(&payload).unwrap();

        assert_eq!(greeting.protocol_version, 10);
        assert_eq!(greeting.server_version, "5.7.19");
        assert_eq!(greeting.connection_id, 1234);
        assert_eq!(greeting.auth_plugin_data, salt);
        assert_eq!(&greeting.auth_plugin_data[..8], b"abcdefgh");
        assert_eq!(&greeting.auth_plugin_data[8..], b"ijklmnopqrst");
        assert_eq!(greeting.charset, 0x2D);
        assert!(
            greeting
                .capability_flags
                .contains(CapabilityFlags::CLIENT_PROTOCOL_41)
        );
        assert_eq!(greeting.auth_plugin_name, "mysql_native_password");
    }

    #[test]
    fn greeting_err_surfaces_as_server_error() {
        let mut payload = vec![0xFF, 0x69, 0x04];
        payload.extend_from_slice(b"Host blocked");
        assert!(matches!(
            read_initial_handshake(&payload),
            Err(Error::ServerError(_))
        ));
    }

    #[test]
    fn native_password_scramble() {
        let salt: [u8; 20] = *b"aaaaaaaaaabbbbbbbbbb";
        let out = scramble_native_password("secret", &salt);
        assert_eq!(out.len(), 20);

        // Recompute the reference formula step by step.
        use sha1::{Digest, Sha1};
        let pw_hash = Sha1::digest(b"secret");
        let mut outer = Sha1::new();
        outer.update(salt);
        outer.update(Sha1::digest(pw_hash));
        let expected: Vec<u8> = pw_hash
            .iter()
            .zip(outer.finalize().iter())
            .map(|(a, b)| a ^ b)
            .collect();
        assert_eq!(out, expected);

        // XOR-ing the token back recovers SHA1(password).
        let mut salted = Sha1::new();
        salted.update(salt);
        salted.update(Sha1::digest(Sha1::digest(b"secret")));
        let recovered: Vec<u8> = out
            .iter()
            .zip(salted.finalize().iter())
            .map(|(a, b)| a ^ b)
            .collect();
        assert_eq!(recovered[..], Sha1::digest(b"secret")[..]);
    }

    #[test]
    fn empty_password_scrambles_to_empty() {
        let salt = [7u8; 20];
        assert!(scramble_native_password("", &salt).is_empty());
        assert!(scramble_caching_sha2("", &salt).is_empty());
    }

    #[test]
    fn caching_sha2_scramble_is_32_bytes() {
        let salt = [3u8; 20];
        assert_eq!(scramble_caching_sha2("secret", &salt).len(), 32);
    }

    #[test]
    fn unknown_plugin_is_unsupported() {
        assert!(matches!(
            scramble("ed25519", "secret", &[0u8; 20]),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn handshake_response_layout() {
        let response = HandshakeResponse41 {
            capability_flags: CapabilityFlags::CLIENT_PROTOCOL_41
                | CapabilityFlags::CLIENT_PLUGIN_AUTH
                | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
                | CapabilityFlags::CLIENT_CONNECT_WITH_DB,
            max_packet_size: 0x0100_0000,
            charset: 0x2D,
            username: "root",
            auth_response: &[0xAA; 20],
            database: Some("app"),
            auth_plugin_name: Some("mysql_native_password"),
        };
        let mut out = Vec::new();
        write_handshake_response(&mut out, &response);

        assert_eq!(&out[..4], &response.capability_flags.bits().to_le_bytes());
        assert_eq!(&out[4..8], &0x0100_0000u32.to_le_bytes());
        assert_eq!(out[8], 0x2D);
        assert_eq!(&out[9..32], &[0u8; 23]);
        assert_eq!(&out[32..37], b"root\0");
        assert_eq!(out[37], 20); // lenenc scramble length
        assert_eq!(&out[38..58], &[0xAA; 20]);
        assert_eq!(&out[58..62], b"app\0");
        assert_eq!(&out[62..], b"mysql_native_password\0");
    }

    #[test]
    fn parse_auth_switch_request() {
        let mut payload = vec![0xFE];
        payload.extend_from_slice(b"mysql_native_password\0");
        payload.extend_from_slice(b"01234567890123456789\0");
        let switch = read_auth_switch_request(&payload).unwrap();
        assert_eq!(switch.plugin_name, "mysql_native_password");
        assert_eq!(switch.plugin_data, b"01234567890123456789");
    }
}
