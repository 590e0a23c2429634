use crate::constant::CommandByte;
use crate::protocol::primitive::*;

/// Write COM_QUIT. The server closes the connection without replying.
pub fn write_quit(out: &mut Vec<u8>) {
    write_u8(out, CommandByte::Quit as u8);
}

/// Write COM_PING.
pub fn write_ping(out: &mut Vec<u8>) {
    write_u8(out, CommandByte::Ping as u8);
}
