pub mod handshake;
pub mod ssl_request;

pub use handshake::{
    AuthSwitchRequest, HandshakeResponse41, InitialHandshake, read_auth_switch_request,
    read_initial_handshake, scramble, write_handshake_response,
};
pub use ssl_request::write_ssl_request;
