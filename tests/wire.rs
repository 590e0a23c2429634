//! End-to-end tests against a scripted in-process server.
//!
//! Each test binds a listener, spawns a thread that plays the server
//! side of the conversation from canned packets, and drives a real
//! connection against it.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;

use lean_mysql::constant::{BINARY_CHARSET, ColumnFlags, ColumnType};
use lean_mysql::protocol::command::{ColumnDefinition, write_column_definition};
use lean_mysql::sync::{Conn, Stream};
use lean_mysql::{Error, Opts, Value};

const SALT: [u8; 20] = *b"abcdefghijklmnopqrst";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("lean_mysql=trace")
        .try_init();
}

fn test_opts() -> Opts {
    Opts {
        user: "root".to_string(),
        password: Some("secret".to_string()),
        ..Opts::default()
    }
}

// ============================================================================
// Server-side scripting
// ============================================================================

struct ServerSocket {
    stream: TcpStream,
    seq: u8,
}

impl ServerSocket {
    /// Read one client packet; returns (sequence id, payload).
    fn recv(&mut self) -> (u8, Vec<u8>) {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).unwrap();
        let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).unwrap();
        self.seq = header[3].wrapping_add(1);
        (header[3], payload)
    }

    /// Send one packet continuing the current sequence.
    fn send(&mut self, payload: &[u8]) {
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
        frame.push(self.seq);
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).unwrap();
        self.seq = self.seq.wrapping_add(1);
    }

    /// Play the v10 handshake: greeting out, auth response in, OK back.
    fn handshake(&mut self) {
        self.send(&greeting_payload());
        let (seq, auth) = self.recv();
        assert_eq!(seq, 1, "auth response must carry sequence id 1");
        let user_at = auth
            .windows(5)
            .position(|w| w == b"root\0")
            .expect("username missing from auth response");
        // 20-byte native-password scramble, length-encoded.
        assert_eq!(auth[user_at + 5], 20);
        self.send(&ok_payload(0, 0));
    }
}

/// Spawn a scripted server; returns its address and the join handle.
fn spawn_server(
    script: impl FnOnce(ServerSocket) + Send + 'static,
) -> (std::net::SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        script(ServerSocket { stream, seq: 0 });
    });
    (addr, handle)
}

fn connect(addr: std::net::SocketAddr) -> Conn {
    let stream = Stream::tcp(TcpStream::connect(addr).unwrap());
    Conn::new_with_stream(stream, &test_opts()).unwrap()
}

// ============================================================================
// Canned payloads
// ============================================================================

fn greeting_payload() -> Vec<u8> {
    let caps: u32 = 0xFFFF_FFFF;
    let mut payload = vec![0x0A];
    payload.extend_from_slice(b"5.7.19\0");
    payload.extend_from_slice(&1234u32.to_le_bytes());
    payload.extend_from_slice(&SALT[..8]);
    payload.push(0x00);
    payload.extend_from_slice(&(caps as u16).to_le_bytes());
    payload.push(0x2D);
    payload.extend_from_slice(&0x0002u16.to_le_bytes());
    payload.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
    payload.push(21);
    payload.extend_from_slice(&[0u8; 10]);
    payload.extend_from_slice(&SALT[8..]);
    payload.push(0x00);
    payload.extend_from_slice(b"mysql_native_password\0");
    payload
}

fn ok_payload(affected_rows: u8, last_insert_id: u8) -> Vec<u8> {
    vec![0x00, affected_rows, last_insert_id, 0x02, 0x00, 0x00, 0x00]
}

fn eof_payload() -> Vec<u8> {
    vec![0xFE, 0x00, 0x00, 0x02, 0x00]
}

fn err_payload(code: u16, sql_state: &str, message: &str) -> Vec<u8> {
    let mut payload = vec![0xFF];
    payload.extend_from_slice(&code.to_le_bytes());
    payload.push(b'#');
    payload.extend_from_slice(sql_state.as_bytes());
    payload.extend_from_slice(message.as_bytes());
    payload
}

fn int64_column(name: &str) -> ColumnDefinition {
    ColumnDefinition {
        schema: String::new(),
        table: String::new(),
        org_table: String::new(),
        name: name.to_string(),
        org_name: name.to_string(),
        charset: BINARY_CHARSET,
        column_length: 21,
        column_type: ColumnType::MYSQL_TYPE_LONGLONG,
        flags: ColumnFlags::NOT_NULL_FLAG,
        decimals: 0,
    }
}

fn column_payload(col: &ColumnDefinition) -> Vec<u8> {
    let mut payload = Vec::new();
    write_column_definition(&mut payload, col);
    payload
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn execute_returns_the_ok_packet() {
    init_tracing();
    let (addr, server) = spawn_server(|mut sock| {
        sock.handshake();

        let (seq, cmd) = sock.recv();
        assert_eq!(seq, 0, "commands start a fresh seq-0 conversation");
        assert_eq!(cmd, b"\x03DO 1");
        sock.send(&ok_payload(0, 0));

        // COM_PING
        let (_, cmd) = sock.recv();
        assert_eq!(cmd, [0x0E]);
        sock.send(&ok_payload(0, 0));

        // COM_QUIT
        let (_, cmd) = sock.recv();
        assert_eq!(cmd, [0x01]);
    });

    let mut conn = connect(addr);
    assert_eq!(conn.server_version(), "5.7.19");
    assert_eq!(conn.connection_id(), 1234);

    let ok = conn.execute("DO 1").unwrap();
    assert_eq!(ok.affected_rows, 0);
    assert_eq!(ok.last_insert_id, 0);

    conn.ping().unwrap();
    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn query_streams_a_text_result_set() {
    init_tracing();
    let (addr, server) = spawn_server(|mut sock| {
        sock.handshake();

        let (_, cmd) = sock.recv();
        assert_eq!(cmd, b"\x03SELECT 1 AS x");
        sock.send(&[0x01]); // one column
        sock.send(&column_payload(&int64_column("x")));
        sock.send(&eof_payload());
        sock.send(&[0x01, b'1']); // row: "1"
        sock.send(&eof_payload());

        // The drained connection accepts another command.
        let (_, cmd) = sock.recv();
        assert_eq!(cmd[0], 0x03);
        sock.send(&ok_payload(0, 0));
    });

    let mut conn = connect(addr);

    let mut result = conn.query("SELECT 1 AS x").unwrap();
    assert_eq!(result.columns().len(), 1);
    assert_eq!(result.columns()[0].name, "x");
    assert_eq!(
        result.columns()[0].column_type,
        ColumnType::MYSQL_TYPE_LONGLONG
    );

    assert_eq!(result.next_row().unwrap(), Some(vec![Value::Int64(1)]));
    assert_eq!(result.next_row().unwrap(), None);
    // A finished stream stays finished.
    assert_eq!(result.next_row().unwrap(), None);

    conn.execute("DO 1").unwrap();
    server.join().unwrap();
}

#[test]
fn unconsumed_result_set_guards_commands() {
    init_tracing();
    let (addr, server) = spawn_server(|mut sock| {
        sock.handshake();

        // First query: drained by the client.
        let (_, _) = sock.recv();
        sock.send(&[0x01]);
        sock.send(&column_payload(&int64_column("x")));
        sock.send(&eof_payload());
        sock.send(&[0x01, b'1']);
        sock.send(&eof_payload());

        // Command issued after draining succeeds.
        let (_, _) = sock.recv();
        sock.send(&ok_payload(0, 0));

        // Second query: the client reads the metadata block inside
        // query() and then abandons the stream, so no rows are sent.
        let (_, _) = sock.recv();
        sock.send(&[0x01]);
        sock.send(&column_payload(&int64_column("x")));
        sock.send(&eof_payload());
    });

    let mut conn = connect(addr);

    // Draining the stream re-enables commands.
    let mut result = conn.query("SELECT 1").unwrap();
    while result.next_row().unwrap().is_some() {}
    conn.execute("DO 1").unwrap();

    // An open stream blocks them, and dropping it undrained does not
    // clear the guard.
    let result = conn.query("SELECT 1").unwrap();
    drop(result);
    assert!(matches!(
        conn.execute("DO 2"),
        Err(Error::UnconsumedResultSet)
    ));
    assert!(matches!(conn.ping(), Err(Error::UnconsumedResultSet)));

    server.join().unwrap();
}

#[test]
fn server_error_surfaces_and_connection_stays_usable() {
    init_tracing();
    let (addr, server) = spawn_server(|mut sock| {
        sock.handshake();

        let (_, _) = sock.recv();
        sock.send(&err_payload(1146, "42S02", "Table 'app.missing' doesn't exist"));

        let (_, _) = sock.recv();
        sock.send(&ok_payload(0, 0));
    });

    let mut conn = connect(addr);

    match conn.execute("SELECT * FROM missing") {
        Err(Error::ServerError(err)) => {
            assert_eq!(err.code, 1146);
            assert_eq!(err.sql_state, "42S02");
        }
        other => panic!("expected server error, got {other:?}"),
    }

    // The error arrived before any rows streamed; the connection works
    // and is not marked broken.
    assert!(!conn.is_broken());
    conn.ping().unwrap();
    server.join().unwrap();
}

#[test]
fn query_on_a_no_result_set_statement_returns_ok() {
    init_tracing();
    let (addr, server) = spawn_server(|mut sock| {
        sock.handshake();

        // COM_QUERY issued through query(): OK, no result set.
        let (_, cmd) = sock.recv();
        assert_eq!(cmd, b"\x03DO 1");
        sock.send(&ok_payload(0, 0));

        // COM_STMT_PREPARE with no params and no columns.
        let (_, cmd) = sock.recv();
        assert_eq!(cmd[0], 0x16);
        let mut prepare_ok = vec![0x00];
        prepare_ok.extend_from_slice(&3u32.to_le_bytes()); // statement id
        prepare_ok.extend_from_slice(&0u16.to_le_bytes()); // columns
        prepare_ok.extend_from_slice(&0u16.to_le_bytes()); // params
        prepare_ok.push(0x00);
        prepare_ok.extend_from_slice(&0u16.to_le_bytes()); // warnings
        sock.send(&prepare_ok);

        // COM_STMT_EXECUTE issued through query_stmt(): OK as well.
        let (_, cmd) = sock.recv();
        assert_eq!(cmd[0], 0x17);
        sock.send(&ok_payload(2, 0));

        // Neither response entered streaming, so commands still work.
        let (_, cmd) = sock.recv();
        assert_eq!(cmd, [0x0E]);
        sock.send(&ok_payload(0, 0));
    });

    let mut conn = connect(addr);

    let mut result = conn.query("DO 1").unwrap();
    assert!(result.columns().is_empty());
    assert_eq!(result.ok().map(|ok| ok.affected_rows), Some(0));
    assert_eq!(result.next_row().unwrap(), None);
    drop(result);

    let stmt = conn.prepare("DO 2").unwrap();
    let mut result = conn.query_stmt(&stmt, &[]).unwrap();
    assert!(result.columns().is_empty());
    assert_eq!(result.ok().map(|ok| ok.affected_rows), Some(2));
    assert_eq!(result.next_row().unwrap(), None);
    drop(result);

    conn.ping().unwrap();
    server.join().unwrap();
}

#[test]
fn prepared_statement_binary_flow() {
    init_tracing();
    let (addr, server) = spawn_server(|mut sock| {
        sock.handshake();

        // COM_STMT_PREPARE
        let (_, cmd) = sock.recv();
        assert_eq!(cmd[0], 0x16);
        let mut prepare_ok = vec![0x00];
        prepare_ok.extend_from_slice(&7u32.to_le_bytes()); // statement id
        prepare_ok.extend_from_slice(&9u16.to_le_bytes()); // columns
        prepare_ok.extend_from_slice(&1u16.to_le_bytes()); // params
        prepare_ok.push(0x00);
        prepare_ok.extend_from_slice(&0u16.to_le_bytes()); // warnings
        sock.send(&prepare_ok);
        sock.send(&column_payload(&int64_column("?"))); // param meta
        sock.send(&eof_payload());
        for i in 0..9 {
            sock.send(&column_payload(&int64_column(&format!("c{i}"))));
        }
        sock.send(&eof_payload());

        // COM_STMT_EXECUTE -> binary result set
        let (seq, cmd) = sock.recv();
        assert_eq!(seq, 0);
        assert_eq!(cmd[0], 0x17);
        assert_eq!(&cmd[1..5], &7u32.to_le_bytes());
        // null bitmap (no NULL params) + new-params-bound + LONGLONG type
        assert_eq!(&cmd[10..14], &[0x00, 0x01, 0x08, 0x00]);

        sock.send(&[0x09]);
        for i in 0..9 {
            sock.send(&column_payload(&int64_column(&format!("c{i}"))));
        }
        sock.send(&eof_payload());
        // Row: columns 0 and 8 are NULL -> bitmap bytes 0x04 0x04.
        let mut row = vec![0x00, 0x04, 0x04];
        for v in 1..=7i64 {
            row.extend_from_slice(&v.to_le_bytes());
        }
        sock.send(&row);
        sock.send(&eof_payload());

        // COM_STMT_EXECUTE -> OK
        let (_, cmd) = sock.recv();
        assert_eq!(cmd[0], 0x17);
        sock.send(&ok_payload(1, 0));

        // COM_STMT_RESET
        let (_, cmd) = sock.recv();
        assert_eq!(cmd[0], 0x1A);
        assert_eq!(&cmd[1..5], &7u32.to_le_bytes());
        sock.send(&ok_payload(0, 0));

        // COM_STMT_CLOSE: no reply.
        let (_, cmd) = sock.recv();
        assert_eq!(cmd[0], 0x19);
        assert_eq!(&cmd[1..5], &7u32.to_le_bytes());
    });

    let mut conn = connect(addr);

    let stmt = conn.prepare("SELECT * FROM t WHERE id > ?").unwrap();
    assert_eq!(stmt.id(), 7);
    assert_eq!(stmt.params().len(), 1);
    assert_eq!(stmt.columns().len(), 9);

    let mut result = conn.query_stmt(&stmt, &[Value::Int64(5)]).unwrap();
    assert_eq!(result.columns().len(), 9);

    let row = result.next_row().unwrap().unwrap();
    let mut expected: Vec<Value> = (1..=7).map(Value::Int64).collect();
    expected.insert(0, Value::Null);
    expected.push(Value::Null);
    assert_eq!(row, expected);
    assert_eq!(result.next_row().unwrap(), None);

    let ok = conn.execute_stmt(&stmt, &[Value::Int64(5)]).unwrap();
    assert_eq!(ok.affected_rows, 1);

    conn.reset_stmt(&stmt).unwrap();
    conn.close_stmt(stmt).unwrap();
    server.join().unwrap();
}

#[test]
fn rejected_handshake_is_an_auth_error() {
    init_tracing();
    let (addr, server) = spawn_server(|mut sock| {
        sock.send(&greeting_payload());
        let (_, _) = sock.recv();
        sock.send(&err_payload(
            1045,
            "28000",
            "Access denied for user 'root'@'localhost'",
        ));
    });

    let stream = Stream::tcp(TcpStream::connect(addr).unwrap());
    match Conn::new_with_stream(stream, &test_opts()) {
        Err(Error::AuthFailed(err)) => assert_eq!(err.code, 1045),
        other => panic!("expected auth failure, got {other:?}"),
    }
    server.join().unwrap();
}

#[tokio::test]
async fn async_query_streams_a_text_result_set() {
    init_tracing();
    let (addr, server) = spawn_server(|mut sock| {
        sock.handshake();

        let (_, cmd) = sock.recv();
        assert_eq!(cmd, b"\x03SELECT 1 AS x");
        sock.send(&[0x01]);
        sock.send(&column_payload(&int64_column("x")));
        sock.send(&eof_payload());
        sock.send(&[0x01, b'1']);
        sock.send(&eof_payload());

        let (_, cmd) = sock.recv();
        assert_eq!(cmd, [0x01]); // COM_QUIT
    });

    let stream = lean_mysql::tokio::Stream::tcp(
        tokio::net::TcpStream::connect(addr).await.unwrap(),
    );
    let mut conn = lean_mysql::tokio::Conn::new_with_stream(stream, &test_opts())
        .await
        .unwrap();

    let mut result = conn.query("SELECT 1 AS x").await.unwrap();
    assert_eq!(result.columns()[0].name, "x");
    assert_eq!(result.next_row().await.unwrap(), Some(vec![Value::Int64(1)]));
    assert_eq!(result.next_row().await.unwrap(), None);

    conn.close().await.unwrap();
    server.join().unwrap();
}
