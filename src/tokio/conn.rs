use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::constant::{
    CAPABILITIES_ALWAYS_ENABLED, CapabilityFlags, MAX_PACKET_SIZE, UTF8MB4_GENERAL_CI,
};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::prepared::PreparedStatement;
use crate::protocol::command::prepared::{
    ExecuteResponse, read_execute_response, read_prepare_ok, write_close_statement, write_execute,
    write_prepare, write_reset_statement,
};
use crate::protocol::command::query::{QueryResponse, read_query_response, write_query};
use crate::protocol::command::utility::{write_ping, write_quit};
use crate::protocol::command::{ColumnDefinition, read_column_definition};
use crate::protocol::connection::{
    HandshakeResponse41, read_auth_switch_request, read_initial_handshake, scramble,
    write_handshake_response,
};
use crate::protocol::packet::{MAX_PAYLOAD_LEN, PacketHeader};
use crate::protocol::response::{
    OkPayload, is_eof_packet, is_err_packet, read_eof_packet, read_err_payload, read_ok_payload,
};
use crate::protocol::value::{read_binary_row, read_text_row};
use crate::value::Value;

use zerocopy::IntoBytes;

use super::stream::Stream;

/// The async twin of [`crate::sync::Conn`]; same protocol engine, same
/// consumed guard, driven over `tokio::io`.
pub struct Conn {
    stream: Stream,
    read_buffer: Vec<u8>,
    write_buffer: Vec<u8>,
    server_version: String,
    connection_id: u32,
    capability_flags: CapabilityFlags,
    consumed: bool,
    is_broken: bool,
}

impl Conn {
    /// Connect and authenticate.
    pub async fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts: Opts = opts.try_into()?;

        let stream = if let Some(socket) = &opts.socket {
            connect_socket(socket).await?
        } else {
            let host = opts
                .host
                .as_deref()
                .ok_or_else(|| Error::BadConfig("missing host in connection options".into()))?;
            let stream = TcpStream::connect((host, opts.port)).await?;
            stream.set_nodelay(opts.tcp_nodelay)?;
            Stream::tcp(stream)
        };

        Self::new_with_stream(stream, &opts).await
    }

    /// Perform the handshake over an already-connected stream.
    pub async fn new_with_stream(mut stream: Stream, opts: &Opts) -> Result<Self> {
        let mut read_buffer = Vec::new();

        let mut seq = read_payload(&mut stream, &mut read_buffer).await?;
        let greeting = read_initial_handshake(&read_buffer)?;
        if !greeting
            .capability_flags
            .contains(CapabilityFlags::CLIENT_PROTOCOL_41)
        {
            return Err(Error::Unsupported(
                "server does not speak protocol 4.1".into(),
            ));
        }

        let mut capability_flags = CAPABILITIES_ALWAYS_ENABLED;
        if opts.db.is_some() {
            capability_flags |= CapabilityFlags::CLIENT_CONNECT_WITH_DB;
        }

        if opts.tls {
            #[cfg(feature = "tokio-tls")]
            {
                let mut request = Vec::new();
                crate::protocol::connection::write_ssl_request(
                    &mut request,
                    capability_flags,
                    MAX_PACKET_SIZE,
                    UTF8MB4_GENERAL_CI,
                );
                seq = seq.wrapping_add(1);
                write_payload(&mut stream, seq, &request).await?;

                capability_flags |= CapabilityFlags::CLIENT_SSL;
                let host = opts.host.as_deref().unwrap_or_default().to_string();
                stream = stream.upgrade_to_tls(&host).await?;
            }
            #[cfg(not(feature = "tokio-tls"))]
            return Err(Error::BadConfig(
                "TLS requested but the tokio-tls feature is not enabled".into(),
            ));
        }

        let password = opts.password.as_deref().unwrap_or("");
        let auth_response = scramble(
            &greeting.auth_plugin_name,
            password,
            &greeting.auth_plugin_data,
        )?;

        let mut response = Vec::new();
        write_handshake_response(
            &mut response,
            &HandshakeResponse41 {
                capability_flags,
                max_packet_size: MAX_PACKET_SIZE,
                charset: UTF8MB4_GENERAL_CI,
                username: &opts.user,
                auth_response: &auth_response,
                database: opts.db.as_deref(),
                auth_plugin_name: Some(greeting.auth_plugin_name.as_str()),
            },
        );
        seq = seq.wrapping_add(1);
        write_payload(&mut stream, seq, &response).await?;

        loop {
            seq = read_payload(&mut stream, &mut read_buffer).await?;
            match read_buffer.first() {
                Some(0x00) => break,
                Some(0xFF) => return Err(Error::AuthFailed(read_err_payload(&read_buffer)?)),
                Some(0xFE) => {
                    let auth_response = {
                        let switch = read_auth_switch_request(&read_buffer)?;
                        scramble(switch.plugin_name, password, switch.plugin_data)?
                    };
                    seq = seq.wrapping_add(1);
                    write_payload(&mut stream, seq, &auth_response).await?;
                }
                Some(0x01) => match read_buffer.get(1) {
                    Some(0x03) => {}
                    Some(0x04) => {
                        return Err(Error::Unsupported(
                            "caching_sha2_password full authentication".into(),
                        ));
                    }
                    _ => return Err(Error::UnexpectedPacket(0x01)),
                },
                Some(&byte) => return Err(Error::UnexpectedPacket(byte)),
                None => return Err(Error::UnexpectedPacket(0)),
            }
        }

        debug!(
            server_version = %greeting.server_version,
            connection_id = greeting.connection_id,
            "connected"
        );

        Ok(Self {
            stream,
            read_buffer,
            write_buffer: Vec::new(),
            server_version: greeting.server_version,
            connection_id: greeting.connection_id,
            capability_flags,
            consumed: true,
            is_broken: false,
        })
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn capability_flags(&self) -> CapabilityFlags {
        self.capability_flags
    }

    /// Whether a fatal error has broken this connection.
    ///
    /// Callers deciding between reusing and dropping a connection after
    /// an error should consult this rather than inspecting the error.
    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    #[inline]
    fn check_error<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && e.is_fatal()
        {
            self.is_broken = true;
        }
        result
    }

    fn guard_consumed(&self) -> Result<()> {
        if !self.consumed {
            return Err(Error::UnconsumedResultSet);
        }
        Ok(())
    }

    async fn send_command(&mut self, build: impl FnOnce(&mut Vec<u8>)) -> Result<()> {
        self.write_buffer.clear();
        build(&mut self.write_buffer);
        write_payload(&mut self.stream, 0, &self.write_buffer).await
    }

    async fn read_packet(&mut self) -> Result<u8> {
        read_payload(&mut self.stream, &mut self.read_buffer).await
    }

    fn expect_ok(&self) -> Result<OkPayload> {
        match self.read_buffer.first() {
            Some(0x00) => read_ok_payload(&self.read_buffer),
            Some(0xFF) => Err(read_err_payload(&self.read_buffer)?.into()),
            Some(&byte) => Err(Error::UnexpectedPacket(byte)),
            None => Err(Error::UnexpectedPacket(0)),
        }
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn ping(&mut self) -> Result<()> {
        let result = self.ping_inner().await;
        self.check_error(result)
    }

    async fn ping_inner(&mut self) -> Result<()> {
        self.guard_consumed()?;
        self.send_command(write_ping).await?;
        self.read_packet().await?;
        self.expect_ok()?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn execute(&mut self, sql: &str) -> Result<OkPayload> {
        let result = self.execute_inner(sql).await;
        self.check_error(result)
    }

    async fn execute_inner(&mut self, sql: &str) -> Result<OkPayload> {
        self.guard_consumed()?;
        self.send_command(|out| write_query(out, sql)).await?;
        self.read_packet().await?;
        match read_query_response(&self.read_buffer)? {
            QueryResponse::Ok(ok) => Ok(ok),
            QueryResponse::ResultSet { .. } => {
                Err(Error::UnexpectedPacket(self.read_buffer[0]))
            }
        }
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn query(&mut self, sql: &str) -> Result<TextQueryResult<'_>> {
        let response = {
            let result = self.query_inner(sql).await;
            self.check_error(result)?
        };
        match response {
            QueryResponse::Ok(ok) => Ok(TextQueryResult {
                conn: self,
                columns: Vec::new(),
                ok: Some(ok),
                done: true,
            }),
            QueryResponse::ResultSet { column_count } => {
                let columns = {
                    let result = self.read_result_set_header(column_count as usize).await;
                    self.check_error(result)?
                };
                self.consumed = false;
                Ok(TextQueryResult {
                    conn: self,
                    columns,
                    ok: None,
                    done: false,
                })
            }
        }
    }

    async fn query_inner(&mut self, sql: &str) -> Result<QueryResponse> {
        self.guard_consumed()?;
        self.send_command(|out| write_query(out, sql)).await?;
        self.read_packet().await?;
        read_query_response(&self.read_buffer)
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        let result = self.prepare_inner(sql).await;
        self.check_error(result)
    }

    async fn prepare_inner(&mut self, sql: &str) -> Result<PreparedStatement> {
        self.guard_consumed()?;
        self.send_command(|out| write_prepare(out, sql)).await?;
        self.read_packet().await?;
        if is_err_packet(&self.read_buffer) {
            return Err(read_err_payload(&self.read_buffer)?.into());
        }

        let (statement_id, num_params, num_columns) = {
            let ok = read_prepare_ok(&self.read_buffer)?;
            (
                ok.statement_id(),
                ok.num_params() as usize,
                ok.num_columns() as usize,
            )
        };

        let param_defs = self.read_definition_block(num_params).await?;
        let column_defs = self.read_definition_block(num_columns).await?;
        Ok(PreparedStatement::new(statement_id, param_defs, column_defs))
    }

    #[instrument(level = "debug", skip_all, fields(statement_id = stmt.id()))]
    pub async fn execute_stmt(
        &mut self,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> Result<OkPayload> {
        let result = self.execute_stmt_inner(stmt, params).await;
        self.check_error(result)
    }

    async fn execute_stmt_inner(
        &mut self,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> Result<OkPayload> {
        self.guard_consumed()?;
        self.send_command(|out| write_execute(out, stmt.id(), params))
            .await?;
        self.read_packet().await?;
        match read_execute_response(&self.read_buffer)? {
            ExecuteResponse::Ok(ok) => Ok(ok),
            ExecuteResponse::ResultSet { .. } => {
                Err(Error::UnexpectedPacket(self.read_buffer[0]))
            }
        }
    }

    #[instrument(level = "debug", skip_all, fields(statement_id = stmt.id()))]
    pub async fn query_stmt(
        &mut self,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> Result<BinaryQueryResult<'_>> {
        let response = {
            let result = self.query_stmt_inner(stmt, params).await;
            self.check_error(result)?
        };
        match response {
            ExecuteResponse::Ok(ok) => Ok(BinaryQueryResult {
                conn: self,
                columns: Vec::new(),
                ok: Some(ok),
                done: true,
            }),
            ExecuteResponse::ResultSet { column_count } => {
                let columns = {
                    let result = self.read_result_set_header(column_count as usize).await;
                    self.check_error(result)?
                };
                self.consumed = false;
                Ok(BinaryQueryResult {
                    conn: self,
                    columns,
                    ok: None,
                    done: false,
                })
            }
        }
    }

    async fn query_stmt_inner(
        &mut self,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> Result<ExecuteResponse> {
        self.guard_consumed()?;
        self.send_command(|out| write_execute(out, stmt.id(), params))
            .await?;
        self.read_packet().await?;
        read_execute_response(&self.read_buffer)
    }

    #[instrument(level = "debug", skip_all, fields(statement_id = stmt.id()))]
    pub async fn reset_stmt(&mut self, stmt: &PreparedStatement) -> Result<()> {
        let result = self.reset_stmt_inner(stmt).await;
        self.check_error(result)
    }

    async fn reset_stmt_inner(&mut self, stmt: &PreparedStatement) -> Result<()> {
        self.send_command(|out| write_reset_statement(out, stmt.id()))
            .await?;
        self.read_packet().await?;
        self.expect_ok()?;
        self.consumed = true;
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(statement_id = stmt.id()))]
    pub async fn close_stmt(&mut self, stmt: PreparedStatement) -> Result<()> {
        self.guard_consumed()?;
        let result = self
            .send_command(|out| write_close_statement(out, stmt.id()))
            .await;
        self.check_error(result)
    }

    /// Send COM_QUIT and shut the outbound half down.
    pub async fn close(mut self) -> Result<()> {
        let _ = self.send_command(write_quit).await;
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn read_result_set_header(
        &mut self,
        column_count: usize,
    ) -> Result<Vec<ColumnDefinition>> {
        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            self.read_packet().await?;
            columns.push(read_column_definition(&self.read_buffer)?);
        }
        self.read_packet().await?;
        read_eof_packet(&self.read_buffer)?;
        Ok(columns)
    }

    async fn read_definition_block(&mut self, count: usize) -> Result<Vec<ColumnDefinition>> {
        let mut defs = Vec::with_capacity(count);
        if count == 0 {
            return Ok(defs);
        }
        for _ in 0..count {
            self.read_packet().await?;
            defs.push(read_column_definition(&self.read_buffer)?);
        }
        self.read_packet().await?;
        read_eof_packet(&self.read_buffer)?;
        Ok(defs)
    }
}

/// Lazy stream of text-protocol rows; each `next_row` awaits one packet.
pub struct TextQueryResult<'conn> {
    conn: &'conn mut Conn,
    columns: Vec<ColumnDefinition>,
    ok: Option<OkPayload>,
    done: bool,
}

impl TextQueryResult<'_> {
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn ok(&self) -> Option<&OkPayload> {
        self.ok.as_ref()
    }

    pub async fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        let result = self.next_row_inner().await;
        self.conn.check_error(result)
    }

    async fn next_row_inner(&mut self) -> Result<Option<Vec<Value>>> {
        if self.done {
            return Ok(None);
        }
        self.conn.read_packet().await?;
        let payload = &self.conn.read_buffer[..];

        if is_eof_packet(payload) {
            read_eof_packet(payload)?;
            self.done = true;
            self.conn.consumed = true;
            return Ok(None);
        }
        if is_err_packet(payload) {
            self.done = true;
            self.conn.consumed = true;
            return Err(read_err_payload(payload)?.into());
        }
        Ok(Some(read_text_row(payload, &self.columns)?))
    }
}

/// Lazy stream of binary-protocol rows.
pub struct BinaryQueryResult<'conn> {
    conn: &'conn mut Conn,
    columns: Vec<ColumnDefinition>,
    ok: Option<OkPayload>,
    done: bool,
}

impl BinaryQueryResult<'_> {
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn ok(&self) -> Option<&OkPayload> {
        self.ok.as_ref()
    }

    pub async fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        let result = self.next_row_inner().await;
        self.conn.check_error(result)
    }

    async fn next_row_inner(&mut self) -> Result<Option<Vec<Value>>> {
        if self.done {
            return Ok(None);
        }
        self.conn.read_packet().await?;
        let payload = &self.conn.read_buffer[..];

        if is_eof_packet(payload) {
            read_eof_packet(payload)?;
            self.done = true;
            self.conn.consumed = true;
            return Ok(None);
        }
        if is_err_packet(payload) {
            self.done = true;
            self.conn.consumed = true;
            return Err(read_err_payload(payload)?.into());
        }
        Ok(Some(read_binary_row(payload, &self.columns)?))
    }
}

/// Async variant of the framer's reassembling read.
async fn read_payload(stream: &mut Stream, buffer: &mut Vec<u8>) -> Result<u8> {
    buffer.clear();

    let mut header = PacketHeader::new(0, 0);
    let mut sequence_id;
    loop {
        stream.read_exact(header.as_mut_bytes()).await?;
        let length = header.length();
        sequence_id = header.sequence_id;

        let start = buffer.len();
        buffer.resize(start + length, 0);
        stream.read_exact(&mut buffer[start..]).await?;

        if length < MAX_PAYLOAD_LEN {
            break;
        }
    }

    Ok(sequence_id)
}

/// Async variant of the framer's splitting write.
async fn write_payload(stream: &mut Stream, first_sequence_id: u8, payload: &[u8]) -> Result<()> {
    let mut sequence_id = first_sequence_id;
    let mut remaining = payload;

    loop {
        let chunk_len = remaining.len().min(MAX_PAYLOAD_LEN);
        let (chunk, rest) = remaining.split_at(chunk_len);
        remaining = rest;

        let header = PacketHeader::new(chunk_len, sequence_id);
        stream.write_all(header.as_bytes()).await?;
        stream.write_all(chunk).await?;

        if chunk_len < MAX_PAYLOAD_LEN {
            break;
        }
        sequence_id = sequence_id.wrapping_add(1);
    }

    stream.flush().await?;
    Ok(())
}

#[cfg(unix)]
async fn connect_socket(path: &str) -> Result<Stream> {
    Ok(Stream::unix(tokio::net::UnixStream::connect(path).await?))
}

#[cfg(not(unix))]
async fn connect_socket(_path: &str) -> Result<Stream> {
    Err(Error::BadConfig(
        "Unix sockets are not supported on this platform".into(),
    ))
}
