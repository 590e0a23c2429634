use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

#[cfg(feature = "sync-tls")]
use native_tls::TlsStream;

/// The blocking byte transport under a connection.
#[derive(Debug)]
pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(unix)]
    Unix(BufReader<UnixStream>),
    #[cfg(feature = "sync-tls")]
    Tls(BufReader<TlsStream<TcpStream>>),
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(BufReader::new(stream))
    }

    #[cfg(unix)]
    pub fn unix(stream: UnixStream) -> Self {
        Self::Unix(BufReader::new(stream))
    }

    #[cfg(feature = "sync-tls")]
    pub fn upgrade_to_tls(self, host: &str) -> io::Result<Self> {
        let tcp = match self {
            Self::Tcp(reader) => reader.into_inner(),
            #[cfg(unix)]
            Self::Unix(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "TLS is not supported over Unix sockets",
                ));
            }
            Self::Tls(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "already using TLS",
                ));
            }
        };

        let connector = native_tls::TlsConnector::new().map_err(io::Error::other)?;
        let tls = connector.connect(host, tcp).map_err(io::Error::other)?;
        Ok(Self::Tls(BufReader::new(tls)))
    }

    /// Close the outbound half; inbound data already in flight can still
    /// be read.
    pub fn shutdown_write(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(r) => r.get_ref().shutdown(Shutdown::Write),
            #[cfg(unix)]
            Self::Unix(r) => r.get_ref().shutdown(Shutdown::Write),
            #[cfg(feature = "sync-tls")]
            Self::Tls(r) => r.get_mut().shutdown(),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(r) => r.read(buf),
            #[cfg(unix)]
            Self::Unix(r) => r.read(buf),
            #[cfg(feature = "sync-tls")]
            Self::Tls(r) => r.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(r) => r.get_mut().write(buf),
            #[cfg(unix)]
            Self::Unix(r) => r.get_mut().write(buf),
            #[cfg(feature = "sync-tls")]
            Self::Tls(r) => r.get_mut().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(r) => r.get_mut().flush(),
            #[cfg(unix)]
            Self::Unix(r) => r.get_mut().flush(),
            #[cfg(feature = "sync-tls")]
            Self::Tls(r) => r.get_mut().flush(),
        }
    }
}
