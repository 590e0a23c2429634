use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(feature = "tokio-tls")]
use tokio_native_tls::TlsStream;

/// The async byte transport under a connection.
pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(unix)]
    Unix(BufReader<UnixStream>),
    #[cfg(feature = "tokio-tls")]
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

    #[cfg(feature = "tokio-tls")]
    pub async fn upgrade_to_tls(self, host: &str) -> io::Result<Self> {
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

        let connector = tokio_native_tls::TlsConnector::from(
            native_tls::TlsConnector::new().map_err(io::Error::other)?,
        );
        let tls = connector.connect(host, tcp).await.map_err(io::Error::other)?;
        Ok(Self::Tls(BufReader::new(tls)))
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        match self {
            Self::Tcp(r) => r.read_exact(buf).await.map(drop),
            #[cfg(unix)]
            Self::Unix(r) => r.read_exact(buf).await.map(drop),
            #[cfg(feature = "tokio-tls")]
            Self::Tls(r) => r.read_exact(buf).await.map(drop),
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Self::Tcp(r) => r.write_all(buf).await,
            #[cfg(unix)]
            Self::Unix(r) => r.write_all(buf).await,
            #[cfg(feature = "tokio-tls")]
            Self::Tls(r) => r.write_all(buf).await,
        }
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(r) => r.flush().await,
            #[cfg(unix)]
            Self::Unix(r) => r.flush().await,
            #[cfg(feature = "tokio-tls")]
            Self::Tls(r) => r.flush().await,
        }
    }

    /// Flush and close the outbound half.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(r) => r.shutdown().await,
            #[cfg(unix)]
            Self::Unix(r) => r.shutdown().await,
            #[cfg(feature = "tokio-tls")]
            Self::Tls(r) => r.shutdown().await,
        }
    }
}
