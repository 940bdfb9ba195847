//! Transport abstraction (TCP vs Unix socket)

use crate::Result;
use bytes::BytesMut;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

/// Byte stream to a Postgres server
#[derive(Debug)]
pub enum Transport {
    /// TCP socket
    Tcp(TcpStream),
    /// Unix domain socket
    Unix(UnixStream),
}

impl Transport {
    /// Connect to `host:port`, or to the Unix socket in directory `host`
    /// when it is an absolute path (libpq convention).
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        if host.starts_with('/') {
            Self::connect_unix(&socket_path(host, port)).await
        } else {
            Self::connect_tcp(host, port).await
        }
    }

    /// Connect via TCP
    pub async fn connect_tcp(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Transport::Tcp(stream))
    }

    /// Connect via Unix socket
    pub async fn connect_unix(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Transport::Unix(stream))
    }

    /// Write all bytes and flush
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Transport::Tcp(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await?;
            }
            Transport::Unix(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    /// Read bytes into buffer
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = match self {
            Transport::Tcp(stream) => stream.read_buf(buf).await?,
            Transport::Unix(stream) => stream.read_buf(buf).await?,
        };
        Ok(n)
    }

    /// Shutdown the transport
    pub async fn shutdown(&mut self) -> Result<()> {
        match self {
            Transport::Tcp(stream) => stream.shutdown().await?,
            Transport::Unix(stream) => stream.shutdown().await?,
        }
        Ok(())
    }
}

/// `<dir>/.s.PGSQL.<port>`
fn socket_path(dir: &str, port: u16) -> PathBuf {
    PathBuf::from(format!("{}/.s.PGSQL.{}", dir.trim_end_matches('/'), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_connect_failure() {
        let result = Transport::connect("127.0.0.1", 1).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_socket_path() {
        assert_eq!(
            socket_path("/run/postgresql", 5432),
            PathBuf::from("/run/postgresql/.s.PGSQL.5432")
        );
        assert_eq!(
            socket_path("/tmp/", 5433),
            PathBuf::from("/tmp/.s.PGSQL.5433")
        );
    }

    #[tokio::test]
    async fn test_unix_connect_failure() {
        let result = Transport::connect("/nonexistent-socket-dir", 5432).await;
        assert!(result.is_err());
    }
}
