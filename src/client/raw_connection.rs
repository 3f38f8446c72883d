//! Raw TCP connection to a sentinel or data node
//!
//! One request in flight at a time: a command is written, then exactly one
//! reply is read back. Replies are decoded from an internal `BytesMut`
//! buffer, which also lets an idle connection notice the peer going away.

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::{AuthConfig, ServerAddress};
use crate::utils::{ConnectionError, ProtocolError, RespDecoder, RespEncoder, RespValue};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Raw connection wrapper
pub struct RawConnection {
    stream: TcpStream,
    read_buf: BytesMut,
    encoder: RespEncoder,
    address: ServerAddress,
    read_timeout: Option<Duration>,
}

impl RawConnection {
    /// Create new TCP connection
    pub async fn connect_tcp(
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let addr_str = format!("{}:{}", host, port);

        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr_str))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ConnectionError::ConnectFailed {
                    host: host.to_string(),
                    port,
                    source: e,
                })
            }
            Err(_) => return Err(ConnectionError::Timeout(connect_timeout.as_millis() as u64)),
        };

        // Disable Nagle's algorithm
        stream.set_nodelay(true).ok();

        Ok(RawConnection {
            stream,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            encoder: RespEncoder::with_capacity(256),
            address: ServerAddress::new(host, port),
            read_timeout: None,
        })
    }

    /// Address this connection was opened to
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Set read timeout applied to every reply
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Send command and receive response
    pub async fn execute<A: AsRef<[u8]>>(
        &mut self,
        args: &[A],
    ) -> Result<RespValue, ConnectionError> {
        self.encoder.clear();
        self.encoder.encode_command(args);
        self.stream.write_all(self.encoder.as_bytes()).await?;
        self.stream.flush().await?;

        match self.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.read_response())
                .await
                .map_err(|_| ConnectionError::Timeout(timeout.as_millis() as u64))?,
            None => self.read_response().await,
        }
    }

    /// Read a single RESP response
    async fn read_response(&mut self) -> Result<RespValue, ConnectionError> {
        loop {
            if let Some(value) = RespDecoder::decode(&mut self.read_buf)? {
                return Ok(value);
            }
            if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                return Err(ConnectionError::Closed);
            }
        }
    }

    /// Wait until an idle connection becomes unusable.
    ///
    /// Resolves when the peer closes, the socket fails, or data arrives with
    /// no command outstanding; such data would be read as the next reply.
    /// Cancel safe.
    pub async fn closed(&mut self) -> ConnectionError {
        match self.stream.read_buf(&mut self.read_buf).await {
            Ok(0) => ConnectionError::Closed,
            Ok(n) => {
                self.read_buf.clear();
                ConnectionError::Protocol(ProtocolError::UnexpectedResponse {
                    expected: "no data while idle".to_string(),
                    actual: format!("{} unsolicited bytes", n),
                })
            }
            Err(e) => ConnectionError::Io(e),
        }
    }

    /// Send AUTH command
    pub async fn authenticate(&mut self, auth: &AuthConfig) -> Result<(), ConnectionError> {
        let response = match auth.username.as_deref() {
            Some(user) => self.execute(&["AUTH", user, auth.password.as_str()]).await,
            None => self.execute(&["AUTH", auth.password.as_str()]).await,
        }
        .map_err(|e| ConnectionError::AuthFailed(format!("IO error: {}", e)))?;

        match response {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            RespValue::Error(e) => Err(ConnectionError::AuthFailed(e)),
            other => Err(ConnectionError::AuthFailed(format!(
                "Unexpected response: {:?}",
                other
            ))),
        }
    }

    /// Shut down the write half; the connection is dropped afterwards
    pub async fn shutdown(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            if e.kind() != io::ErrorKind::NotConnected {
                debug!("Shutdown of {} failed: {}", self.address, e);
            }
        }
    }
}

/// Connection factory for creating connections with common config
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    pub connect_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub auth: Option<AuthConfig>,
}

impl ConnectionFactory {
    /// Create a new connection to the specified host:port
    pub async fn create(&self, host: &str, port: u16) -> Result<RawConnection, ConnectionError> {
        let mut conn = RawConnection::connect_tcp(host, port, self.connect_timeout).await?;
        conn.set_read_timeout(self.read_timeout);

        // Authenticate if configured
        if let Some(ref auth) = self.auth {
            conn.authenticate(auth).await?;
        }

        Ok(conn)
    }
}
