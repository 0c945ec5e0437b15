//! Client stream: plain TCP or TLS over TCP.

use crate::connection::ConnectionConfig;
use crate::error::ClientError;
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

pin_project! {
    /// The byte stream owned by a connection.
    #[project = ClientStreamProj]
    pub enum ClientStream {
        Plain { #[pin] stream: TcpStream },
        Tls { #[pin] stream: TlsStream<TcpStream> },
    }
}

impl ClientStream {
    /// Opens the TCP connection described by `config`, then performs the TLS
    /// handshake if TLS is enabled.
    ///
    /// The connect timeout covers the TCP connect only.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ClientError> {
        let addr = config.addr();
        tracing::debug!(%addr, "connecting");

        let tcp = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| ClientError::ConnectTimeout {
            addr: addr.clone(),
            timeout: config.connect_timeout,
        })?
        .map_err(|source| ClientError::Connect {
            addr: addr.clone(),
            source,
        })?;

        // Frames are small request/response pairs; don't batch them
        tcp.set_nodelay(true).ok();

        match config.tls.as_ref().filter(|tls| tls.enabled) {
            Some(tls) => {
                let (connector, server_name) = crate::tls::connector(tls, &config.host)?;
                tracing::debug!(%addr, "performing TLS handshake");
                let stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
                Ok(ClientStream::Tls { stream })
            }
            None => Ok(ClientStream::Plain { stream: tcp }),
        }
    }

    /// Returns whether this stream is TLS-encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self, ClientStream::Tls { .. })
    }
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_read(cx, buf),
            ClientStreamProj::Tls { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_write(cx, buf),
            ClientStreamProj::Tls { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_flush(cx),
            ClientStreamProj::Tls { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            ClientStreamProj::Plain { stream } => stream.poll_shutdown(cx),
            ClientStreamProj::Tls { stream } => stream.poll_shutdown(cx),
        }
    }
}
