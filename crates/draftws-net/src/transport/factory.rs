use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use draftws_core::error::{DraftWsError, Result};

/// Any bidirectional byte stream a connection can run on.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens outbound streams for the client.
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    async fn connect(&self, host: &str, port: u16, secure: bool) -> Result<BoxedStream>;
}

/// Wraps accepted sockets for the server (e.g. a TLS acceptor).
#[async_trait]
pub trait TransportAcceptor: Send + Sync + 'static {
    async fn accept(&self, tcp: TcpStream, peer: SocketAddr) -> Result<BoxedStream>;
}

/// Unencrypted TCP in both directions.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTcp;

#[async_trait]
impl TransportConnector for PlainTcp {
    async fn connect(&self, host: &str, port: u16, secure: bool) -> Result<BoxedStream> {
        if secure {
            return Err(DraftWsError::Config(
                "wss:// needs a TLS connector; PlainTcp only speaks ws://".into(),
            ));
        }
        let tcp = TcpStream::connect((host, port)).await?;
        tcp.set_nodelay(true)?;
        Ok(Box::new(tcp))
    }
}

#[async_trait]
impl TransportAcceptor for PlainTcp {
    async fn accept(&self, tcp: TcpStream, _peer: SocketAddr) -> Result<BoxedStream> {
        tcp.set_nodelay(true)?;
        Ok(Box::new(tcp))
    }
}
