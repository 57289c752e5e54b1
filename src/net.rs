// Drive-command transport
//
// The control loop multiplexes on `readable()` and only then receives with
// the transport's own timeout; a receive timeout is an expected condition,
// not an error.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time;
use tracing::info;

/// Largest datagram the server accepts; drive packets are 6 bytes, anything
/// longer is rejected by the codec anyway.
const RECV_BUFFER_BYTES: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Outcome of one receive attempt.
#[derive(Debug)]
pub enum Received {
    Frame(Vec<u8>),
    TimedOut,
}

/// Server-mode message source the control loop waits on.
pub trait CommandTransport {
    /// Resolves once a message is waiting.
    fn readable(&self) -> impl Future<Output = Result<()>> + Send;

    /// Receive one message, honoring the transport receive timeout.
    fn recv(&mut self) -> impl Future<Output = Result<Received>> + Send;

    /// Fire-and-forget send, used for odometry reports.
    fn send_to(&self, payload: &[u8], dest: SocketAddr) -> impl Future<Output = Result<()>> + Send;
}

pub struct UdpCommandServer {
    socket: UdpSocket,
    receive_timeout: Duration,
}

impl UdpCommandServer {
    pub async fn bind(port: u16, receive_timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        info!("drive command server listening on udp port {port}");
        Ok(Self {
            socket,
            receive_timeout,
        })
    }
}

impl CommandTransport for UdpCommandServer {
    async fn readable(&self) -> Result<()> {
        self.socket.readable().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Received> {
        let mut buf = [0u8; RECV_BUFFER_BYTES];
        match time::timeout(self.receive_timeout, self.socket.recv_from(&mut buf)).await {
            Err(_elapsed) => Ok(Received::TimedOut),
            Ok(Ok((len, _peer))) => Ok(Received::Frame(buf[..len].to_vec())),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn send_to(&self, payload: &[u8], dest: SocketAddr) -> Result<()> {
        self.socket.send_to(payload, dest).await?;
        Ok(())
    }
}
