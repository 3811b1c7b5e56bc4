use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::node::NodeId;

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Loopback UDP socket bound to an ephemeral port and connected to `remote`.
fn connect_once(remote: SocketAddr) -> std::io::Result<UdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_nonblocking(true)?;
    let local = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    sock.bind(&local.into())?;
    sock.connect(&remote.into())?;
    UdpSocket::from_std(sock.into())
}

/// Connect to a simulated DUT endpoint, retrying until `window` elapses.
pub async fn connect(node: NodeId, remote: SocketAddr, window: Duration) -> Result<UdpSocket> {
    let deadline = Instant::now() + window;
    loop {
        match connect_once(remote) {
            Ok(socket) => {
                debug!(%node, %remote, "connected to DUT endpoint");
                return Ok(socket);
            }
            Err(e) if Instant::now() + CONNECT_RETRY_INTERVAL < deadline => {
                debug!(%node, %remote, "connect failed, retrying: {e}");
                tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
            }
            Err(e) => {
                return Err(HarnessError::TransportOpen {
                    node,
                    reason: format!("connect {remote}: {e}"),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_reaches_listener() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote = server.local_addr().unwrap();

        let client = connect(NodeId::new(1), remote, Duration::from_millis(200))
            .await
            .unwrap();
        client.send(b"state\n").await.unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"state\n");
        assert_eq!(from, client.local_addr().unwrap());
    }
}
