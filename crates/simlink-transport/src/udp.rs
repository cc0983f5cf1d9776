use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::tcp::resolve;

/// Unframed UDP datagram socket.
///
/// Used for the send-only manual-control channel and the receive-only
/// telemetry channel. There is no framing, no acknowledgement and no
/// ordering: every datagram stands on its own.
pub struct DatagramSocket {
    socket: UdpSocket,
    addr: SocketAddr,
}

impl DatagramSocket {
    /// Bind to a fixed local endpoint (e.g. `0.0.0.0:9092`).
    pub fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        let local = socket.local_addr().map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        info!(addr = %local, "bound datagram socket");
        Ok(Self {
            socket,
            addr: local,
        })
    }

    /// Bind an ephemeral local port suitable for sending to `dest`.
    pub fn unbound_for(dest: SocketAddr) -> Result<Self> {
        let local = if dest.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).map_err(|e| TransportError::Bind {
            addr: local.to_string(),
            source: e,
        })?;
        let addr = socket.local_addr()?;
        debug!(%addr, %dest, "bound ephemeral datagram socket");
        Ok(Self { socket, addr })
    }

    /// Send one datagram to `dest`. Returns the number of bytes handed to the OS.
    pub fn send_to(&self, buf: &[u8], dest: SocketAddr) -> Result<usize> {
        self.socket.send_to(buf, dest).map_err(Into::into)
    }

    /// Receive one datagram (blocking, bounded by the read timeout).
    ///
    /// Datagrams longer than `buf` are truncated by the OS.
    pub fn recv_from(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    /// Set read timeout on the socket.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.socket.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Try to clone this socket (creates a new socket handle).
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            socket: self.socket.try_clone()?,
            addr: self.addr,
        })
    }

    /// Bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Resolve `addr` to the first socket address it names.
pub fn resolve_one(addr: &str) -> Result<SocketAddr> {
    resolve(addr)?
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::Resolve {
            addr: addr.to_string(),
        })
}

impl std::fmt::Debug for DatagramSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramSocket")
            .field("addr", &self.addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_and_receive_loopback() {
        let receiver = DatagramSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let dest = receiver.local_addr();

        let sender = DatagramSocket::unbound_for(dest).unwrap();
        assert_eq!(sender.send_to(b"datagram", dest).unwrap(), 8);

        let mut buf = [0u8; 64];
        let (n, from) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"datagram");
        assert_eq!(from.port(), sender.local_addr().port());
    }

    #[test]
    fn read_timeout_surfaces_as_would_block_or_timed_out() {
        let receiver = DatagramSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let mut buf = [0u8; 8];
        let err = receiver.recv_from(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ));
    }

    #[test]
    fn resolve_one_parses_literal() {
        let addr = resolve_one("127.0.0.1:9090").unwrap();
        assert_eq!(addr.port(), 9090);
    }

    #[test]
    fn resolve_one_rejects_malformed_address() {
        let err = resolve_one("127.0.0.1").unwrap_err();
        assert!(matches!(err, TransportError::Resolve { .. }));
        assert!(err.io_kind().is_none());
    }

    #[test]
    fn bind_twice_on_same_port_fails() {
        let first = DatagramSocket::bind("127.0.0.1:0").unwrap();
        let err = DatagramSocket::bind(&first.local_addr().to_string()).unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }
}
