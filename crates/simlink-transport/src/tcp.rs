use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::LinkStream;

/// Resolve `addr` (e.g. `127.0.0.1:9093` or `localhost:9093`) to socket addresses.
pub(crate) fn resolve(addr: &str) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|err| {
            debug!(addr, error = %err, "address lookup failed");
            TransportError::Resolve {
                addr: addr.to_string(),
            }
        })?
        .collect();
    if addrs.is_empty() {
        return Err(TransportError::Resolve {
            addr: addr.to_string(),
        });
    }
    Ok(addrs)
}

/// Connect to the backend stream endpoint (blocking, OS default timeout).
pub fn connect(addr: &str) -> Result<LinkStream> {
    let stream = TcpStream::connect(addr).map_err(|e| TransportError::Connect {
        addr: addr.to_string(),
        source: e,
    })?;
    finish_connect(addr, stream)
}

/// Connect with an explicit timeout per resolved address.
///
/// Each resolved address is tried in order; the last error is reported.
pub fn connect_timeout(addr: &str, timeout: Duration) -> Result<LinkStream> {
    let mut last_err = None;
    for candidate in resolve(addr)? {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => return finish_connect(addr, stream),
            Err(err) => {
                debug!(%candidate, error = %err, "connect attempt failed");
                last_err = Some(err);
            }
        }
    }
    Err(TransportError::Connect {
        addr: addr.to_string(),
        source: last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no address to try")
        }),
    })
}

fn finish_connect(addr: &str, stream: TcpStream) -> Result<LinkStream> {
    let stream = LinkStream::from_tcp(stream);
    stream.set_nodelay(true)?;
    debug!(addr, peer = ?stream.peer_addr(), "connected stream");
    Ok(stream)
}

/// Listening side of the stream transport.
///
/// The control client never listens; this exists for the backend emulator and
/// for loopback tests.
pub struct StreamListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl StreamListener {
    /// Bind and listen on `addr`. Port `0` picks an ephemeral port.
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        let local = listener.local_addr().map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;

        info!(addr = %local, "listening on tcp stream endpoint");

        Ok(Self {
            listener,
            addr: local,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<LinkStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%peer, "accepted connection");
        let stream = LinkStream::from_tcp(stream);
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl std::fmt::Debug for StreamListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamListener")
            .field("addr", &self.addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::thread;

    use super::*;

    #[test]
    fn connect_and_accept_loopback() {
        let listener = StreamListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().to_string();

        let server = thread::spawn(move || {
            let mut stream = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).unwrap();
            stream.write_all(&buf).unwrap();
        });

        let mut client = connect(&addr).unwrap();
        client.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(client.peer_addr().map(|a| a.to_string()), Some(addr));

        server.join().unwrap();
    }

    #[test]
    fn connect_refused_reports_address() {
        // Bind then drop to find a port with nothing listening.
        let addr = {
            let listener = StreamListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().to_string()
        };

        let err = connect(&addr).unwrap_err();
        match err {
            TransportError::Connect { addr: reported, .. } => assert_eq!(reported, addr),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn connect_timeout_refused_is_connect_error() {
        let addr = {
            let listener = StreamListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().to_string()
        };

        let err = connect_timeout(&addr, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(err.io_kind().is_some());
    }

    #[test]
    fn shutdown_unblocks_cloned_reader() {
        let listener = StreamListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().to_string();
        let server = thread::spawn(move || listener.accept().unwrap());

        let client = connect(&addr).unwrap();
        let _server_side = server.join().unwrap();

        let mut reader = client.try_clone().unwrap();
        let blocked = thread::spawn(move || {
            let mut buf = [0u8; 1];
            reader.read(&mut buf)
        });

        client.shutdown();
        let result = blocked.join().unwrap();
        assert!(matches!(result, Ok(0) | Err(_)));
    }

    #[test]
    fn unresolvable_address_is_resolve_error() {
        let err = connect_timeout("no-port-here", Duration::from_millis(200)).unwrap_err();
        match err {
            TransportError::Resolve { addr } => assert_eq!(addr, "no-port-here"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bind_invalid_address_fails() {
        let err = StreamListener::bind("not-an-address").unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }
}
