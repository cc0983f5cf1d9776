use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use tracing::debug;

use crate::error::Result;

/// A connected stream to the simulator backend. Implements Read + Write.
///
/// This is the fundamental I/O type returned by [`crate::connect`] and
/// [`crate::StreamListener::accept`]. Readers and writers of the same
/// connection are obtained with [`LinkStream::try_clone`]; closing any clone
/// with [`LinkStream::shutdown`] unblocks readers on every other clone.
pub struct LinkStream {
    inner: TcpStream,
    peer: Option<SocketAddr>,
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl LinkStream {
    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            inner: stream,
            peer,
        }
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Disable Nagle's algorithm. Requests are small and latency sensitive.
    pub fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        self.inner.set_nodelay(nodelay).map_err(Into::into)
    }

    /// Try to clone this stream (creates a new socket handle).
    pub fn try_clone(&self) -> Result<Self> {
        let cloned = self.inner.try_clone()?;
        Ok(Self {
            inner: cloned,
            peer: self.peer,
        })
    }

    /// Shut down both directions of the connection.
    ///
    /// Blocked reads on any clone of this stream return immediately.
    /// Shutting down an already-closed socket is not an error.
    pub fn shutdown(&self) {
        if let Err(err) = self.inner.shutdown(Shutdown::Both) {
            debug!(error = %err, "stream shutdown on closed socket");
        }
    }

    /// Address of the connected peer, captured at connect time.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Local address of the stream.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Into::into)
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStream")
            .field("type", &"tcp")
            .field("peer", &self.peer)
            .finish()
    }
}
