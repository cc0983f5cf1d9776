use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use simlink_transport::LinkStream;

use crate::codec::{Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::sync::{FrameSync, SyncState, SyncStats};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Reads validated frames from any `Read` stream, resynchronizing on garbage.
///
/// Each read asks the transport for exactly the bytes the synchronizer still
/// needs, so nothing past the returned frame is ever pulled off the stream.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    sync: FrameSync,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            sync: FrameSync::new(&config),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::PeerClosed)` when EOF is reached, whether or not
    /// a frame was in progress. A read timeout surfaces as `FrameError::Io`
    /// without losing the partial frame; calling again resumes it.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.sync.decode(&mut self.buf) {
                return Ok(frame);
            }

            let wanted = self
                .sync
                .bytes_wanted(self.buf.len())
                .min(READ_CHUNK_SIZE);
            let start = self.buf.len();
            self.buf.resize(start + wanted, 0);

            let read = match self.inner.read(&mut self.buf[start..]) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {
                    self.buf.truncate(start);
                    continue;
                }
                Err(err) => {
                    self.buf.truncate(start);
                    return Err(FrameError::Io(err));
                }
            };
            self.buf.truncate(start + read);

            if read == 0 {
                return Err(FrameError::PeerClosed);
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent header validation.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
        self.sync.set_max_payload_size(max_payload_size);
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Synchronizer counters.
    pub fn stats(&self) -> SyncStats {
        self.sync.stats()
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }
}

impl FrameReader<LinkStream> {
    /// Create a frame reader for `LinkStream` and apply read timeout from config.
    pub fn with_config_link(inner: LinkStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: simlink_transport::TransportError) -> FrameError {
    match err {
        simlink_transport::TransportError::Io(io)
        | simlink_transport::TransportError::Accept(io) => FrameError::Io(io),
        simlink_transport::TransportError::Bind { source, .. }
        | simlink_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
