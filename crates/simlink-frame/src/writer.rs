use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use simlink_transport::LinkStream;

use crate::codec::{encode_frame, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::msg::{MsgClass, MsgType};
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 256;

/// Writes complete frames to any `Write` stream.
///
/// Header and payload go out in a single buffer so a frame is never split
/// across two writes by this layer.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete frame (blocking). The header's size field is recomputed.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(
            frame.header.msg_class,
            frame.header.msg_type,
            frame.header.request_id,
            frame.payload.as_ref(),
        )
    }

    /// Encode and send a REQUEST frame.
    pub fn send_request(&mut self, msg_type: MsgType, request_id: u32, payload: &[u8]) -> Result<()> {
        self.send(MsgClass::Request, msg_type, request_id, payload)
    }

    /// Encode and send a frame.
    pub fn send(
        &mut self,
        msg_class: MsgClass,
        msg_type: MsgType,
        request_id: u32,
        payload: &[u8],
    ) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(msg_class, msg_type, request_id, payload, &mut self.buf)?;
        debug_assert_eq!(self.buf.len(), HEADER_SIZE + payload.len());

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::PeerClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
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

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<LinkStream> {
    /// Create a frame writer for `LinkStream` and apply write timeout from config.
    pub fn with_config_link(inner: LinkStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
