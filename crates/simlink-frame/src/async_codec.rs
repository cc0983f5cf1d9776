//! `tokio_util::codec` adapter over [`FrameSync`].

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{Frame, FrameConfig, Header, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::sync::{FrameSync, SyncState};

/// Resynchronizing codec for `FramedRead` / `FramedWrite`.
#[derive(Debug, Clone)]
pub struct SimCodec {
    sync: FrameSync,
    max_payload: usize,
}

impl SimCodec {
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            sync: FrameSync::new(config),
            max_payload: config.max_payload_size,
        }
    }

    pub fn sync(&self) -> &FrameSync {
        &self.sync
    }
}

impl Default for SimCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SimCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let frame = self.sync.decode(src);
        if frame.is_none() {
            src.reserve(self.sync.bytes_wanted(src.len()));
        }
        Ok(frame)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        match self.sync.state() {
            SyncState::SeekMagic if src.is_empty() => Ok(None),
            _ => Err(FrameError::PeerClosed),
        }
    }
}

impl Encoder<Frame> for SimCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.max_payload,
            });
        }
        let header = Header {
            payload_size: frame.payload.len() as u32,
            ..frame.header
        };
        dst.reserve(HEADER_SIZE + frame.payload.len());
        header.encode_into(dst);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::msg::{MsgClass, MsgType};
    use crate::payload::ResultCode;

    fn save_response(request_id: u32) -> Frame {
        let rc = ResultCode {
            result_code: 0,
            detail_code: 0,
        };
        Frame::new(
            MsgClass::Response,
            MsgType::SaveData,
            request_id,
            rc.encode().to_vec(),
        )
    }

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut sink = FramedWrite::new(server, SimCodec::new());
        let mut stream = FramedRead::new(client, SimCodec::new());

        sink.send(save_response(1)).await.unwrap();
        sink.send(save_response(2)).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().request_id(), 1);
        assert_eq!(stream.next().await.unwrap().unwrap().request_id(), 2);
    }

    #[tokio::test]
    async fn framed_read_skips_garbage() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut stream = FramedRead::new(client, SimCodec::new());

        let mut wire = BytesMut::from(&b"\x00\x01garbage"[..]);
        SimCodec::new().encode(save_response(7), &mut wire).unwrap();
        server.write_all(&wire).await.unwrap();
        drop(server);

        assert_eq!(stream.next().await.unwrap().unwrap().request_id(), 7);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn eof_mid_frame_is_peer_closed() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut stream = FramedRead::new(client, SimCodec::new());

        let mut wire = BytesMut::new();
        SimCodec::new().encode(save_response(3), &mut wire).unwrap();
        server.write_all(&wire[..HEADER_SIZE + 2]).await.unwrap();
        drop(server);

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, FrameError::PeerClosed));
    }

    #[test]
    fn encoder_rejects_oversized_payload() {
        let cfg = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut codec = SimCodec::with_config(&cfg);
        let mut dst = BytesMut::new();
        let err = codec.encode(save_response(1), &mut dst).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 8, max: 4 }));
    }
}
