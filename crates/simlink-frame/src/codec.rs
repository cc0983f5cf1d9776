use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::error::{FrameError, FrameRejected, Result};
use crate::msg::{MsgClass, MsgType, MAGIC};

/// Frame header: magic (1) + class (1) + type (4) + size (4) + request id (4) + flag (2).
pub const HEADER_SIZE: usize = 16;

/// Maximum payload size: 1 MiB.
pub const MAX_PAYLOAD: usize = 1024 * 1024;

/// A structurally valid stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Header {
    pub msg_class: MsgClass,
    pub msg_type: MsgType,
    pub payload_size: u32,
    pub request_id: u32,
    /// Reserved. Always zero on send; carried through as received.
    pub flag: u16,
}

impl Header {
    /// Header for an outbound request.
    pub fn request(msg_type: MsgType, payload_size: u32, request_id: u32) -> Self {
        Self {
            msg_class: MsgClass::Request,
            msg_type,
            payload_size,
            request_id,
            flag: 0,
        }
    }

    /// Header for a response (used by the backend emulator and tests).
    pub fn response(msg_type: MsgType, payload_size: u32, request_id: u32) -> Self {
        Self {
            msg_class: MsgClass::Response,
            ..Self::request(msg_type, payload_size, request_id)
        }
    }

    /// Pack the header into its 16-byte wire form.
    ///
    /// Wire format (all little-endian):
    /// ```text
    /// ┌───────┬───────┬──────────┬──────────────┬────────────┬──────┐
    /// │ Magic │ Class │ Type     │ Payload size │ Request id │ Flag │
    /// │ 0x4D  │ (1B)  │ (4B LE)  │ (4B LE)      │ (4B LE)    │ (2B) │
    /// └───────┴───────┴──────────┴──────────────┴────────────┴──────┘
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut dst = &mut out[..];
        dst.put_u8(MAGIC);
        dst.put_u8(self.msg_class.as_u8());
        dst.put_u32_le(self.msg_type.as_u32());
        dst.put_u32_le(self.payload_size);
        dst.put_u32_le(self.request_id);
        dst.put_u16_le(self.flag);
        out
    }

    /// Append the wire form to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.put_slice(&self.encode());
    }

    /// Decode and validate a header against the default 1 MiB payload bound.
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> std::result::Result<Self, FrameRejected> {
        Self::decode_with_limit(bytes, MAX_PAYLOAD)
    }

    /// Decode and validate a header against an explicit payload bound.
    ///
    /// Checks run in wire order: magic, class, type, then payload size.
    pub fn decode_with_limit(
        bytes: &[u8; HEADER_SIZE],
        max_payload: usize,
    ) -> std::result::Result<Self, FrameRejected> {
        let mut src = &bytes[..];

        let magic = src.get_u8();
        if magic != MAGIC {
            return Err(FrameRejected::BadMagic(magic));
        }
        let msg_class = MsgClass::try_from(src.get_u8())?;
        let msg_type = MsgType::try_from(src.get_u32_le())?;
        let payload_size = src.get_u32_le();
        if payload_size as usize > max_payload.min(MAX_PAYLOAD) {
            return Err(FrameRejected::PayloadTooLarge {
                size: payload_size,
                max: max_payload.min(MAX_PAYLOAD),
            });
        }
        let request_id = src.get_u32_le();
        let flag = src.get_u16_le();

        Ok(Self {
            msg_class,
            msg_type,
            payload_size,
            request_id,
            flag,
        })
    }
}

/// Pack a header from its fields (flag is always zero).
pub fn encode_header(
    msg_class: MsgClass,
    msg_type: MsgType,
    payload_size: u32,
    request_id: u32,
) -> [u8; HEADER_SIZE] {
    Header {
        msg_class,
        msg_type,
        payload_size,
        request_id,
        flag: 0,
    }
    .encode()
}

/// Structural inverse of [`encode_header`], with validation.
pub fn decode_header(bytes: &[u8; HEADER_SIZE]) -> std::result::Result<Header, FrameRejected> {
    Header::decode(bytes)
}

/// [`decode_header`] with a payload bound tighter than 1 MiB.
pub fn decode_header_with_limit(
    bytes: &[u8; HEADER_SIZE],
    max_payload: usize,
) -> std::result::Result<Header, FrameRejected> {
    Header::decode_with_limit(bytes, max_payload)
}

/// A complete header + payload unit from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: Header,
    /// Exactly `header.payload_size` bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame, deriving `payload_size` from the payload.
    pub fn new(
        msg_class: MsgClass,
        msg_type: MsgType,
        request_id: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        let payload = payload.into();
        Self {
            header: Header {
                msg_class,
                msg_type,
                payload_size: payload.len() as u32,
                request_id,
                flag: 0,
            },
            payload,
        }
    }

    pub fn request_id(&self) -> u32 {
        self.header.request_id
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a header + payload into `dst`.
pub fn encode_frame(
    msg_class: MsgClass,
    msg_type: MsgType,
    request_id: u32,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    let header = Header {
        msg_class,
        msg_type,
        payload_size: payload.len() as u32,
        request_id,
        flag: 0,
    };
    header.encode_into(dst);
    dst.put_slice(payload);
    Ok(())
}

/// How the synchronizer discards a rejected header candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResyncMode {
    /// Drop only the candidate's magic byte and rescan the next 15 bytes.
    #[default]
    ByteWise,
    /// Drop the whole 16-byte candidate before scanning again.
    SkipCandidate,
}

/// Configuration for frame reading and writing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default and upper bound: 1 MiB.
    pub max_payload_size: usize,
    /// Resynchronization policy after a rejected header.
    pub resync: ResyncMode,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD,
            resync: ResyncMode::default(),
            read_timeout: None,
            write_timeout: None,
        }
    }
}
