//! Resynchronizing stream framing and fixed wire records for simlink.
//!
//! This is the core value-add layer of simlink. Every stream message is framed with
//! a 16-byte little-endian header:
//! - A 1-byte magic sentinel (`0x4D`, "M") for stream synchronization
//! - A 1-byte message class (request/response) and a 4-byte message type
//! - A 4-byte payload length, bounded to 1 MiB
//! - A 4-byte request id and a 2-byte reserved flag
//!
//! Readers hunt for the sentinel byte by byte, so leading garbage or a corrupt
//! frame never tears a connection down. The unframed datagram records
//! (telemetry, manual control) live in [`datagram`].

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod datagram;
pub mod error;
pub mod msg;
pub mod payload;
pub mod reader;
pub mod sync;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::SimCodec;
pub use codec::{
    decode_header, decode_header_with_limit, encode_frame, encode_header, Frame, FrameConfig,
    Header, ResyncMode, HEADER_SIZE, MAX_PAYLOAD,
};
pub use datagram::{
    ControlState, ManualControl, Telemetry, Vec3, MANUAL_CONTROL_SIZE, TELEMETRY_ID_LEN,
    TELEMETRY_SIZE,
};
pub use error::{FrameError, FrameRejected, PayloadError, Result};
pub use msg::{MsgClass, MsgType, MAGIC};
pub use payload::{
    decode_result_code, decode_status, decode_status_reply, FixedStep, ResultCode, Status,
    StatusReply, RESULT_CODE_SIZE, STATUS_REPLY_SIZE, STATUS_SIZE, STEP_COUNT_SIZE,
};
pub use reader::FrameReader;
pub use sync::{FrameSync, SyncState, SyncStats};
pub use writer::FrameWriter;
