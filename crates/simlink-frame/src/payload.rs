//! Fixed-size stream payload records.
//!
//! Payload shape is implied by `(msg_class, msg_type)`:
//! - REQUEST/FIXED_STEP carries a [`FixedStep`]
//! - REQUEST/GET_STATUS and REQUEST/SAVE_DATA are empty
//! - RESPONSE/SAVE_DATA and RESPONSE/FIXED_STEP carry a [`ResultCode`]
//! - RESPONSE/GET_STATUS carries a [`StatusReply`] (result code + status block)

use bytes::{Buf, BufMut};
use serde::Serialize;

use crate::error::PayloadError;

pub const STEP_COUNT_SIZE: usize = 4;
pub const RESULT_CODE_SIZE: usize = 8;
pub const STATUS_SIZE: usize = 24;
pub const STATUS_REPLY_SIZE: usize = RESULT_CODE_SIZE + STATUS_SIZE;

fn expect_len(kind: &'static str, payload: &[u8], expected: usize) -> Result<(), PayloadError> {
    if payload.len() != expected {
        return Err(PayloadError::Malformed {
            kind,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

/// FIXED_STEP request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FixedStep {
    pub step_count: u32,
}

impl FixedStep {
    pub fn encode(&self) -> [u8; STEP_COUNT_SIZE] {
        self.step_count.to_le_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        expect_len("fixed step", payload, STEP_COUNT_SIZE)?;
        let mut src = payload;
        Ok(Self {
            step_count: src.get_u32_le(),
        })
    }
}

/// Outcome record returned with every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResultCode {
    pub result_code: u32,
    pub detail_code: u32,
}

impl ResultCode {
    pub fn encode(&self) -> [u8; RESULT_CODE_SIZE] {
        let mut out = [0u8; RESULT_CODE_SIZE];
        let mut dst = &mut out[..];
        dst.put_u32_le(self.result_code);
        dst.put_u32_le(self.detail_code);
        out
    }

    /// Decode from exactly 8 bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        expect_len("result code", payload, RESULT_CODE_SIZE)?;
        let mut src = payload;
        Ok(Self::read(&mut src))
    }

    fn read(src: &mut &[u8]) -> Self {
        Self {
            result_code: src.get_u32_le(),
            detail_code: src.get_u32_le(),
        }
    }
}

/// Fixed-step simulation snapshot.
///
/// Packed layout: `f32 fixed_delta`, `u64 step_index`, `i64 seconds`, `u32 nanos`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Status {
    /// Simulated seconds per step.
    pub fixed_delta: f32,
    pub step_index: u64,
    /// Simulated time, whole seconds.
    pub seconds: i64,
    /// Simulated time, nanosecond remainder.
    pub nanos: u32,
}

impl Status {
    pub fn encode(&self) -> [u8; STATUS_SIZE] {
        let mut out = [0u8; STATUS_SIZE];
        let mut dst = &mut out[..];
        dst.put_f32_le(self.fixed_delta);
        dst.put_u64_le(self.step_index);
        dst.put_i64_le(self.seconds);
        dst.put_u32_le(self.nanos);
        out
    }

    /// Decode the status block alone, from exactly 24 bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        expect_len("status", payload, STATUS_SIZE)?;
        let mut src = payload;
        Ok(Self::read(&mut src))
    }

    fn read(src: &mut &[u8]) -> Self {
        Self {
            fixed_delta: src.get_f32_le(),
            step_index: src.get_u64_le(),
            seconds: src.get_i64_le(),
            nanos: src.get_u32_le(),
        }
    }
}

/// GET_STATUS response body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatusReply {
    pub result: ResultCode,
    pub status: Status,
}

impl StatusReply {
    pub fn encode(&self) -> [u8; STATUS_REPLY_SIZE] {
        let mut out = [0u8; STATUS_REPLY_SIZE];
        out[..RESULT_CODE_SIZE].copy_from_slice(&self.result.encode());
        out[RESULT_CODE_SIZE..].copy_from_slice(&self.status.encode());
        out
    }

    /// Decode from exactly 32 bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        expect_len("get status", payload, STATUS_REPLY_SIZE)?;
        let mut src = payload;
        let result = ResultCode::read(&mut src);
        let status = Status::read(&mut src);
        Ok(Self { result, status })
    }
}

pub fn decode_result_code(payload: &[u8]) -> Result<ResultCode, PayloadError> {
    ResultCode::decode(payload)
}

pub fn decode_status(payload: &[u8]) -> Result<Status, PayloadError> {
    Status::decode(payload)
}

pub fn decode_status_reply(payload: &[u8]) -> Result<StatusReply, PayloadError> {
    StatusReply::decode(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_step_golden() {
        let step = FixedStep { step_count: 258 };
        assert_eq!(step.encode(), [0x02, 0x01, 0x00, 0x00]);
        assert_eq!(FixedStep::decode(&[0x02, 0x01, 0x00, 0x00]), Ok(step));
    }

    #[test]
    fn result_code_golden() {
        let bytes = [0x01, 0, 0, 0, 0x10, 0x27, 0, 0];
        let rc = decode_result_code(&bytes).unwrap();
        assert_eq!(
            rc,
            ResultCode {
                result_code: 1,
                detail_code: 10_000
            }
        );
        assert_eq!(rc.encode(), bytes);
    }

    #[test]
    fn result_code_requires_exactly_eight_bytes() {
        for len in [0usize, 4, 7, 9, 32] {
            let err = decode_result_code(&vec![0u8; len]).unwrap_err();
            assert_eq!(
                err,
                PayloadError::Malformed {
                    kind: "result code",
                    expected: 8,
                    actual: len
                }
            );
        }
    }

    #[test]
    fn status_reply_golden() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.extend_from_slice(&0.02f32.to_le_bytes());
        bytes.extend_from_slice(&1500u64.to_le_bytes());
        bytes.extend_from_slice(&(-3i64).to_le_bytes());
        bytes.extend_from_slice(&250_000_000u32.to_le_bytes());
        assert_eq!(bytes.len(), STATUS_REPLY_SIZE);

        let reply = decode_status_reply(&bytes).unwrap();
        assert_eq!(reply.result.result_code, 0);
        assert_eq!(reply.result.detail_code, 7);
        assert_eq!(reply.status.fixed_delta, 0.02);
        assert_eq!(reply.status.step_index, 1500);
        assert_eq!(reply.status.seconds, -3);
        assert_eq!(reply.status.nanos, 250_000_000);
        assert_eq!(reply.encode().as_slice(), bytes.as_slice());
    }

    #[test]
    fn status_reply_requires_exactly_thirty_two_bytes() {
        for len in [0usize, 8, 24, 31, 33] {
            assert!(matches!(
                decode_status_reply(&vec![0u8; len]),
                Err(PayloadError::Malformed { expected: 32, .. })
            ));
        }
    }

    #[test]
    fn status_block_alone_is_twenty_four_bytes() {
        assert!(decode_status(&[0u8; STATUS_SIZE]).is_ok());
        assert!(decode_status(&[0u8; STATUS_REPLY_SIZE]).is_err());
    }
}
