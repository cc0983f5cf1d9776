//! Message classes and types carried in the stream header.

use std::fmt;

use serde::Serialize;

use crate::error::FrameRejected;

/// Header sentinel: `'M'`.
pub const MAGIC: u8 = 0x4D;

/// Direction of a stream message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum MsgClass {
    Request = 0x01,
    Response = 0x02,
}

impl MsgClass {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            MsgClass::Request => "REQUEST",
            MsgClass::Response => "RESPONSE",
        }
    }
}

impl TryFrom<u8> for MsgClass {
    type Error = FrameRejected;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MsgClass::Request),
            0x02 => Ok(MsgClass::Response),
            other => Err(FrameRejected::UnknownClass(other)),
        }
    }
}

impl fmt::Display for MsgClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operation identified by a stream message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum MsgType {
    /// Ask the backend to persist its recorded data.
    SaveData = 0x1101,
    /// Advance the simulation by a number of fixed steps.
    FixedStep = 0x1200,
    /// Query the fixed-step simulation status.
    GetStatus = 0x1201,
}

impl MsgType {
    pub const ALL: [MsgType; 3] = [MsgType::SaveData, MsgType::FixedStep, MsgType::GetStatus];

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Returns a human-readable name for the message type.
    pub fn name(self) -> &'static str {
        match self {
            MsgType::SaveData => "SAVE_DATA",
            MsgType::FixedStep => "FIXED_STEP",
            MsgType::GetStatus => "GET_STATUS",
        }
    }
}

impl TryFrom<u32> for MsgType {
    type Error = FrameRejected;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x1101 => Ok(MsgType::SaveData),
            0x1200 => Ok(MsgType::FixedStep),
            0x1201 => Ok(MsgType::GetStatus),
            other => Err(FrameRejected::UnknownType(other)),
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:04X})", self.name(), self.as_u32())
    }
}
