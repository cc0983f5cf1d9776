//! Unframed datagram records: manual control (out) and telemetry (in).
//!
//! Neither record carries a header. Both are little-endian and packed.

use bytes::{Buf, BufMut};
use serde::Serialize;

use crate::error::PayloadError;

/// Manual-control record size: three `f64`.
pub const MANUAL_CONTROL_SIZE: usize = 24;

/// Telemetry record size: `i64` + `i32` + 24-byte id + 18 × `f32`.
pub const TELEMETRY_SIZE: usize = 108;

/// Width of the null-padded vehicle identifier.
pub const TELEMETRY_ID_LEN: usize = 24;

/// Throttle/brake/steer command sent to the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ManualControl {
    pub throttle: f64,
    pub brake: f64,
    pub steer: f64,
}

impl ManualControl {
    pub fn encode(&self) -> [u8; MANUAL_CONTROL_SIZE] {
        let mut out = [0u8; MANUAL_CONTROL_SIZE];
        let mut dst = &mut out[..];
        dst.put_f64_le(self.throttle);
        dst.put_f64_le(self.brake);
        dst.put_f64_le(self.steer);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        if data.len() != MANUAL_CONTROL_SIZE {
            return Err(PayloadError::Malformed {
                kind: "manual control",
                expected: MANUAL_CONTROL_SIZE,
                actual: data.len(),
            });
        }
        let mut src = data;
        Ok(Self {
            throttle: src.get_f64_le(),
            brake: src.get_f64_le(),
            steer: src.get_f64_le(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    fn read(src: &mut &[u8]) -> Self {
        Self {
            x: src.get_f32_le(),
            y: src.get_f32_le(),
            z: src.get_f32_le(),
        }
    }

    fn write(&self, dst: &mut &mut [u8]) {
        dst.put_f32_le(self.x);
        dst.put_f32_le(self.y);
        dst.put_f32_le(self.z);
    }
}

/// Control inputs as applied by the vehicle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ControlState {
    pub throttle: f32,
    pub brake: f32,
    pub steer: f32,
}

/// One vehicle state broadcast.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Telemetry {
    pub seconds: i64,
    pub nanos: i32,
    /// Vehicle identifier, truncated at the first NUL.
    pub id: String,
    pub location: Vec3,
    pub rotation: Vec3,
    pub local_velocity: Vec3,
    pub local_acceleration: Vec3,
    pub angular_velocity: Vec3,
    pub control: ControlState,
}

impl Telemetry {
    /// Decode a telemetry datagram.
    ///
    /// At least [`TELEMETRY_SIZE`] bytes are required; anything after the
    /// record is ignored. Invalid UTF-8 in the identifier is replaced, never
    /// rejected.
    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        if data.len() < TELEMETRY_SIZE {
            return Err(PayloadError::TooShort {
                kind: "telemetry",
                min: TELEMETRY_SIZE,
                actual: data.len(),
            });
        }

        let mut src = &data[..TELEMETRY_SIZE];
        let seconds = src.get_i64_le();
        let nanos = src.get_i32_le();

        let raw_id = &src[..TELEMETRY_ID_LEN];
        let id_len = raw_id
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TELEMETRY_ID_LEN);
        let id = String::from_utf8_lossy(&raw_id[..id_len]).into_owned();
        src.advance(TELEMETRY_ID_LEN);

        let location = Vec3::read(&mut src);
        let rotation = Vec3::read(&mut src);
        let local_velocity = Vec3::read(&mut src);
        let local_acceleration = Vec3::read(&mut src);
        let angular_velocity = Vec3::read(&mut src);
        let control = ControlState {
            throttle: src.get_f32_le(),
            brake: src.get_f32_le(),
            steer: src.get_f32_le(),
        };

        Ok(Self {
            seconds,
            nanos,
            id,
            location,
            rotation,
            local_velocity,
            local_acceleration,
            angular_velocity,
            control,
        })
    }

    /// Encode into the 108-byte record. Identifiers longer than 24 bytes are cut.
    pub fn encode(&self) -> [u8; TELEMETRY_SIZE] {
        let mut out = [0u8; TELEMETRY_SIZE];
        let mut dst = &mut out[..];
        dst.put_i64_le(self.seconds);
        dst.put_i32_le(self.nanos);

        let mut id = [0u8; TELEMETRY_ID_LEN];
        let id_bytes = self.id.as_bytes();
        let n = id_bytes.len().min(TELEMETRY_ID_LEN);
        id[..n].copy_from_slice(&id_bytes[..n]);
        dst.put_slice(&id);

        self.location.write(&mut dst);
        self.rotation.write(&mut dst);
        self.local_velocity.write(&mut dst);
        self.local_acceleration.write(&mut dst);
        self.angular_velocity.write(&mut dst);
        dst.put_f32_le(self.control.throttle);
        dst.put_f32_le(self.control.brake);
        dst.put_f32_le(self.control.steer);
        out
    }
}
