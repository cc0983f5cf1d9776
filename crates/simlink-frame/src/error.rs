/// Why a 16-byte header candidate was not accepted.
///
/// A rejection is a framing anomaly: readers discard the candidate and
/// resynchronize instead of failing the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameRejected {
    /// The first byte is not the `0x4D` sentinel.
    #[error("invalid frame magic 0x{0:02X} (expected 0x4D \"M\")")]
    BadMagic(u8),

    /// The message class is neither REQUEST nor RESPONSE.
    #[error("unknown message class {0}")]
    UnknownClass(u8),

    /// The message type is not one of the known operations.
    #[error("unknown message type 0x{0:04X}")]
    UnknownType(u32),

    /// The declared payload exceeds the configured bound.
    #[error("declared payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: u32, max: usize },
}

/// A payload whose length does not match its fixed record shape.
///
/// Payload anomalies are per-message: the frame is reported and skipped, the
/// connection is unaffected.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, thiserror::Error)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum PayloadError {
    /// Length differs from the exact record size.
    #[error("malformed {kind} payload ({actual} bytes, expected {expected})")]
    Malformed {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Length is below the minimum record size.
    #[error("truncated {kind} payload ({actual} bytes, expected at least {min})")]
    TooShort {
        kind: &'static str,
        min: usize,
        actual: usize,
    },
}

/// Errors that can occur while reading or writing frames on a stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload handed to the encoder exceeds the maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream, possibly in the middle of a frame.
    #[error("connection closed by peer")]
    PeerClosed,
}

impl FrameError {
    /// True for read/write timeouts, which leave the reader state intact.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err) if matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
