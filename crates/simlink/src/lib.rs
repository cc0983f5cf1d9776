//! Control client for a simulated vehicle backend.
//!
//! simlink speaks three channels to the simulator: a framed request/response
//! stream (fixed step, status, save), a send-only manual-control datagram
//! channel, and a receive-only telemetry datagram channel.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP stream and UDP datagram sockets
//! - [`frame`]: header codec, payload records, frame synchronizer
//! - [`session`]: pending requests, receiver loop, reconnecting supervisor
//!   and datagram channels

/// Re-export transport types.
pub mod transport {
    pub use simlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use simlink_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use simlink_session::*;
}
