//! Session layer for the simlink vehicle control client.
//!
//! This is the "just works" layer. A [`Session`] keeps one stream connection to
//! the simulator alive, correlates responses with outstanding requests, and
//! reports everything that happens as [`SessionEvent`]s. The datagram channels
//! run beside it and never touch the stream connection.

pub mod config;
pub mod datagram;
pub mod error;
pub mod event;
pub mod pending;
pub mod receiver;
pub mod session;
pub mod supervisor;

pub use config::{
    DatagramConfig, PendingPolicy, SessionConfig, DEFAULT_CONTROL_ADDR, DEFAULT_RECONNECT_INTERVAL,
    DEFAULT_STREAM_ADDR, DEFAULT_TELEMETRY_BIND,
};
pub use datagram::{ControlSender, RateLimiter, TelemetryReceiver, TelemetryStats};
pub use error::{Result, SessionError};
pub use event::{EventSink, FnSink, NullSink, ResponseBody, ResponseReport, SessionEvent};
pub use pending::{PendingTable, RequestIds};
pub use receiver::{EpochEnd, Receiver};
pub use session::{Session, SessionStats};
pub use supervisor::LinkState;
