//! Socket transport for the simlink control client.
//!
//! Two kinds of transport are used against the simulator backend:
//! - a reliable TCP byte stream carrying framed requests and responses
//! - unframed UDP datagrams (manual control out, telemetry in)
//!
//! This is the lowest layer of simlink. Framing, correlation and reconnection
//! all build on the [`LinkStream`] and [`DatagramSocket`] types provided here.

pub mod error;
pub mod stream;
pub mod tcp;
pub mod udp;

pub use error::{Result, TransportError};
pub use stream::LinkStream;
pub use tcp::{connect, connect_timeout, StreamListener};
pub use udp::{resolve_one, DatagramSocket};
