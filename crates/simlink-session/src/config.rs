use std::time::Duration;

use simlink_frame::{FrameConfig, ResyncMode, MAX_PAYLOAD};

/// Backend stream endpoint.
pub const DEFAULT_STREAM_ADDR: &str = "127.0.0.1:9093";
/// Manual-control datagram destination.
pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:9090";
/// Local telemetry datagram endpoint.
pub const DEFAULT_TELEMETRY_BIND: &str = "0.0.0.0:9092";
/// Fixed (non-exponential) wait between connect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// What happens to unanswered requests when a new epoch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingPolicy {
    /// Drain every leftover entry and report it as expired.
    #[default]
    Expire,
    /// Keep leftover entries; a later response with a reused id may match them.
    Carry,
}

/// Configuration for the stream session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `host:port` of the backend stream endpoint.
    pub stream_addr: String,
    /// Per-attempt connect timeout. `None` uses the OS default.
    pub connect_timeout: Option<Duration>,
    /// Wait between connect attempts.
    pub reconnect_interval: Duration,
    /// Write timeout on the stream. `None` blocks.
    pub write_timeout: Option<Duration>,
    /// Maximum accepted payload size. Clamped to 1 MiB.
    pub max_payload_size: usize,
    /// Resynchronization policy after a rejected header.
    pub resync: ResyncMode,
    /// Reconnect policy for unanswered requests.
    pub pending_policy: PendingPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stream_addr: DEFAULT_STREAM_ADDR.to_string(),
            connect_timeout: None,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            write_timeout: None,
            max_payload_size: MAX_PAYLOAD,
            resync: ResyncMode::default(),
            pending_policy: PendingPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Frame configuration for one epoch's reader and writer.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size.min(MAX_PAYLOAD),
            resync: self.resync,
            read_timeout: None,
            write_timeout: self.write_timeout,
        }
    }
}

/// Configuration for the datagram channels.
#[derive(Debug, Clone)]
pub struct DatagramConfig {
    /// Manual-control destination.
    pub control_addr: String,
    /// Local endpoint the telemetry receiver binds.
    pub telemetry_bind: String,
    /// Minimum spacing between anomaly reports.
    pub report_interval: Duration,
    /// Receive buffer; telemetry records are 108 bytes.
    pub recv_buffer: usize,
    /// Read timeout used to observe the liveness flag.
    pub poll_interval: Duration,
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self {
            control_addr: DEFAULT_CONTROL_ADDR.to_string(),
            telemetry_bind: DEFAULT_TELEMETRY_BIND.to_string(),
            report_interval: Duration::from_millis(200),
            recv_buffer: 2048,
            poll_interval: Duration::from_millis(250),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_endpoints() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.stream_addr, "127.0.0.1:9093");
        assert_eq!(cfg.reconnect_interval, Duration::from_secs(5));
        assert_eq!(cfg.pending_policy, PendingPolicy::Expire);

        let dg = DatagramConfig::default();
        assert_eq!(dg.control_addr, "127.0.0.1:9090");
        assert_eq!(dg.telemetry_bind, "0.0.0.0:9092");
    }

    #[test]
    fn frame_config_clamps_payload_bound() {
        let cfg = SessionConfig {
            max_payload_size: usize::MAX,
            write_timeout: Some(Duration::from_secs(1)),
            ..SessionConfig::default()
        };
        let frame = cfg.frame_config();
        assert_eq!(frame.max_payload_size, MAX_PAYLOAD);
        assert_eq!(frame.write_timeout, Some(Duration::from_secs(1)));
        assert!(frame.read_timeout.is_none());
    }
}
